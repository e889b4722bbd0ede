//! CI/CD pipeline management
//!
//! A container with a connected repository gets a Tekton Triggers object
//! set in the pipeline namespace and a push webhook on its git provider.
//! The webhook id is written back onto the container so the hook can be
//! removed later.

pub mod manifests;


use crate::cluster::{apply, delete_if_exists, ClusterApi, ResourceKind};
use crate::config::EngineConfig;
use crate::error::{ClusterError, ReconcileError};
use git_provider_client::{GitProviderFactory, WebhookRequest};
use manifests::{PipelineContext, PipelineNames, PipelineObject};
use platform_model::{ContainerSpec, Environment, GitProvider, ProviderKind, Registry, RepoConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Kubernetes object name limit
const MAX_NAME_LEN: usize = 63;

#[derive(Clone)]
pub struct PipelineManager {
    cluster: Arc<dyn ClusterApi>,
    providers: Arc<dyn GitProviderFactory>,
    config: EngineConfig,
}

impl std::fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineManager")
            .field("cluster", &self.cluster)
            .field("namespace", &self.config.pipeline_namespace)
            .finish_non_exhaustive()
    }
}

/// 40 hex characters shaped like a commit id
pub fn pseudo_commit() -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.push_str(&Uuid::new_v4().simple().to_string());
    hex.truncate(40);
    hex
}

/// `<prefix>-<5 hex>`, with the prefix cut so the name stays a valid label
pub fn generated_name(prefix: &str) -> String {
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(5);
    let room = MAX_NAME_LEN - suffix.len() - 1;
    let prefix = if prefix.len() > room { &prefix[..room] } else { prefix };
    format!("{}-{}", prefix.trim_end_matches('-'), suffix)
}

fn connected(container: &ContainerSpec) -> Result<&RepoConfig, ReconcileError> {
    container.connected_repo().ok_or_else(|| {
        ReconcileError::Validation(format!("container {} has no connected repository", container.iid))
    })
}

impl PipelineManager {
    pub fn new(cluster: Arc<dyn ClusterApi>, providers: Arc<dyn GitProviderFactory>, config: EngineConfig) -> Self {
        Self {
            cluster,
            providers,
            config,
        }
    }

    fn namespace(&self) -> &str {
        &self.config.pipeline_namespace
    }

    fn check_provider(repo: &RepoConfig, git_provider: &GitProvider) -> Result<(), ReconcileError> {
        if repo.provider != git_provider.provider {
            return Err(ReconcileError::Validation(format!(
                "repository is on {} but git provider {} is {}",
                repo.provider, git_provider.iid, git_provider.provider
            )));
        }
        Ok(())
    }

    /// Provision the pipeline and register the webhook
    ///
    /// On success the webhook id is stored on `container` and returned. On
    /// any failure everything created so far is removed before the error
    /// is returned.
    pub async fn create(
        &self,
        container: &mut ContainerSpec,
        environment: &Environment,
        git_provider: &GitProvider,
        registry: &Registry,
    ) -> Result<String, ReconcileError> {
        let repo = connected(container)?.clone();
        Self::check_provider(&repo, git_provider)?;
        let host = self.config.webhook_host()?;
        let client = self.providers.client_for(git_provider)?;
        let names = PipelineNames::new(repo.provider, &container.slug);
        info!(
            "Creating pipeline for {}/{} ({} {})",
            environment.namespace(),
            container.iid,
            repo.provider,
            repo.url
        );

        let secret_token = Uuid::new_v4().simple().to_string();
        let objects = {
            let ctx = PipelineContext {
                container: &*container,
                repo: &repo,
                environment,
                git_provider,
                registry,
                config: &self.config,
                names: &names,
            };
            manifests::render(&ctx, &client.branch_filter_expression(&repo.branch), &secret_token)?
        };

        let mut created: Vec<&PipelineObject> = Vec::new();
        for object in &objects {
            if let Err(e) = self.write(object).await {
                error!("Failed to create {} {}: {}", object.kind, object.name, e);
                self.compensate(&created).await;
                return Err(e);
            }
            created.push(object);
        }

        let request = WebhookRequest {
            url: host.url(&names.listener_path),
            secret: secret_token,
            verify_ssl: host.verify_ssl(),
            branch: repo.branch.clone(),
        };
        let webhook_id = match client.create_webhook(&repo.url, &request).await {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to register webhook on {}: {}", repo.url, e);
                self.compensate(&created).await;
                return Err(e.into());
            }
        };
        info!("Registered webhook {} on {} -> {}", webhook_id, repo.url, request.url);

        if let Some(repo) = container.source.repo_mut() {
            repo.webhook_id = Some(webhook_id.clone());
        }
        Ok(webhook_id)
    }

    async fn write(&self, object: &PipelineObject) -> Result<(), ReconcileError> {
        debug!("Applying {} {}/{}", object.kind, self.namespace(), object.name);
        apply(
            self.cluster.as_ref(),
            object.kind,
            self.namespace(),
            &object.name,
            object.body.clone(),
        )
        .await?;
        Ok(())
    }

    /// Remove objects of a failed create, newest first
    async fn compensate(&self, created: &[&PipelineObject]) {
        for object in created.iter().rev() {
            if let Err(e) = delete_if_exists(self.cluster.as_ref(), object.kind, self.namespace(), &object.name).await {
                warn!(
                    "Failed to clean up {} {}/{}: {}",
                    object.kind,
                    self.namespace(),
                    object.name,
                    e
                );
            }
        }
    }

    /// Remove a container's pipeline objects and its webhook
    ///
    /// Objects are swept for every provider prefix so a provider switch
    /// leaves nothing behind. Failures are logged and do not stop the sweep.
    pub async fn delete(&self, container: &ContainerSpec, git_provider: Option<&GitProvider>) {
        for provider in ProviderKind::ALL {
            let names = PipelineNames::new(provider, &container.slug);
            for (kind, name) in names.objects().into_iter().rev() {
                match delete_if_exists(self.cluster.as_ref(), kind, self.namespace(), name).await {
                    Ok(true) => info!("Deleted {} {}/{}", kind, self.namespace(), name),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to delete {} {}/{}: {}", kind, self.namespace(), name, e),
                }
            }
        }

        let Some(repo) = container.repo() else {
            return;
        };
        let Some(webhook_id) = repo.webhook_id.as_deref() else {
            return;
        };
        let Some(git_provider) = git_provider.filter(|g| g.provider == repo.provider) else {
            warn!(
                "No {} credentials to remove webhook {} from {}",
                repo.provider, webhook_id, repo.url
            );
            return;
        };
        let client = match self.providers.client_for(git_provider) {
            Ok(client) => client,
            Err(e) => {
                warn!("Cannot remove webhook {} from {}: {}", webhook_id, repo.url, e);
                return;
            }
        };
        match client.delete_webhook(&repo.url, webhook_id).await {
            Ok(()) => info!("Deleted webhook {} from {}", webhook_id, repo.url),
            Err(e) => warn!("Failed to delete webhook {} from {}: {}", webhook_id, repo.url, e),
        }
    }

    /// Start a build by hand
    ///
    /// The PipelineRun comes from the stored TriggerTemplate with a fresh
    /// pseudo commit id. If the template is missing it is rendered from the
    /// container instead. Returns the run name.
    pub async fn trigger(
        &self,
        container: &ContainerSpec,
        environment: &Environment,
        git_provider: &GitProvider,
        registry: &Registry,
    ) -> Result<String, ReconcileError> {
        let repo = connected(container)?;
        Self::check_provider(repo, git_provider)?;
        let names = PipelineNames::new(repo.provider, &container.slug);
        let revision = pseudo_commit();

        let stored = self
            .cluster
            .get(ResourceKind::TriggerTemplate, self.namespace(), &names.trigger_template)
            .await?;
        let template = stored
            .as_ref()
            .and_then(|t| t.pointer("/spec/resourcetemplates/0"))
            .cloned();
        let mut run = match template {
            Some(template) => {
                let rendered = serde_json::to_string(&template)?
                    .replace(manifests::REVISION_PARAM, &revision)
                    .replace(manifests::REPO_URL_PARAM, &repo.url);
                serde_json::from_str::<Value>(&rendered)?
            }
            None => {
                warn!(
                    "TriggerTemplate {}/{} not found, rendering run from container {}",
                    self.namespace(),
                    names.trigger_template,
                    container.iid
                );
                let ctx = PipelineContext {
                    container,
                    repo,
                    environment,
                    git_provider,
                    registry,
                    config: &self.config,
                    names: &names,
                };
                manifests::pipeline_run(&ctx, &revision, &repo.url)
            }
        };

        let name = generated_name(&names.run_prefix);
        if let Some(metadata) = run.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("generateName");
            metadata.insert("name".to_string(), Value::String(name.clone()));
            metadata.insert("namespace".to_string(), Value::String(self.namespace().to_string()));
        }
        info!(
            "Triggering PipelineRun {}/{} for {} at {}",
            self.namespace(),
            name,
            container.iid,
            revision
        );
        self.cluster
            .create(ResourceKind::PipelineRun, self.namespace(), &run)
            .await?;
        Ok(name)
    }

    async fn pipeline_run(&self, run_name: &str) -> Result<Value, ReconcileError> {
        self.cluster
            .get(ResourceKind::PipelineRun, self.namespace(), run_name)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("PipelineRun {}/{}", self.namespace(), run_name)))
    }

    /// Run an existing PipelineRun's spec again under a new name
    pub async fn rerun(&self, run_name: &str) -> Result<String, ReconcileError> {
        let existing = self.pipeline_run(run_name).await?;
        let mut spec = existing.get("spec").cloned().unwrap_or_else(|| json!({}));
        if let Some(spec) = spec.as_object_mut() {
            spec.remove("status");
        }
        let name = generated_name(&format!("{}-r", run_name));
        let run = json!({
            "apiVersion": ResourceKind::PipelineRun.api_version(),
            "kind": ResourceKind::PipelineRun.kind(),
            "metadata": {
                "name": name,
                "namespace": self.namespace(),
                "labels": existing.pointer("/metadata/labels").cloned().unwrap_or_else(|| json!({})),
            },
            "spec": spec,
        });
        info!("Re-running PipelineRun {}/{} as {}", self.namespace(), run_name, name);
        self.cluster
            .create(ResourceKind::PipelineRun, self.namespace(), &run)
            .await?;
        Ok(name)
    }

    /// Ask Tekton to stop a running PipelineRun
    pub async fn cancel(&self, run_name: &str) -> Result<(), ReconcileError> {
        let patch = json!({"spec": {"status": "Cancelled"}});
        match self
            .cluster
            .patch(ResourceKind::PipelineRun, self.namespace(), run_name, &patch)
            .await
        {
            Ok(_) => {
                info!("Cancelled PipelineRun {}/{}", self.namespace(), run_name);
                Ok(())
            }
            Err(ClusterError::NotFound { .. }) => Err(ReconcileError::NotFound(format!(
                "PipelineRun {}/{}",
                self.namespace(),
                run_name
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
