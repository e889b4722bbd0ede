//! Reconciliation coordinator
//!
//! Entry point for the request layer. Sequences the pipeline manager, the
//! resource reconcilers and the TCP proxy manager for one container and
//! action. Creates run in dependency order, deletes in reverse, and updates
//! only touch the categories in the change set.

use crate::changes::{ChangeSet, ResourceCategory};
use crate::cluster::{create_typed, delete_if_exists, get_typed, ClusterApi, ResourceKind};
use crate::config::EngineConfig;
use crate::error::ReconcileError;
use crate::manifest::{names, Definition, MANAGED_BY, MANAGED_BY_LABEL};
use crate::pipeline::PipelineManager;
use crate::resources::{ResourceReconciler, ResourceReconcilers};
use crate::tcp_proxy::{ProxySweep, TcpProxyManager};
use git_provider_client::GitProviderFactory;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use platform_model::{ContainerSpec, ContainerType, Environment, GitProvider, Registry};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What the caller wants done with a container
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Provision everything the container needs
    Create,
    /// Carries the stored snapshot; the pipeline manager needs the old
    /// repository and webhook id to clean up
    Update { previous: Box<ContainerSpec> },
    /// Remove everything, tolerating objects already gone
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Update { .. } => "update",
            Action::Delete => "delete",
        })
    }
}

/// Result of one reconciliation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Categories whose reconciler ran
    pub touched: ChangeSet,
    /// Webhook id now stored on the container, if any
    pub webhook_id: Option<String>,
}

/// Runs create, update and delete for containers and environments
#[derive(Debug, Clone)]
pub struct Coordinator {
    cluster: Arc<dyn ClusterApi>,
    resources: ResourceReconcilers,
    pipelines: PipelineManager,
    proxy: TcpProxyManager,
    config: EngineConfig,
}

fn required<'a, T>(value: Option<&'a T>, what: &str, container: &ContainerSpec) -> Result<&'a T, ReconcileError> {
    value.ok_or_else(|| ReconcileError::Validation(format!("container {} needs a {}", container.iid, what)))
}

/// Public port of an enabled proxy
fn proxy_port(container: &ContainerSpec) -> Option<u16> {
    let proxy = &container.networking.tcp_proxy;
    if container.is_networked() && proxy.enabled {
        proxy.public_port
    } else {
        None
    }
}

impl Coordinator {
    /// All components share `cluster`
    pub fn new(cluster: Arc<dyn ClusterApi>, providers: Arc<dyn GitProviderFactory>, config: EngineConfig) -> Self {
        Self {
            resources: ResourceReconcilers::new(cluster.clone()),
            pipelines: PipelineManager::new(cluster.clone(), providers, config.clone()),
            proxy: TcpProxyManager::new(cluster.clone(), &config),
            cluster,
            config,
        }
    }

    /// Effective engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Manual pipeline operations (trigger, rerun, cancel)
    pub fn pipelines(&self) -> &PipelineManager {
        &self.pipelines
    }

    /// Reconcile one container
    ///
    /// `changes` is only consulted for updates. A webhook registered along
    /// the way is written onto `container`.
    pub async fn reconcile(
        &self,
        action: &Action,
        container: &mut ContainerSpec,
        environment: &Environment,
        git_provider: Option<&GitProvider>,
        registry: Option<&Registry>,
        changes: &ChangeSet,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        info!(
            "Reconciling container {}/{} ({})",
            environment.namespace(),
            container.iid,
            action
        );
        let outcome = match action {
            Action::Create => self.create(container, environment, git_provider, registry).await?,
            Action::Update { previous } => {
                self.update(previous, container, environment, git_provider, registry, changes)
                    .await?
            }
            Action::Delete => self.delete(container, environment, git_provider).await?,
        };
        info!(
            "Reconciled container {}/{} ({}): {}",
            environment.namespace(),
            container.iid,
            action,
            outcome.touched
        );
        Ok(outcome)
    }

    async fn create(
        &self,
        container: &mut ContainerSpec,
        environment: &Environment,
        git_provider: Option<&GitProvider>,
        registry: Option<&Registry>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        container.validate()?;
        let mut outcome = ReconcileOutcome::default();
        let namespace = environment.namespace();
        let name = names::primary(&container.iid);

        if container.connected_repo().is_some() {
            let git_provider = required(git_provider, "git provider", container)?;
            let registry = required(registry, "registry", container)?;
            let id = self.pipelines.create(container, environment, git_provider, registry).await?;
            outcome.webhook_id = Some(id);
            outcome.touched.insert(ResourceCategory::Repo);
        }

        let def = Definition::new(container, environment, registry, &self.config);
        // claims and services exist before the workload that references them
        if def.container.storage().is_some() {
            self.resources.pvc.create(&def, &name, namespace).await?;
            outcome.touched.insert(ResourceCategory::Pvc);
        }
        if def.container.is_networked() {
            self.resources.service.create(&def, &name, namespace).await?;
            outcome.touched.insert(ResourceCategory::Service);
        }
        self.workload(def.container.container_type)
            .create(&def, &name, namespace)
            .await?;
        outcome
            .touched
            .insert(ResourceCategory::workload(def.container.container_type));
        if def.container.container_type == ContainerType::Deployment {
            self.resources.hpa.create(&def, &name, namespace).await?;
            outcome.touched.insert(ResourceCategory::Hpa);
        }

        if def.container.is_networked() {
            self.resources.ingress.create(&def, &name, namespace).await?;
            outcome.touched.insert(ResourceCategory::Ingress);
            self.resources.custom_domain.create(&def, &name, namespace).await?;
            outcome.touched.insert(ResourceCategory::CustomDomain);
        }
        if let Some(public_port) = proxy_port(def.container) {
            let sweep = self
                .proxy
                .enable(&name, namespace, public_port, def.container.networking.container_port)
                .await?;
            self.settle(sweep).await?;
            outcome.touched.insert(ResourceCategory::TcpProxy);
        }
        Ok(outcome)
    }

    /// Reject updates Kubernetes could not apply in place
    fn check_update(previous: &ContainerSpec, next: &ContainerSpec) -> Result<(), ReconcileError> {
        if previous.iid != next.iid {
            return Err(ReconcileError::Validation(format!(
                "iid cannot change ({} -> {})",
                previous.iid, next.iid
            )));
        }
        if previous.container_type != next.container_type {
            return Err(ReconcileError::Validation(format!(
                "type of {} cannot change ({} -> {})",
                next.iid, previous.container_type, next.container_type
            )));
        }
        if next.container_type == ContainerType::StatefulSet {
            match (previous.storage(), next.storage()) {
                (Some(before), Some(after)) if before.access_modes != after.access_modes => {
                    return Err(ReconcileError::Validation(format!(
                        "storage access modes of StatefulSet {} cannot change",
                        next.iid
                    )));
                }
                (Some(_), None) | (None, Some(_)) => {
                    return Err(ReconcileError::Validation(format!(
                        "storage cannot be enabled or disabled on StatefulSet {}",
                        next.iid
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn update(
        &self,
        previous: &ContainerSpec,
        container: &mut ContainerSpec,
        environment: &Environment,
        git_provider: Option<&GitProvider>,
        registry: Option<&Registry>,
        changes: &ChangeSet,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        container.validate()?;
        Self::check_update(previous, container)?;
        let mut outcome = ReconcileOutcome::default();
        let namespace = environment.namespace();
        let name = names::primary(&container.iid);
        debug!("Change set for {}/{}: {}", namespace, name, changes);

        if changes.contains(ResourceCategory::Repo) {
            if previous.repo().is_some() {
                self.pipelines.delete(previous, git_provider).await;
            }
            if let Some(repo) = container.source.repo_mut() {
                repo.webhook_id = None;
            }
            if container.connected_repo().is_some() {
                let git_provider = required(git_provider, "git provider", container)?;
                let registry = required(registry, "registry", container)?;
                let id = self.pipelines.create(container, environment, git_provider, registry).await?;
                outcome.webhook_id = Some(id);
            }
            outcome.touched.insert(ResourceCategory::Repo);
        } else {
            outcome.webhook_id = container.repo().and_then(|r| r.webhook_id.clone());
        }

        let def = Definition::new(container, environment, registry, &self.config);
        if changes.contains(ResourceCategory::Pvc) {
            self.resources.pvc.update(&def, &name, namespace).await?;
            outcome.touched.insert(ResourceCategory::Pvc);
        }
        if changes.contains(ResourceCategory::Service) {
            self.resources.service.update(&def, &name, namespace).await?;
            outcome.touched.insert(ResourceCategory::Service);
        }
        let workload = ResourceCategory::workload(def.container.container_type);
        if changes.contains(workload) {
            self.workload(def.container.container_type)
                .update(&def, &name, namespace)
                .await?;
            if def.container.container_type == ContainerType::StatefulSet {
                self.resources.pvc.prune_scaled_claims(&def, namespace).await?;
            }
            outcome.touched.insert(workload);
        }
        if changes.contains(ResourceCategory::Hpa) && def.container.container_type == ContainerType::Deployment {
            self.resources.hpa.update(&def, &name, namespace).await?;
            outcome.touched.insert(ResourceCategory::Hpa);
        }
        if changes.contains(ResourceCategory::Ingress) {
            self.resources.ingress.update(&def, &name, namespace).await?;
            outcome.touched.insert(ResourceCategory::Ingress);
        }
        if changes.contains(ResourceCategory::CustomDomain) {
            self.resources.custom_domain.update(&def, &name, namespace).await?;
            outcome.touched.insert(ResourceCategory::CustomDomain);
        }
        if changes.contains(ResourceCategory::TcpProxy) {
            let stale: Vec<u16> = proxy_port(previous)
                .into_iter()
                .filter(|old| Some(*old) != proxy_port(def.container))
                .collect();
            // one sweep per reconciliation; two detached sweeps would race on
            // the shared controller objects
            let sweep = match proxy_port(def.container) {
                Some(public_port) => {
                    self.proxy
                        .enable_replacing(
                            &name,
                            namespace,
                            public_port,
                            def.container.networking.container_port,
                            &stale,
                        )
                        .await?
                }
                None if !stale.is_empty() => self.proxy.disable_many(&stale).await?,
                None => ProxySweep::default(),
            };
            self.settle(sweep).await?;
            outcome.touched.insert(ResourceCategory::TcpProxy);
        }
        Ok(outcome)
    }

    async fn delete(
        &self,
        container: &mut ContainerSpec,
        environment: &Environment,
        git_provider: Option<&GitProvider>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut outcome = ReconcileOutcome::default();
        let namespace = environment.namespace();
        let name = names::primary(&container.iid);
        let workload = ResourceCategory::workload(container.container_type);

        self.workload(container.container_type).delete(&name, namespace).await?;
        outcome.touched.insert(workload);
        if container.container_type == ContainerType::Deployment {
            self.resources.hpa.delete(&name, namespace).await?;
            outcome.touched.insert(ResourceCategory::Hpa);
        }
        {
            let def = Definition::new(container, environment, None, &self.config);
            self.resources.pvc.delete_for(&def, namespace).await?;
            outcome.touched.insert(ResourceCategory::Pvc);
        }
        if container.is_networked() {
            self.resources.service.delete(&name, namespace).await?;
            outcome.touched.insert(ResourceCategory::Service);
            self.resources.ingress.delete(&name, namespace).await?;
            outcome.touched.insert(ResourceCategory::Ingress);
            self.resources.custom_domain.delete(&name, namespace).await?;
            outcome.touched.insert(ResourceCategory::CustomDomain);
        }
        if let Some(public_port) = proxy_port(container) {
            let sweep = self.proxy.disable(public_port).await?;
            self.settle(sweep).await?;
            outcome.touched.insert(ResourceCategory::TcpProxy);
        }
        if container.repo().is_some() {
            self.pipelines.delete(container, git_provider).await;
            if let Some(repo) = container.source.repo_mut() {
                repo.webhook_id = None;
            }
            outcome.touched.insert(ResourceCategory::Repo);
        }
        Ok(outcome)
    }

    fn workload(&self, container_type: ContainerType) -> &dyn ResourceReconciler {
        match container_type {
            ContainerType::Deployment => &self.resources.deployment,
            ContainerType::StatefulSet => &self.resources.statefulset,
            ContainerType::CronJob => &self.resources.cronjob,
        }
    }

    /// Wait for or detach controller edits, per configuration
    async fn settle(&self, sweep: ProxySweep) -> Result<(), ReconcileError> {
        if self.config.await_proxy_sweep {
            sweep.wait().await
        } else {
            sweep.detach();
            Ok(())
        }
    }

    /// Expose `service:target_port` on a public TCP port
    pub async fn enable_proxy(
        &self,
        service: &str,
        namespace: &str,
        public_port: u16,
        target_port: u16,
    ) -> Result<(), ReconcileError> {
        let sweep = self.proxy.enable(service, namespace, public_port, target_port).await?;
        self.settle(sweep).await
    }

    /// Withdraw one or more public TCP ports
    pub async fn disable_proxy(&self, public_ports: &[u16]) -> Result<(), ReconcileError> {
        let sweep = self.proxy.disable_many(public_ports).await?;
        self.settle(sweep).await
    }

    /// Make sure the environment's namespace exists
    pub async fn create_environment(&self, environment: &Environment) -> Result<(), ReconcileError> {
        let namespace = environment.namespace();
        let live: Option<Namespace> = get_typed(self.cluster.as_ref(), ResourceKind::Namespace, "", namespace).await?;
        if live.is_some() {
            debug!("Namespace {} already exists", namespace);
            return Ok(());
        }
        let mut labels = environment.labels.clone();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
        let object = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        info!("Creating namespace {}", namespace);
        create_typed(self.cluster.as_ref(), ResourceKind::Namespace, "", &object).await?;
        Ok(())
    }

    /// Delete every member container, then the namespace
    ///
    /// Member failures are logged and the sweep continues; the first one is
    /// returned once the namespace is gone.
    pub async fn delete_environment(
        &self,
        environment: &Environment,
        members: &mut [ContainerSpec],
        git_providers: &[GitProvider],
    ) -> Result<(), ReconcileError> {
        let namespace = environment.namespace();
        info!("Deleting environment {} with {} containers", namespace, members.len());
        let mut first_error = None;
        for member in members.iter_mut() {
            let git_provider = member
                .repo()
                .and_then(|repo| git_providers.iter().find(|g| g.provider == repo.provider));
            if let Err(e) = self
                .reconcile(&Action::Delete, member, environment, git_provider, None, &ChangeSet::new())
                .await
            {
                error!("Failed to delete container {}/{}: {}", namespace, member.iid, e);
                first_error.get_or_insert(e);
            }
        }

        match delete_if_exists(self.cluster.as_ref(), ResourceKind::Namespace, "", namespace).await {
            Ok(true) => info!("Deleted namespace {}", namespace),
            Ok(false) => debug!("Namespace {} already absent", namespace),
            Err(e) => {
                warn!("Failed to delete namespace {}: {}", namespace, e);
                first_error.get_or_insert(e.into());
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
