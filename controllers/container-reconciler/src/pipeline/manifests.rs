//! Pipeline object builders
//!
//! Tekton Triggers objects have no typed bindings, so they are assembled
//! as JSON. Core objects go through `k8s-openapi` and are serialized the
//! same way, giving the manager one uniform list to create and delete.

use crate::cluster::{manifest, ResourceKind};
use crate::config::EngineConfig;
use crate::error::ReconcileError;
use crate::manifest::{labels, object_meta};
use git_provider_client::provider_trait::cel_string;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
    ServiceBackendPort,
};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding, RoleRef, Subject};
use platform_model::{ContainerSpec, ContainerType, Environment, GitProvider, ProviderKind, Registry, RepoConfig};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Secret key holding the webhook shared secret
pub const SECRET_TOKEN_KEY: &str = "secretToken";
/// Secret key holding the git access token used for cloning
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Port of the Service Tekton creates for an EventListener
pub const LISTENER_PORT: i32 = 8080;
/// Placeholders resolved by the TriggerTemplate
pub const REVISION_PARAM: &str = "$(tt.params.git-revision)";
pub const REPO_URL_PARAM: &str = "$(tt.params.git-repo-url)";
/// Label carrying the container slug on every pipeline object
pub const PIPELINE_LABEL: &str = "keel.microscaler.io/pipeline";

const LISTENER_ROLE: &str = "tekton-triggers-eventlistener-roles";
const LISTENER_CLUSTER_ROLE: &str = "tekton-triggers-eventlistener-clusterroles";

/// Deterministic names of one container's pipeline objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineNames {
    pub service_account: String,
    pub webhook_secret: String,
    pub role_binding: String,
    pub cluster_role_binding: String,
    pub trigger_binding: String,
    pub trigger_template: String,
    pub event_listener: String,
    pub ingress: String,
    /// Service Tekton creates in front of the listener
    pub listener_service: String,
    /// Public path of the listener, e.g. `/tekton-<slug>`
    pub listener_path: String,
    /// Prefix for generated PipelineRun names
    pub run_prefix: String,
}

impl PipelineNames {
    pub fn new(provider: ProviderKind, slug: &str) -> Self {
        let p = provider.as_str();
        let event_listener = format!("{}-listener-{}", p, slug);
        Self {
            service_account: format!("{}-sa-{}", p, slug),
            webhook_secret: format!("{}-webhook-secret-{}", p, slug),
            role_binding: format!("{}-triggers-binding-{}", p, slug),
            cluster_role_binding: format!("{}-triggers-clusterbinding-{}", p, slug),
            trigger_binding: format!("{}-binding-{}", p, slug),
            trigger_template: format!("{}-template-{}", p, slug),
            listener_service: format!("el-{}", event_listener),
            event_listener,
            ingress: format!("{}-ingress-{}", p, slug),
            listener_path: format!("/tekton-{}", slug),
            run_prefix: format!("{}-run-{}", p, slug),
        }
    }

    /// Every object with its kind, in creation order
    pub fn objects(&self) -> Vec<(ResourceKind, &str)> {
        vec![
            (ResourceKind::ServiceAccount, self.service_account.as_str()),
            (ResourceKind::Secret, self.webhook_secret.as_str()),
            (ResourceKind::RoleBinding, self.role_binding.as_str()),
            (ResourceKind::ClusterRoleBinding, self.cluster_role_binding.as_str()),
            (ResourceKind::TriggerBinding, self.trigger_binding.as_str()),
            (ResourceKind::TriggerTemplate, self.trigger_template.as_str()),
            (ResourceKind::EventListener, self.event_listener.as_str()),
            (ResourceKind::Ingress, self.ingress.as_str()),
        ]
    }
}

/// One object ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineObject {
    pub kind: ResourceKind,
    pub name: String,
    pub body: Value,
}

/// Everything the builders read
#[derive(Debug, Clone, Copy)]
pub struct PipelineContext<'a> {
    pub container: &'a ContainerSpec,
    pub repo: &'a RepoConfig,
    pub environment: &'a Environment,
    pub git_provider: &'a GitProvider,
    pub registry: &'a Registry,
    pub config: &'a EngineConfig,
    pub names: &'a PipelineNames,
}

impl PipelineContext<'_> {
    fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = labels(&self.container.iid, &self.environment.iid);
        labels.insert(PIPELINE_LABEL.to_string(), self.container.slug.clone());
        labels
    }

    fn namespace(&self) -> &str {
        &self.config.pipeline_namespace
    }

    fn metadata_json(&self, name: &str) -> Value {
        json!({
            "name": name,
            "namespace": self.namespace(),
            "labels": self.labels(),
        })
    }
}

fn service_account(ctx: &PipelineContext<'_>) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(&ctx.names.service_account, ctx.namespace(), ctx.labels()),
        ..Default::default()
    }
}

fn webhook_secret(ctx: &PipelineContext<'_>, secret_token: &str) -> Secret {
    let mut data = BTreeMap::from([
        (SECRET_TOKEN_KEY.to_string(), secret_token.to_string()),
        (ACCESS_TOKEN_KEY.to_string(), ctx.git_provider.access_token.clone()),
    ]);
    if let Some(username) = &ctx.git_provider.username {
        data.insert("username".to_string(), username.clone());
    }
    Secret {
        metadata: object_meta(&ctx.names.webhook_secret, ctx.namespace(), ctx.labels()),
        type_: Some("Opaque".to_string()),
        string_data: Some(data),
        ..Default::default()
    }
}

fn listener_subject(ctx: &PipelineContext<'_>) -> Vec<Subject> {
    vec![Subject {
        kind: "ServiceAccount".to_string(),
        name: ctx.names.service_account.clone(),
        namespace: Some(ctx.namespace().to_string()),
        api_group: None,
    }]
}

fn role_binding(ctx: &PipelineContext<'_>) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(&ctx.names.role_binding, ctx.namespace(), ctx.labels()),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: LISTENER_ROLE.to_string(),
        },
        subjects: Some(listener_subject(ctx)),
    }
}

fn cluster_role_binding(ctx: &PipelineContext<'_>) -> ClusterRoleBinding {
    let mut metadata = object_meta(&ctx.names.cluster_role_binding, "", ctx.labels());
    metadata.namespace = None;
    ClusterRoleBinding {
        metadata,
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: LISTENER_CLUSTER_ROLE.to_string(),
        },
        subjects: Some(listener_subject(ctx)),
    }
}

/// Push payload fields carrying the commit and clone URL
fn payload_params(provider: ProviderKind) -> (&'static str, &'static str) {
    match provider {
        ProviderKind::GitHub => ("$(body.head_commit.id)", "$(body.repository.clone_url)"),
        ProviderKind::GitLab => ("$(body.checkout_sha)", "$(body.project.git_http_url)"),
        ProviderKind::Bitbucket => (
            "$(body.push.changes[0].new.target.hash)",
            "$(body.repository.links.html.href)",
        ),
    }
}

fn trigger_binding(ctx: &PipelineContext<'_>) -> Value {
    let (revision, repo_url) = payload_params(ctx.repo.provider);
    json!({
        "apiVersion": ResourceKind::TriggerBinding.api_version(),
        "kind": ResourceKind::TriggerBinding.kind(),
        "metadata": ctx.metadata_json(&ctx.names.trigger_binding),
        "spec": {
            "params": [
                {"name": "git-revision", "value": revision},
                {"name": "git-repo-url", "value": repo_url},
            ],
        },
    })
}

fn target_kind(container_type: ContainerType) -> &'static str {
    match container_type {
        ContainerType::Deployment => "Deployment",
        ContainerType::StatefulSet => "StatefulSet",
        ContainerType::CronJob => "CronJob",
    }
}

/// PipelineRun stamped out by the TriggerTemplate and by manual triggers
pub fn pipeline_run(ctx: &PipelineContext<'_>, revision: &str, repo_url: &str) -> Value {
    let container = ctx.container;
    let mut workspaces = vec![
        json!({
            "name": "source",
            "volumeClaimTemplate": {
                "spec": {
                    "accessModes": ["ReadWriteOnce"],
                    "resources": {"requests": {"storage": "1Gi"}},
                },
            },
        }),
        json!({"name": "git-credentials", "secret": {"secretName": ctx.names.webhook_secret}}),
    ];
    if let Some(push_secret) = &ctx.registry.push_secret {
        workspaces.push(json!({"name": "docker-config", "secret": {"secretName": push_secret}}));
    }

    json!({
        "apiVersion": ResourceKind::PipelineRun.api_version(),
        "kind": ResourceKind::PipelineRun.kind(),
        "metadata": {
            "generateName": format!("{}-", ctx.names.run_prefix),
            "namespace": ctx.namespace(),
            "labels": ctx.labels(),
        },
        "spec": {
            "pipelineRef": {"name": ctx.config.pipeline_name},
            "taskRunTemplate": {"serviceAccountName": ctx.names.service_account},
            "params": [
                {"name": "repo-url", "value": repo_url},
                {"name": "revision", "value": revision},
                {"name": "branch", "value": ctx.repo.branch},
                {"name": "image-name", "value": ctx.registry.image_name(&container.iid)},
                {"name": "registry-endpoint", "value": ctx.registry.endpoint},
                {"name": "dockerfile", "value": ctx.repo.dockerfile},
                {"name": "context-path", "value": ctx.repo.path.trim_start_matches('/')},
                {"name": "target-namespace", "value": ctx.environment.namespace()},
                {"name": "target-kind", "value": target_kind(container.container_type)},
                {"name": "target-name", "value": container.iid},
                {"name": "container-name", "value": container.iid},
            ],
            "workspaces": workspaces,
        },
    })
}

fn trigger_template(ctx: &PipelineContext<'_>) -> Value {
    json!({
        "apiVersion": ResourceKind::TriggerTemplate.api_version(),
        "kind": ResourceKind::TriggerTemplate.kind(),
        "metadata": ctx.metadata_json(&ctx.names.trigger_template),
        "spec": {
            "params": [
                {"name": "git-revision"},
                {"name": "git-repo-url"},
            ],
            "resourcetemplates": [pipeline_run(ctx, REVISION_PARAM, REPO_URL_PARAM)],
        },
    })
}

/// CEL clause restricting builds to pushes touching `watch_path`
///
/// Bitbucket push payloads carry no file lists, so no clause is produced.
pub fn watch_path_filter(provider: ProviderKind, watch_path: Option<&str>) -> Option<String> {
    let path = watch_path.map(|p| p.trim_start_matches('/')).filter(|p| !p.is_empty())?;
    match provider {
        ProviderKind::GitHub | ProviderKind::GitLab => {
            let path = cel_string(path);
            Some(format!(
                "body.commits.exists(c, c.added.exists(f, f.startsWith('{0}')) || c.modified.exists(f, f.startsWith('{0}')) || c.removed.exists(f, f.startsWith('{0}')))",
                path
            ))
        }
        ProviderKind::Bitbucket => None,
    }
}

/// Full listener filter: branch clause, plus the watch path clause if any
pub fn listener_filter(branch_filter: &str, provider: ProviderKind, watch_path: Option<&str>) -> String {
    match watch_path_filter(provider, watch_path) {
        Some(paths) => format!("({}) && ({})", branch_filter, paths),
        None => branch_filter.to_string(),
    }
}

fn provider_interceptor(ctx: &PipelineContext<'_>) -> Value {
    let event_types = match ctx.repo.provider {
        ProviderKind::GitHub => json!(["push"]),
        ProviderKind::GitLab => json!(["Push Hook"]),
        ProviderKind::Bitbucket => json!(["repo:push"]),
    };
    json!({
        "ref": {"name": ctx.repo.provider.as_str(), "kind": "ClusterInterceptor"},
        "params": [
            {"name": "secretRef", "value": {"secretName": ctx.names.webhook_secret, "secretKey": SECRET_TOKEN_KEY}},
            {"name": "eventTypes", "value": event_types},
        ],
    })
}

fn event_listener(ctx: &PipelineContext<'_>, branch_filter: &str) -> Value {
    let filter = listener_filter(branch_filter, ctx.repo.provider, ctx.repo.watch_path.as_deref());
    json!({
        "apiVersion": ResourceKind::EventListener.api_version(),
        "kind": ResourceKind::EventListener.kind(),
        "metadata": ctx.metadata_json(&ctx.names.event_listener),
        "spec": {
            "serviceAccountName": ctx.names.service_account,
            "triggers": [{
                "name": format!("{}-push", ctx.names.event_listener),
                "interceptors": [
                    provider_interceptor(ctx),
                    {
                        "ref": {"name": "cel", "kind": "ClusterInterceptor"},
                        "params": [{"name": "filter", "value": filter}],
                    },
                ],
                "bindings": [{"ref": ctx.names.trigger_binding}],
                "template": {"ref": ctx.names.trigger_template},
            }],
        },
    })
}

fn listener_ingress(ctx: &PipelineContext<'_>) -> Ingress {
    let mut metadata = object_meta(&ctx.names.ingress, ctx.namespace(), ctx.labels());
    metadata.annotations = Some(BTreeMap::from([(
        "nginx.ingress.kubernetes.io/rewrite-target".to_string(),
        "/".to_string(),
    )]));
    Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: Some(ctx.config.ingress_class.clone()),
            rules: Some(vec![IngressRule {
                host: ctx.config.primary_domain().map(str::to_string),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(ctx.names.listener_path.clone()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: ctx.names.listener_service.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(LISTENER_PORT),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn object(kind: ResourceKind, name: &str, body: Value) -> PipelineObject {
    PipelineObject {
        kind,
        name: name.to_string(),
        body,
    }
}

/// Render the full object set in creation order
///
/// The Ingress is included only when the cluster is reachable by domain or
/// reverse proxy.
pub fn render(
    ctx: &PipelineContext<'_>,
    branch_filter: &str,
    secret_token: &str,
) -> Result<Vec<PipelineObject>, ReconcileError> {
    let names = ctx.names;
    let mut objects = vec![
        object(
            ResourceKind::ServiceAccount,
            &names.service_account,
            manifest(ResourceKind::ServiceAccount, &service_account(ctx))?,
        ),
        object(
            ResourceKind::Secret,
            &names.webhook_secret,
            manifest(ResourceKind::Secret, &webhook_secret(ctx, secret_token))?,
        ),
        object(
            ResourceKind::RoleBinding,
            &names.role_binding,
            manifest(ResourceKind::RoleBinding, &role_binding(ctx))?,
        ),
        object(
            ResourceKind::ClusterRoleBinding,
            &names.cluster_role_binding,
            manifest(ResourceKind::ClusterRoleBinding, &cluster_role_binding(ctx))?,
        ),
        object(ResourceKind::TriggerBinding, &names.trigger_binding, trigger_binding(ctx)),
        object(ResourceKind::TriggerTemplate, &names.trigger_template, trigger_template(ctx)),
        object(
            ResourceKind::EventListener,
            &names.event_listener,
            event_listener(ctx, branch_filter),
        ),
    ];
    if ctx.config.exposes_listener_ingress() {
        objects.push(object(
            ResourceKind::Ingress,
            &names.ingress,
            manifest(ResourceKind::Ingress, &listener_ingress(ctx))?,
        ));
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let names = PipelineNames::new(ProviderKind::GitHub, "x7k2");
        assert_eq!(names.service_account, "github-sa-x7k2");
        assert_eq!(names.webhook_secret, "github-webhook-secret-x7k2");
        assert_eq!(names.role_binding, "github-triggers-binding-x7k2");
        assert_eq!(names.cluster_role_binding, "github-triggers-clusterbinding-x7k2");
        assert_eq!(names.event_listener, "github-listener-x7k2");
        assert_eq!(names.listener_service, "el-github-listener-x7k2");
        assert_eq!(names.listener_path, "/tekton-x7k2");
        assert_eq!(names.objects().len(), 8);
    }

    #[test]
    fn test_listener_filter() {
        let branch = "body.ref == 'refs/heads/main'";
        assert_eq!(listener_filter(branch, ProviderKind::GitHub, None), branch);
        assert_eq!(listener_filter(branch, ProviderKind::GitHub, Some("/")), branch);
        let filtered = listener_filter(branch, ProviderKind::GitLab, Some("/services/api"));
        assert!(filtered.starts_with("(body.ref == 'refs/heads/main') && (body.commits.exists"));
        assert!(filtered.contains("startsWith('services/api')"));
        assert_eq!(listener_filter(branch, ProviderKind::Bitbucket, Some("services/api")), branch);
    }
}
