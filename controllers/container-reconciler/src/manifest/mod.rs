//! Manifest building blocks
//!
//! Pure functions from a container definition to typed `k8s-openapi`
//! objects. Nothing in here talks to the cluster.

pub mod names;
pub mod pod;

use crate::config::EngineConfig;
use crate::error::ReconcileError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use platform_model::{ContainerSpec, Environment, Registry};
use std::collections::BTreeMap;

pub const APP_LABEL: &str = "app";
pub const CONTAINER_LABEL: &str = "keel.microscaler.io/container";
pub const ENVIRONMENT_LABEL: &str = "keel.microscaler.io/environment";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "keel";

/// Everything a resource reconciler needs to render a container's objects
#[derive(Debug, Clone, Copy)]
pub struct Definition<'a> {
    pub container: &'a ContainerSpec,
    pub environment: &'a Environment,
    pub registry: Option<&'a Registry>,
    pub config: &'a EngineConfig,
}

impl<'a> Definition<'a> {
    pub fn new(
        container: &'a ContainerSpec,
        environment: &'a Environment,
        registry: Option<&'a Registry>,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            container,
            environment,
            registry,
            config,
        }
    }

    pub fn iid(&self) -> &'a str {
        &self.container.iid
    }

    pub fn namespace(&self) -> &'a str {
        self.environment.namespace()
    }

    /// Labels stamped on every generated object
    pub fn labels(&self) -> BTreeMap<String, String> {
        labels(&self.container.iid, &self.environment.iid)
    }

    pub fn metadata(&self, name: &str) -> ObjectMeta {
        object_meta(name, self.namespace(), self.labels())
    }

    /// Image for a freshly created workload
    ///
    /// Registry containers run their image. Repository containers start on
    /// the registry's `latest` tag until the pipeline rolls a build out.
    pub fn image(&self) -> Result<String, ReconcileError> {
        if let Some(image) = self.container.source.registry_image() {
            return Ok(image.to_string());
        }
        let registry = self.registry.ok_or_else(|| {
            ReconcileError::Validation(format!(
                "container {} is built from a repository but no registry was supplied",
                self.container.iid
            ))
        })?;
        Ok(format!("{}:latest", registry.image_name(&self.container.iid)))
    }

    /// Whether the image is owned by the build pipeline once deployed
    pub fn pipeline_owns_image(&self) -> bool {
        self.container.repo().is_some()
    }
}

/// Standard label set
pub fn labels(container_iid: &str, environment_iid: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), container_iid.to_string()),
        (CONTAINER_LABEL.to_string(), container_iid.to_string()),
        (ENVIRONMENT_LABEL.to_string(), environment_iid.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
    ])
}

/// Pod selector: `app=<iid>`
pub fn selector_labels(container_iid: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), container_iid.to_string())])
}

pub fn label_selector(container_iid: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(selector_labels(container_iid)),
        ..Default::default()
    }
}

/// Label selector string for list calls
pub fn selector_string(container_iid: &str) -> String {
    format!("{}={}", APP_LABEL, container_iid)
}

pub fn object_meta(name: &str, namespace: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}
