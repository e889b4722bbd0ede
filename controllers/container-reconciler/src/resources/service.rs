//! Service reconciler
//!
//! Every networked container gets a ClusterIP Service named after it.
//! StatefulSets additionally get the headless Service they are bound to.

use super::{adopt_metadata, ResourceReconciler};
use crate::cluster::{create_typed, delete_if_exists, get_typed, replace_typed, ClusterApi, ResourceKind};
use crate::error::ReconcileError;
use crate::manifest::{names, selector_labels, Definition};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use platform_model::ContainerType;
use std::sync::Arc;
use tracing::info;

/// Port name on the container Service
pub const SERVICE_PORT_NAME: &str = "main";

#[derive(Debug, Clone)]
pub struct ServiceReconciler {
    cluster: Arc<dyn ClusterApi>,
}

fn port(container_port: u16) -> ServicePort {
    ServicePort {
        name: Some(SERVICE_PORT_NAME.to_string()),
        port: i32::from(container_port),
        target_port: Some(IntOrString::Int(i32::from(container_port))),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// ClusterIP Service, or the headless variant when `headless` is set
pub fn render(def: &Definition<'_>, name: &str, headless: bool) -> Service {
    Service {
        metadata: def.metadata(name),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip: headless.then(|| "None".to_string()),
            selector: Some(selector_labels(def.iid())),
            ports: Some(vec![port(def.container.networking.container_port)]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Replace ports and selector; cluster IPs are immutable and kept
pub fn merge(live: Service, desired: Service) -> Service {
    let mut spec = live.spec.unwrap_or_default();
    if let Some(desired_spec) = desired.spec {
        spec.selector = desired_spec.selector;
        spec.ports = desired_spec.ports;
    }
    Service {
        metadata: adopt_metadata(live.metadata, desired.metadata),
        spec: Some(spec),
        status: None,
    }
}

impl ServiceReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Names managed for a container of `container_type`
    fn service_names(name: &str, container_type: ContainerType) -> Vec<(String, bool)> {
        let mut services = vec![(name.to_string(), false)];
        if container_type == ContainerType::StatefulSet {
            services.push((names::headless_service(name), true));
        }
        services
    }

    async fn upsert(&self, def: &Definition<'_>, name: &str, namespace: &str, headless: bool) -> Result<(), ReconcileError> {
        let desired = render(def, name, headless);
        let live: Option<Service> = get_typed(self.cluster.as_ref(), ResourceKind::Service, namespace, name).await?;
        match live {
            Some(live) => {
                replace_typed(
                    self.cluster.as_ref(),
                    ResourceKind::Service,
                    namespace,
                    name,
                    &merge(live, desired),
                )
                .await?;
            }
            None => {
                info!("Creating Service {}/{}", namespace, name);
                create_typed(self.cluster.as_ref(), ResourceKind::Service, namespace, &desired).await?;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ResourceReconciler for ServiceReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    async fn create(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        if !def.container.is_networked() {
            return Ok(());
        }
        for (service, headless) in Self::service_names(name, def.container.container_type) {
            info!("Creating Service {}/{}", namespace, service);
            let rendered = render(def, &service, headless);
            create_typed(self.cluster.as_ref(), ResourceKind::Service, namespace, &rendered).await?;
        }
        Ok(())
    }

    async fn update(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        if !def.container.is_networked() {
            return Ok(());
        }
        info!("Reconciling Service {}/{}", namespace, name);
        for (service, headless) in Self::service_names(name, def.container.container_type) {
            self.upsert(def, &service, namespace, headless).await?;
        }
        Ok(())
    }

    /// Removes the Service and, if present, its headless sibling
    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        for service in [name.to_string(), names::headless_service(name)] {
            if delete_if_exists(self.cluster.as_ref(), ResourceKind::Service, namespace, &service).await? {
                info!("Deleted Service {}/{}", namespace, service);
            }
        }
        Ok(())
    }
}
