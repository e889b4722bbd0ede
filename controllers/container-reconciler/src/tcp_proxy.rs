//! TCP proxy exposure
//!
//! Publishes a namespaced Service port on a cluster-wide public TCP port
//! through the ingress controller. Three shared objects in the controller
//! namespace are edited:
//!
//! - the `tcp-services` ConfigMap, `<public port>: <ns>/<service>:<port>`
//! - the controller Service, port `proxied-tcp-<P>`
//! - the controller Deployment, container port `tcp-<P>` with a host port
//!   and the `--tcp-services-configmap` flag
//!
//! Every edit removes what was there for the port before adding, so
//! repeating an enable converges. There is no transaction across the three
//! objects; a later call repairs a partial one.

use crate::cluster::{create_typed, get_typed, replace_typed, ClusterApi, ResourceKind};
use crate::config::EngineConfig;
use crate::error::ReconcileError;
use crate::manifest::object_meta;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, ContainerPort, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Service port name for a proxied public port
pub fn service_port_name(public_port: u16) -> String {
    format!("proxied-tcp-{}", public_port)
}

/// Controller container port name for a proxied public port
pub fn container_port_name(public_port: u16) -> String {
    format!("tcp-{}", public_port)
}

/// ConfigMap value routing a public port to a backend
pub fn backend_entry(namespace: &str, service: &str, target_port: u16) -> String {
    format!("{}/{}:{}", namespace, service, target_port)
}

/// Controller edits still in flight after the ConfigMap was written
///
/// Dropping a sweep aborts it; call [`ProxySweep::wait`] or
/// [`ProxySweep::detach`].
#[must_use = "a dropped sweep aborts the controller edits"]
#[derive(Debug, Default)]
pub struct ProxySweep {
    description: String,
    tasks: JoinSet<Result<(), ReconcileError>>,
}

impl ProxySweep {
    fn new(description: String) -> Self {
        Self {
            description,
            tasks: JoinSet::new(),
        }
    }

    /// Number of controller objects being edited
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no controller object needs an edit
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every edit; the first failure is returned after all finish
    pub async fn wait(mut self) -> Result<(), ReconcileError> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let result = joined.map_err(ReconcileError::from).and_then(|r| r);
            if let Err(e) = result {
                error!("Proxy sweep '{}' failed: {}", self.description, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                debug!("Proxy sweep '{}' complete", self.description);
                Ok(())
            }
        }
    }

    /// Let the edits finish in the background, logging failures
    pub fn detach(self) {
        tokio::spawn(async move {
            let _ = self.wait().await;
        });
    }
}

/// Edits the ingress controller's ConfigMap, Service and Deployment
#[derive(Debug, Clone)]
pub struct TcpProxyManager {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    configmap: String,
    controller_name: String,
}

/// Controller objects whose name matches the configured fragment
///
/// An exact name wins; otherwise every object containing the fragment is
/// returned.
fn matching<T: DeserializeOwned>(
    listed: Vec<serde_json::Value>,
    fragment: &str,
    kind: ResourceKind,
    namespace: &str,
) -> Result<Vec<(String, T)>, ReconcileError> {
    let mut matches = Vec::new();
    for value in listed {
        let name = value
            .pointer("/metadata/name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        if name.contains(fragment) {
            matches.push((name, serde_json::from_value(value)?));
        }
    }
    if let Some(index) = matches.iter().position(|(name, _)| name == fragment) {
        return Ok(vec![matches.swap_remove(index)]);
    }
    match matches.len() {
        0 => warn!("No {} matching '{}' in {}", kind, fragment, namespace),
        1 => {}
        n => warn!(
            "{} {} objects match '{}' in {}; patching all of them",
            n, kind, fragment, namespace
        ),
    }
    Ok(matches)
}

fn strip_service_ports(service: &mut Service, ports: &[u16]) {
    if let Some(existing) = service.spec.as_mut().and_then(|s| s.ports.as_mut()) {
        existing.retain(|p| {
            !ports
                .iter()
                .any(|&port| p.name.as_deref() == Some(service_port_name(port).as_str()))
        });
    }
}

fn strip_container_ports(deployment: &mut Deployment, ports: &[u16]) {
    let Some(container) = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .and_then(|p| p.containers.first_mut())
    else {
        return;
    };
    if let Some(existing) = container.ports.as_mut() {
        existing.retain(|p| {
            !ports
                .iter()
                .any(|&port| p.name.as_deref() == Some(container_port_name(port).as_str()))
        });
    }
}

async fn edit_services(
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    fragment: String,
    remove: Vec<u16>,
    add: Option<(u16, String)>,
) -> Result<(), ReconcileError> {
    let listed = cluster.list(ResourceKind::Service, &namespace, None).await?;
    for (name, mut service) in matching::<Service>(listed, &fragment, ResourceKind::Service, &namespace)? {
        let before = service.spec.clone();
        strip_service_ports(&mut service, &remove);
        if let Some((port, protocol)) = &add {
            service
                .spec
                .get_or_insert_with(Default::default)
                .ports
                .get_or_insert_with(Vec::new)
                .push(ServicePort {
                    name: Some(service_port_name(*port)),
                    port: i32::from(*port),
                    target_port: Some(IntOrString::Int(i32::from(*port))),
                    protocol: Some(protocol.clone()),
                    ..Default::default()
                });
        }
        if service.spec == before {
            debug!("Controller Service {}/{} unchanged", namespace, name);
            continue;
        }
        service.status = None;
        debug!("Updating controller Service {}/{}", namespace, name);
        replace_typed(cluster.as_ref(), ResourceKind::Service, &namespace, &name, &service).await?;
    }
    Ok(())
}

async fn edit_deployments(
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    fragment: String,
    remove: Vec<u16>,
    add: Option<(u16, String, String)>,
) -> Result<(), ReconcileError> {
    let listed = cluster.list(ResourceKind::Deployment, &namespace, None).await?;
    for (name, mut deployment) in matching::<Deployment>(listed, &fragment, ResourceKind::Deployment, &namespace)? {
        let before = deployment.spec.clone();
        strip_container_ports(&mut deployment, &remove);
        if let Some((port, protocol, flag)) = &add {
            let Some(container) = deployment
                .spec
                .as_mut()
                .and_then(|s| s.template.spec.as_mut())
                .and_then(|p| p.containers.first_mut())
            else {
                warn!("Controller Deployment {}/{} has no containers", namespace, name);
                continue;
            };
            container.ports.get_or_insert_with(Vec::new).push(ContainerPort {
                name: Some(container_port_name(*port)),
                container_port: i32::from(*port),
                host_port: Some(i32::from(*port)),
                protocol: Some(protocol.clone()),
                ..Default::default()
            });
            let args = container.args.get_or_insert_with(Vec::new);
            if !args.iter().any(|a| a == flag) {
                args.push(flag.clone());
            }
        }
        if deployment.spec == before {
            debug!("Controller Deployment {}/{} unchanged", namespace, name);
            continue;
        }
        deployment.status = None;
        debug!("Updating controller Deployment {}/{}", namespace, name);
        replace_typed(cluster.as_ref(), ResourceKind::Deployment, &namespace, &name, &deployment).await?;
    }
    Ok(())
}

impl TcpProxyManager {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: &EngineConfig) -> Self {
        Self {
            cluster,
            namespace: config.ingress_namespace.clone(),
            configmap: config.tcp_services_configmap.clone(),
            controller_name: config.ingress_controller_name.clone(),
        }
    }

    /// Controller flag pointing at the ConfigMap
    pub fn configmap_flag(&self) -> String {
        format!("--tcp-services-configmap={}/{}", self.namespace, self.configmap)
    }

    /// Protocol of the backend Service port, defaulting to TCP
    async fn backend_protocol(&self, service: &str, namespace: &str, target_port: u16) -> Result<String, ReconcileError> {
        let backend: Option<Service> = get_typed(self.cluster.as_ref(), ResourceKind::Service, namespace, service).await?;
        let Some(backend) = backend else {
            return Err(ReconcileError::NotFound(format!("Service {}/{}", namespace, service)));
        };
        let protocol = backend
            .spec
            .and_then(|s| s.ports)
            .unwrap_or_default()
            .into_iter()
            .find(|p| p.port == i32::from(target_port))
            .and_then(|p| p.protocol);
        Ok(protocol.unwrap_or_else(|| "TCP".to_string()))
    }

    /// Apply `edit` to the ConfigMap data, creating the map if needed
    async fn edit_configmap<F>(&self, edit: F) -> Result<(), ReconcileError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let live: Option<ConfigMap> =
            get_typed(self.cluster.as_ref(), ResourceKind::ConfigMap, &self.namespace, &self.configmap).await?;
        match live {
            Some(mut configmap) => {
                edit(configmap.data.get_or_insert_with(BTreeMap::new));
                replace_typed(
                    self.cluster.as_ref(),
                    ResourceKind::ConfigMap,
                    &self.namespace,
                    &self.configmap,
                    &configmap,
                )
                .await?;
            }
            None => {
                let mut data = BTreeMap::new();
                edit(&mut data);
                info!("Creating ConfigMap {}/{}", self.namespace, self.configmap);
                let configmap = ConfigMap {
                    metadata: object_meta(&self.configmap, &self.namespace, BTreeMap::new()),
                    data: Some(data),
                    ..Default::default()
                };
                create_typed(self.cluster.as_ref(), ResourceKind::ConfigMap, &self.namespace, &configmap).await?;
            }
        }
        Ok(())
    }

    fn sweep(&self, description: String, remove: Vec<u16>, add: Option<(u16, String)>) -> ProxySweep {
        let mut sweep = ProxySweep::new(description);
        sweep.tasks.spawn(edit_services(
            self.cluster.clone(),
            self.namespace.clone(),
            self.controller_name.clone(),
            remove.clone(),
            add.clone(),
        ));
        let flag = self.configmap_flag();
        sweep.tasks.spawn(edit_deployments(
            self.cluster.clone(),
            self.namespace.clone(),
            self.controller_name.clone(),
            remove,
            add.map(|(port, protocol)| (port, protocol, flag)),
        ));
        sweep
    }

    /// Refuse a public port the controller already serves for itself
    async fn check_public_port(&self, public_port: u16) -> Result<(), ReconcileError> {
        let listed = self.cluster.list(ResourceKind::Service, &self.namespace, None).await?;
        let ours = service_port_name(public_port);
        for (name, service) in matching::<Service>(listed, &self.controller_name, ResourceKind::Service, &self.namespace)? {
            let taken = service
                .spec
                .and_then(|s| s.ports)
                .unwrap_or_default()
                .into_iter()
                .find(|p| p.port == i32::from(public_port) && p.name.as_deref() != Some(ours.as_str()));
            if let Some(port) = taken {
                return Err(ReconcileError::Validation(format!(
                    "public port {} is already served by {}/{} as '{}'",
                    public_port,
                    self.namespace,
                    name,
                    port.name.unwrap_or_default()
                )));
            }
        }
        Ok(())
    }

    /// Route `public_port` to `service:target_port` in `namespace`
    ///
    /// The ConfigMap is written before returning; controller edits are
    /// handed back as a sweep.
    pub async fn enable(
        &self,
        service: &str,
        namespace: &str,
        public_port: u16,
        target_port: u16,
    ) -> Result<ProxySweep, ReconcileError> {
        self.enable_replacing(service, namespace, public_port, target_port, &[])
            .await
    }

    /// Like [`TcpProxyManager::enable`], also withdrawing `stale` ports in
    /// the same pass so the controller objects see one edit each
    pub async fn enable_replacing(
        &self,
        service: &str,
        namespace: &str,
        public_port: u16,
        target_port: u16,
        stale: &[u16],
    ) -> Result<ProxySweep, ReconcileError> {
        info!(
            "Exposing {}/{}:{} on public port {}",
            namespace, service, target_port, public_port
        );
        self.check_public_port(public_port).await?;
        let protocol = self.backend_protocol(service, namespace, target_port).await?;
        let entry = backend_entry(namespace, service, target_port);
        self.edit_configmap(|data| {
            for port in stale {
                data.remove(&port.to_string());
            }
            data.insert(public_port.to_string(), entry);
        })
        .await?;

        let mut remove: Vec<u16> = stale.iter().copied().filter(|p| *p != public_port).collect();
        remove.push(public_port);
        let description = if stale.is_empty() {
            format!("enable {}", public_port)
        } else {
            format!("move {:?} -> {}", stale, public_port)
        };
        Ok(self.sweep(description, remove, Some((public_port, protocol))))
    }

    /// Stop routing one public port
    pub async fn disable(&self, public_port: u16) -> Result<ProxySweep, ReconcileError> {
        self.disable_many(&[public_port]).await
    }

    /// Stop routing a batch of public ports in one pass over each object
    pub async fn disable_many(&self, public_ports: &[u16]) -> Result<ProxySweep, ReconcileError> {
        info!("Removing public TCP ports {:?}", public_ports);
        let live: Option<ConfigMap> =
            get_typed(self.cluster.as_ref(), ResourceKind::ConfigMap, &self.namespace, &self.configmap).await?;
        let present = live
            .and_then(|c| c.data)
            .is_some_and(|data| public_ports.iter().any(|p| data.contains_key(&p.to_string())));
        if present {
            self.edit_configmap(|data| {
                for port in public_ports {
                    data.remove(&port.to_string());
                }
            })
            .await?;
        } else {
            debug!("No ConfigMap entries for {:?}", public_ports);
        }
        Ok(self.sweep(
            format!("disable {:?}", public_ports),
            public_ports.to_vec(),
            None,
        ))
    }
}
