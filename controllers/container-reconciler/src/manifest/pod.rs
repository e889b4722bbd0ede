//! Pod template rendering shared by Deployments, StatefulSets and CronJobs

use super::names::DATA_VOLUME;
use super::{selector_labels, Definition};
use crate::error::ReconcileError;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, HTTPGetAction, LocalObjectReference,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe as K8sProbe, ResourceRequirements, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use platform_model::{cpu_quantity, memory_quantity, PodConfig, Probe, ProbeCheck};
use std::collections::BTreeMap;

/// Identity variables injected ahead of the user's own
pub const ENVIRONMENT_IID_VAR: &str = "KEEL_ENVIRONMENT_IID";
pub const CONTAINER_IID_VAR: &str = "KEEL_CONTAINER_IID";

/// How the data volume reaches the pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataVolume {
    /// No storage
    None,
    /// Mount an existing claim by name
    Claim(String),
    /// Mount the StatefulSet claim template; the volume comes from the template
    Template,
}

/// CPU and memory requests and limits as cluster quantities
pub fn resources(pod: &PodConfig) -> Result<ResourceRequirements, ReconcileError> {
    let requests = BTreeMap::from([
        (
            "cpu".to_string(),
            Quantity(cpu_quantity("podConfig.cpuRequest", pod.cpu_request, pod.cpu_request_type)?),
        ),
        (
            "memory".to_string(),
            Quantity(memory_quantity(
                "podConfig.memoryRequest",
                pod.memory_request,
                pod.memory_request_type,
            )?),
        ),
    ]);
    let limits = BTreeMap::from([
        (
            "cpu".to_string(),
            Quantity(cpu_quantity("podConfig.cpuLimit", pod.cpu_limit, pod.cpu_limit_type)?),
        ),
        (
            "memory".to_string(),
            Quantity(memory_quantity("podConfig.memoryLimit", pod.memory_limit, pod.memory_limit_type)?),
        ),
    ]);
    Ok(ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    })
}

/// Identity variables first, then the user's list in order
pub fn env_vars(def: &Definition<'_>) -> Vec<EnvVar> {
    let identity = [
        (ENVIRONMENT_IID_VAR, def.environment.iid.as_str()),
        (CONTAINER_IID_VAR, def.container.iid.as_str()),
    ];
    identity
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .chain(
            def.container
                .variables
                .iter()
                .map(|v| (v.name.clone(), v.value.clone())),
        )
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..Default::default()
        })
        .collect()
}

/// Disabled or absent probes render to nothing
pub fn probe(probe: Option<&Probe>) -> Option<K8sProbe> {
    let probe = probe.filter(|p| p.enabled)?;
    let mut rendered = K8sProbe {
        initial_delay_seconds: probe.initial_delay_seconds,
        period_seconds: probe.period_seconds,
        timeout_seconds: probe.timeout_seconds,
        failure_threshold: probe.failure_threshold,
        success_threshold: probe.success_threshold,
        ..Default::default()
    };
    match &probe.check {
        ProbeCheck::Exec { command } => {
            rendered.exec = Some(ExecAction {
                command: Some(command.clone()),
            });
        }
        ProbeCheck::HttpGet { path, port } => {
            rendered.http_get = Some(HTTPGetAction {
                path: Some(path.clone()),
                port: IntOrString::Int(i32::from(*port)),
                ..Default::default()
            });
        }
        ProbeCheck::TcpSocket { port } => {
            rendered.tcp_socket = Some(TCPSocketAction {
                port: IntOrString::Int(i32::from(*port)),
                host: None,
            });
        }
    }
    Some(rendered)
}

/// The single application container
pub fn container(def: &Definition<'_>, image: &str, data: &DataVolume) -> Result<Container, ReconcileError> {
    let spec = def.container;
    let ports = (spec.is_networked() && spec.networking.container_port != 0).then(|| {
        vec![ContainerPort {
            name: Some("main".to_string()),
            container_port: i32::from(spec.networking.container_port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]
    });
    let volume_mounts = match (data, spec.storage()) {
        (DataVolume::None, _) | (_, None) => None,
        (_, Some(storage)) => Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: storage.mount_path.clone(),
            ..Default::default()
        }]),
    };

    Ok(Container {
        name: spec.iid.clone(),
        image: Some(image.to_string()),
        env: Some(env_vars(def)),
        ports,
        resources: Some(resources(&spec.pod_config)?),
        startup_probe: probe(spec.probes.startup.as_ref()),
        readiness_probe: probe(spec.probes.readiness.as_ref()),
        liveness_probe: probe(spec.probes.liveness.as_ref()),
        volume_mounts,
        ..Default::default()
    })
}

/// Pod template with labels, restart policy and optional data volume
pub fn pod_template(def: &Definition<'_>, image: &str, data: &DataVolume) -> Result<PodTemplateSpec, ReconcileError> {
    let volumes = match (data, def.container.storage()) {
        (DataVolume::Claim(claim), Some(_)) => Some(vec![Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.clone(),
                read_only: None,
            }),
            ..Default::default()
        }]),
        _ => None,
    };

    let mut labels = def.labels();
    labels.extend(selector_labels(def.iid()));

    let pull_secrets = def
        .registry
        .and_then(|r| r.pull_secret.as_ref())
        .map(|secret| {
            vec![LocalObjectReference {
                name: secret.clone(),
            }]
        });

    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container(def, image, data)?],
            restart_policy: Some(def.container.pod_config.restart_policy.as_str().to_string()),
            image_pull_secrets: pull_secrets,
            volumes,
            ..Default::default()
        }),
    })
}

/// Image of the first container in a live pod template
pub fn live_image(template: Option<&PodTemplateSpec>) -> Option<String> {
    template?
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .clone()
}

/// Fold a freshly rendered template into the live one
///
/// Only the fields rendered here are overwritten; anything else on the live
/// pod template (pull secrets, sidecars, restart annotations) is kept. With
/// `keep_live_image` the running image wins over the rendered one.
pub fn merge_pod_template(live: &mut PodTemplateSpec, desired: PodTemplateSpec, keep_live_image: bool) {
    let desired_meta = desired.metadata.unwrap_or_default();
    live.metadata
        .get_or_insert_with(Default::default)
        .labels
        .get_or_insert_with(Default::default)
        .extend(desired_meta.labels.unwrap_or_default());

    let Some(desired_spec) = desired.spec else {
        return;
    };
    let live_spec = live.spec.get_or_insert_with(Default::default);
    live_spec.restart_policy = desired_spec.restart_policy;

    for secret in desired_spec.image_pull_secrets.unwrap_or_default() {
        let existing = live_spec.image_pull_secrets.get_or_insert_with(Vec::new);
        if !existing.contains(&secret) {
            existing.push(secret);
        }
    }

    let mut volumes: Vec<Volume> = live_spec
        .volumes
        .take()
        .unwrap_or_default()
        .into_iter()
        .filter(|v| v.name != DATA_VOLUME)
        .collect();
    volumes.extend(desired_spec.volumes.unwrap_or_default());
    live_spec.volumes = if volumes.is_empty() { None } else { Some(volumes) };

    let Some(mut rendered) = desired_spec.containers.into_iter().next() else {
        return;
    };
    let Some(current) = live_spec.containers.first_mut() else {
        live_spec.containers.push(rendered);
        return;
    };
    if keep_live_image && current.image.is_some() {
        rendered.image = current.image.clone();
    }

    let mut mounts: Vec<VolumeMount> = current
        .volume_mounts
        .take()
        .unwrap_or_default()
        .into_iter()
        .filter(|m| m.name != DATA_VOLUME)
        .collect();
    mounts.extend(rendered.volume_mounts.unwrap_or_default());

    current.name = rendered.name;
    current.image = rendered.image;
    current.env = rendered.env;
    current.ports = rendered.ports;
    current.resources = rendered.resources;
    current.startup_probe = rendered.startup_probe;
    current.readiness_probe = rendered.readiness_probe;
    current.liveness_probe = rendered.liveness_probe;
    current.volume_mounts = if mounts.is_empty() { None } else { Some(mounts) };
}
