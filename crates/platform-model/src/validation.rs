//! Validation of container specifications.
//!
//! Everything the cluster would reject is caught here, before any object is
//! written, so a bad request never leaves half a container behind.

use crate::container::ContainerSpec;
use crate::error::ModelError;
use crate::pod::{PodConfig, Probe, ProbeCheck, RestartPolicy};
use crate::units::{cpu_millicores, cpu_quantity, memory_mebibytes, memory_quantity};
use crate::workload::{ContainerType, WorkloadConfig};

/// Maximum length of an RFC 1123 label
const MAX_LABEL_LEN: usize = 63;

/// Returns true if `value` is a valid RFC 1123 DNS label.
pub fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_LABEL_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

impl ContainerSpec {
    /// Validates the container settings.
    ///
    /// # Errors
    /// Returns `ModelError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !is_dns_label(&self.iid) {
            return Err(ModelError::invalid("iid", format!("'{}' is not a DNS label", self.iid)));
        }
        if !is_dns_label(&self.slug) {
            return Err(ModelError::invalid("slug", format!("'{}' is not a DNS label", self.slug)));
        }

        let workload_type = self.workload.container_type();
        if workload_type != self.container_type {
            return Err(ModelError::invalid(
                "type",
                format!("type is {} but {} settings were supplied", self.container_type, workload_type),
            ));
        }

        validate_pod_config(&self.pod_config, self.container_type)?;

        for (field, probe) in [
            ("probes.startup", &self.probes.startup),
            ("probes.readiness", &self.probes.readiness),
            ("probes.liveness", &self.probes.liveness),
        ] {
            if let Some(probe) = probe {
                validate_probe(field, probe)?;
            }
        }

        if let Some(storage) = self.storage() {
            memory_quantity("storageConfig.size", storage.size, storage.size_type)?;
            if storage.mount_path.is_empty() || !storage.mount_path.starts_with('/') {
                return Err(ModelError::invalid("storageConfig.mountPath", "must be an absolute path"));
            }
            if storage.access_modes.is_empty() {
                return Err(ModelError::invalid("storageConfig.accessModes", "at least one access mode is required"));
            }
        }

        if self.is_networked() {
            if self.networking.container_port == 0 {
                return Err(ModelError::invalid("networking.containerPort", "must be between 1 and 65535"));
            }
            let tcp_proxy = &self.networking.tcp_proxy;
            if tcp_proxy.enabled && tcp_proxy.public_port.is_none() {
                return Err(ModelError::invalid("networking.tcpProxy.publicPort", "required when the proxy is enabled"));
            }
            let custom_domain = &self.networking.custom_domain;
            if custom_domain.enabled && custom_domain.domain.as_deref().is_none_or(str::is_empty) {
                return Err(ModelError::invalid("networking.customDomain.domain", "required when enabled"));
            }
        }

        match &self.workload {
            WorkloadConfig::Deployment(config) => {
                if config.desired_replicas < 0 {
                    return Err(ModelError::invalid("deploymentConfig.desiredReplicas", "must not be negative"));
                }
                if config.autoscaling_enabled() {
                    if config.min_replicas < 1 {
                        return Err(ModelError::invalid("deploymentConfig.minReplicas", "must be at least 1"));
                    }
                    if config.max_replicas < config.min_replicas {
                        return Err(ModelError::invalid("deploymentConfig.maxReplicas", "must not be below minReplicas"));
                    }
                    if config.cpu_metric.enabled && config.cpu_metric.metric_value <= 0.0 {
                        return Err(ModelError::invalid("deploymentConfig.cpuMetric.metricValue", "must be positive"));
                    }
                    if config.memory_metric.enabled && config.memory_metric.metric_value <= 0.0 {
                        return Err(ModelError::invalid("deploymentConfig.memoryMetric.metricValue", "must be positive"));
                    }
                }
            }
            WorkloadConfig::StatefulSet(config) => {
                if config.desired_replicas < 0 {
                    return Err(ModelError::invalid("statefulSetConfig.desiredReplicas", "must not be negative"));
                }
            }
            WorkloadConfig::CronJob(config) => {
                if config.schedule.split_whitespace().count() != 5 && !config.schedule.starts_with('@') {
                    return Err(ModelError::invalid(
                        "cronJobConfig.schedule",
                        format!("'{}' is not a five field cron expression", config.schedule),
                    ));
                }
            }
        }

        if let Some(repo) = self.connected_repo() {
            if repo.url.is_empty() {
                return Err(ModelError::invalid("repo.url", "required when connected"));
            }
            if repo.branch.is_empty() {
                return Err(ModelError::invalid("repo.branch", "required when connected"));
            }
        }
        if let Some(image) = self.source.registry_image() {
            if image.is_empty() {
                return Err(ModelError::invalid("registry.image", "must not be empty"));
            }
        }

        for (index, variable) in self.variables.iter().enumerate() {
            if variable.name.is_empty() {
                return Err(ModelError::invalid(format!("variables[{}].name", index), "must not be empty"));
            }
        }

        Ok(())
    }
}

fn validate_pod_config(pod: &PodConfig, container_type: ContainerType) -> Result<(), ModelError> {
    cpu_quantity("podConfig.cpuRequest", pod.cpu_request, pod.cpu_request_type)?;
    cpu_quantity("podConfig.cpuLimit", pod.cpu_limit, pod.cpu_limit_type)?;
    memory_quantity("podConfig.memoryRequest", pod.memory_request, pod.memory_request_type)?;
    memory_quantity("podConfig.memoryLimit", pod.memory_limit, pod.memory_limit_type)?;

    if cpu_millicores(pod.cpu_limit, pod.cpu_limit_type) < cpu_millicores(pod.cpu_request, pod.cpu_request_type) {
        return Err(ModelError::invalid("podConfig.cpuLimit", "must not be below the request"));
    }
    if memory_mebibytes(pod.memory_limit, pod.memory_limit_type)
        < memory_mebibytes(pod.memory_request, pod.memory_request_type)
    {
        return Err(ModelError::invalid("podConfig.memoryLimit", "must not be below the request"));
    }

    let restart_ok = match container_type {
        ContainerType::Deployment | ContainerType::StatefulSet => pod.restart_policy == RestartPolicy::Always,
        ContainerType::CronJob => pod.restart_policy != RestartPolicy::Always,
    };
    if !restart_ok {
        return Err(ModelError::invalid(
            "podConfig.restartPolicy",
            format!("{} is not allowed for a {}", pod.restart_policy.as_str(), container_type),
        ));
    }
    Ok(())
}

fn validate_probe(field: &str, probe: &Probe) -> Result<(), ModelError> {
    if !probe.enabled {
        return Ok(());
    }
    match &probe.check {
        ProbeCheck::Exec { command } if command.is_empty() => {
            Err(ModelError::invalid(format!("{}.exec.command", field), "must not be empty"))
        }
        ProbeCheck::HttpGet { port, .. } | ProbeCheck::TcpSocket { port } if *port == 0 => {
            Err(ModelError::invalid(format!("{}.port", field), "must be between 1 and 65535"))
        }
        _ => Ok(()),
    }
}
