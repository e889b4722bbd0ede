//! CronJob reconciler

use super::{adopt_metadata, ResourceReconciler};
use crate::cluster::{create_typed, delete_if_exists, get_typed, replace_typed, ClusterApi, ResourceKind};
use crate::error::ReconcileError;
use crate::manifest::pod::{live_image, merge_pod_template, pod_template, DataVolume};
use crate::manifest::{names, Definition};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct CronJobReconciler {
    cluster: Arc<dyn ClusterApi>,
}

/// Render the CronJob for a container
pub fn render(def: &Definition<'_>, name: &str, image: &str) -> Result<CronJob, ReconcileError> {
    let config = def.container.cron_job_config().ok_or_else(|| {
        ReconcileError::Validation(format!("container {} has no cronjob settings", def.iid()))
    })?;
    let data = if def.container.storage().is_some() {
        DataVolume::Claim(names::primary(def.iid()))
    } else {
        DataVolume::None
    };

    Ok(CronJob {
        metadata: def.metadata(name),
        spec: Some(CronJobSpec {
            schedule: config.schedule.clone(),
            time_zone: config.time_zone.clone(),
            concurrency_policy: Some(config.concurrency_policy.as_str().to_string()),
            suspend: Some(config.suspend),
            successful_jobs_history_limit: config.successful_jobs_history_limit,
            failed_jobs_history_limit: config.failed_jobs_history_limit,
            starting_deadline_seconds: config.starting_deadline_seconds,
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(def.labels()),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    template: pod_template(def, image, &data)?,
                    backoff_limit: config.backoff_limit,
                    active_deadline_seconds: config.active_deadline_seconds,
                    ..Default::default()
                }),
            },
        }),
        status: None,
    })
}

/// Fold a rendered CronJob into the live one
pub fn merge(live: CronJob, desired: CronJob, keep_image: bool) -> CronJob {
    let mut spec = live.spec.unwrap_or_default();
    if let Some(desired_spec) = desired.spec {
        spec.schedule = desired_spec.schedule;
        spec.time_zone = desired_spec.time_zone;
        spec.concurrency_policy = desired_spec.concurrency_policy;
        spec.suspend = desired_spec.suspend;
        spec.successful_jobs_history_limit = desired_spec.successful_jobs_history_limit;
        spec.failed_jobs_history_limit = desired_spec.failed_jobs_history_limit;
        spec.starting_deadline_seconds = desired_spec.starting_deadline_seconds;

        let desired_job = desired_spec.job_template.spec.unwrap_or_default();
        let job = spec.job_template.spec.get_or_insert_with(Default::default);
        job.backoff_limit = desired_job.backoff_limit;
        job.active_deadline_seconds = desired_job.active_deadline_seconds;
        merge_pod_template(&mut job.template, desired_job.template, keep_image);
    }
    CronJob {
        metadata: adopt_metadata(live.metadata, desired.metadata),
        spec: Some(spec),
        status: None,
    }
}

fn job_template_image(cronjob: &CronJob) -> Option<String> {
    let job = cronjob.spec.as_ref()?.job_template.spec.as_ref()?;
    live_image(Some(&job.template))
}

impl CronJobReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }
}

#[async_trait::async_trait]
impl ResourceReconciler for CronJobReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::CronJob
    }

    async fn create(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        info!("Creating CronJob {}/{}", namespace, name);
        let cronjob = render(def, name, &def.image()?)?;
        create_typed(self.cluster.as_ref(), ResourceKind::CronJob, namespace, &cronjob).await?;
        Ok(())
    }

    async fn update(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        info!("Reconciling CronJob {}/{}", namespace, name);
        let live: Option<CronJob> = get_typed(self.cluster.as_ref(), ResourceKind::CronJob, namespace, name).await?;
        let Some(live) = live else {
            info!("CronJob {}/{} is missing, recreating", namespace, name);
            return self.create(def, name, namespace).await;
        };

        let image = match job_template_image(&live) {
            Some(image) if def.pipeline_owns_image() => image,
            _ => def.image()?,
        };
        let desired = render(def, name, &image)?;
        let merged = merge(live, desired, def.pipeline_owns_image());
        replace_typed(self.cluster.as_ref(), ResourceKind::CronJob, namespace, name, &merged).await?;
        Ok(())
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        if delete_if_exists(self.cluster.as_ref(), ResourceKind::CronJob, namespace, name).await? {
            info!("Deleted CronJob {}/{}", namespace, name);
        }
        Ok(())
    }
}
