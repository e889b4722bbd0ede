//! `ClusterApi` backed by a live Kubernetes API server

use super::{ClusterApi, ResourceKind};
use crate::error::ClusterError;
use kube::api::{Api, ApiResource, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::Client;
use serde_json::Value;
use tracing::debug;

/// Cluster access through one shared kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self, ClusterError> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(kind.group(), kind.version(), kind.kind());
        let ar = ApiResource::from_gvk_with_plural(&gvk, kind.plural());
        if kind.namespaced() {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        }
    }
}

fn to_dynamic(object: &Value) -> Result<DynamicObject, ClusterError> {
    Ok(serde_json::from_value(object.clone())?)
}

fn to_value(object: DynamicObject) -> Result<Value, ClusterError> {
    Ok(serde_json::to_value(object)?)
}

fn object_name(object: &Value) -> &str {
    object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Translate API status codes into the shared error vocabulary
fn map_error(err: kube::Error, kind: ResourceKind, namespace: &str, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(api_err) if api_err.code == 404 => ClusterError::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            ClusterError::AlreadyExists {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(api_err) if api_err.code == 409 => ClusterError::Conflict {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        other => ClusterError::Kube(other),
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Option<Value>, ClusterError> {
        debug!("GET {} {}/{}", kind, namespace, name);
        match self.api(kind, namespace).get_opt(name).await {
            Ok(Some(object)) => Ok(Some(to_value(object)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(map_error(e, kind, namespace, name)),
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>, ClusterError> {
        debug!("LIST {} in {} ({:?})", kind, namespace, label_selector);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .api(kind, namespace)
            .list(&params)
            .await
            .map_err(|e| map_error(e, kind, namespace, ""))?;
        list.items.into_iter().map(to_value).collect()
    }

    async fn create(&self, kind: ResourceKind, namespace: &str, object: &Value) -> Result<Value, ClusterError> {
        let name = object_name(object);
        debug!("CREATE {} {}/{}", kind, namespace, name);
        self.api(kind, namespace)
            .create(&PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| map_error(e, kind, namespace, name))
            .and_then(to_value)
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        object: &Value,
    ) -> Result<Value, ClusterError> {
        debug!("REPLACE {} {}/{}", kind, namespace, name);
        self.api(kind, namespace)
            .replace(name, &PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| map_error(e, kind, namespace, name))
            .and_then(to_value)
    }

    async fn patch(&self, kind: ResourceKind, namespace: &str, name: &str, patch: &Value) -> Result<Value, ClusterError> {
        debug!("PATCH {} {}/{}", kind, namespace, name);
        self.api(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_error(e, kind, namespace, name))
            .and_then(to_value)
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        debug!("DELETE {} {}/{}", kind, namespace, name);
        match self.api(kind, namespace).delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(map_error(e, kind, namespace, name)),
        }
    }
}
