//! Environments map 1:1 to cluster namespaces.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Namespace name
    pub iid: String,
    #[serde(default)]
    pub name: String,
    /// Extra labels stamped on the namespace
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Environment {
    pub fn namespace(&self) -> &str {
        &self.iid
    }
}
