//! Wire representations of the Tekton objects the server reads and creates
//!
//! Only metadata is typed; `spec` and `status` are kept as raw JSON so the
//! mirror serves the full object exactly as the API server returned it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::sync::Mirrored;

pub const TEKTON_API_VERSION: &str = "tekton.dev/v1";
pub const PIPELINE_LABEL: &str = "tekton.dev/pipeline";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A namespaced Tekton object (`Pipeline`, `PipelineRun`, `TaskRun`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TektonObject {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

pub type Pipeline = TektonObject;
pub type PipelineRun = TektonObject;
pub type TaskRun = TektonObject;

impl TektonObject {
    /// New `PipelineRun` referencing the named `Pipeline`, with a generated name.
    pub fn pipeline_run_for(pipeline: &str, namespace: &str) -> PipelineRun {
        Self {
            api_version: TEKTON_API_VERSION.to_string(),
            kind: "PipelineRun".to_string(),
            metadata: ObjectMeta {
                namespace: namespace.to_string(),
                generate_name: Some(format!("{pipeline}-")),
                ..ObjectMeta::default()
            },
            spec: serde_json::json!({
                "pipelineRef": { "name": pipeline }
            }),
            status: None,
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.metadata.labels.get(name).map(String::as_str)
    }
}

impl Mirrored for TektonObject {
    fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default)]
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<TektonObject>,
}

/// `Status` object returned by the API server on failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiStatus {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// One line of a `?watch=true` response stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent {
    Added(TektonObject),
    Modified(TektonObject),
    Deleted(TektonObject),
    Bookmark(TektonObject),
    Error(ApiStatus),
}
