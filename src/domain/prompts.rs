//! Prompt templates exposed via Model Context Protocol
//!
//! `explain_pipeline_error` pulls the latest mirrored run of a Pipeline out of
//! the resource cache and asks the model to explain its failure.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::cache::Snapshot;
use crate::domain::utils::{normalize_name, normalize_namespace, DEFAULT_NAMESPACE};
use crate::kube::models::PIPELINE_LABEL;
use crate::mcp::rpc::{app_error_to_json_rpc, json_rpc_error, json_rpc_error_with_data, json_rpc_result};
use crate::{errors::AppError, AppState};

pub const EXPLAIN_PIPELINE_ERROR: &str = "explain_pipeline_error";

#[derive(Debug, Deserialize)]
struct GetPromptParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ExplainPipelineErrorArgs {
    pipeline: String,
    namespace: Option<String>,
}

pub fn build_prompts_list() -> Value {
    json!({
        "prompts": [
            {
                "name": EXPLAIN_PIPELINE_ERROR,
                "description": "Explain the error of a Pipeline",
                "arguments": [
                    {
                        "name": "pipeline",
                        "description": "Name of the Pipeline",
                        "required": true
                    },
                    {
                        "name": "namespace",
                        "description": "Namespace of the Pipeline, defaults to \"default\"",
                        "required": false
                    }
                ]
            }
        ]
    })
}

fn created_at(snapshot: &Snapshot) -> Option<DateTime<Utc>> {
    snapshot.payload["metadata"]["creationTimestamp"]
        .as_str()
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc))
}

/// Most recent mirrored run of `pipeline` in `namespace`.
pub fn latest_run_of(snapshots: Vec<Snapshot>, namespace: &str, pipeline: &str) -> Option<Snapshot> {
    snapshots
        .into_iter()
        .filter(|snapshot| snapshot.key.namespace() == namespace)
        .filter(|snapshot| {
            snapshot.payload["metadata"]["labels"][PIPELINE_LABEL].as_str() == Some(pipeline)
        })
        .max_by(|left, right| {
            created_at(left)
                .cmp(&created_at(right))
                .then(left.observed_at.cmp(&right.observed_at))
        })
}

fn explain_pipeline_error(state: &AppState, arguments: Map<String, Value>) -> Result<Value, AppError> {
    let args: ExplainPipelineErrorArgs = serde_json::from_value(Value::Object(arguments))
        .map_err(|_| AppError::bad_request("invalid_arguments", "pipeline argument is required"))?;
    let pipeline = normalize_name(&args.pipeline)?;
    let namespace =
        normalize_namespace(args.namespace)?.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    let run = latest_run_of(state.registry.snapshots(), &namespace, &pipeline).ok_or_else(|| {
        AppError::bad_request(
            "pipeline_run_not_found",
            format!("no PipelineRun of Pipeline {namespace}/{pipeline} is known"),
        )
    })?;

    let status = serde_json::to_string_pretty(&run.payload["status"])
        .map_err(|err| AppError::internal(format!("failed to render run status: {err}")))?;

    let text = format!(
        "The Tekton PipelineRun {run_name} of Pipeline {pipeline} in namespace {namespace} \
         reported the status below. Explain why it failed and suggest how to fix it.\n\n\
         Resource: {uri}\n\n```json\n{status}\n```",
        run_name = run.display_name,
        uri = run.key,
    );

    Ok(json!({
        "description": format!("Explain the error of Pipeline {namespace}/{pipeline}"),
        "messages": [
            {
                "role": "user",
                "content": {
                    "type": "text",
                    "text": text
                }
            }
        ]
    }))
}

pub fn handle_prompts_get(state: &AppState, id: Option<Value>, params: Option<Value>) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, -32602, "Invalid params");
    };

    let prompt: GetPromptParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(_) => return json_rpc_error(id, -32602, "Invalid params"),
    };

    match prompt.name.as_str() {
        EXPLAIN_PIPELINE_ERROR => match explain_pipeline_error(state, prompt.arguments) {
            Ok(result) => json_rpc_result(id, result),
            Err(err) => app_error_to_json_rpc(id, err),
        },
        _ => json_rpc_error_with_data(
            id,
            -32602,
            "Invalid params",
            Some(json!({
                "code": "prompt_not_found",
                "message": "unknown prompt name",
                "details": {
                    "name": prompt.name,
                },
            })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::latest_run_of;
    use crate::cache::{ResourceKey, Snapshot};

    fn run(namespace: &str, name: &str, pipeline: &str, created: &str, observed_at: u64) -> Snapshot {
        Snapshot::new(
            ResourceKey::pipeline_run(namespace, name),
            name,
            json!({
                "metadata": {
                    "name": name,
                    "namespace": namespace,
                    "creationTimestamp": created,
                    "labels": {"tekton.dev/pipeline": pipeline}
                },
                "status": {"conditions": [{"type": "Succeeded", "status": "False"}]}
            }),
            observed_at,
        )
    }

    #[test]
    fn picks_newest_run_of_pipeline_in_namespace() {
        let snapshots = vec![
            run("ci", "build-a", "build", "2026-01-01T10:00:00Z", 3),
            run("ci", "build-b", "build", "2026-01-02T10:00:00Z", 1),
            run("ci", "deploy-a", "deploy", "2026-01-03T10:00:00Z", 2),
            run("other", "build-c", "build", "2026-01-04T10:00:00Z", 4),
        ];

        let latest = latest_run_of(snapshots, "ci", "build").expect("run found");
        assert_eq!(latest.display_name, "build-b");
    }

    #[test]
    fn compares_timestamps_by_instant_not_text() {
        let snapshots = vec![
            run("ci", "build-utc", "build", "2026-01-02T10:00:00Z", 1),
            run("ci", "build-offset", "build", "2026-01-02T08:30:00-02:00", 2),
            run("ci", "build-unknown", "build", "", 3),
        ];

        let latest = latest_run_of(snapshots, "ci", "build").expect("run found");
        assert_eq!(latest.display_name, "build-offset");
    }

    #[test]
    fn no_match_returns_none() {
        let snapshots = vec![run("ci", "deploy-a", "deploy", "2026-01-03T10:00:00Z", 2)];
        assert!(latest_run_of(snapshots, "ci", "build").is_none());
    }
}
