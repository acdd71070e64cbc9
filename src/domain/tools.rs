//! Interactive tools exposed via Model Context Protocol
//!
//! Provides `start_pipeline`, `list_pipelineruns` and `list_taskruns` by
//! delegating to the `PipelineClient` Kubernetes implementation. Cluster
//! failures are reported as tool errors so the client can show them.

use rust_mcp_sdk::{
    macros,
    schema::{CallToolRequestParams, CallToolResult, ContentBlock, TextContent, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::domain::utils::{
    filter_by_name_prefix, normalize_name, normalize_namespace, normalize_prefix,
    parse_label_selector, DEFAULT_NAMESPACE,
};
use crate::kube::models::{TektonObject, TEKTON_API_VERSION};
use crate::mcp::rpc::{
    app_error_to_json_rpc, json_rpc_error, json_rpc_error_with_data, json_rpc_result,
};
use crate::{errors::AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct StartPipelineParams {
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListRunsParams {
    pub namespace: Option<String>,
    pub prefix: Option<String>,
    #[serde(alias = "label-selector")]
    pub label_selector: Option<String>,
}

#[macros::mcp_tool(name = "start_pipeline", description = "Start a Pipeline")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct StartPipelineTool {
    /// Name or reference of the Pipeline to start
    pub name: String,
    /// Namespace where the Pipeline is located, defaults to "default"
    pub namespace: Option<String>,
}

#[macros::mcp_tool(
    name = "list_pipelineruns",
    description = "List pipelineruns in the cluster with filtering options"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ListPipelineRunsTool {
    /// Which namespace to use to look for PipelineRuns
    pub namespace: Option<String>,
    /// Name prefix to filter PipelineRuns
    pub prefix: Option<String>,
    /// Label selector to filter PipelineRuns
    #[serde(rename = "label-selector")]
    pub label_selector: Option<String>,
}

#[macros::mcp_tool(
    name = "list_taskruns",
    description = "List taskruns in the cluster with filtering options"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ListTaskRunsTool {
    /// Which namespace to use to look for TaskRuns
    pub namespace: Option<String>,
    /// Name prefix to filter TaskRuns
    pub prefix: Option<String>,
    /// Label selector to filter TaskRuns
    #[serde(rename = "label-selector")]
    pub label_selector: Option<String>,
}

pub fn build_tools_list() -> Vec<Tool> {
    vec![
        StartPipelineTool::tool(),
        ListPipelineRunsTool::tool(),
        ListTaskRunsTool::tool(),
    ]
}

/// Validated arguments of the list tools.
#[derive(Debug, PartialEq, Eq)]
pub struct RunsQuery {
    pub namespace: Option<String>,
    pub prefix: Option<String>,
    pub label_selector: Option<String>,
}

pub fn build_runs_query(params: ListRunsParams) -> Result<RunsQuery, AppError> {
    Ok(RunsQuery {
        namespace: normalize_namespace(params.namespace)?,
        prefix: normalize_prefix(params.prefix)?,
        label_selector: parse_label_selector(params.label_selector)?,
    })
}

fn text_result(text: String, structured_content: Option<Map<String, Value>>) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(text, None, None))],
        is_error: None,
        meta: None,
        structured_content,
    }
}

fn tool_error(message: String) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(message, None, None))],
        is_error: Some(true),
        meta: None,
        structured_content: None,
    }
}

fn runs_result(kind: &str, runs: Vec<TektonObject>) -> CallToolResult {
    let returned = runs.len();
    match serde_json::to_string(&runs) {
        Ok(text) => text_result(
            text,
            Some(Map::from_iter([
                (kind.to_string(), json!(runs)),
                ("returned".to_string(), json!(returned)),
            ])),
        ),
        Err(err) => tool_error(format!("failed to serialize {kind}: {err}")),
    }
}

fn parse_arguments<T: serde::de::DeserializeOwned>(
    arguments: Option<Map<String, Value>>,
) -> Option<T> {
    serde_json::from_value(Value::Object(arguments.unwrap_or_default())).ok()
}

async fn start_pipeline(state: &AppState, params: StartPipelineParams) -> Result<CallToolResult, AppError> {
    let name = normalize_name(&params.name)?;
    let namespace =
        normalize_namespace(params.namespace)?.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    if let Err(err) = state.pipeline_client.get_pipeline(&namespace, &name).await {
        warn!(namespace = %namespace, pipeline = %name, error = %err, "pipeline lookup failed");
        return Ok(tool_error(format!(
            "Failed to get Pipeline {namespace}/{name}: {err}"
        )));
    }

    let run = TektonObject::pipeline_run_for(&name, &namespace);
    match state.pipeline_client.create_pipeline_run(&run).await {
        Ok(created) => {
            info!(
                namespace = %namespace,
                pipeline = %name,
                pipeline_run = %created.metadata.name,
                "pipeline run created"
            );
            Ok(text_result(
                format!("Starting pipeline {name} in namespace {namespace}"),
                Some(Map::from_iter([
                    ("pipeline".to_string(), json!(name)),
                    ("namespace".to_string(), json!(namespace)),
                    ("pipeline_run".to_string(), json!(created.metadata.name)),
                    ("api_version".to_string(), json!(TEKTON_API_VERSION)),
                ])),
            ))
        }
        Err(err) => {
            warn!(namespace = %namespace, pipeline = %name, error = %err, "pipeline run creation failed");
            Ok(tool_error(format!(
                "Failed to create PipelineRun {namespace}/{name}: {err}"
            )))
        }
    }
}

async fn list_pipeline_runs(state: &AppState, query: RunsQuery) -> CallToolResult {
    match state
        .pipeline_client
        .list_pipeline_runs(query.namespace.as_deref(), query.label_selector.as_deref())
        .await
    {
        Ok(runs) => runs_result(
            "pipelineruns",
            filter_by_name_prefix(runs, query.prefix.as_deref()),
        ),
        Err(err) => tool_error(format!("Failed to list PipelineRuns: {err}")),
    }
}

async fn list_task_runs(state: &AppState, query: RunsQuery) -> CallToolResult {
    match state
        .pipeline_client
        .list_task_runs(query.namespace.as_deref(), query.label_selector.as_deref())
        .await
    {
        Ok(runs) => runs_result("taskruns", filter_by_name_prefix(runs, query.prefix.as_deref())),
        Err(err) => tool_error(format!("Failed to list TaskRuns: {err}")),
    }
}

pub async fn handle_tools_call(
    state: &AppState,
    id: Option<Value>,
    params: Option<Value>,
) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, -32602, "Invalid params");
    };

    let tool_call: CallToolRequestParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(_) => return json_rpc_error(id, -32602, "Invalid params"),
    };

    let result = match tool_call.name.as_str() {
        "start_pipeline" => {
            let Some(params) = parse_arguments::<StartPipelineParams>(tool_call.arguments) else {
                return json_rpc_error(id, -32602, "Invalid params");
            };
            start_pipeline(state, params).await
        }
        "list_pipelineruns" | "list_taskruns" => {
            let Some(params) = parse_arguments::<ListRunsParams>(tool_call.arguments) else {
                return json_rpc_error(id, -32602, "Invalid params");
            };
            match build_runs_query(params) {
                Ok(query) if tool_call.name == "list_pipelineruns" => {
                    Ok(list_pipeline_runs(state, query).await)
                }
                Ok(query) => Ok(list_task_runs(state, query).await),
                Err(err) => Err(err),
            }
        }
        _ => {
            return json_rpc_error_with_data(
                id,
                -32601,
                "Method not found",
                Some(json!({
                    "code": "tool_not_found",
                    "message": "unknown tool name",
                    "details": {
                        "name": tool_call.name,
                    },
                })),
            )
        }
    };

    match result {
        Ok(call_result) => json_rpc_result(
            id,
            serde_json::to_value(call_result).expect("tool result serialization"),
        ),
        Err(err) => app_error_to_json_rpc(id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::{build_runs_query, build_tools_list, ListRunsParams, RunsQuery};

    #[test]
    fn lists_tools_in_declaration_order() {
        let names: Vec<String> = build_tools_list().into_iter().map(|tool| tool.name).collect();
        assert_eq!(
            names,
            vec!["start_pipeline", "list_pipelineruns", "list_taskruns"]
        );
    }

    #[test]
    fn list_tools_advertise_dashed_label_selector() {
        for tool in build_tools_list().into_iter().skip(1) {
            let schema = serde_json::to_value(&tool.input_schema).expect("schema serializes");
            let properties = &schema["properties"];
            assert!(
                properties["label-selector"].is_object(),
                "{} must advertise label-selector",
                tool.name
            );
            assert!(properties["label_selector"].is_null());
            assert!(properties["prefix"].is_object());
        }
    }

    #[test]
    fn accepts_dashed_label_selector_argument() {
        let params: ListRunsParams = serde_json::from_value(serde_json::json!({
            "namespace": "ci",
            "label-selector": "app=web"
        }))
        .expect("valid params");

        let query = build_runs_query(params).expect("valid query");
        assert_eq!(
            query,
            RunsQuery {
                namespace: Some("ci".to_string()),
                prefix: None,
                label_selector: Some("app=web".to_string()),
            }
        );
    }

    #[test]
    fn rejects_invalid_label_selector() {
        let query = build_runs_query(ListRunsParams {
            namespace: None,
            prefix: None,
            label_selector: Some("app in (web)".to_string()),
        });

        let error = query.expect_err("expected invalid selector");
        assert!(error.to_string().contains("bad request"));
    }
}
