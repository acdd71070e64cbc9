//! Model Context Protocol resources backed by the pipeline run mirror
//!
//! Every mirrored PipelineRun is readable under
//! `tekton://{namespace}/pipelinerun/{name}`; the listing changes as the
//! cluster watch adds and removes runs.

use rust_mcp_sdk::schema::{ReadResourceRequestParams, Resource};
use serde_json::{json, Value};

use crate::errors::{AppError, CacheError};
use crate::mcp::rpc::{app_error_to_json_rpc, json_rpc_error, json_rpc_error_with_data, json_rpc_result};
use crate::AppState;

pub fn build_resources_list(state: &AppState) -> Vec<Resource> {
    state.surface.list()
}

pub async fn handle_resources_read(
    state: &AppState,
    id: Option<Value>,
    params: Option<Value>,
) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, -32602, "Invalid params");
    };

    let resource_read: ReadResourceRequestParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(_) => return json_rpc_error(id, -32602, "Invalid params"),
    };

    match state.surface.read(&resource_read.uri) {
        Ok(result) => json_rpc_result(
            id,
            serde_json::to_value(result).expect("read resource result serialization"),
        ),
        Err(CacheError::NotFound { .. }) => json_rpc_error_with_data(
            id,
            -32002,
            "Resource not found",
            Some(json!({
                "code": "resource_not_found",
                "message": "unknown resource uri",
                "details": {
                    "uri": resource_read.uri,
                },
            })),
        ),
        Err(err) => app_error_to_json_rpc(id, AppError::from(err)),
    }
}
