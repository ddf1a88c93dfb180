//! Tool response helpers

use rmcp::{
    model::{CallToolResult, Content},
    ErrorData as McpError,
};
use serde::Serialize;

use crate::registry::RegistryError;

/// Pretty-printed JSON tool result
pub fn json_success<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Caller mistakes become `invalid_params`; everything else is an internal error
pub fn to_mcp_error(err: RegistryError) -> McpError {
    if err.is_invalid_request() {
        McpError::invalid_params(err.to_string(), None)
    } else {
        tracing::error!("Tool call failed: {}", err);
        McpError::internal_error(err.to_string(), None)
    }
}
