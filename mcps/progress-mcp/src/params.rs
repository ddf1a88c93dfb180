//! MCP parameter types for progress tools

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Parameters for list_presets tool
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListPresetsParams {
    /// Include each preset's step list in the response
    #[serde(default)]
    pub include_steps: bool,
}

/// Parameters for start_workflow tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StartWorkflowParams {
    /// Owner of the new instance (e.g., user id)
    pub owner_id: String,

    /// Preset to follow (see list_presets)
    pub preset_id: String,

    /// Optional initial context values
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

/// Parameters for load_workflow tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoadWorkflowParams {
    /// Owner of the instance
    pub owner_id: String,

    /// Instance ID returned from start_workflow
    pub instance_id: String,
}

/// Parameters for tools that act on a loaded instance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InstanceParams {
    /// ID of a loaded workflow instance
    pub instance_id: String,
}

/// Parameters for complete_step tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompleteStepParams {
    /// ID of a loaded workflow instance
    pub instance_id: String,

    /// Values produced by the step, merged into the instance context
    #[serde(default)]
    pub data: Option<HashMap<String, Value>>,
}

/// Parameters for navigate_to_step tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NavigateParams {
    /// ID of a loaded workflow instance
    pub instance_id: String,

    /// Step to revisit: the current step or one already completed or skipped
    pub step_id: String,
}

/// Host lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    /// Host lost foreground attention: pending autosaves are written now
    Hide,
    /// Host is about to terminate: only the local backup is refreshed
    Unload,
}

/// Parameters for lifecycle_event tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LifecycleParams {
    /// Lifecycle event to apply
    pub event: LifecycleEvent,

    /// Restrict to one instance (default: every loaded instance)
    #[serde(default)]
    pub instance_id: Option<String>,
}
