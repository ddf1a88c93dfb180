//! Progress MCP Server implementation

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use serde::Serialize;
use std::sync::Arc;

use progress_core::{
    ContextData, PresetCatalog, ProgressConfig, ProgressView, RecoverySource, RetryingStore,
    StepDefinition, WorkflowDefinition,
};

use crate::params::{
    CompleteStepParams, InstanceParams, LifecycleEvent, LifecycleParams, ListPresetsParams,
    LoadWorkflowParams, NavigateParams, StartWorkflowParams,
};
use crate::registry::{RegistryError, SessionRegistry};
use crate::response::{json_success, to_mcp_error};
use crate::slot::FileSlotCache;
use crate::sqlite::SqliteStore;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PresetSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub step_count: usize,
    pub total_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<StepDefinition>>,
}

impl PresetSummary {
    fn from_preset(preset: &WorkflowDefinition, include_steps: bool) -> Self {
        Self {
            id: preset.id.clone(),
            name: preset.name.clone(),
            description: preset.description.clone(),
            step_count: preset.steps.len(),
            total_minutes: preset.total_minutes(),
            steps: include_steps.then(|| preset.steps.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadResponse {
    pub recovered_from: RecoverySource,
    #[serde(flatten)]
    pub view: ProgressView,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub instance_id: String,
    pub cleared: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleResponse {
    pub event: LifecycleEvent,
    /// Sessions the event was applied to
    pub sessions: usize,
    /// Durable writes triggered (hide only)
    pub written: usize,
}

/// Preset summaries, sorted by id
pub fn preset_summaries(catalog: &PresetCatalog, include_steps: bool) -> Vec<PresetSummary> {
    catalog
        .list()
        .into_iter()
        .map(|preset| PresetSummary::from_preset(preset, include_steps))
        .collect()
}

// ============================================================================
// Server
// ============================================================================

/// Progress MCP Server
#[derive(Clone)]
pub struct ProgressMcpServer {
    /// MCP tool router
    tool_router: ToolRouter<Self>,

    /// Loaded workflow sessions
    registry: Arc<SessionRegistry>,
}

#[tool_router]
impl ProgressMcpServer {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            registry,
        }
    }

    /// Build the SQLite store, backup slot and preset catalog described by `config`
    pub fn from_config(config: &ProgressConfig) -> anyhow::Result<Self> {
        let storage = &config.storage;

        let sqlite = SqliteStore::open(&storage.database_path)?;
        let durable = Arc::new(RetryingStore::new(sqlite, config.retry.clone()));
        let ephemeral = Arc::new(FileSlotCache::new(storage.ephemeral_path.clone()));
        let catalog = PresetCatalog::load(Some(&storage.presets_dir));

        tracing::info!(
            database = %storage.database_path.display(),
            backup = %storage.ephemeral_path.display(),
            presets = catalog.len(),
            autosave_ms = config.autosave.delay_ms,
            "Progress storage ready"
        );

        Ok(Self::new(Arc::new(SessionRegistry::new(
            durable,
            ephemeral,
            catalog,
            config.autosave.delay(),
        ))))
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Apply a host lifecycle event to one session or all of them
    pub async fn apply_lifecycle(
        &self,
        event: LifecycleEvent,
        instance_id: Option<&str>,
    ) -> Result<LifecycleResponse, RegistryError> {
        let sessions = match instance_id {
            Some(id) => vec![self.registry.session(id)?],
            None => self.registry.all_sessions(),
        };

        let mut written = 0;
        for session in &sessions {
            match event {
                LifecycleEvent::Hide => {
                    if session.flush_on_hide().await {
                        written += 1;
                    }
                }
                LifecycleEvent::Unload => session.flush_on_unload(),
            }
        }

        tracing::debug!(?event, sessions = sessions.len(), written, "Applied lifecycle event");
        Ok(LifecycleResponse {
            event,
            sessions: sessions.len(),
            written,
        })
    }

    // ========================================================================
    // MCP Tool Handlers
    // ========================================================================

    #[tool(description = "List available workflow presets with step counts and estimated time")]
    async fn list_presets(
        &self,
        Parameters(params): Parameters<ListPresetsParams>,
    ) -> Result<CallToolResult, McpError> {
        let presets = preset_summaries(self.registry.catalog(), params.include_steps);

        json_success(&serde_json::json!({
            "presets": presets,
            "total": presets.len(),
        }))
    }

    #[tool(
        description = "Start a new workflow instance from a preset. Returns the instance with its current step and progress."
    )]
    async fn start_workflow(
        &self,
        Parameters(params): Parameters<StartWorkflowParams>,
    ) -> Result<CallToolResult, McpError> {
        let context: ContextData = params.context.into_iter().collect();
        let view = self
            .registry
            .start(&params.owner_id, &params.preset_id, context)
            .await
            .map_err(to_mcp_error)?;

        json_success(&view)
    }

    #[tool(
        description = "Load an existing workflow instance. Recovers unsaved progress from the local backup when it is ahead of the stored copy."
    )]
    async fn load_workflow(
        &self,
        Parameters(params): Parameters<LoadWorkflowParams>,
    ) -> Result<CallToolResult, McpError> {
        let (view, recovered_from) = self
            .registry
            .load(&params.owner_id, &params.instance_id)
            .await
            .map_err(to_mcp_error)?;

        json_success(&LoadResponse {
            recovered_from,
            view,
        })
    }

    #[tool(
        description = "Mark the current step complete, merge any produced data into the context and advance"
    )]
    async fn complete_step(
        &self,
        Parameters(params): Parameters<CompleteStepParams>,
    ) -> Result<CallToolResult, McpError> {
        let data = params
            .data
            .map(|data| data.into_iter().collect::<ContextData>());
        let view = self
            .registry
            .session(&params.instance_id)
            .and_then(|session| Ok(session.complete_step(data)?))
            .map_err(to_mcp_error)?;

        json_success(&view)
    }

    #[tool(description = "Skip the current step (optional steps only) and advance")]
    async fn skip_step(
        &self,
        Parameters(params): Parameters<InstanceParams>,
    ) -> Result<CallToolResult, McpError> {
        let view = self
            .registry
            .session(&params.instance_id)
            .and_then(|session| Ok(session.skip_step()?))
            .map_err(to_mcp_error)?;

        json_success(&view)
    }

    #[tool(
        description = "Move to the current step or to a step already completed or skipped, for review"
    )]
    async fn navigate_to_step(
        &self,
        Parameters(params): Parameters<NavigateParams>,
    ) -> Result<CallToolResult, McpError> {
        let view = self
            .registry
            .session(&params.instance_id)
            .and_then(|session| Ok(session.navigate_to_step(&params.step_id)?))
            .map_err(to_mcp_error)?;

        json_success(&view)
    }

    #[tool(
        description = "Save the instance to durable storage now. A storage failure is reported in last_save_error."
    )]
    async fn save_workflow(
        &self,
        Parameters(params): Parameters<InstanceParams>,
    ) -> Result<CallToolResult, McpError> {
        let session = self
            .registry
            .session(&params.instance_id)
            .map_err(to_mcp_error)?;
        session
            .save()
            .await
            .map_err(|e| to_mcp_error(e.into()))?;

        json_success(&session.view())
    }

    #[tool(
        description = "Get the current step, next step, progress percentage, remaining minutes and save state"
    )]
    async fn get_progress(
        &self,
        Parameters(params): Parameters<InstanceParams>,
    ) -> Result<CallToolResult, McpError> {
        let session = self
            .registry
            .session(&params.instance_id)
            .map_err(to_mcp_error)?;

        json_success(&session.view())
    }

    #[tool(
        description = "Unload an instance, discarding any pending autosave and its local backup"
    )]
    async fn clear_workflow(
        &self,
        Parameters(params): Parameters<InstanceParams>,
    ) -> Result<CallToolResult, McpError> {
        let cleared = self.registry.clear(&params.instance_id);

        json_success(&ClearResponse {
            instance_id: params.instance_id,
            cleared,
        })
    }

    #[tool(
        description = "Signal a host lifecycle event: 'hide' writes pending autosaves now, 'unload' refreshes the local backup only"
    )]
    async fn lifecycle_event(
        &self,
        Parameters(params): Parameters<LifecycleParams>,
    ) -> Result<CallToolResult, McpError> {
        let response = self
            .apply_lifecycle(params.event, params.instance_id.as_deref())
            .await
            .map_err(to_mcp_error)?;

        json_success(&response)
    }
}

#[tool_handler]
impl rmcp::ServerHandler for ProgressMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Progress MCP server tracking a user's way through multi-step workflow presets. \
                 Start or load an instance, then complete, skip or revisit steps. Progress is \
                 backed up locally on every change and saved durably after a quiet period."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
