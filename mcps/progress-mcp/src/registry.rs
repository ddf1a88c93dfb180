//! Session registry
//!
//! One [`PersistenceCoordinator`] per loaded instance, all sharing the same
//! durable store and ephemeral slot. Write gates are kept per instance id for
//! the life of the registry, so a coordinator that replaces another (reload,
//! clear then load) queues behind any write the old one left in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use progress_core::{
    ContextData, DurableStore, EphemeralCache, PersistenceCoordinator, PresetCatalog,
    PresetError, ProgressView, ProgressionError, RecoverySource, StoreError, WorkflowInstance,
    WriteGate,
};

/// Errors surfaced by registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Workflow instance not loaded: {0}")]
    NotLoaded(String),

    #[error(transparent)]
    Progression(#[from] ProgressionError),

    #[error(transparent)]
    Preset(#[from] PresetError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// Whether the caller sent something unusable (as opposed to a backend fault)
    pub fn is_invalid_request(&self) -> bool {
        match self {
            RegistryError::NotLoaded(_) => true,
            RegistryError::Progression(e) => e.is_validation(),
            RegistryError::Preset(PresetError::NotFound(_)) => true,
            RegistryError::Preset(_) => false,
            RegistryError::Store(StoreError::NotFound { .. }) => true,
            RegistryError::Store(_) => false,
        }
    }
}

pub struct SessionRegistry {
    durable: Arc<dyn DurableStore>,
    ephemeral: Arc<dyn EphemeralCache>,
    catalog: PresetCatalog,
    autosave_delay: Duration,
    sessions: Mutex<HashMap<String, PersistenceCoordinator>>,
    write_gates: Mutex<HashMap<String, WriteGate>>,
}

impl SessionRegistry {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        ephemeral: Arc<dyn EphemeralCache>,
        catalog: PresetCatalog,
        autosave_delay: Duration,
    ) -> Self {
        Self {
            durable,
            ephemeral,
            catalog,
            autosave_delay,
            sessions: Mutex::new(HashMap::new()),
            write_gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &PresetCatalog {
        &self.catalog
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, PersistenceCoordinator>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn coordinator(&self, instance_id: &str) -> PersistenceCoordinator {
        let gate = self
            .write_gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(instance_id.to_string())
            .or_default()
            .clone();

        PersistenceCoordinator::with_write_gate(
            self.durable.clone(),
            self.ephemeral.clone(),
            self.autosave_delay,
            gate,
        )
    }

    /// Create a new instance of `preset_id`, record it durably and load it
    pub async fn start(
        &self,
        owner_id: &str,
        preset_id: &str,
        initial_context: ContextData,
    ) -> Result<ProgressView, RegistryError> {
        let preset = self.catalog.get(preset_id)?.clone();
        let mut instance = WorkflowInstance::start(owner_id, &preset)?;
        instance.context_data = initial_context;

        self.durable.insert_instance(&instance).await?;

        let instance_id = instance.id.clone();
        let coordinator = self.coordinator(&instance_id);
        let view = coordinator.load_workflow(instance, preset)?;
        self.sessions().insert(instance_id.clone(), coordinator);

        tracing::info!(owner_id, preset_id, instance_id = %instance_id, "Started workflow");
        Ok(view)
    }

    /// Load an existing instance, recovering from the local backup if it is ahead
    pub async fn load(
        &self,
        owner_id: &str,
        instance_id: &str,
    ) -> Result<(ProgressView, RecoverySource), RegistryError> {
        // Reloading a live session: push its pending changes out and wait for
        // any running write, so the durable read below sees the newest state
        let previous = self.sessions().remove(instance_id);
        if let Some(previous) = previous {
            previous.flush_on_hide().await;
        }

        // A cleared session may still be writing through the shared gate
        let coordinator = self.coordinator(instance_id);
        coordinator.settle().await;

        let stored = self.durable.get_instance(owner_id, instance_id).await?;
        let preset = self.catalog.get(&stored.preset_id)?.clone();

        let (view, source) = coordinator.recover_workflow(stored, preset)?;
        self.sessions().insert(instance_id.to_string(), coordinator);

        Ok((view, source))
    }

    /// The coordinator for a loaded instance
    pub fn session(&self, instance_id: &str) -> Result<PersistenceCoordinator, RegistryError> {
        self.sessions()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotLoaded(instance_id.to_string()))
    }

    /// Drop a session, discarding any pending autosave
    ///
    /// A write already in flight finishes on its own; the instance's write
    /// gate outlives the session so a later load still queues behind it.
    pub fn clear(&self, instance_id: &str) -> bool {
        let removed = self.sessions().remove(instance_id);
        match removed {
            Some(coordinator) => {
                coordinator.clear_workflow();
                true
            }
            None => false,
        }
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every loaded session, in no particular order
    pub fn all_sessions(&self) -> Vec<PersistenceCoordinator> {
        self.sessions().values().cloned().collect()
    }
}
