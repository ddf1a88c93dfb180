//! Progress Core - Workflow progression engine
//!
//! Tracks a user's advancement through a guided multi-step workflow and keeps
//! that progress safe across crashes, reloads and flaky storage.
//!
//! # Features
//!
//! - Legal step transitions (complete, skip, navigate back for review)
//! - Progress percentage and remaining-time estimates
//! - Dual-write persistence: synchronous ephemeral backup + debounced durable save
//! - At most one durable write in flight per instance
//! - Load-time recovery from the ephemeral backup when it holds more progress
//!
//! # Architecture
//!
//! - `types` - Presets, instances, and store payloads
//! - `transition` - Pure step transition engine
//! - `metrics` - Derived progress metrics
//! - `recovery` - Durable vs. ephemeral resolution at load time
//! - `store` - Durable store and ephemeral cache contracts
//! - `coordinator` - Persistence coordinator (debounce, flush, save state)
//! - `loader` - Built-in and custom preset catalog
//! - `config` - `progress.toml` loading
//!
//! # Example
//!
//! ```rust,ignore
//! use progress_core::{builtin_presets, MemoryDurableStore, MemoryEphemeralCache};
//! use progress_core::{PersistenceCoordinator, WorkflowInstance};
//! use std::sync::Arc;
//!
//! let preset = builtin_presets().remove("listing-launch").unwrap();
//! let instance = WorkflowInstance::start("user-1", &preset)?;
//!
//! let coordinator = PersistenceCoordinator::new(
//!     Arc::new(MemoryDurableStore::new()),
//!     Arc::new(MemoryEphemeralCache::new()),
//! );
//! coordinator.load_workflow(instance, preset)?;
//! let view = coordinator.complete_step(None)?;
//! println!("{}% done", view.progress_percent);
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod recovery;
pub mod store;
pub mod transition;
pub mod types;

// Re-export core types for convenience
pub use config::{ProgressConfig, RetryPolicy};
pub use coordinator::{PersistenceCoordinator, ProgressView, SaveState, WriteGate};
pub use error::{PresetError, ProgressionError, StoreError};
pub use loader::{builtin_presets, load_custom_presets, PresetCatalog};
pub use metrics::{calculate_progress, calculate_remaining_time, Metrics};
pub use recovery::{resolve, Recovered, RecoverySource};
pub use store::{
    DurableStore, EphemeralCache, MemoryDurableStore, MemoryEphemeralCache, RetryingStore,
};
pub use transition::Action;
pub use types::{
    ContextData, EphemeralSnapshot, InstanceUpdate, StepDefinition, StepSet, WorkflowDefinition,
    WorkflowInstance, WorkflowStatus,
};
