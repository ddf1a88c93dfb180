//! Persistence coordinator
//!
//! Owns one loaded workflow session and keeps it safe across an unreliable
//! environment with two writes per mutation:
//!
//! - an immediate, synchronous write to the single-slot ephemeral cache
//! - a trailing-edge debounced write to the durable store
//!
//! A small scheduler per session (timer handle, revision counters, in-flight
//! flag) drives debounce, flush-on-hide and manual saves alike. All durable
//! writes go through one async gate, so at most one is ever in flight and
//! each write carries the newest instance at the moment it starts.
//!
//! Durable failures never undo local state; they are recorded in
//! `last_save_error` and the session returns to idle.
//!
//! Mutating methods arm timers with `tokio::spawn` and must be called from
//! within a Tokio runtime.

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;

use crate::config::DEFAULT_AUTOSAVE_DELAY_MS;
use crate::error::ProgressionError;
use crate::metrics::{self, Metrics};
use crate::recovery::{self, RecoverySource};
use crate::store::{DurableStore, EphemeralCache};
use crate::transition::{self, Action};
use crate::types::{ContextData, StepDefinition, WorkflowDefinition, WorkflowInstance};

/// Save state of the loaded session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    Idle,
    PendingSave,
    Saving,
}

/// Read-only view of the coordinator, as consumed by the UI layer
#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    pub instance: Option<WorkflowInstance>,
    pub current_step: Option<StepDefinition>,
    pub next_step: Option<StepDefinition>,
    pub progress_percent: u8,
    pub remaining_minutes: u32,
    pub save_state: SaveState,
    pub is_saving: bool,
    pub last_save_error: Option<String>,
    pub is_loaded: bool,
}

impl ProgressView {
    fn unloaded() -> Self {
        Self {
            instance: None,
            current_step: None,
            next_step: None,
            progress_percent: 0,
            remaining_minutes: 0,
            save_state: SaveState::Idle,
            is_saving: false,
            last_save_error: None,
            is_loaded: false,
        }
    }
}

/// What caused a durable write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveTrigger {
    Autosave,
    Manual,
}

struct PendingTimer {
    token: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SaveScheduler {
    timer: Option<PendingTimer>,
    next_token: u64,
    in_flight: bool,
    /// Bumped on every accepted mutation
    revision: u64,
    /// Newest revision the durable store is known to hold
    saved_revision: u64,
}

impl SaveScheduler {
    fn state(&self) -> SaveState {
        if self.in_flight {
            SaveState::Saving
        } else if self.timer.is_some() {
            SaveState::PendingSave
        } else {
            SaveState::Idle
        }
    }

    fn cancel_timer(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }
}

struct Session {
    epoch: u64,
    instance: WorkflowInstance,
    definition: Arc<WorkflowDefinition>,
    scheduler: SaveScheduler,
    last_save_error: Option<ProgressionError>,
}

impl Session {
    fn view(&self) -> ProgressView {
        let Metrics {
            progress_percent,
            remaining_minutes,
        } = Metrics::compute(&self.instance, &self.definition);
        let save_state = self.scheduler.state();

        ProgressView {
            instance: Some(self.instance.clone()),
            current_step: metrics::current_step(&self.instance, &self.definition).cloned(),
            next_step: metrics::next_step(&self.instance, &self.definition).cloned(),
            progress_percent,
            remaining_minutes,
            save_state,
            is_saving: save_state == SaveState::Saving,
            last_save_error: self.last_save_error.as_ref().map(ToString::to_string),
            is_loaded: true,
        }
    }
}

/// Serializes durable writes for one instance
///
/// Every coordinator that ever loads a given instance must hold a clone of
/// the same gate; otherwise a write left in flight by a replaced coordinator
/// can overlap the next one.
#[derive(Clone, Default)]
pub struct WriteGate(Arc<tokio::sync::Mutex<()>>);

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    async fn acquire(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.0).lock_owned().await
    }
}

#[derive(Default)]
struct CoordinatorState {
    session: Option<Session>,
    next_epoch: u64,
}

impl CoordinatorState {
    /// The session, if it is still the one identified by `epoch`
    fn session_at(&mut self, epoch: u64) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| s.epoch == epoch)
    }
}

struct Shared {
    durable: Arc<dyn DurableStore>,
    ephemeral: Arc<dyn EphemeralCache>,
    autosave_delay: Duration,
    state: Mutex<CoordinatorState>,
    /// Held for the whole duration of a durable write
    write_gate: WriteGate,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_ephemeral(&self, instance: &WorkflowInstance) {
        if let Err(e) = self.ephemeral.write(instance) {
            let e = ProgressionError::EphemeralWriteFailed(e.to_string());
            tracing::warn!(instance_id = %instance.id, "{}", e);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = state.session.as_mut() {
            session.scheduler.cancel_timer();
        }
    }
}

/// Coordinates ephemeral and durable persistence for one loaded workflow
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct PersistenceCoordinator {
    shared: Arc<Shared>,
}

impl PersistenceCoordinator {
    /// Create a coordinator with the default 30s autosave delay
    pub fn new(durable: Arc<dyn DurableStore>, ephemeral: Arc<dyn EphemeralCache>) -> Self {
        Self::with_autosave_delay(
            durable,
            ephemeral,
            Duration::from_millis(DEFAULT_AUTOSAVE_DELAY_MS),
        )
    }

    pub fn with_autosave_delay(
        durable: Arc<dyn DurableStore>,
        ephemeral: Arc<dyn EphemeralCache>,
        autosave_delay: Duration,
    ) -> Self {
        Self::with_write_gate(durable, ephemeral, autosave_delay, WriteGate::new())
    }

    /// Create a coordinator whose durable writes queue behind `write_gate`
    pub fn with_write_gate(
        durable: Arc<dyn DurableStore>,
        ephemeral: Arc<dyn EphemeralCache>,
        autosave_delay: Duration,
        write_gate: WriteGate,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                durable,
                ephemeral,
                autosave_delay,
                state: Mutex::new(CoordinatorState::default()),
                write_gate,
            }),
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load an instance, replacing any previously loaded one
    ///
    /// Writes the ephemeral snapshot but does not schedule a durable save.
    pub fn load_workflow(
        &self,
        instance: WorkflowInstance,
        definition: impl Into<Arc<WorkflowDefinition>>,
    ) -> Result<ProgressView, ProgressionError> {
        let definition = definition.into();
        transition::check_instance(&instance, &definition)?;

        let mut state = self.shared.lock();
        if let Some(mut previous) = state.session.take() {
            previous.scheduler.cancel_timer();
        }

        state.next_epoch += 1;
        let session = Session {
            epoch: state.next_epoch,
            instance,
            definition,
            scheduler: SaveScheduler::default(),
            last_save_error: None,
        };
        self.shared.write_ephemeral(&session.instance);

        tracing::info!(
            instance_id = %session.instance.id,
            preset_id = %session.definition.id,
            "Loaded workflow"
        );

        let view = session.view();
        state.session = Some(session);
        Ok(view)
    }

    /// Load an instance from the durable store, recovering from the ephemeral
    /// backup when it holds more progress
    ///
    /// When the backup wins, a durable save is armed so the recovered progress
    /// is written back.
    pub async fn load_from_store(
        &self,
        owner_id: &str,
        instance_id: &str,
        definition: impl Into<Arc<WorkflowDefinition>>,
    ) -> Result<(ProgressView, RecoverySource), ProgressionError> {
        let durable = self.shared.durable.get_instance(owner_id, instance_id).await?;
        self.recover_workflow(durable, definition)
    }

    /// Load `durable` (already fetched from the durable store), preferring the
    /// ephemeral backup when it holds more progress
    pub fn recover_workflow(
        &self,
        durable: WorkflowInstance,
        definition: impl Into<Arc<WorkflowDefinition>>,
    ) -> Result<(ProgressView, RecoverySource), ProgressionError> {
        let snapshot = match self.shared.ephemeral.read() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Failed to read ephemeral backup: {}", e);
                None
            }
        };

        let recovered = recovery::resolve(durable, snapshot);
        let mut view = self.load_workflow(recovered.instance, definition)?;

        if recovered.source == RecoverySource::Ephemeral {
            let mut state = self.shared.lock();
            if let Some(session) = state.session.as_mut() {
                session.scheduler.revision += 1;
                self.arm_timer(session);
                view = session.view();
            }
        }

        Ok((view, recovered.source))
    }

    /// Unload the session, cancelling any pending save and dropping its backup
    ///
    /// A durable write already in flight is left to finish on its own.
    pub fn clear_workflow(&self) {
        let mut state = self.shared.lock();
        let Some(mut session) = state.session.take() else {
            return;
        };

        if session.scheduler.cancel_timer() {
            tracing::debug!(instance_id = %session.instance.id, "Discarded pending autosave");
        }

        // The slot is shared; leave another instance's backup alone
        let owns_slot = match self.shared.ephemeral.read() {
            Ok(Some(snapshot)) => snapshot.instance.id == session.instance.id,
            Ok(None) => false,
            Err(_) => true,
        };
        if owns_slot {
            if let Err(e) = self.shared.ephemeral.clear() {
                tracing::warn!("Failed to clear ephemeral backup: {}", e);
            }
        }

        tracing::info!(instance_id = %session.instance.id, "Cleared workflow");
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Complete the current step, optionally merging context data
    pub fn complete_step(&self, data: Option<ContextData>) -> Result<ProgressView, ProgressionError> {
        self.apply_mutation(Action::Complete { data })
    }

    /// Skip the current (optional) step
    pub fn skip_step(&self) -> Result<ProgressView, ProgressionError> {
        self.apply_mutation(Action::Skip)
    }

    /// Move to a resolved step or stay on the current one
    pub fn navigate_to_step(&self, step_id: &str) -> Result<ProgressView, ProgressionError> {
        self.apply_mutation(Action::Navigate {
            step_id: step_id.to_string(),
        })
    }

    /// Run an action through the transition engine and persist the result
    ///
    /// Validation failures leave every piece of state untouched.
    pub fn apply_mutation(&self, action: Action) -> Result<ProgressView, ProgressionError> {
        let mut state = self.shared.lock();
        let session = state
            .session
            .as_mut()
            .ok_or(ProgressionError::NoWorkflowLoaded)?;

        let action_name = action.name();
        let mut next =
            transition::apply(Some(&session.instance), Some(&session.definition), action)?;
        next.last_active_at = Utc::now();

        tracing::debug!(
            instance_id = %next.id,
            action = action_name,
            current_step = %next.current_step_id,
            "Applied workflow action"
        );

        session.instance = next;
        session.scheduler.revision += 1;
        // Written under the state lock so the slot always holds the newest mutation
        self.shared.write_ephemeral(&session.instance);
        self.arm_timer(session);

        Ok(session.view())
    }

    // ========================================================================
    // Saving
    // ========================================================================

    /// Write the current instance to the durable store now
    ///
    /// Cancels any pending autosave and waits for an in-flight write to settle
    /// before starting. A durable failure is recorded in `last_save_error`
    /// rather than returned.
    pub async fn save(&self) -> Result<(), ProgressionError> {
        let epoch = {
            let mut state = self.shared.lock();
            let session = state
                .session
                .as_mut()
                .ok_or(ProgressionError::NoWorkflowLoaded)?;
            session.scheduler.cancel_timer();
            session.epoch
        };

        self.persist(epoch, SaveTrigger::Manual).await;
        Ok(())
    }

    /// Host is about to lose foreground attention
    ///
    /// Promotes a pending autosave to an immediate write; with nothing pending
    /// it still waits for a write already in flight. Returns whether a write
    /// was performed.
    pub async fn flush_on_hide(&self) -> bool {
        let pending = {
            let state = self.shared.lock();
            state
                .session
                .as_ref()
                .is_some_and(|s| s.scheduler.timer.is_some())
        };

        if !pending {
            // A write may already be running off a fired timer
            self.settle().await;
            return false;
        }
        tracing::debug!("Flushing pending autosave on hide");
        self.save().await.is_ok()
    }

    /// Wait until no durable write for this instance is in flight
    pub async fn settle(&self) {
        drop(self.shared.write_gate.acquire().await);
    }

    /// Host is about to terminate
    ///
    /// Only the synchronous ephemeral write is guaranteed here; no durable
    /// write is attempted.
    pub fn flush_on_unload(&self) {
        let state = self.shared.lock();
        if let Some(session) = state.session.as_ref() {
            self.shared.write_ephemeral(&session.instance);
            tracing::debug!(instance_id = %session.instance.id, "Flushed ephemeral backup on unload");
        }
    }

    /// Cancel-and-replace the debounce timer for `session`
    fn arm_timer(&self, session: &mut Session) {
        if session.scheduler.cancel_timer() {
            tracing::trace!("Restarting autosave window");
        }

        session.scheduler.next_token += 1;
        let token = session.scheduler.next_token;
        let epoch = session.epoch;
        let delay = self.shared.autosave_delay;
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                PersistenceCoordinator { shared }.on_timer(epoch, token).await;
            }
        });

        session.scheduler.timer = Some(PendingTimer { token, handle });
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Autosave armed");
    }

    async fn on_timer(&self, epoch: u64, token: u64) {
        let fired = {
            let mut state = self.shared.lock();
            let current = state.session_at(epoch).filter(|session| {
                session
                    .scheduler
                    .timer
                    .as_ref()
                    .is_some_and(|t| t.token == token)
            });
            // Detach: from here the write can no longer be cancelled
            let fired = current.map(|session| session.scheduler.timer.take()).is_some();
            fired
        };

        if fired {
            self.persist(epoch, SaveTrigger::Autosave).await;
        }
    }

    /// Run a durable write on its own task so dropping the caller cannot
    /// cancel it mid-flight
    async fn persist(&self, epoch: u64, trigger: SaveTrigger) {
        let gate = self.shared.write_gate.acquire().await;
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(write_latest(shared, epoch, trigger, gate));

        if let Err(e) = task.await {
            tracing::error!("Durable write task failed: {}", e);
        }
    }

    // ========================================================================
    // Derived State
    // ========================================================================

    /// Snapshot of everything the UI reads
    pub fn view(&self) -> ProgressView {
        let state = self.shared.lock();
        state
            .session
            .as_ref()
            .map(Session::view)
            .unwrap_or_else(ProgressView::unloaded)
    }

    pub fn current_instance(&self) -> Option<WorkflowInstance> {
        self.shared.lock().session.as_ref().map(|s| s.instance.clone())
    }

    pub fn current_step(&self) -> Option<StepDefinition> {
        self.view().current_step
    }

    pub fn next_step(&self) -> Option<StepDefinition> {
        self.view().next_step
    }

    pub fn progress_percent(&self) -> u8 {
        self.view().progress_percent
    }

    pub fn remaining_minutes(&self) -> u32 {
        self.view().remaining_minutes
    }

    pub fn save_state(&self) -> SaveState {
        self.shared
            .lock()
            .session
            .as_ref()
            .map(|s| s.scheduler.state())
            .unwrap_or(SaveState::Idle)
    }

    pub fn is_saving(&self) -> bool {
        self.save_state() == SaveState::Saving
    }

    pub fn last_save_error(&self) -> Option<ProgressionError> {
        self.shared
            .lock()
            .session
            .as_ref()
            .and_then(|s| s.last_save_error.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.lock().session.is_some()
    }
}

/// Write the newest state of session `epoch`, one writer at a time
async fn write_latest(
    shared: Arc<Shared>,
    epoch: u64,
    trigger: SaveTrigger,
    _gate: OwnedMutexGuard<()>,
) {
    let (owner_id, instance_id, update, revision) = {
        let mut state = shared.lock();
        let Some(session) = state.session_at(epoch) else {
            tracing::debug!("Session replaced before its write started; skipping");
            return;
        };

        let scheduler = &mut session.scheduler;
        if trigger == SaveTrigger::Autosave && scheduler.revision == scheduler.saved_revision {
            tracing::debug!(instance_id = %session.instance.id, "Nothing new to save");
            return;
        }

        scheduler.in_flight = true;
        (
            session.instance.owner_id.clone(),
            session.instance.id.clone(),
            session.instance.to_update(),
            scheduler.revision,
        )
    };

    let result = shared
        .durable
        .update_instance(&owner_id, &instance_id, &update)
        .await;

    let mut state = shared.lock();
    let Some(session) = state.session_at(epoch) else {
        tracing::debug!(%instance_id, "Durable write settled after its session was cleared");
        return;
    };

    session.scheduler.in_flight = false;
    match result {
        Ok(()) => {
            session.scheduler.saved_revision = session.scheduler.saved_revision.max(revision);
            session.last_save_error = None;
            tracing::info!(%instance_id, ?trigger, "Saved workflow");
        }
        Err(e) => {
            let e = ProgressionError::DurableWriteFailed(e.to_string());
            tracing::warn!(%instance_id, ?trigger, "{}", e);
            session.last_save_error = Some(e);
        }
    }
}
