//! Persistence contracts and in-process implementations
//!
//! - [`DurableStore`] - authoritative, asynchronous, may be slow or fail
//! - [`EphemeralCache`] - synchronous single-slot local backup, best effort
//! - [`RetryingStore`] - bounded retry with exponential backoff around any durable store
//! - [`MemoryDurableStore`] / [`MemoryEphemeralCache`] - in-memory implementations

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::error::StoreError;
use crate::types::{EphemeralSnapshot, InstanceUpdate, WorkflowInstance};

/// Authoritative record store keyed by owner id + instance id
///
/// Each call is assumed atomic: an update either lands completely or not at all.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch an instance, or `StoreError::NotFound`
    async fn get_instance(
        &self,
        owner_id: &str,
        instance_id: &str,
    ) -> Result<WorkflowInstance, StoreError>;

    /// Overwrite the mutable fields of an existing instance
    async fn update_instance(
        &self,
        owner_id: &str,
        instance_id: &str,
        update: &InstanceUpdate,
    ) -> Result<(), StoreError>;

    /// Record a newly started instance
    async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<(), StoreError>;
}

/// Single-slot local backup
///
/// The slot is shared by every instance: only the most recently written
/// instance has a backup.
pub trait EphemeralCache: Send + Sync {
    fn read(&self) -> Result<Option<EphemeralSnapshot>, StoreError>;

    fn write(&self, instance: &WorkflowInstance) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

// ============================================================================
// Retrying Store
// ============================================================================

/// Wraps a durable store with bounded retries
///
/// Only `StoreError::Unavailable` is retried. The final error is returned to
/// the caller unchanged.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: DurableStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= max_attempts => return Err(e),
                Err(e) => {
                    let wait = self.policy.backoff(attempt);
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        operation,
                        attempt,
                        max_attempts,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<S: DurableStore> DurableStore for RetryingStore<S> {
    async fn get_instance(
        &self,
        owner_id: &str,
        instance_id: &str,
    ) -> Result<WorkflowInstance, StoreError> {
        self.with_retry("get_instance", move || {
            self.inner.get_instance(owner_id, instance_id)
        })
        .await
    }

    async fn update_instance(
        &self,
        owner_id: &str,
        instance_id: &str,
        update: &InstanceUpdate,
    ) -> Result<(), StoreError> {
        self.with_retry("update_instance", move || {
            self.inner.update_instance(owner_id, instance_id, update)
        })
        .await
    }

    async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        self.with_retry("insert_instance", move || self.inner.insert_instance(instance))
            .await
    }
}

// ============================================================================
// In-Memory Durable Store
// ============================================================================

/// In-memory durable store
///
/// Cloning shares the underlying records. Failure injection and write delays
/// make it usable for exercising the coordinator's failure and overlap paths.
#[derive(Clone, Default)]
pub struct MemoryDurableStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    instances: HashMap<(String, String), WorkflowInstance>,
    /// Updates applied, oldest first
    updates: Vec<InstanceUpdate>,
    get_calls: usize,
    update_calls: usize,
    fail_next_updates: usize,
    write_delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `n` update calls fail with `Unavailable`
    pub fn fail_next_updates(&self, n: usize) {
        self.lock().fail_next_updates = n;
    }

    /// Delay every update by `delay` before it is applied
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.lock().write_delay = delay;
    }

    /// Updates that were applied, oldest first
    pub fn applied_updates(&self) -> Vec<InstanceUpdate> {
        self.lock().updates.clone()
    }

    /// Read calls received
    pub fn get_calls(&self) -> usize {
        self.lock().get_calls
    }

    /// Update calls received, including failed ones
    pub fn update_calls(&self) -> usize {
        self.lock().update_calls
    }

    /// Highest number of updates that were ever running at once
    pub fn max_concurrent_updates(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Read a record without going through the async contract
    pub fn snapshot(&self, owner_id: &str, instance_id: &str) -> Option<WorkflowInstance> {
        self.lock()
            .instances
            .get(&(owner_id.to_string(), instance_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get_instance(
        &self,
        owner_id: &str,
        instance_id: &str,
    ) -> Result<WorkflowInstance, StoreError> {
        self.lock().get_calls += 1;
        self.snapshot(owner_id, instance_id)
            .ok_or_else(|| StoreError::NotFound {
                owner_id: owner_id.to_string(),
                instance_id: instance_id.to_string(),
            })
    }

    async fn update_instance(
        &self,
        owner_id: &str,
        instance_id: &str,
        update: &InstanceUpdate,
    ) -> Result<(), StoreError> {
        let delay = {
            let mut inner = self.lock();
            inner.update_calls += 1;
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            inner.write_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        inner.in_flight -= 1;

        if inner.fail_next_updates > 0 {
            inner.fail_next_updates -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let key = (owner_id.to_string(), instance_id.to_string());
        let instance = inner
            .instances
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound {
                owner_id: owner_id.to_string(),
                instance_id: instance_id.to_string(),
            })?;
        update.apply_to(instance);
        inner.updates.push(update.clone());
        Ok(())
    }

    async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        self.lock().instances.insert(
            (instance.owner_id.clone(), instance.id.clone()),
            instance.clone(),
        );
        Ok(())
    }
}

// ============================================================================
// In-Memory Ephemeral Cache
// ============================================================================

/// In-memory single-slot cache
#[derive(Clone, Default)]
pub struct MemoryEphemeralCache {
    slot: Arc<Mutex<Option<EphemeralSnapshot>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryEphemeralCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until switched back off
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Place a snapshot in the slot directly
    pub fn put(&self, snapshot: EphemeralSnapshot) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }
}

impl EphemeralCache for MemoryEphemeralCache {
    fn read(&self) -> Result<Option<EphemeralSnapshot>, StoreError> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn write(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("storage quota exceeded".to_string()));
        }
        self.put(EphemeralSnapshot {
            instance: instance.clone(),
            captured_at: Utc::now(),
        });
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
