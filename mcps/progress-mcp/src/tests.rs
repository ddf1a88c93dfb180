//! Tests for progress-mcp sessions and storage

#[cfg(test)]
#[allow(clippy::module_inception)]
mod tests {
    use super::super::params::LifecycleEvent;
    use super::super::registry::{RegistryError, SessionRegistry};
    use super::super::server::{preset_summaries, ProgressMcpServer};
    use super::super::slot::FileSlotCache;
    use super::super::sqlite::SqliteStore;
    use progress_core::{
        ContextData, EphemeralCache, MemoryDurableStore, MemoryEphemeralCache, PresetCatalog,
        PresetError, RecoverySource, RetryPolicy, RetryingStore, SaveState, WorkflowStatus,
    };
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    const DELAY: Duration = Duration::from_secs(30);

    struct Harness {
        durable: MemoryDurableStore,
        ephemeral: MemoryEphemeralCache,
        server: ProgressMcpServer,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_stores(MemoryDurableStore::new(), MemoryEphemeralCache::new())
        }

        /// A fresh server process over existing storage
        fn with_stores(durable: MemoryDurableStore, ephemeral: MemoryEphemeralCache) -> Self {
            let registry = SessionRegistry::new(
                Arc::new(durable.clone()),
                Arc::new(ephemeral.clone()),
                PresetCatalog::builtin(),
                DELAY,
            );
            Self {
                durable,
                ephemeral,
                server: ProgressMcpServer::new(Arc::new(registry)),
            }
        }

        fn registry(&self) -> Arc<SessionRegistry> {
            self.server.registry()
        }
    }

    /// Let spawned save tasks run to completion
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn sqlite_registry(dir: &Path) -> SessionRegistry {
        let sqlite = SqliteStore::open(&dir.join("progress.db")).unwrap();
        SessionRegistry::new(
            Arc::new(RetryingStore::new(sqlite, RetryPolicy::none())),
            Arc::new(FileSlotCache::new(dir.join("backup.json"))),
            PresetCatalog::builtin(),
            DELAY,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_records_instance_and_autosaves() {
        let harness = Harness::new();
        let registry = harness.registry();

        let mut context = ContextData::new();
        context.insert("agent".to_string(), json!("Sam"));
        let view = registry
            .start("owner-1", "listing-launch", context)
            .await
            .unwrap();

        let instance = view.instance.unwrap();
        assert_eq!(instance.current_step_id, "property-details");
        assert_eq!(instance.context_data["agent"], json!("Sam"));
        assert_eq!(view.progress_percent, 0);
        assert_eq!(view.remaining_minutes, 65);
        assert_eq!(view.save_state, SaveState::Idle);
        assert!(harness.durable.snapshot("owner-1", &instance.id).is_some());

        let session = registry.session(&instance.id).unwrap();
        let mut data = ContextData::new();
        data.insert("address".to_string(), json!("12 Shore Rd"));
        let view = session.complete_step(Some(data)).unwrap();
        assert_eq!(view.progress_percent, 20);
        assert_eq!(view.save_state, SaveState::PendingSave);

        tokio::time::sleep(DELAY).await;
        settle().await;

        let stored = harness.durable.snapshot("owner-1", &instance.id).unwrap();
        assert!(stored.completed_steps.contains("property-details"));
        assert_eq!(stored.context_data["address"], json!("12 Shore Rd"));
        assert_eq!(session.save_state(), SaveState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_preset_is_invalid_request() {
        let harness = Harness::new();

        let err = harness
            .registry()
            .start("owner-1", "nope", ContextData::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::Preset(PresetError::NotFound(_))));
        assert!(err.is_invalid_request());
        assert_eq!(harness.durable.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_unloaded_instance() {
        let harness = Harness::new();
        let registry = harness.registry();

        assert!(matches!(
            registry.session("missing"),
            Err(RegistryError::NotLoaded(_))
        ));

        let err = registry.load("owner-1", "missing").await.unwrap_err();
        assert!(matches!(err, RegistryError::Store(_)));
        assert!(err.is_invalid_request());
        assert!(!registry.clear("missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_required_step_is_rejected_without_side_effects() {
        let harness = Harness::new();
        let registry = harness.registry();
        let view = registry
            .start("owner-1", "market-research", ContextData::new())
            .await
            .unwrap();
        let id = view.instance.unwrap().id;

        let session = registry.session(&id).unwrap();
        let err: RegistryError = session.skip_step().unwrap_err().into();
        assert!(err.is_invalid_request());
        assert_eq!(session.save_state(), SaveState::Idle);
        assert!(harness.ephemeral.read().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_process_recovers_unsaved_progress() {
        let durable = MemoryDurableStore::new();
        let ephemeral = MemoryEphemeralCache::new();

        let id = {
            let first = Harness::with_stores(durable.clone(), ephemeral.clone());
            let registry = first.registry();
            let view = registry
                .start("owner-1", "content-studio", ContextData::new())
                .await
                .unwrap();
            let id = view.instance.unwrap().id;

            let session = registry.session(&id).unwrap();
            session.complete_step(None).unwrap();
            session.complete_step(None).unwrap();
            id
        };

        // Crash before the autosave window closed
        assert_eq!(durable.update_calls(), 0);

        let second = Harness::with_stores(durable, ephemeral);
        let (view, source) = second.registry().load("owner-1", &id).await.unwrap();

        assert_eq!(source, RecoverySource::Ephemeral);
        assert_eq!(view.instance.unwrap().current_step_id, "drafts");
        assert_eq!(view.save_state, SaveState::PendingSave);

        tokio::time::sleep(DELAY).await;
        settle().await;

        let stored = second.durable.snapshot("owner-1", &id).unwrap();
        assert_eq!(stored.completed_steps.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_flushes_live_session_first() {
        let harness = Harness::new();
        let registry = harness.registry();
        let view = registry
            .start("owner-1", "content-studio", ContextData::new())
            .await
            .unwrap();
        let id = view.instance.unwrap().id;

        registry.session(&id).unwrap().complete_step(None).unwrap();
        let (view, _) = registry.load("owner-1", &id).await.unwrap();

        assert_eq!(harness.durable.update_calls(), 1);
        assert_eq!(view.progress_percent, 25);
        assert_eq!(registry.loaded_ids(), vec![id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_events() {
        let harness = Harness::new();
        let registry = harness.registry();

        let mut ids = Vec::new();
        for preset in ["content-studio", "market-research"] {
            let view = registry
                .start("owner-1", preset, ContextData::new())
                .await
                .unwrap();
            ids.push(view.instance.unwrap().id);
        }
        registry.session(&ids[0]).unwrap().complete_step(None).unwrap();

        let unload = harness
            .server
            .apply_lifecycle(LifecycleEvent::Unload, None)
            .await
            .unwrap();
        assert_eq!(unload.sessions, 2);
        assert_eq!(unload.written, 0);
        assert_eq!(harness.durable.update_calls(), 0);

        let hide = harness
            .server
            .apply_lifecycle(LifecycleEvent::Hide, None)
            .await
            .unwrap();
        assert_eq!(hide.sessions, 2);
        assert_eq!(hide.written, 1);
        assert_eq!(harness.durable.update_calls(), 1);
        assert_eq!(
            registry.session(&ids[0]).unwrap().save_state(),
            SaveState::Idle
        );

        let err = harness
            .server
            .apply_lifecycle(LifecycleEvent::Hide, Some("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotLoaded(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_discards_pending_autosave() {
        let harness = Harness::new();
        let registry = harness.registry();
        let view = registry
            .start("owner-1", "market-research", ContextData::new())
            .await
            .unwrap();
        let id = view.instance.unwrap().id;

        registry.session(&id).unwrap().complete_step(None).unwrap();
        assert!(registry.clear(&id));

        tokio::time::sleep(DELAY * 2).await;
        settle().await;

        assert_eq!(harness.durable.update_calls(), 0);
        assert!(harness.ephemeral.read().unwrap().is_none());
        assert!(registry.loaded_ids().is_empty());
    }

    #[test]
    fn test_preset_summaries() {
        let catalog = PresetCatalog::builtin();

        let summaries = preset_summaries(&catalog, false);
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].id, "content-studio");
        assert_eq!(summaries[0].step_count, 4);
        assert_eq!(summaries[0].total_minutes, 60);
        assert!(summaries[0].steps.is_none());

        let detailed = preset_summaries(&catalog, true);
        let steps = detailed[1].steps.as_ref().unwrap();
        assert_eq!(steps[0].id, "property-details");
    }

    #[tokio::test]
    async fn test_sqlite_round_trip_across_restart() {
        let dir = tempfile::tempdir().unwrap();

        let id = {
            let registry = sqlite_registry(dir.path());
            let view = registry
                .start("owner-1", "listing-launch", ContextData::new())
                .await
                .unwrap();
            let id = view.instance.unwrap().id;

            let session = registry.session(&id).unwrap();
            session.complete_step(None).unwrap();
            session.skip_step().unwrap();
            session.save().await.unwrap();
            assert!(session.last_save_error().is_none());
            id
        };

        let registry = sqlite_registry(dir.path());
        let (view, _) = registry.load("owner-1", &id).await.unwrap();
        let instance = view.instance.unwrap();

        assert_eq!(instance.current_step_id, "listing-description");
        assert!(instance.completed_steps.contains("property-details"));
        assert!(instance.skipped_steps.contains("photo-review"));
        assert_eq!(instance.status, WorkflowStatus::Active);
        assert_eq!(view.progress_percent, 40);
    }

    #[tokio::test]
    async fn test_sqlite_backup_ahead_of_database() {
        let dir = tempfile::tempdir().unwrap();

        let id = {
            let registry = sqlite_registry(dir.path());
            let view = registry
                .start("owner-1", "market-research", ContextData::new())
                .await
                .unwrap();
            let id = view.instance.unwrap().id;
            registry.session(&id).unwrap().complete_step(None).unwrap();
            id
        };

        let registry = sqlite_registry(dir.path());
        let (view, source) = registry.load("owner-1", &id).await.unwrap();

        assert_eq!(source, RecoverySource::Ephemeral);
        assert_eq!(view.instance.unwrap().current_step_id, "comparables");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_waits_for_in_flight_write() {
        let harness = Harness::new();
        let registry = harness.registry();
        let view = registry
            .start("owner-1", "content-studio", ContextData::new())
            .await
            .unwrap();
        let id = view.instance.unwrap().id;

        harness.durable.set_write_delay(Some(Duration::from_secs(5)));
        let old = registry.session(&id).unwrap();
        old.complete_step(None).unwrap();
        let slow = tokio::spawn(async move { old.save().await });
        settle().await;

        let (view, _) = registry.load("owner-1", &id).await.unwrap();
        assert_eq!(view.instance.unwrap().current_step_id, "topics");

        harness.durable.set_write_delay(Some(Duration::from_secs(1)));
        let session = registry.session(&id).unwrap();
        session.complete_step(None).unwrap();
        session.save().await.unwrap();
        slow.await.unwrap().unwrap();

        assert_eq!(harness.durable.max_concurrent_updates(), 1);
        let stored = harness.durable.snapshot("owner-1", &id).unwrap();
        assert_eq!(stored.current_step_id, "drafts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_then_load_queues_behind_old_write() {
        let harness = Harness::new();
        let registry = harness.registry();
        let view = registry
            .start("owner-1", "content-studio", ContextData::new())
            .await
            .unwrap();
        let id = view.instance.unwrap().id;

        harness.durable.set_write_delay(Some(Duration::from_secs(5)));
        let old = registry.session(&id).unwrap();
        old.complete_step(None).unwrap();
        let slow = tokio::spawn(async move { old.save().await });
        settle().await;

        assert!(registry.clear(&id));
        registry.load("owner-1", &id).await.unwrap();

        harness.durable.set_write_delay(Some(Duration::from_secs(1)));
        let session = registry.session(&id).unwrap();
        session.complete_step(None).unwrap();
        session.complete_step(None).unwrap();
        session.save().await.unwrap();
        slow.await.unwrap().unwrap();

        assert_eq!(harness.durable.max_concurrent_updates(), 1);
        let stored = harness.durable.snapshot("owner-1", &id).unwrap();
        assert_eq!(stored.current_step_id, "drafts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_waits_for_fired_autosave() {
        let harness = Harness::new();
        let registry = harness.registry();
        let view = registry
            .start("owner-1", "content-studio", ContextData::new())
            .await
            .unwrap();
        let id = view.instance.unwrap().id;

        harness.durable.set_write_delay(Some(DELAY));
        registry.session(&id).unwrap().complete_step(None).unwrap();
        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;
        let stored = harness.durable.snapshot("owner-1", &id).unwrap();
        assert!(stored.completed_steps.is_empty());

        let hide = harness
            .server
            .apply_lifecycle(LifecycleEvent::Hide, None)
            .await
            .unwrap();

        assert_eq!(hide.written, 0);
        let stored = harness.durable.snapshot("owner-1", &id).unwrap();
        assert!(stored.completed_steps.contains("audience"));
    }

    #[tokio::test]
    async fn test_load_reads_durable_record_once() {
        let harness = Harness::new();
        let registry = harness.registry();
        let view = registry
            .start("owner-1", "market-research", ContextData::new())
            .await
            .unwrap();
        let id = view.instance.unwrap().id;

        registry.load("owner-1", &id).await.unwrap();
        assert_eq!(harness.durable.get_calls(), 1);
    }
}
