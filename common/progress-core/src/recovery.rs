//! Load-time recovery between the durable record and the ephemeral backup

use serde::Serialize;

use crate::types::{EphemeralSnapshot, WorkflowInstance};

/// Which copy a resumed session was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    Durable,
    Ephemeral,
}

/// Outcome of [`resolve`]
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub instance: WorkflowInstance,
    pub source: RecoverySource,
}

/// Pick the instance to resume from
///
/// More progress wins: the snapshot is used when it has strictly more resolved
/// steps than the durable record, or the same number with a later
/// `last_active_at`. A snapshot of a different instance (the slot is shared)
/// or one whose completed and skipped sets overlap is ignored.
pub fn resolve(durable: WorkflowInstance, snapshot: Option<EphemeralSnapshot>) -> Recovered {
    let from_durable = |instance| Recovered {
        instance,
        source: RecoverySource::Durable,
    };

    let Some(snapshot) = snapshot else {
        return from_durable(durable);
    };
    let local = snapshot.instance;

    if local.id != durable.id || local.owner_id != durable.owner_id {
        tracing::debug!(
            "Ignoring ephemeral snapshot for {} while resuming {}",
            local.id,
            durable.id
        );
        return from_durable(durable);
    }

    if !local.has_disjoint_sets() {
        tracing::warn!(
            instance_id = %local.id,
            "Ignoring ephemeral snapshot with a step both completed and skipped"
        );
        return from_durable(durable);
    }

    let durable_progress = durable.resolved_count();
    let local_progress = local.resolved_count();
    let prefer_local = local_progress > durable_progress
        || (local_progress == durable_progress && local.last_active_at > durable.last_active_at);

    if prefer_local {
        tracing::info!(
            instance_id = %local.id,
            local_progress,
            durable_progress,
            "Recovering workflow from ephemeral snapshot"
        );
        Recovered {
            instance: local,
            source: RecoverySource::Ephemeral,
        }
    } else {
        from_durable(durable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StepDefinition, WorkflowDefinition};
    use chrono::{Duration, Utc};

    fn preset() -> WorkflowDefinition {
        WorkflowDefinition::new("p")
            .with_step(StepDefinition::required("a", 1))
            .with_step(StepDefinition::required("b", 1))
            .with_step(StepDefinition::required("c", 1))
    }

    fn snapshot_of(instance: &WorkflowInstance) -> EphemeralSnapshot {
        EphemeralSnapshot {
            instance: instance.clone(),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_snapshot_uses_durable() {
        let durable = WorkflowInstance::start("o", &preset()).unwrap();
        let recovered = resolve(durable.clone(), None);
        assert_eq!(recovered.source, RecoverySource::Durable);
        assert_eq!(recovered.instance, durable);
    }

    #[test]
    fn test_more_progress_wins_regardless_of_time() {
        let mut durable = WorkflowInstance::start("o", &preset()).unwrap();
        durable.completed_steps.insert("a");

        let mut local = durable.clone();
        local.completed_steps.insert("b");
        local.last_active_at = durable.last_active_at - Duration::hours(5);

        let recovered = resolve(durable, Some(snapshot_of(&local)));
        assert_eq!(recovered.source, RecoverySource::Ephemeral);
        assert_eq!(recovered.instance.completed_steps.len(), 2);
    }

    #[test]
    fn test_less_progress_loses_even_if_newer() {
        let mut durable = WorkflowInstance::start("o", &preset()).unwrap();
        durable.completed_steps.insert("a");
        durable.completed_steps.insert("b");

        let mut local = durable.clone();
        local.completed_steps.remove("b");
        local.last_active_at = durable.last_active_at + Duration::hours(1);

        let recovered = resolve(durable, Some(snapshot_of(&local)));
        assert_eq!(recovered.source, RecoverySource::Durable);
    }

    #[test]
    fn test_tie_prefers_later_activity() {
        let durable = WorkflowInstance::start("o", &preset()).unwrap();

        let mut local = durable.clone();
        local.current_step_id = "a".into();
        local.last_active_at = durable.last_active_at + Duration::seconds(10);
        assert_eq!(
            resolve(durable.clone(), Some(snapshot_of(&local))).source,
            RecoverySource::Ephemeral
        );

        local.last_active_at = durable.last_active_at;
        assert_eq!(
            resolve(durable, Some(snapshot_of(&local))).source,
            RecoverySource::Durable
        );
    }

    #[test]
    fn test_snapshot_of_other_instance_is_ignored() {
        let durable = WorkflowInstance::start("o", &preset()).unwrap();
        let mut other = WorkflowInstance::start("o", &preset()).unwrap();
        other.completed_steps.insert("a");
        other.completed_steps.insert("b");

        let recovered = resolve(durable.clone(), Some(snapshot_of(&other)));
        assert_eq!(recovered.source, RecoverySource::Durable);
        assert_eq!(recovered.instance.id, durable.id);
    }

    #[test]
    fn test_overlapping_snapshot_is_ignored() {
        let durable = WorkflowInstance::start("o", &preset()).unwrap();

        let mut local = durable.clone();
        local.completed_steps.insert("a");
        local.skipped_steps.insert("a");
        local.completed_steps.insert("b");

        let recovered = resolve(durable.clone(), Some(snapshot_of(&local)));
        assert_eq!(recovered.source, RecoverySource::Durable);
        assert_eq!(recovered.instance, durable);
    }
}
