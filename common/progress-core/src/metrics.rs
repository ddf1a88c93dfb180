//! Derived progress metrics
//!
//! Both figures are recomputed from scratch on every change; neither reads the
//! current step pointer, so reviewing an earlier step never moves them.

use serde::Serialize;

use crate::types::{StepDefinition, WorkflowDefinition, WorkflowInstance};

/// Progress figures for one instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub progress_percent: u8,
    pub remaining_minutes: u32,
}

impl Metrics {
    pub fn compute(instance: &WorkflowInstance, definition: &WorkflowDefinition) -> Self {
        Self {
            progress_percent: calculate_progress(instance, definition),
            remaining_minutes: calculate_remaining_time(instance, definition),
        }
    }
}

/// Resolved (completed or skipped) steps as a rounded percentage of all steps
pub fn calculate_progress(instance: &WorkflowInstance, definition: &WorkflowDefinition) -> u8 {
    let total = definition.steps.len();
    if total == 0 {
        return 0;
    }

    let resolved = instance.resolved_count().min(total);
    // round(100 * resolved / total), half rounds up
    ((resolved * 200 + total) / (total * 2)) as u8
}

/// Minutes estimated for every step not yet completed or skipped
///
/// The current step counts until it is resolved.
pub fn calculate_remaining_time(
    instance: &WorkflowInstance,
    definition: &WorkflowDefinition,
) -> u32 {
    definition
        .steps
        .iter()
        .filter(|step| !instance.is_resolved(&step.id))
        .map(|step| step.estimated_minutes)
        .sum()
}

/// The step the instance currently points at
pub fn current_step<'a>(
    instance: &WorkflowInstance,
    definition: &'a WorkflowDefinition,
) -> Option<&'a StepDefinition> {
    definition.step(&instance.current_step_id)
}

/// The step after the current one in preset order
pub fn next_step<'a>(
    instance: &WorkflowInstance,
    definition: &'a WorkflowDefinition,
) -> Option<&'a StepDefinition> {
    definition.step_after(&instance.current_step_id)
}
