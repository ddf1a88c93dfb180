//! Step transition engine
//!
//! Pure functions from `(instance, preset, action)` to the next instance value.
//! Nothing here performs I/O or reads the clock, and a rejected action never
//! produces a modified instance.
//!
//! Advancement follows preset order: completing or skipping always moves to
//! the step after the current one. Navigation legality follows set
//! membership: only resolved steps and the current step can be revisited.

use crate::error::ProgressionError;
use crate::types::{ContextData, WorkflowDefinition, WorkflowInstance, WorkflowStatus};

/// A progression action requested by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Complete the current step, merging `data` into the context
    Complete { data: Option<ContextData> },
    /// Skip the current step (optional steps only)
    Skip,
    /// Move to an already-resolved step, or stay on the current one
    Navigate { step_id: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Complete { .. } => "complete",
            Action::Skip => "skip",
            Action::Navigate { .. } => "navigate",
        }
    }
}

/// Apply an action, failing with `NoWorkflowLoaded` if either input is absent
pub fn apply(
    instance: Option<&WorkflowInstance>,
    definition: Option<&WorkflowDefinition>,
    action: Action,
) -> Result<WorkflowInstance, ProgressionError> {
    let (Some(instance), Some(definition)) = (instance, definition) else {
        return Err(ProgressionError::NoWorkflowLoaded);
    };

    match action {
        Action::Complete { data } => complete_step(instance, definition, data),
        Action::Skip => skip_step(instance, definition),
        Action::Navigate { step_id } => navigate_to_step(instance, definition, &step_id),
    }
}

/// Check that `instance` can be driven by `definition`
///
/// Returns the position of the current step.
pub fn check_instance(
    instance: &WorkflowInstance,
    definition: &WorkflowDefinition,
) -> Result<usize, ProgressionError> {
    if instance.preset_id != definition.id {
        return Err(ProgressionError::PresetMismatch {
            expected: instance.preset_id.clone(),
            found: definition.id.clone(),
        });
    }

    definition
        .position(&instance.current_step_id)
        .ok_or_else(|| ProgressionError::UnknownStep {
            preset_id: definition.id.clone(),
            step_id: instance.current_step_id.clone(),
        })
}

fn check_mutable(
    instance: &WorkflowInstance,
    definition: &WorkflowDefinition,
) -> Result<usize, ProgressionError> {
    let index = check_instance(instance, definition)?;
    if instance.status == WorkflowStatus::Abandoned {
        return Err(ProgressionError::WorkflowAbandoned(instance.id.clone()));
    }
    Ok(index)
}

/// Complete the current step and advance
///
/// Re-completing an already completed step is idempotent for the sets but
/// still merges `data` and still advances.
pub fn complete_step(
    instance: &WorkflowInstance,
    definition: &WorkflowDefinition,
    data: Option<ContextData>,
) -> Result<WorkflowInstance, ProgressionError> {
    let index = check_mutable(instance, definition)?;

    let mut next = instance.clone();
    let step_id = next.current_step_id.clone();
    next.skipped_steps.remove(&step_id);
    next.completed_steps.insert(step_id);

    if let Some(data) = data {
        next.context_data.extend(data);
    }

    advance(&mut next, definition, index);
    Ok(next)
}

/// Skip the current step and advance
pub fn skip_step(
    instance: &WorkflowInstance,
    definition: &WorkflowDefinition,
) -> Result<WorkflowInstance, ProgressionError> {
    let index = check_mutable(instance, definition)?;
    let step = &definition.steps[index];

    if !step.is_optional {
        return Err(ProgressionError::CannotSkipRequiredStep(step.id.clone()));
    }

    let mut next = instance.clone();
    next.completed_steps.remove(&step.id);
    next.skipped_steps.insert(step.id.clone());

    advance(&mut next, definition, index);
    Ok(next)
}

/// Move the cursor to a resolved step or the current step
///
/// Neither set is modified: reviewing a step does not uncomplete it.
pub fn navigate_to_step(
    instance: &WorkflowInstance,
    definition: &WorkflowDefinition,
    target_step_id: &str,
) -> Result<WorkflowInstance, ProgressionError> {
    check_mutable(instance, definition)?;

    let legal = target_step_id == instance.current_step_id
        || instance.is_resolved(target_step_id);
    if !legal || definition.position(target_step_id).is_none() {
        return Err(ProgressionError::InvalidNavigationTarget(
            target_step_id.to_string(),
        ));
    }

    let mut next = instance.clone();
    next.current_step_id = target_step_id.to_string();
    Ok(next)
}

/// Move past the step at `index`; on the last step, mark the run completed
fn advance(instance: &mut WorkflowInstance, definition: &WorkflowDefinition, index: usize) {
    match definition.steps.get(index + 1) {
        Some(step) => instance.current_step_id = step.id.clone(),
        None => {
            if required_steps_completed(instance, definition) {
                instance.status = WorkflowStatus::Completed;
            }
        }
    }
}

/// Every non-optional step is in the completed set
pub fn required_steps_completed(
    instance: &WorkflowInstance,
    definition: &WorkflowDefinition,
) -> bool {
    definition
        .steps
        .iter()
        .filter(|s| !s.is_optional)
        .all(|s| instance.completed_steps.contains(&s.id))
}
