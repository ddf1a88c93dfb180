//! Core progression type definitions
//!
//! This module contains the preset templates (`WorkflowDefinition`), the live
//! per-user run of a preset (`WorkflowInstance`), and the payloads exchanged
//! with the durable store and the ephemeral cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use uuid::Uuid;

use crate::error::{PresetError, ProgressionError};

/// Arbitrary values produced by steps, keyed by name (last write wins per key)
pub type ContextData = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Preset Types
// ============================================================================

/// A single step in a workflow preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Identifier, unique within the preset
    pub id: String,

    /// Short display title
    #[serde(default)]
    pub title: String,

    /// Longer guidance shown alongside the step
    #[serde(default)]
    pub description: String,

    /// Whether the step may be skipped
    #[serde(default, rename = "optional")]
    pub is_optional: bool,

    /// Rough time the step takes, in minutes
    #[serde(default)]
    pub estimated_minutes: u32,

    /// Context keys expected to be present before this step is worked on
    #[serde(default)]
    pub context_inputs: BTreeSet<String>,

    /// Context keys this step is expected to produce
    #[serde(default)]
    pub context_outputs: BTreeSet<String>,
}

impl StepDefinition {
    /// Create a required step
    pub fn required(id: impl Into<String>, estimated_minutes: u32) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            description: String::new(),
            is_optional: false,
            estimated_minutes,
            context_inputs: BTreeSet::new(),
            context_outputs: BTreeSet::new(),
        }
    }

    /// Create an optional (skippable) step
    pub fn optional(id: impl Into<String>, estimated_minutes: u32) -> Self {
        Self {
            is_optional: true,
            ..Self::required(id, estimated_minutes)
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Declare context keys consumed by this step
    pub fn with_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_inputs.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Declare context keys produced by this step
    pub fn with_outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_outputs.extend(keys.into_iter().map(Into::into));
        self
    }
}

/// An immutable workflow preset: an ordered list of steps
///
/// Step order is the canonical linear progression order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique preset identifier
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Steps in progression order
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Create a new, empty preset
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            description: String::new(),
            steps: Vec::new(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Append a step
    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Position of a step in progression order
    pub fn position(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Look up a step by id
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// First step in progression order
    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    /// The step that follows `step_id`, if any
    pub fn step_after(&self, step_id: &str) -> Option<&StepDefinition> {
        self.position(step_id).and_then(|idx| self.steps.get(idx + 1))
    }

    /// Sum of all step estimates
    pub fn total_minutes(&self) -> u32 {
        self.steps.iter().map(|s| s.estimated_minutes).sum()
    }

    /// Check that the preset has steps and that step ids are unique
    pub fn validate(&self) -> Result<(), PresetError> {
        if self.steps.is_empty() {
            return Err(PresetError::Invalid {
                preset_id: self.id.clone(),
                reason: "preset has no steps".to_string(),
            });
        }

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(PresetError::Invalid {
                    preset_id: self.id.clone(),
                    reason: format!("duplicate step id '{}'", step.id),
                });
            }
        }

        Ok(())
    }

    /// Load a preset from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, PresetError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PresetError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a preset from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, PresetError> {
        let preset: Self =
            toml::from_str(toml_str).map_err(|e| PresetError::ParseError(e.to_string()))?;
        preset.validate()?;
        Ok(preset)
    }
}

// ============================================================================
// Instance Types
// ============================================================================

/// Lifecycle status of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Completed,
    /// Set by an external collaborator, never by the transition engine
    Abandoned,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(WorkflowStatus::Active),
            "completed" => Ok(WorkflowStatus::Completed),
            "abandoned" => Ok(WorkflowStatus::Abandoned),
            _ => Err(format!("Unknown workflow status: {}", s)),
        }
    }
}

/// Set of step ids that remembers first-insertion order
///
/// Serialized as a plain list; duplicates in stored data collapse on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct StepSet(Vec<String>);

impl From<Vec<String>> for StepSet {
    fn from(ids: Vec<String>) -> Self {
        ids.into_iter().collect()
    }
}

impl From<StepSet> for Vec<String> {
    fn from(set: StepSet) -> Self {
        set.0
    }
}

impl StepSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.0.iter().any(|s| s == step_id)
    }

    /// Add a step id. Returns false if it was already present.
    pub fn insert(&mut self, step_id: impl Into<String>) -> bool {
        let step_id = step_id.into();
        if self.contains(&step_id) {
            return false;
        }
        self.0.push(step_id);
        true
    }

    /// Remove a step id. Returns false if it was not present.
    pub fn remove(&mut self, step_id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|s| s != step_id);
        self.0.len() != before
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for StepSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = StepSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

/// One user's live run through a preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub owner_id: String,
    pub preset_id: String,
    pub status: WorkflowStatus,
    pub current_step_id: String,
    #[serde(default)]
    pub completed_steps: StepSet,
    #[serde(default)]
    pub skipped_steps: StepSet,
    #[serde(default)]
    pub context_data: ContextData,
    pub started_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Start a fresh Active instance positioned on the preset's first step
    pub fn start(
        owner_id: impl Into<String>,
        definition: &WorkflowDefinition,
    ) -> Result<Self, ProgressionError> {
        let first = definition
            .first_step()
            .ok_or_else(|| ProgressionError::EmptyDefinition(definition.id.clone()))?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            preset_id: definition.id.clone(),
            status: WorkflowStatus::Active,
            current_step_id: first.id.clone(),
            completed_steps: StepSet::new(),
            skipped_steps: StepSet::new(),
            context_data: ContextData::new(),
            started_at: now,
            last_active_at: now,
        })
    }

    /// Number of steps completed or skipped
    pub fn resolved_count(&self) -> usize {
        self.completed_steps.len() + self.skipped_steps.len()
    }

    /// Whether no step id is both completed and skipped
    pub fn has_disjoint_sets(&self) -> bool {
        !self
            .completed_steps
            .iter()
            .any(|id| self.skipped_steps.contains(id))
    }

    /// Whether a step has been completed or skipped
    pub fn is_resolved(&self, step_id: &str) -> bool {
        self.completed_steps.contains(step_id) || self.skipped_steps.contains(step_id)
    }

    /// The mutable field set written to the durable store
    pub fn to_update(&self) -> InstanceUpdate {
        InstanceUpdate {
            current_step_id: self.current_step_id.clone(),
            completed_steps: self.completed_steps.clone(),
            skipped_steps: self.skipped_steps.clone(),
            context_data: self.context_data.clone(),
            status: self.status,
            last_active_at: self.last_active_at,
        }
    }
}

/// Partial-field update accepted by the durable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceUpdate {
    pub current_step_id: String,
    pub completed_steps: StepSet,
    pub skipped_steps: StepSet,
    pub context_data: ContextData,
    pub status: WorkflowStatus,
    pub last_active_at: DateTime<Utc>,
}

impl InstanceUpdate {
    /// Overwrite the mutable fields of `instance` with this update
    pub fn apply_to(&self, instance: &mut WorkflowInstance) {
        instance.current_step_id = self.current_step_id.clone();
        instance.completed_steps = self.completed_steps.clone();
        instance.skipped_steps = self.skipped_steps.clone();
        instance.context_data = self.context_data.clone();
        instance.status = self.status;
        instance.last_active_at = self.last_active_at;
    }
}

/// Contents of the single-slot ephemeral backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemeralSnapshot {
    pub instance: WorkflowInstance,
    pub captured_at: DateTime<Utc>,
}
