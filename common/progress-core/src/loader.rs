//! Preset loading utilities
//!
//! Built-in presets ship with the crate; custom presets are read from a
//! directory of TOML files.

use std::collections::HashMap;
use std::path::Path;

use crate::error::PresetError;
use crate::types::{StepDefinition, WorkflowDefinition};

/// Get all built-in presets
///
/// Returns a map of preset ids to preset definitions.
/// Built-in presets include:
/// - listing-launch: Prepare and publish a new property listing
/// - market-research: Research a neighbourhood and summarise findings
/// - content-studio: Plan and draft a batch of marketing content
pub fn builtin_presets() -> HashMap<String, WorkflowDefinition> {
    let presets = [
        WorkflowDefinition::new("listing-launch")
            .with_name("Listing Launch")
            .with_description("Prepare and publish a new property listing")
            .with_step(
                StepDefinition::required("property-details", 15)
                    .with_title("Property details")
                    .with_outputs(["address", "bedrooms", "bathrooms", "square_feet"]),
            )
            .with_step(
                StepDefinition::optional("photo-review", 10)
                    .with_title("Photo review")
                    .with_inputs(["address"])
                    .with_outputs(["photo_notes"]),
            )
            .with_step(
                StepDefinition::required("listing-description", 20)
                    .with_title("Listing description")
                    .with_inputs(["address", "bedrooms", "bathrooms"])
                    .with_outputs(["description"]),
            )
            .with_step(
                StepDefinition::optional("social-posts", 15)
                    .with_title("Social posts")
                    .with_inputs(["description"])
                    .with_outputs(["social_posts"]),
            )
            .with_step(
                StepDefinition::required("publish", 5)
                    .with_title("Publish")
                    .with_inputs(["description"]),
            ),
        WorkflowDefinition::new("market-research")
            .with_name("Market Research")
            .with_description("Research a neighbourhood and summarise findings")
            .with_step(
                StepDefinition::required("define-area", 5)
                    .with_title("Define the area")
                    .with_outputs(["location"]),
            )
            .with_step(
                StepDefinition::required("comparables", 25)
                    .with_title("Comparable sales")
                    .with_inputs(["location"])
                    .with_outputs(["comparables"]),
            )
            .with_step(
                StepDefinition::optional("amenities", 15)
                    .with_title("Schools and amenities")
                    .with_inputs(["location"])
                    .with_outputs(["amenities"]),
            )
            .with_step(
                StepDefinition::required("summary", 15)
                    .with_title("Research summary")
                    .with_inputs(["comparables"])
                    .with_outputs(["report"]),
            ),
        WorkflowDefinition::new("content-studio")
            .with_name("Content Studio")
            .with_description("Plan and draft a batch of marketing content")
            .with_step(
                StepDefinition::required("audience", 10)
                    .with_title("Audience and goals")
                    .with_outputs(["audience", "goals"]),
            )
            .with_step(
                StepDefinition::required("topics", 10)
                    .with_title("Topic plan")
                    .with_inputs(["audience"])
                    .with_outputs(["topics"]),
            )
            .with_step(
                StepDefinition::required("drafts", 30)
                    .with_title("Drafts")
                    .with_inputs(["topics"])
                    .with_outputs(["drafts"]),
            )
            .with_step(
                StepDefinition::optional("schedule", 10)
                    .with_title("Publishing schedule")
                    .with_inputs(["drafts"])
                    .with_outputs(["schedule"]),
            ),
    ];

    presets
        .into_iter()
        .map(|preset| (preset.id.clone(), preset))
        .collect()
}

/// Load custom presets from a directory
///
/// Scans the given directory for .toml files and attempts to parse each
/// as a preset. Invalid presets are logged as warnings and skipped.
pub fn load_custom_presets(dir: &Path) -> Result<HashMap<String, WorkflowDefinition>, PresetError> {
    let mut presets = HashMap::new();

    if !dir.exists() {
        return Ok(presets);
    }

    let entries = std::fs::read_dir(dir).map_err(|e| PresetError::IoError(e.to_string()))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            match WorkflowDefinition::from_toml_file(&path) {
                Ok(preset) => {
                    presets.insert(preset.id.clone(), preset);
                }
                Err(e) => {
                    tracing::warn!("Failed to load preset from {:?}: {}", path, e);
                }
            }
        }
    }

    Ok(presets)
}

/// Built-in presets overlaid with custom ones (custom wins on id clash)
#[derive(Debug, Clone, Default)]
pub struct PresetCatalog {
    presets: HashMap<String, WorkflowDefinition>,
}

impl PresetCatalog {
    pub fn builtin() -> Self {
        Self {
            presets: builtin_presets(),
        }
    }

    /// Built-ins plus whatever parses in `custom_dir`
    pub fn load(custom_dir: Option<&Path>) -> Self {
        let mut catalog = Self::builtin();

        if let Some(dir) = custom_dir {
            match load_custom_presets(dir) {
                Ok(custom) => catalog.presets.extend(custom),
                Err(e) => tracing::warn!("Failed to load custom presets: {}", e),
            }
        }

        catalog
    }

    pub fn insert(&mut self, preset: WorkflowDefinition) {
        self.presets.insert(preset.id.clone(), preset);
    }

    pub fn get(&self, id: &str) -> Result<&WorkflowDefinition, PresetError> {
        self.presets
            .get(id)
            .ok_or_else(|| PresetError::NotFound(id.to_string()))
    }

    /// All presets, sorted by id
    pub fn list(&self) -> Vec<&WorkflowDefinition> {
        let mut presets: Vec<_> = self.presets.values().collect();
        presets.sort_by(|a, b| a.id.cmp(&b.id));
        presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_presets() {
        let presets = builtin_presets();

        assert_eq!(presets.len(), 3);
        for preset in presets.values() {
            assert!(preset.validate().is_ok(), "{} is invalid", preset.id);
        }

        let listing = presets.get("listing-launch").unwrap();
        assert_eq!(listing.steps.len(), 5);
        assert!(listing.step("photo-review").unwrap().is_optional);
    }

    #[test]
    fn test_load_custom_presets_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("open-house.toml"),
            r#"
                id = "open-house"
                name = "Open House"

                [[steps]]
                id = "invite"
                estimated_minutes = 10
            "#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "id = ").unwrap();
        std::fs::write(dir.path().join("empty.toml"), "id = \"empty\"\nsteps = []").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let presets = load_custom_presets(dir.path()).unwrap();
        assert_eq!(presets.len(), 1);
        assert!(presets.contains_key("open-house"));
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let presets = load_custom_presets(Path::new("/definitely/not/here")).unwrap();
        assert!(presets.is_empty());
    }

    #[test]
    fn test_catalog_overlay() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("override.toml"),
            r#"
                id = "content-studio"

                [[steps]]
                id = "only-step"
            "#,
        )
        .unwrap();

        let catalog = PresetCatalog::load(Some(dir.path()));
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.get("content-studio").unwrap().steps.len(), 1);
        assert!(matches!(
            catalog.get("nope"),
            Err(PresetError::NotFound(_))
        ));

        let ids: Vec<_> = catalog.list().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["content-studio", "listing-launch", "market-research"]);
    }
}
