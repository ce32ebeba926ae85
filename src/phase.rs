//! Phase definitions and the deployment-wide phase registry.
//!
//! This module provides:
//! - `PhaseDefinition`, the immutable description of one design-control phase
//! - `PhaseRegistry`, the validated, sort-ordered catalog used at runtime
//! - `PhasesFile`, the JSON format for overriding the built-in catalog
//! - `default_phases()`, the six standard design-control phases

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Represents a single design-control phase definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDefinition {
    /// Stable identifier (e.g., "planning", "design_inputs")
    pub id: String,
    /// Human-readable name of the phase
    pub name: String,
    /// Position in the sequence; unique and strictly increasing across the registry
    pub sort_order: i32,
    /// Conditions that must hold before work in the phase begins
    #[serde(default)]
    pub entry_criteria: Vec<String>,
    /// Conditions a gate review checks before approving the phase
    #[serde(default)]
    pub exit_criteria: Vec<String>,
    /// Deliverables that must exist before the phase can be approved
    #[serde(default)]
    pub required_deliverables: Vec<String>,
    /// Whether exiting the phase requires a formal gate review
    #[serde(default = "default_is_gate")]
    pub is_gate: bool,
}

fn default_is_gate() -> bool {
    true
}

impl PhaseDefinition {
    pub fn new(id: &str, name: &str, sort_order: i32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            sort_order,
            entry_criteria: Vec::new(),
            exit_criteria: Vec::new(),
            required_deliverables: Vec::new(),
            is_gate: true,
        }
    }

    pub fn with_criteria(
        mut self,
        entry: &[&str],
        exit: &[&str],
        deliverables: &[&str],
    ) -> Self {
        self.entry_criteria = entry.iter().map(|s| s.to_string()).collect();
        self.exit_criteria = exit.iter().map(|s| s.to_string()).collect();
        self.required_deliverables = deliverables.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Represents the phases JSON file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasesFile {
    /// List of phase definitions, in any order
    pub phases: Vec<PhaseDefinition>,
}

impl PhasesFile {
    /// Load phase definitions from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read phases file: {}", path.display()))?;

        let phases_file: PhasesFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse phases JSON: {}", path.display()))?;

        Ok(phases_file)
    }

    /// Save phase definitions to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize phases to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write phases file: {}", path.display()))?;

        Ok(())
    }
}

/// Validated, sort-ordered catalog of phase definitions.
///
/// Read-only once built. The first entry is the entry phase.
#[derive(Debug, Clone)]
pub struct PhaseRegistry {
    phases: Vec<PhaseDefinition>,
}

impl PhaseRegistry {
    /// Build a registry, sorting by `sort_order` and rejecting empty catalogs,
    /// duplicate ids, and duplicate sort orders.
    pub fn new(mut phases: Vec<PhaseDefinition>) -> Result<Self> {
        if phases.is_empty() {
            bail!("Phase registry must contain at least one phase");
        }

        let mut ids = HashSet::new();
        for phase in &phases {
            if phase.id.trim().is_empty() {
                bail!("Phase '{}' has an empty id", phase.name);
            }
            if !ids.insert(phase.id.as_str()) {
                bail!("Duplicate phase id: {}", phase.id);
            }
        }

        phases.sort_by_key(|p| p.sort_order);
        for pair in phases.windows(2) {
            if pair[0].sort_order == pair[1].sort_order {
                bail!(
                    "Phases '{}' and '{}' share sort order {}",
                    pair[0].id,
                    pair[1].id,
                    pair[0].sort_order
                );
            }
        }

        Ok(Self { phases })
    }

    /// Registry with the built-in design-control phases.
    pub fn standard() -> Self {
        Self {
            phases: default_phases(),
        }
    }

    /// Load from a phases file when one is configured, otherwise use the standard phases.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let file = PhasesFile::load(path)?;
                Self::new(file.phases)
                    .with_context(|| format!("Invalid phases file: {}", path.display()))
            }
            None => Ok(Self::standard()),
        }
    }

    /// All definitions in sort order.
    pub fn phases(&self) -> &[PhaseDefinition] {
        &self.phases
    }

    pub fn get(&self, id: &str) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

/// The standard design-control phase sequence.
pub fn default_phases() -> Vec<PhaseDefinition> {
    vec![
        PhaseDefinition::new("planning", "Planning", 1).with_criteria(
            &["Project charter approved"],
            &["Design and development plan approved", "Risk management plan in place"],
            &["Design and development plan", "Risk management plan"],
        ),
        PhaseDefinition::new("design_inputs", "Design Inputs", 2).with_criteria(
            &["Design plan approved"],
            &["User needs captured", "Design inputs reviewed for completeness and ambiguity"],
            &["User needs list", "Design input requirements"],
        ),
        PhaseDefinition::new("design_outputs", "Design Outputs", 3).with_criteria(
            &["Design inputs approved"],
            &["Every design input traced to an output"],
            &["Specifications", "Drawings", "Software design"],
        ),
        PhaseDefinition::new("verification", "Verification", 4).with_criteria(
            &["Design outputs released for testing"],
            &["Every design input verified"],
            &["Verification protocols", "Verification reports"],
        ),
        PhaseDefinition::new("validation", "Validation", 5).with_criteria(
            &["Verification complete"],
            &["Every user need validated"],
            &["Validation protocols", "Validation reports"],
        ),
        PhaseDefinition::new("transfer", "Transfer", 6).with_criteria(
            &["Validation complete"],
            &["Design transferred to production"],
            &["Device master record", "Transfer checklist"],
        ),
    ]
}
