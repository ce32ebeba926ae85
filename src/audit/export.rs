use super::AuditEntry;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Portable audit trail document handed to external compliance reporting.
///
/// `sha256` is the digest of the compact JSON serialization of `entries`, so a
/// reader can detect edits made to the file after export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditExport {
    pub project_id: i64,
    pub exported_at: DateTime<Utc>,
    pub entry_count: usize,
    pub sha256: String,
    pub entries: Vec<AuditEntry>,
}

impl AuditExport {
    pub fn build(project_id: i64, entries: Vec<AuditEntry>, exported_at: DateTime<Utc>) -> Result<Self> {
        let sha256 = digest(&entries)?;
        Ok(Self {
            project_id,
            exported_at,
            entry_count: entries.len(),
            sha256,
            entries,
        })
    }

    /// Recompute the digest and compare it with the recorded one.
    pub fn verify(&self) -> Result<bool> {
        Ok(self.entry_count == self.entries.len() && digest(&self.entries)? == self.sha256)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create export directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize audit export")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write audit export {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read audit export {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse audit export")
    }
}

fn digest(entries: &[AuditEntry]) -> Result<String> {
    let json = serde_json::to_string(entries).context("Failed to serialize audit entries")?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, EntityType};
    use tempfile::TempDir;

    fn sample_entries() -> Vec<AuditEntry> {
        vec![
            AuditEntry::new(
                3,
                EntityType::Workflow,
                3,
                AuditAction::WorkflowInitialized,
                "qa.lead",
                Utc::now(),
            ),
            AuditEntry::new(
                3,
                EntityType::PhaseInstance,
                "p1",
                AuditAction::PhaseActivated,
                "qa.lead",
                Utc::now(),
            )
            .values(Some("not_started"), Some("active")),
        ]
    }

    #[test]
    fn test_export_write_and_verify() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("exports").join("audit.json");
        let export = AuditExport::build(3, sample_entries(), Utc::now()).unwrap();
        export.write(&path).unwrap();

        let loaded = AuditExport::load(&path).unwrap();
        assert_eq!(loaded.entry_count, 2);
        assert!(loaded.verify().unwrap());
    }

    #[test]
    fn test_tampered_export_fails_verification() {
        let mut export = AuditExport::build(3, sample_entries(), Utc::now()).unwrap();
        export.entries[1].new_value = Some("approved".to_string());
        assert!(!export.verify().unwrap());
    }
}
