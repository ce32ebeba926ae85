//! Integration tests for the phasegate CLI
//!
//! Each test drives the binary against a fresh SQLite database in a temp dir.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

/// Bare command isolated from the caller's environment.
fn phasegate_bare(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("phasegate");
    cmd.current_dir(dir.path())
        .env_remove("PHASEGATE_DB")
        .env_remove("PHASEGATE_PORT")
        .env_remove("PHASEGATE_LOG")
        .env_remove("PHASEGATE_USER")
        .env_remove("RUST_LOG");
    cmd
}

/// Command with a temp database and an acting user.
fn phasegate(dir: &TempDir) -> Command {
    let mut cmd = phasegate_bare(dir);
    cmd.arg("--db")
        .arg(dir.path().join("gate.db"))
        .arg("--user")
        .arg("qa.lead");
    cmd
}

/// Run with `--json` and parse stdout.
fn json(dir: &TempDir, args: &[&str]) -> Value {
    let output = phasegate(dir)
        .arg("--json")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).unwrap()
}

fn id_of(value: &Value) -> String {
    value["id"].as_str().unwrap().to_string()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        phasegate_bare(&dir).arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        phasegate_bare(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_init_prints_phase_table() {
        let dir = TempDir::new().unwrap();
        phasegate(&dir)
            .args(["init", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized"))
            .stdout(predicate::str::contains("Design Inputs"));
        assert!(dir.path().join("gate.db").exists());
    }

    #[test]
    fn test_init_twice_fails() {
        let dir = TempDir::new().unwrap();
        phasegate(&dir).args(["init", "1"]).assert().success();
        phasegate(&dir)
            .args(["init", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_phases_of_uninitialized_project_fails() {
        let dir = TempDir::new().unwrap();
        phasegate(&dir)
            .args(["phases", "7"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not found"));
    }

    #[test]
    fn test_status_uninitialized() {
        let dir = TempDir::new().unwrap();
        phasegate(&dir)
            .args(["status", "7"])
            .assert()
            .success()
            .stdout(predicate::str::contains("not initialized"));
    }

    #[test]
    fn test_mutation_without_identity_fails() {
        let dir = TempDir::new().unwrap();
        phasegate_bare(&dir)
            .env_remove("USER")
            .arg("--db")
            .arg(dir.path().join("gate.db"))
            .args(["init", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No user identity"));
    }

    #[test]
    fn test_user_from_environment() {
        let dir = TempDir::new().unwrap();
        phasegate_bare(&dir)
            .env("PHASEGATE_USER", "env.user")
            .arg("--db")
            .arg(dir.path().join("gate.db"))
            .args(["init", "1"])
            .assert()
            .success();

        let entries = json(&dir, &["audit", "show", "1"]);
        assert_eq!(entries[0]["userId"], "env.user");
    }
}

// =============================================================================
// Workflow Tests
// =============================================================================

mod workflow {
    use super::*;

    #[test]
    fn test_initial_gating_state() {
        let dir = TempDir::new().unwrap();
        let phases = json(&dir, &["init", "1"]);
        let phases = phases.as_array().unwrap();
        assert_eq!(phases.len(), 6);
        assert_eq!(phases[0]["status"], "active");
        assert_eq!(phases[0]["canStart"], true);
        assert_eq!(phases[1]["status"], "not_started");
        assert_eq!(phases[1]["canStart"], false);
        assert_eq!(phases[1]["blockingPhase"], "Planning");
    }

    #[test]
    fn test_full_gate_cycle() {
        let dir = TempDir::new().unwrap();
        let phases = json(&dir, &["init", "1"]);
        let planning = id_of(&phases[0]);
        let inputs = id_of(&phases[1]);

        let review = json(
            &dir,
            &["submit", &planning, "--title", "Planning gate", "--scope", "Plan"],
        );
        assert_eq!(review["status"], "in_progress");

        let report = json(&dir, &["bottlenecks", "1"]);
        assert_eq!(report["activeBottlenecks"], 1);
        assert_eq!(report["workflowBlocked"], true);

        let completed = json(
            &dir,
            &["review", &id_of(&review), "--outcome", "approved", "--comments", "Looks good"],
        );
        assert_eq!(completed["outcome"], "approved");

        let phases = json(&dir, &["advance", "1", "--from", &planning, "--to", &inputs]);
        assert_eq!(phases[0]["status"], "locked");
        assert_eq!(phases[1]["status"], "active");

        phasegate(&dir)
            .args(["advance", "1", "--from", &planning])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Sequence violation"));
    }

    #[test]
    fn test_rejection_returns_phase_to_active() {
        let dir = TempDir::new().unwrap();
        let phases = json(&dir, &["init", "1"]);
        let planning = id_of(&phases[0]);

        let review = json(&dir, &["submit", &planning, "--title", "Gate"]);
        json(
            &dir,
            &["review", &id_of(&review), "--outcome", "rejected", "--comments", "Incomplete"],
        );

        let phases = json(&dir, &["phases", "1"]);
        assert_eq!(phases[0]["status"], "active");

        json(&dir, &["submit", &planning, "--title", "Gate again"]);
        let history = json(&dir, &["reviews", &planning]);
        assert_eq!(history.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_hold_next_blocks_activation() {
        let dir = TempDir::new().unwrap();
        let phases = json(&dir, &["init", "1"]);
        let planning = id_of(&phases[0]);
        let review = json(&dir, &["submit", &planning, "--title", "Gate"]);
        json(
            &dir,
            &["review", &id_of(&review), "--outcome", "approved", "--hold-next"],
        );

        phasegate(&dir)
            .args(["advance", "1", "--from", &planning])
            .assert()
            .failure();
    }

    #[test]
    fn test_advance_rejects_phase_from_another_project() {
        let dir = TempDir::new().unwrap();
        let first = json(&dir, &["init", "1"]);
        json(&dir, &["init", "2"]);
        let planning = id_of(&first[0]);
        let review = json(&dir, &["submit", &planning, "--title", "Gate"]);
        json(&dir, &["review", &id_of(&review), "--outcome", "approved"]);

        phasegate(&dir)
            .args(["advance", "2", "--from", &planning])
            .assert()
            .failure()
            .stderr(predicate::str::contains("does not belong to project 2"));

        let phases = json(&dir, &["phases", "1"]);
        assert_eq!(phases[0]["status"], "approved");
        assert_eq!(phases[1]["status"], "not_started");

        let phases = json(&dir, &["advance", "1", "--from", &planning]);
        assert_eq!(phases[0]["status"], "locked");
        assert_eq!(phases[1]["status"], "active");
    }

    #[test]
    fn test_invalid_outcome_is_rejected() {
        let dir = TempDir::new().unwrap();
        let phases = json(&dir, &["init", "1"]);
        let review = json(&dir, &["submit", &id_of(&phases[0]), "--title", "Gate"]);
        phasegate(&dir)
            .args(["review", &id_of(&review), "--outcome", "maybe"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid review outcome"));
    }

    #[test]
    fn test_progress_updates_status() {
        let dir = TempDir::new().unwrap();
        let phases = json(&dir, &["init", "1"]);
        let planning = id_of(&phases[0]);

        phasegate(&dir)
            .args(["progress", &planning, "50"])
            .assert()
            .success()
            .stdout(predicate::str::contains("50% complete"));
        phasegate(&dir)
            .args(["progress", &planning, "150"])
            .assert()
            .failure();

        let summary = json(&dir, &["status", "1"]);
        assert_eq!(summary["currentPhase"]["completionPercentage"], 50);
    }
}

// =============================================================================
// Traceability Tests
// =============================================================================

mod traceability {
    use super::*;

    fn register(dir: &TempDir, kind: &str, id: &str) {
        phasegate(dir)
            .args(["trace", "register", "5", kind, id, "--title", id])
            .assert()
            .success();
    }

    #[test]
    fn test_links_coverage_and_cycle() {
        let dir = TempDir::new().unwrap();
        register(&dir, "user_need", "UserNeed-1");
        register(&dir, "design_input", "DesignInput-1");
        register(&dir, "verification", "Verification-1");

        phasegate(&dir)
            .args([
                "trace",
                "link",
                "5",
                "user_need:UserNeed-1",
                "design_input:DesignInput-1",
                "--type",
                "derives_from",
            ])
            .assert()
            .success();
        phasegate(&dir)
            .args([
                "trace",
                "link",
                "5",
                "design_input:DesignInput-1",
                "verification:Verification-1",
                "--type",
                "verifies",
            ])
            .assert()
            .success();

        let matrix = json(&dir, &["trace", "matrix", "5"]);
        assert_eq!(
            matrix["coverageStatistics"]["design_input.verification"]["percentage"],
            100
        );

        phasegate(&dir)
            .args([
                "trace",
                "link",
                "5",
                "design_input:DesignInput-1",
                "user_need:UserNeed-1",
                "--type",
                "derives_from",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cycle"));

        let links = json(&dir, &["trace", "links", "5"]);
        assert_eq!(links.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_unlink_and_snapshot() {
        let dir = TempDir::new().unwrap();
        register(&dir, "user_need", "UN-1");
        register(&dir, "validation", "VAL-1");
        let link = json(
            &dir,
            &["trace", "link", "5", "validation:VAL-1", "user_need:UN-1", "--type", "validates"],
        );

        let unlinked = json(&dir, &["trace", "unlink", &id_of(&link)]);
        assert_eq!(unlinked["active"], false);

        let snapshot = json(&dir, &["trace", "matrix", "5", "--save"]);
        assert_eq!(snapshot["createdBy"], "qa.lead");
        assert_eq!(snapshot["matrix"]["coverageStatistics"]["user_need.validation"]["covered"], 0);
    }

    #[test]
    fn test_bad_artifact_reference() {
        let dir = TempDir::new().unwrap();
        phasegate(&dir)
            .args(["trace", "link", "5", "UN-1", "user_need:UN-2", "--type", "derives_from"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("expected kind:id"));
    }
}

// =============================================================================
// Audit Tests
// =============================================================================

mod audit {
    use super::*;

    #[test]
    fn test_audit_show_and_filter() {
        let dir = TempDir::new().unwrap();
        json(&dir, &["init", "1"]);

        let entries = json(&dir, &["audit", "show", "1"]);
        assert_eq!(entries.as_array().unwrap().len(), 8);

        let entries = json(&dir, &["audit", "show", "1", "--entity-type", "workflow"]);
        assert_eq!(entries.as_array().unwrap().len(), 1);
        assert_eq!(entries[0]["action"], "workflow_initialized");
    }

    #[test]
    fn test_audit_export_writes_digest() {
        let dir = TempDir::new().unwrap();
        json(&dir, &["init", "1"]);
        let out = dir.path().join("exports").join("audit.json");

        phasegate(&dir)
            .args(["audit", "export", "1"])
            .arg(&out)
            .assert()
            .success()
            .stdout(predicate::str::contains("sha256"));

        let export: Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(export["entryCount"], 8);
        assert_eq!(export["sha256"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_audit_verify_detects_tampering() {
        let dir = TempDir::new().unwrap();
        json(&dir, &["init", "1"]);
        let out = dir.path().join("audit.json");
        phasegate(&dir)
            .args(["audit", "export", "1"])
            .arg(&out)
            .assert()
            .success();

        phasegate(&dir)
            .args(["audit", "verify"])
            .arg(&out)
            .assert()
            .success()
            .stdout(predicate::str::contains("Verified 8 entries"));

        let mut export: Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        export["entries"][0]["userId"] = Value::from("someone.else");
        fs::write(&out, export.to_string()).unwrap();

        phasegate(&dir)
            .args(["audit", "verify"])
            .arg(&out)
            .assert()
            .failure()
            .stderr(predicate::str::contains("does not match"));
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        phasegate_bare(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("using defaults"))
            .stdout(predicate::str::contains("port = 3150"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = TempDir::new().unwrap();
        phasegate_bare(&dir)
            .args(["config", "init"])
            .assert()
            .success();
        assert!(dir.path().join(".phasegate/phasegate.toml").exists());

        phasegate_bare(&dir)
            .args(["config", "init"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));
    }

    #[test]
    fn test_config_validate_reports_problems() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".phasegate");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("phasegate.toml"),
            "[logging]\nlevel = \"loud\"\n",
        )
        .unwrap();

        phasegate_bare(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("logging.level"));
    }

    #[test]
    fn test_config_default_user_is_used() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".phasegate");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("phasegate.toml"),
            "[identity]\ndefault_user = \"configured.user\"\n\n[database]\npath = \"cfg.db\"\n",
        )
        .unwrap();

        phasegate_bare(&dir).args(["init", "1"]).assert().success();
        assert!(dir.path().join("cfg.db").exists());

        let output = phasegate_bare(&dir)
            .args(["--json", "audit", "show", "1"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let entries: Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(entries[0]["userId"], "configured.user");
    }

    #[test]
    fn test_custom_phases_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("phases.json"),
            r#"{"phases": [
                {"id": "concept", "name": "Concept", "sortOrder": 1},
                {"id": "build", "name": "Build", "sortOrder": 2}
            ]}"#,
        )
        .unwrap();
        let config_dir = dir.path().join(".phasegate");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("phasegate.toml"),
            "[workflow]\nphases_file = \"phases.json\"\n",
        )
        .unwrap();

        let phases = json(&dir, &["init", "1"]);
        let phases = phases.as_array().unwrap();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[1]["phaseName"], "Build");
    }
}
