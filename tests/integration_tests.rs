//! Integration tests for the framework CLI.
//!
//! Each test drives the compiled binary against a throwaway project root.

use std::fs;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper to create a framework Command scoped to a project dir.
fn framework(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("framework").unwrap();
    cmd.current_dir(dir.path()).timeout(Duration::from_secs(60));
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn create_feature(dir: &TempDir, description: &str, depends: Option<&str>) {
    let mut cmd = framework(dir);
    cmd.args(["feature", "create", "-d", description]);
    if let Some(deps) = depends {
        cmd.args(["--depends", deps]);
    }
    cmd.assert().success();
}

fn update_feature(dir: &TempDir, id: &str, args: &[&str]) {
    let mut cmd = framework(dir);
    cmd.args(["feature", "update", id]);
    cmd.args(args);
    cmd.assert().success();
}

fn feature_json(dir: &TempDir, id: &str) -> serde_json::Value {
    let output = framework(dir)
        .args(["feature", "get", id])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).unwrap()
}

// =============================================================================
// Basic CLI
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = create_temp_project();
        framework(&dir).arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        let dir = create_temp_project();
        framework(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_status_on_empty_project() {
        let dir = create_temp_project();
        framework(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No features yet"));
        // The store file was created on first use.
        assert!(dir.path().join(".framework/framework.db").exists());
    }

    #[test]
    fn test_project_flag_targets_another_root() {
        let dir = create_temp_project();
        let other = create_temp_project();
        framework(&dir)
            .args(["-p", other.path().to_str().unwrap(), "status"])
            .assert()
            .success();
        assert!(other.path().join(".framework/framework.db").exists());
    }
}

// =============================================================================
// Feature CRUD
// =============================================================================

mod features {
    use super::*;

    #[test]
    fn test_create_allocates_sequential_ids() {
        let dir = create_temp_project();
        framework(&dir)
            .args(["feature", "create", "-d", "first"])
            .assert()
            .success()
            .stdout(predicate::str::contains("FEAT-001"));
        framework(&dir)
            .args(["feature", "create", "-d", "second"])
            .assert()
            .success()
            .stdout(predicate::str::contains("FEAT-002"));
    }

    #[test]
    fn test_get_prints_feature_json() {
        let dir = create_temp_project();
        create_feature(&dir, "json check", None);
        let json = feature_json(&dir, "FEAT-001");
        assert_eq!(json["id"], "FEAT-001");
        assert_eq!(json["description"], "json check");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["passes"], false);
    }

    #[test]
    fn test_get_missing_feature_fails() {
        let dir = create_temp_project();
        framework(&dir)
            .args(["feature", "get", "FEAT-404"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("FEAT-404"));
    }

    #[test]
    fn test_update_status_and_passes() {
        let dir = create_temp_project();
        create_feature(&dir, "to update", None);
        update_feature(
            &dir,
            "FEAT-001",
            &["--status", "qa-testing", "--passes", "true", "--notes", "qa ok"],
        );
        let json = feature_json(&dir, "FEAT-001");
        assert_eq!(json["status"], "qa-testing");
        assert_eq!(json["passes"], true);
        assert_eq!(json["notes"], "qa ok");
    }

    #[test]
    fn test_update_rejects_invalid_status() {
        let dir = create_temp_project();
        create_feature(&dir, "bad status", None);
        framework(&dir)
            .args(["feature", "update", "FEAT-001", "--status", "done"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid feature status"));
    }

    #[test]
    fn test_delete_with_force() {
        let dir = create_temp_project();
        create_feature(&dir, "doomed", None);
        framework(&dir)
            .args(["feature", "delete", "FEAT-001", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Deleted FEAT-001"));
        framework(&dir)
            .args(["feature", "get", "FEAT-001"])
            .assert()
            .failure();
    }

    #[test]
    fn test_list_filters_by_status() {
        let dir = create_temp_project();
        create_feature(&dir, "a", None);
        create_feature(&dir, "b", None);
        update_feature(&dir, "FEAT-001", &["--status", "complete"]);
        framework(&dir)
            .args(["feature", "list", "--status", "complete"])
            .assert()
            .success()
            .stdout(predicate::str::contains("FEAT-001"))
            .stdout(predicate::str::contains("FEAT-002").not());
    }

    #[test]
    fn test_export_import_round_trip() {
        let dir = create_temp_project();
        create_feature(&dir, "alpha", None);
        create_feature(&dir, "beta", Some("FEAT-001"));
        update_feature(&dir, "FEAT-001", &["--status", "pr-open", "--passes", "true"]);

        let export_path = dir.path().join("export.json");
        framework(&dir)
            .args(["feature", "export", "-o", export_path.to_str().unwrap()])
            .assert()
            .success();

        let other = create_temp_project();
        framework(&other)
            .args(["feature", "import", "-i", export_path.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("Imported 2 feature(s)"));

        // The imported set is identical, timestamps included.
        for id in ["FEAT-001", "FEAT-002"] {
            assert_eq!(feature_json(&dir, id), feature_json(&other, id));
        }
    }

    #[test]
    fn test_export_defaults_to_architecture_dir() {
        let dir = create_temp_project();
        create_feature(&dir, "exported", None);
        framework(&dir)
            .args(["feature", "export"])
            .assert()
            .success();
        let path = dir.path().join("architecture/feature-requirements.json");
        let raw = fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["features"].as_array().unwrap().len(), 1);
    }
}

// =============================================================================
// Scheduling through status/guided
// =============================================================================

mod scheduling {
    use super::*;

    #[test]
    fn test_dependency_ordering_end_to_end() {
        let dir = create_temp_project();
        create_feature(&dir, "A", None);
        create_feature(&dir, "B", Some("FEAT-001"));

        framework(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("pending"))
            .stdout(predicate::str::contains("0/2 complete"));

        // Scheduler offers the dependency first.
        framework(&dir)
            .arg("guided")
            .assert()
            .success()
            .stdout(predicate::str::contains("dev"))
            .stdout(predicate::str::contains("FEAT-001"));

        // Completing A unblocks B.
        update_feature(&dir, "FEAT-001", &["--status", "complete"]);
        framework(&dir)
            .arg("guided")
            .assert()
            .success()
            .stdout(predicate::str::contains("FEAT-002"));
    }

    #[test]
    fn test_passed_feature_routes_to_pr() {
        let dir = create_temp_project();
        create_feature(&dir, "qa done", None);
        update_feature(&dir, "FEAT-001", &["--status", "qa-testing", "--passes", "true"]);
        framework(&dir)
            .arg("guided")
            .assert()
            .success()
            .stdout(predicate::str::contains("pr"))
            .stdout(predicate::str::contains("pr-open"));
    }

    #[test]
    fn test_pr_open_feature_guides_to_merge() {
        let dir = create_temp_project();
        create_feature(&dir, "awaiting merge", None);
        update_feature(&dir, "FEAT-001", &["--status", "pr-open"]);
        framework(&dir)
            .arg("guided")
            .assert()
            .success()
            .stdout(predicate::str::contains("merge"))
            .stdout(predicate::str::contains("--status complete"));
    }

    #[test]
    fn test_unknown_dependency_is_reported_blocked() {
        let dir = create_temp_project();
        create_feature(&dir, "orphan", Some("FEAT-404"));
        framework(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Blocked"))
            .stdout(predicate::str::contains("FEAT-404"));
        framework(&dir)
            .arg("guided")
            .assert()
            .success()
            .stdout(predicate::str::contains("waiting on FEAT-404"));
    }
}

// =============================================================================
// Config
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_defaults_are_seeded() {
        let dir = create_temp_project();
        framework(&dir)
            .args(["config", "get", "execution_mode"])
            .assert()
            .success()
            .stdout(predicate::str::contains("orchestrator"));
    }

    #[test]
    fn test_set_then_get_round_trips() {
        let dir = create_temp_project();
        framework(&dir)
            .args(["config", "set", "max_retries", "5"])
            .assert()
            .success();
        framework(&dir)
            .args(["config", "get", "max_retries"])
            .assert()
            .success()
            .stdout(predicate::str::contains("5"));
    }

    #[test]
    fn test_get_unknown_key_fails() {
        let dir = create_temp_project();
        framework(&dir)
            .args(["config", "get", "no_such_key"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("no_such_key"));
    }
}

// =============================================================================
// OpenSpec import (filesystem fallback)
// =============================================================================

mod openspec_import {
    use super::*;

    fn write_change(dir: &TempDir, name: &str, tasks: &str, spec: Option<&str>) {
        let change_dir = dir.path().join("openspec/changes").join(name);
        fs::create_dir_all(&change_dir).unwrap();
        fs::write(change_dir.join("tasks.md"), tasks).unwrap();
        if let Some(content) = spec {
            let specs_dir = change_dir.join("specs/core");
            fs::create_dir_all(&specs_dir).unwrap();
            fs::write(specs_dir.join("spec.md"), content).unwrap();
        }
    }

    const TASKS: &str = "1. Build the parser\n- [ ] tokenize input\n- [x] build AST\n2. Wire the CLI\n- [ ] add subcommand\n";
    const SPEC: &str = "### Requirement: Parser accepts valid input\n- WHEN input is valid\n- THEN an AST is produced\n";

    #[test]
    fn test_import_creates_features_with_sequential_deps() {
        let dir = create_temp_project();
        write_change(&dir, "add-parser", TASKS, Some(SPEC));

        framework(&dir)
            .args(["openspec", "import", "add-parser"])
            .assert()
            .success()
            .stdout(predicate::str::contains("2 created, 0 updated"));

        let first = feature_json(&dir, "FEAT-001");
        assert_eq!(first["description"], "Build the parser");
        assert_eq!(first["openspec_change_id"], "add-parser");
        assert_eq!(first["openspec_task_group"], 1);
        // Checkboxes are stripped from recorded steps.
        let notes = first["notes"].as_str().unwrap();
        assert!(notes.contains("tokenize input"));
        assert!(!notes.contains("[ ]"));
        assert!(!notes.contains("[x]"));
        // Spec scenarios became verification steps.
        let steps = first["verification_steps"].as_array().unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps[0].as_str().unwrap().ends_with("verified"));

        let second = feature_json(&dir, "FEAT-002");
        assert_eq!(second["openspec_task_group"], 2);
        assert_eq!(second["depends_on"], serde_json::json!(["FEAT-001"]));
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let dir = create_temp_project();
        write_change(&dir, "add-parser", TASKS, Some(SPEC));

        framework(&dir)
            .args(["openspec", "import", "add-parser"])
            .assert()
            .success();
        update_feature(&dir, "FEAT-001", &["--status", "in-dev"]);

        framework(&dir)
            .args(["openspec", "import", "add-parser"])
            .assert()
            .success()
            .stdout(predicate::str::contains("0 created, 2 updated"));

        // Same ids, same count, pipeline state preserved.
        framework(&dir)
            .args(["feature", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("2 feature(s)"));
        let first = feature_json(&dir, "FEAT-001");
        assert_eq!(first["status"], "in-dev");
        let second = feature_json(&dir, "FEAT-002");
        assert_eq!(second["depends_on"], serde_json::json!(["FEAT-001"]));
    }

    #[test]
    fn test_change_without_groups_becomes_single_feature() {
        let dir = create_temp_project();
        write_change(&dir, "empty-change", "nothing numbered here\n", None);
        framework(&dir)
            .args(["openspec", "import", "empty-change"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 created"));
        let only = feature_json(&dir, "FEAT-001");
        assert_eq!(only["description"], "empty-change");
    }

    #[test]
    fn test_import_missing_change_fails() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join("openspec/changes")).unwrap();
        framework(&dir)
            .args(["openspec", "import", "ghost"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ghost"));
    }

    #[test]
    fn test_import_all_sweeps_active_changes() {
        let dir = create_temp_project();
        write_change(&dir, "change-a", "1. Only task\n", None);
        write_change(&dir, "change-b", "1. Other task\n", None);
        framework(&dir)
            .args(["openspec", "import", "--all"])
            .assert()
            .success()
            .stdout(predicate::str::contains("change-a"))
            .stdout(predicate::str::contains("change-b"));
        framework(&dir)
            .args(["feature", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("2 feature(s)"));
    }

    #[test]
    fn test_openspec_status_shows_change_progress() {
        let dir = create_temp_project();
        write_change(&dir, "add-parser", TASKS, None);
        framework(&dir)
            .args(["openspec", "import", "add-parser"])
            .assert()
            .success();
        update_feature(&dir, "FEAT-001", &["--status", "complete"]);
        framework(&dir)
            .args(["openspec", "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("add-parser (1/2 complete)"));
    }

    #[test]
    fn test_archive_refuses_while_siblings_incomplete() {
        let dir = create_temp_project();
        write_change(&dir, "add-parser", TASKS, None);
        framework(&dir)
            .args(["openspec", "import", "add-parser"])
            .assert()
            .success();
        update_feature(&dir, "FEAT-001", &["--status", "complete"]);
        framework(&dir)
            .args(["openspec", "archive", "FEAT-001"])
            .assert()
            .success()
            .stdout(predicate::str::contains("incomplete features"));
    }
}

// =============================================================================
// Autoplay
// =============================================================================

mod autoplay {
    use super::*;

    fn write_prompts(dir: &TempDir) {
        let prompts = dir.path().join(".framework/prompts");
        fs::create_dir_all(&prompts).unwrap();
        for role in ["dev", "review", "qa"] {
            fs::write(prompts.join(format!("{}.md", role)), format!("{} prompt", role)).unwrap();
        }
    }

    #[test]
    fn test_stalled_agent_escalates_and_exits_nonzero() {
        let dir = create_temp_project();
        write_prompts(&dir);
        create_feature(&dir, "stuck", None);
        // `true` exits cleanly without touching the store: every session
        // stalls, and the retry cap turns that into an escalation.
        framework(&dir)
            .args(["config", "set", "agent_command", "true"])
            .assert()
            .success();
        framework(&dir)
            .args(["config", "set", "max_retries", "1"])
            .assert()
            .success();

        framework(&dir)
            .arg("autoplay")
            .assert()
            .failure()
            .stdout(predicate::str::contains("FEAT-001"));
    }

    #[test]
    fn test_autoplay_on_complete_backlog_exits_clean() {
        let dir = create_temp_project();
        write_prompts(&dir);
        create_feature(&dir, "done already", None);
        update_feature(&dir, "FEAT-001", &["--status", "complete"]);
        framework(&dir)
            .arg("autoplay")
            .assert()
            .success()
            .stdout(predicate::str::contains("1/1 features complete"));
    }

    #[test]
    fn test_missing_prompt_template_is_a_fatal_config_error() {
        let dir = create_temp_project();
        create_feature(&dir, "no prompts", None);
        framework(&dir)
            .arg("autoplay")
            .assert()
            .failure()
            .stderr(predicate::str::contains("prompts/dev.md"));
    }

    /// Scenario: QA passes a feature, the next iteration opens a PR, and
    /// safe mode parks the merge as an escalation. The stub agent mutates
    /// the store through the framework binary, exactly like a real agent.
    #[cfg(unix)]
    #[test]
    fn test_qa_pass_routes_through_pr_to_safe_mode_park() {
        use std::os::unix::fs::PermissionsExt;

        let dir = create_temp_project();
        write_prompts(&dir);
        // The PR step needs a repository to branch in.
        let git_init = std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir.path())
            .status();
        if !git_init.map(|s| s.success()).unwrap_or(false) {
            eprintln!("git unavailable; skipping");
            return;
        }

        create_feature(&dir, "qa candidate", None);
        update_feature(&dir, "FEAT-001", &["--status", "approved"]);

        let agent_script = dir.path().join("qa-agent.sh");
        fs::write(
            &agent_script,
            "#!/bin/sh\n\"$FRAMEWORK_BIN\" feature update FEAT-001 --passes true >/dev/null 2>&1\nexit 0\n",
        )
        .unwrap();
        fs::set_permissions(&agent_script, fs::Permissions::from_mode(0o755)).unwrap();
        framework(&dir)
            .args(["config", "set", "agent_command", agent_script.to_str().unwrap()])
            .assert()
            .success();

        // Safe mode is the default: the run ends with FEAT-001 parked.
        framework(&dir)
            .arg("autoplay")
            .env(
                "FRAMEWORK_BIN",
                assert_cmd::cargo::cargo_bin("framework"),
            )
            .assert()
            .failure()
            .stdout(predicate::str::contains("Safe mode"))
            .stdout(predicate::str::contains("FEAT-001"));

        let json = feature_json(&dir, "FEAT-001");
        assert_eq!(json["status"], "pr-open");
        assert_eq!(json["passes"], true);
    }

    #[test]
    fn test_team_mode_prints_instructions() {
        let dir = create_temp_project();
        write_prompts(&dir);
        create_feature(&dir, "team work", None);
        framework(&dir)
            .args(["autoplay", "--mode", "team"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Team session plan"))
            .stdout(predicate::str::contains("FEAT-001"));
    }
}

// =============================================================================
// Architecture blobs
// =============================================================================

mod arch {
    use super::*;

    #[test]
    fn test_arch_import_export_round_trip() {
        let dir = create_temp_project();
        let arch_dir = dir.path().join("architecture");
        fs::create_dir_all(&arch_dir).unwrap();
        fs::write(arch_dir.join("principles.json"), r#"{"layers": 3}"#).unwrap();

        framework(&dir)
            .args(["arch", "import"])
            .assert()
            .success()
            .stdout(predicate::str::contains("principles.json"));

        fs::remove_file(arch_dir.join("principles.json")).unwrap();
        framework(&dir)
            .args(["arch", "export"])
            .assert()
            .success();
        let restored = fs::read_to_string(arch_dir.join("principles.json")).unwrap();
        assert_eq!(restored, r#"{"layers": 3}"#);
    }

    #[test]
    fn test_arch_import_without_files_is_graceful() {
        let dir = create_temp_project();
        framework(&dir)
            .args(["arch", "import"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No architecture files"));
    }
}
