//! OpenSpec integration: wrapper around the external `openspec` CLI with a
//! filesystem fallback, plus the change importer.
//!
//! The CLI is optional everywhere. Every operation first probes for it and
//! silently falls back to reading `openspec/changes/<name>/` on disk.

pub mod importer;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use glob::glob;
use serde::Deserialize;
use tokio::process::Command;

use crate::errors::ImportError;
use crate::store::Db;

/// Raw artifact contents for one change, wherever they came from.
#[derive(Debug, Clone, Default)]
pub struct ChangeArtifacts {
    pub proposal: String,
    pub design: String,
    pub tasks: String,
    /// `(relative path, content)` for every spec file under `specs/`.
    pub specs: Vec<(String, String)>,
}

impl ChangeArtifacts {
    pub fn is_empty(&self) -> bool {
        self.proposal.trim().is_empty()
            && self.design.trim().is_empty()
            && self.tasks.trim().is_empty()
            && self.specs.iter().all(|(_, c)| c.trim().is_empty())
    }

    /// All spec content concatenated, for requirement/scenario extraction.
    pub fn aggregated_specs(&self) -> String {
        self.specs
            .iter()
            .map(|(_, content)| content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Shape of `openspec show <change> --json`. Fields the CLI omits default
/// to empty and push us toward the filesystem fallback.
#[derive(Debug, Deserialize)]
struct CliChangePayload {
    #[serde(default)]
    proposal: String,
    #[serde(default)]
    design: String,
    #[serde(default)]
    tasks: String,
    #[serde(default)]
    specs: Vec<CliSpecPayload>,
}

#[derive(Debug, Deserialize)]
struct CliSpecPayload {
    #[serde(default)]
    path: String,
    #[serde(default)]
    content: String,
}

pub struct OpenSpecCli {
    root: PathBuf,
}

impl OpenSpecCli {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn changes_dir(&self) -> PathBuf {
        self.root.join("openspec").join("changes")
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("openspec")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run openspec {}", args.join(" ")))
    }

    /// The CLI is present and runnable. Any failure reads as absence.
    pub async fn available(&self) -> bool {
        match Command::new("openspec")
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    pub async fn version(&self) -> Option<String> {
        let out = self.run(&["--version"]).await.ok()?;
        if !out.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// Active change names: CLI first, directory listing as fallback
    /// (skipping the `archive/` folder).
    pub async fn list_changes(&self) -> Result<Vec<String>> {
        if self.available().await {
            if let Ok(out) = self.run(&["list", "--json"]).await {
                if out.status.success() {
                    if let Ok(names) =
                        serde_json::from_slice::<Vec<String>>(&out.stdout)
                    {
                        return Ok(names);
                    }
                }
            }
        }
        self.list_changes_from_fs()
    }

    fn list_changes_from_fs(&self) -> Result<Vec<String>> {
        let dir = self.changes_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
        {
            let entry = entry.context("Failed to read changes dir entry")?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "archive" {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Artifact contents for one change: the CLI's machine-readable output
    /// when usable, the filesystem otherwise.
    pub async fn load_artifacts(&self, change: &str) -> Result<ChangeArtifacts, ImportError> {
        if self.available().await {
            if let Ok(out) = self.run(&["show", change, "--json"]).await {
                if out.status.success() {
                    if let Ok(payload) = serde_json::from_slice::<CliChangePayload>(&out.stdout) {
                        let artifacts = ChangeArtifacts {
                            proposal: payload.proposal,
                            design: payload.design,
                            tasks: payload.tasks,
                            specs: payload
                                .specs
                                .into_iter()
                                .map(|s| (s.path, s.content))
                                .collect(),
                        };
                        if !artifacts.is_empty() {
                            return Ok(artifacts);
                        }
                    }
                }
            }
        }
        self.load_artifacts_from_fs(change)
    }

    fn load_artifacts_from_fs(&self, change: &str) -> Result<ChangeArtifacts, ImportError> {
        let dir = self.changes_dir().join(change);
        if !dir.exists() {
            return Err(ImportError::ChangeNotFound {
                name: change.to_string(),
                searched: self.changes_dir().display().to_string(),
            });
        }
        let read = |name: &str| -> String {
            std::fs::read_to_string(dir.join(name)).unwrap_or_default()
        };
        let mut artifacts = ChangeArtifacts {
            proposal: read("proposal.md"),
            design: read("design.md"),
            tasks: read("tasks.md"),
            specs: Vec::new(),
        };

        let pattern = dir.join("specs").join("**").join("spec.md");
        if let Ok(paths) = glob(&pattern.to_string_lossy()) {
            for path in paths.flatten() {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    let rel = path
                        .strip_prefix(&dir)
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_else(|_| path.to_string_lossy().to_string());
                    artifacts.specs.push((rel, content));
                }
            }
        }
        artifacts.specs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(artifacts)
    }

    /// Archive a change via the CLI. Failure here is non-fatal to callers.
    pub async fn archive(&self, change: &str) -> Result<()> {
        let out = self.run(&["archive", change, "--yes"]).await?;
        if !out.status.success() {
            anyhow::bail!(
                "openspec archive {} failed: {}",
                change,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(())
    }

    /// Best-effort global install of the CLI.
    pub async fn install(&self) -> Result<()> {
        let status = Command::new("npm")
            .args(["install", "-g", "openspec"])
            .stdin(Stdio::null())
            .status()
            .await
            .context("Failed to run npm install -g openspec (is npm installed?)")?;
        if !status.success() {
            anyhow::bail!("npm install -g openspec exited non-zero");
        }
        Ok(())
    }

    /// Re-run the CLI's project update.
    pub async fn refresh(&self) -> Result<()> {
        let out = self.run(&["update"]).await?;
        if !out.status.success() {
            anyhow::bail!(
                "openspec update failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Archive the change owning `feature_id` once every sibling feature is
/// complete. Returns whether an archive was attempted. Archive failures
/// are logged, never propagated.
pub async fn maybe_archive(db: &Db, cli: &OpenSpecCli, feature_id: &str) -> Result<bool> {
    let feature = match db.get_feature(feature_id)? {
        Some(f) => f,
        None => return Ok(false),
    };
    if feature.openspec_change_id.is_empty() {
        return Ok(false);
    }
    let siblings = db.features_by_change(&feature.openspec_change_id)?;
    let all_complete = !siblings.is_empty()
        && siblings
            .iter()
            .all(|f| f.status == crate::store::models::FeatureStatus::Complete);
    if !all_complete {
        return Ok(false);
    }
    match cli.archive(&feature.openspec_change_id).await {
        Ok(()) => println!("Archived change '{}'", feature.openspec_change_id),
        Err(e) => eprintln!("[openspec] Archive failed (non-fatal): {:#}", e),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_change(root: &Path, name: &str) {
        let dir = root.join("openspec").join("changes").join(name);
        fs::create_dir_all(dir.join("specs").join("auth")).unwrap();
        fs::write(dir.join("proposal.md"), "# Proposal\nWhy we do this.").unwrap();
        fs::write(dir.join("tasks.md"), "1. First group\n- [ ] step one\n").unwrap();
        fs::write(
            dir.join("specs").join("auth").join("spec.md"),
            "### Requirement: Login works\n- WHEN user logs in\n",
        )
        .unwrap();
    }

    #[test]
    fn fs_fallback_reads_all_artifacts() {
        let dir = tempdir().unwrap();
        write_change(dir.path(), "add-auth");
        let cli = OpenSpecCli::new(dir.path());
        let artifacts = cli.load_artifacts_from_fs("add-auth").unwrap();
        assert!(artifacts.proposal.contains("Proposal"));
        assert!(artifacts.tasks.contains("First group"));
        assert_eq!(artifacts.specs.len(), 1);
        assert!(artifacts.specs[0].0.contains("auth"));
        assert!(artifacts.aggregated_specs().contains("Login works"));
        assert!(!artifacts.is_empty());
    }

    #[test]
    fn missing_change_is_change_not_found() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("openspec").join("changes")).unwrap();
        let cli = OpenSpecCli::new(dir.path());
        let err = cli.load_artifacts_from_fs("nope").unwrap_err();
        assert!(matches!(err, ImportError::ChangeNotFound { .. }));
    }

    #[test]
    fn fs_change_listing_skips_archive() {
        let dir = tempdir().unwrap();
        write_change(dir.path(), "add-auth");
        write_change(dir.path(), "add-billing");
        fs::create_dir_all(
            dir.path()
                .join("openspec")
                .join("changes")
                .join("archive")
                .join("old-change"),
        )
        .unwrap();
        let cli = OpenSpecCli::new(dir.path());
        let names = cli.list_changes_from_fs().unwrap();
        assert_eq!(names, vec!["add-auth", "add-billing"]);
    }

    #[tokio::test]
    async fn maybe_archive_ignores_hand_authored_features() {
        let db = Db::open_in_memory().unwrap();
        let f = db
            .create_feature(&crate::store::models::NewFeature::default())
            .unwrap();
        let dir = tempdir().unwrap();
        let cli = OpenSpecCli::new(dir.path());
        assert!(!maybe_archive(&db, &cli, &f.id).await.unwrap());
    }

    #[tokio::test]
    async fn maybe_archive_waits_for_all_siblings() {
        use crate::store::models::{FeatureStatus, NewFeature, UpdateFields};
        let db = Db::open_in_memory().unwrap();
        let a = db
            .create_feature(&NewFeature {
                openspec_change_id: "x".to_string(),
                openspec_task_group: 1,
                ..Default::default()
            })
            .unwrap();
        let _b = db
            .create_feature(&NewFeature {
                openspec_change_id: "x".to_string(),
                openspec_task_group: 2,
                ..Default::default()
            })
            .unwrap();
        db.update_feature(
            &a.id,
            &UpdateFields {
                status: Some(FeatureStatus::Complete),
                ..Default::default()
            },
        )
        .unwrap();
        let dir = tempdir().unwrap();
        let cli = OpenSpecCli::new(dir.path());
        // Sibling still pending: no archive attempt.
        assert!(!maybe_archive(&db, &cli, &a.id).await.unwrap());
    }
}
