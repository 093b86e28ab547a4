//! Version-control bridge: branch, push, PR, and merge operations via the
//! `git` and `gh` CLIs.
//!
//! Everything degrades: no remote means local-only branches, no `gh` means
//! the operator is told to open the PR by hand. Absence of a tool is never
//! an error.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;

use crate::store::models::{Feature, FeatureStatus, Settings, UpdateFields};
use crate::store::Db;

/// Result of a merge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merged; the feature is now `complete`.
    Merged,
    /// Safe mode / auto_merge off: the PR stays open for a human.
    Skipped,
    /// The merge itself failed (conflict, missing branch).
    Failed,
}

pub struct VcsBridge {
    root: PathBuf,
}

impl VcsBridge {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// `feature/<lowercased-id>`.
    pub fn branch_name(feature: &Feature) -> String {
        format!("feature/{}", feature.id.to_lowercase())
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run git {}", args.join(" ")))
    }

    async fn gh(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("gh")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run gh {}", args.join(" ")))
    }

    async fn current_branch(&self) -> Option<String> {
        let out = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await.ok()?;
        if !out.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    async fn has_remote_origin(&self) -> bool {
        match self.git(&["remote", "get-url", "origin"]).await {
            Ok(out) => out.status.success(),
            Err(_) => false,
        }
    }

    /// `gh` present and runnable; failure of any kind reads as absence.
    async fn gh_available(&self) -> bool {
        match Command::new("gh")
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

    /// The remote's default branch, from its symbolic HEAD; `main` when
    /// that cannot be determined.
    async fn default_branch(&self) -> String {
        if let Ok(out) = self
            .git(&["symbolic-ref", "refs/remotes/origin/HEAD", "--short"])
            .await
        {
            if out.status.success() {
                let full = String::from_utf8_lossy(&out.stdout).trim().to_string();
                // "origin/main" -> "main"
                if let Some(name) = full.strip_prefix("origin/") {
                    if !name.is_empty() {
                        return name.to_string();
                    }
                }
            }
        }
        "main".to_string()
    }

    async fn ensure_branch(&self, branch: &str) -> Result<()> {
        if self.current_branch().await.as_deref() == Some(branch) {
            return Ok(());
        }
        let created = self.git(&["checkout", "-b", branch]).await?;
        if created.status.success() {
            return Ok(());
        }
        // Branch probably exists from a previous cycle; switch to it.
        let switched = self.git(&["checkout", branch]).await?;
        if !switched.status.success() {
            anyhow::bail!(
                "Failed to switch to branch {}: {}",
                branch,
                String::from_utf8_lossy(&switched.stderr).trim()
            );
        }
        Ok(())
    }

    /// PR body: the compliance summary handed to reviewers.
    fn pr_body(feature: &Feature) -> String {
        let mut body = format!("## {}\n\n{}\n", feature.id, feature.description);
        if !feature.architecture_compliance.is_empty() {
            body.push_str("\n### Architecture compliance\n");
            for item in &feature.architecture_compliance {
                body.push_str(&format!("- {}\n", item));
            }
        }
        if !feature.verification_steps.is_empty() {
            body.push_str("\n### Verified\n");
            for step in &feature.verification_steps {
                body.push_str(&format!("- {}\n", step));
            }
        }
        body
    }

    /// Create the feature branch, push it when a remote exists, open a PR
    /// when `gh` is available, and transition the feature to `pr-open`.
    pub async fn create_pr(&self, db: &Db, feature: &Feature) -> Result<()> {
        let branch = Self::branch_name(feature);
        self.ensure_branch(&branch).await?;

        if self.has_remote_origin().await {
            let push = self.git(&["push", "-u", "origin", &branch]).await?;
            if !push.status.success() {
                eprintln!(
                    "[vcs] Push of {} failed: {}",
                    branch,
                    String::from_utf8_lossy(&push.stderr).trim()
                );
            }
        } else {
            eprintln!("[vcs] No 'origin' remote; {} stays local", branch);
        }

        let title = format!("{}: {}", feature.id, feature.description);
        if self.gh_available().await {
            let body = Self::pr_body(feature);
            let out = self
                .gh(&["pr", "create", "--title", &title, "--body", &body])
                .await?;
            if out.status.success() {
                let url = String::from_utf8_lossy(&out.stdout).trim().to_string();
                println!("Opened PR for {}: {}", feature.id, url);
            } else {
                eprintln!(
                    "[vcs] gh pr create failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                println!(
                    "Open the PR for {} manually (branch {}, title \"{}\")",
                    feature.id, branch, title
                );
            }
        } else {
            println!(
                "PR CLI not available. Open the PR for {} manually (branch {}, title \"{}\")",
                feature.id, branch, title
            );
        }

        db.update_feature(
            &feature.id,
            &UpdateFields {
                status: Some(FeatureStatus::PrOpen),
                ..Default::default()
            },
        )?;
        Ok(())
    }

    /// Merge the feature's PR. Under safe mode the merge is skipped and the
    /// feature left at `pr-open`. On success the feature transitions to
    /// `complete`: the only place in the system that sets it.
    pub async fn merge_pr(
        &self,
        db: &Db,
        feature: &Feature,
        settings: &Settings,
    ) -> Result<MergeOutcome> {
        if !settings.merge_allowed() {
            println!(
                "Safe mode: leaving {} at pr-open for human review",
                feature.id
            );
            return Ok(MergeOutcome::Skipped);
        }

        let branch = Self::branch_name(feature);

        let merged = if self.gh_available().await {
            let out = self
                .gh(&["pr", "merge", &branch, "--merge", "--delete-branch"])
                .await?;
            if out.status.success() {
                true
            } else {
                eprintln!(
                    "[vcs] gh pr merge failed, falling back to local merge: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                self.local_merge(&branch).await?
            }
        } else {
            self.local_merge(&branch).await?
        };

        if !merged {
            return Ok(MergeOutcome::Failed);
        }

        db.update_feature(
            &feature.id,
            &UpdateFields {
                status: Some(FeatureStatus::Complete),
                ..Default::default()
            },
        )?;
        println!("Merged {} ({})", feature.id, branch);
        Ok(MergeOutcome::Merged)
    }

    /// Check out the default branch and merge the feature branch without
    /// fast-forwarding. Restores the original branch on failure.
    async fn local_merge(&self, branch: &str) -> Result<bool> {
        let original = self.current_branch().await;
        let target = self.default_branch().await;

        let checkout = self.git(&["checkout", &target]).await?;
        if !checkout.status.success() {
            eprintln!(
                "[vcs] Failed to checkout {}: {}",
                target,
                String::from_utf8_lossy(&checkout.stderr).trim()
            );
            return Ok(false);
        }

        let merge_msg = format!("Merge {}", branch);
        let merge = self
            .git(&["merge", "--no-ff", "-m", &merge_msg, branch])
            .await?;
        if !merge.status.success() {
            eprintln!(
                "[vcs] Merge of {} into {} failed: {}",
                branch,
                target,
                String::from_utf8_lossy(&merge.stderr).trim()
            );
            let _ = self.git(&["merge", "--abort"]).await;
            if let Some(orig) = original {
                if orig != target {
                    let _ = self.git(&["checkout", &orig]).await;
                }
            }
            return Ok(false);
        }
        Ok(true)
    }
}
