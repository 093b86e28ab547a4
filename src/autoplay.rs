//! Autoplay controller: drives features through the pipeline until the
//! backlog is drained or everything left is blocked or escalated.
//!
//! Per-run state is two in-memory maps: retry counters and the escalation
//! set. Neither outlives the run and neither is persisted.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use console::style;

use crate::agent::AgentRunner;
use crate::openspec::{self, importer, OpenSpecCli};
use crate::scheduler::{blocked_features, next_action, Action};
use crate::store::models::{ExecutionMode, Feature, FeatureStatus, Settings};
use crate::store::Db;
use crate::vcs::{MergeOutcome, VcsBridge};

/// End-of-run summary.
#[derive(Debug, Default)]
pub struct RunReport {
    pub iterations: u32,
    pub escalated: Vec<String>,
    pub blocked: Vec<(String, Vec<String>)>,
    pub all_complete: bool,
    pub interrupted: bool,
}

impl RunReport {
    /// Exit code for the process: non-zero when escalations remain.
    pub fn exit_code(&self) -> i32 {
        if self.escalated.is_empty() {
            0
        } else {
            1
        }
    }
}

pub struct Autoplay {
    root: PathBuf,
    settings: Settings,
    retries: HashMap<String, u32>,
    escalated: HashSet<String>,
}

impl Autoplay {
    pub fn new(root: PathBuf, settings: Settings) -> Self {
        Self {
            root,
            settings,
            retries: HashMap::new(),
            escalated: HashSet::new(),
        }
    }

    /// Bump the retry counter for a feature; escalate once it exceeds
    /// `max_retries`. Returns true when this bump escalated.
    fn bump_retry(&mut self, id: &str, reason: &str) -> bool {
        let count = self.retries.entry(id.to_string()).or_insert(0);
        *count += 1;
        if *count > self.settings.max_retries {
            eprintln!(
                "[autoplay] {} exceeded max_retries ({}) after {}; escalating",
                id, self.settings.max_retries, reason
            );
            self.escalated.insert(id.to_string());
            true
        } else {
            eprintln!(
                "[autoplay] {} retry {}/{} ({})",
                id, count, self.settings.max_retries, reason
            );
            false
        }
    }

    /// Run the loop until the scheduler has nothing left to offer.
    pub async fn run(&mut self, db: &Db) -> Result<RunReport> {
        let cli = OpenSpecCli::new(&self.root);
        if self.settings.openspec_auto_import && cli.available().await {
            let summaries = importer::import_all(db, &cli).await?;
            if !summaries.is_empty() {
                println!(
                    "Imported {} change(s) before starting",
                    summaries.len()
                );
            }
        }

        if self.settings.execution_mode == ExecutionMode::Team {
            return self.run_team_mode(db);
        }

        // Missing templates are configuration errors; surface them before
        // the first agent spawn rather than mid-run.
        for role in ["dev", "review", "qa"] {
            let path = self
                .root
                .join(crate::store::STATE_DIR)
                .join("prompts")
                .join(format!("{}.md", role));
            if !path.exists() {
                return Err(crate::errors::AgentError::PromptTemplateMissing { path }.into());
            }
        }

        let agent = AgentRunner::new(self.root.clone(), self.settings.clone());
        let vcs = VcsBridge::new(self.root.clone());
        let mut report = RunReport::default();

        loop {
            let features = db.list_features(None, None)?;
            let next = next_action(&features, &self.escalated)
                .context("Scheduling failed")?;
            let (action, feature) = match next {
                Some(pair) => pair,
                None => break,
            };
            report.iterations += 1;
            println!(
                "{} {} → {}",
                style("▶").cyan(),
                feature.id,
                style(action.as_str()).bold()
            );

            match action {
                Action::Pr => {
                    if let Err(e) = vcs.create_pr(db, &feature).await {
                        eprintln!("[autoplay] PR creation for {} failed: {:#}", feature.id, e);
                        self.escalated.insert(feature.id.clone());
                    }
                    continue;
                }
                Action::Merge => {
                    match vcs.merge_pr(db, &feature, &self.settings).await {
                        Ok(MergeOutcome::Merged) => {
                            if self.settings.openspec_auto_archive {
                                let _ = openspec::maybe_archive(db, &cli, &feature.id).await;
                            }
                        }
                        Ok(MergeOutcome::Skipped) => {
                            // Parked for a human; keep the loop from spinning.
                            self.escalated.insert(feature.id.clone());
                        }
                        Ok(MergeOutcome::Failed) => {
                            eprintln!("[autoplay] Merge of {} failed; escalating", feature.id);
                            self.escalated.insert(feature.id.clone());
                        }
                        Err(e) => {
                            eprintln!("[autoplay] Merge of {} errored: {:#}", feature.id, e);
                            self.escalated.insert(feature.id.clone());
                        }
                    }
                    continue;
                }
                Action::Dev | Action::Review | Action::Qa => {}
            }

            // A dev pickup of a rejected feature is a rejection cycle.
            if action == Action::Dev && feature.status == FeatureStatus::NeedsRevision {
                if self.bump_retry(&feature.id, "rejection cycle") {
                    continue;
                }
            }

            let status_before = feature.status;
            let role = action.agent_role().unwrap_or("dev");
            let architecture = if action == Action::Dev {
                db.arch_all()?
            } else {
                Vec::new()
            };

            let outcome = match agent.run(action, &feature, &architecture).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    eprintln!("[autoplay] Agent session for {} failed: {:#}", feature.id, e);
                    self.bump_retry(&feature.id, "agent failure");
                    db.append_session(role, &feature.id, "error", &e.to_string())?;
                    continue;
                }
            };

            if outcome.interrupted {
                println!("Interrupted; exiting autoplay run");
                report.interrupted = true;
                break;
            }
            if outcome.exit_code != 0 {
                eprintln!(
                    "[autoplay] Agent for {} exited {}: {}",
                    feature.id,
                    outcome.exit_code,
                    outcome.stderr.trim()
                );
            }

            let reloaded = match db.get_feature(&feature.id)? {
                Some(f) => f,
                // Deleted mid-run; nothing left to account for.
                None => continue,
            };

            let session_outcome = if reloaded.status == status_before && reloaded.passes == feature.passes {
                // The agent ran but moved nothing: a stall. Counting it
                // bounds wedged runs.
                self.bump_retry(&feature.id, "stalled session");
                "stalled"
            } else {
                "advanced"
            };
            db.append_session(
                role,
                &feature.id,
                session_outcome,
                &format!("exit code {}", outcome.exit_code),
            )?;
        }

        let features = db.list_features(None, None)?;
        report.escalated = {
            let mut ids: Vec<String> = self.escalated.iter().cloned().collect();
            ids.sort();
            ids
        };
        report.blocked = blocked_features(&features);
        report.all_complete = !features.is_empty()
            && features.iter().all(|f| f.status == FeatureStatus::Complete);

        self.print_summary(&features, &report);
        Ok(report)
    }

    fn print_summary(&self, features: &[Feature], report: &RunReport) {
        println!();
        println!(
            "Autoplay finished at {} after {} action(s)",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            report.iterations
        );
        let complete = features
            .iter()
            .filter(|f| f.status == FeatureStatus::Complete)
            .count();
        println!("  {}/{} features complete", complete, features.len());
        if report.all_complete {
            println!("  {}", style("All features complete").green());
        }
        if !report.escalated.is_empty() {
            println!(
                "  {} escalated: {}",
                style("Needs human attention").yellow(),
                report.escalated.join(", ")
            );
        }
        for (id, deps) in &report.blocked {
            println!("  {} blocked on {}", id, deps.join(", "));
        }
    }

    /// Team mode: print instruction blocks for a human-driven multi-agent
    /// tool instead of spawning subprocesses.
    fn run_team_mode(&mut self, db: &Db) -> Result<RunReport> {
        let features = db.list_features(None, None)?;
        let mut report = RunReport::default();
        let mut claimed: HashSet<String> = self.escalated.clone();
        let mut batch: Vec<(Action, Feature)> = Vec::new();

        while batch.len() < self.settings.features_per_lead_session {
            match next_action(&features, &claimed).context("Scheduling failed")? {
                Some((action, feature)) => {
                    claimed.insert(feature.id.clone());
                    batch.push((action, feature));
                }
                None => break,
            }
        }

        if batch.is_empty() {
            println!("Nothing actionable; team session not needed.");
        } else {
            println!(
                "Team session plan ({} feature(s), {}):",
                batch.len(),
                Local::now().format("%Y-%m-%d %H:%M")
            );
            for (action, feature) in &batch {
                println!();
                println!(
                    "{} {}: {}",
                    style("■").cyan(),
                    style(&feature.id).bold(),
                    feature.description
                );
                match action {
                    Action::Pr => println!(
                        "  Create the pull request: branch feature/{}, then set status to pr-open.",
                        feature.id.to_lowercase()
                    ),
                    Action::Merge => println!(
                        "  Merge the open PR for {} and set status to complete.",
                        feature.id
                    ),
                    _ => {
                        let role = action.agent_role().unwrap_or("dev");
                        println!(
                            "  Run the {} agent with the {} prompt ({}/prompts/{}.md).",
                            role,
                            role,
                            crate::store::STATE_DIR,
                            role
                        );
                        println!(
                            "  Record results with: framework feature update {} --status <new-status>",
                            feature.id
                        );
                    }
                }
            }
        }

        report.blocked = blocked_features(&features);
        report.all_complete = !features.is_empty()
            && features.iter().all(|f| f.status == FeatureStatus::Complete);
        Ok(report)
    }
}
