//! Agent runner: builds the prompt a coding agent receives and supervises
//! its subprocess.
//!
//! The contract with the agent is deliberately thin: it gets a prompt, it
//! mutates the store itself, it exits. Stdout is streamed through to the
//! operator; nothing in it is parsed for state changes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::errors::AgentError;
use crate::scheduler::Action;
use crate::store::models::{Feature, FeatureStatus, Settings};
use crate::store::STATE_DIR;

/// Separates the role prompt from the per-feature task block.
const TASK_DELIMITER: &str = "\n\n================ TASK ================\n\n";

pub struct AgentRunner {
    root: PathBuf,
    settings: Settings,
}

/// What happened to one agent session.
pub struct AgentOutcome {
    pub exit_code: i32,
    pub stderr: String,
    /// Set when the orchestrator was interrupted and killed the child.
    pub interrupted: bool,
}

impl AgentRunner {
    pub fn new(root: PathBuf, settings: Settings) -> Self {
        Self { root, settings }
    }

    fn prompt_path(&self, role: &str) -> PathBuf {
        self.root
            .join(STATE_DIR)
            .join("prompts")
            .join(format!("{}.md", role))
    }

    /// Compose the full prompt: role template, delimiter, task block.
    /// A missing template is a configuration error naming the path.
    pub fn build_prompt(
        &self,
        action: Action,
        feature: &Feature,
        architecture: &[(String, String)],
    ) -> Result<String, AgentError> {
        let role = action
            .agent_role()
            .ok_or_else(|| AgentError::Other(anyhow::anyhow!("{} is not an agent action", action)))?;
        let path = self.prompt_path(role);
        if !path.exists() {
            return Err(AgentError::PromptTemplateMissing { path });
        }
        let role_prompt = std::fs::read_to_string(&path)
            .map_err(|source| AgentError::PromptReadFailed { path, source })?;

        let feature_json = serde_json::to_string_pretty(feature)
            .unwrap_or_else(|_| "{}".to_string());

        let mut task = String::new();
        task.push_str(&format!("Feature: {}\n", feature.id));
        task.push_str(&format!("Description: {}\n\n", feature.description));
        task.push_str("Full feature record:\n```json\n");
        task.push_str(&feature_json);
        task.push_str("\n```\n\n");
        task.push_str(&Self::role_directives(action, feature));

        if action == Action::Dev && !architecture.is_empty() {
            task.push_str("\nArchitecture documents:\n");
            for (kind, payload) in architecture {
                task.push_str(&format!("\n### {}\n```json\n{}\n```\n", kind, payload));
            }
        }

        Ok(format!("{}{}{}", role_prompt, TASK_DELIMITER, task))
    }

    fn role_directives(action: Action, feature: &Feature) -> String {
        match action {
            Action::Dev => {
                let mut d = String::from(
                    "Directives:\n\
                     - Implement this feature with full architecture compliance.\n\
                     - When implementation is finished, set the feature status to 'ready-for-review'.\n",
                );
                if feature.status == FeatureStatus::NeedsRevision {
                    d.push_str(
                        "- This feature was rejected in a previous cycle. Consult the rejection \
                         feedback recorded in the version-control notes before changing anything.\n",
                    );
                }
                d
            }
            Action::Review => String::from(
                "Directives:\n\
                 - Execute every verification step for every principle.\n\
                 - Approve (status 'approved') or reject (status 'needs-revision') with evidence.\n",
            ),
            Action::Qa => String::from(
                "Directives:\n\
                 - Execute every verification step.\n\
                 - On success set passes=true; do NOT set status to 'complete'.\n\
                 - On failure set status to 'needs-revision'.\n",
            ),
            Action::Pr | Action::Merge => String::new(),
        }
    }

    /// Spawn the agent and wait for it to exit. Stdout is streamed to our
    /// stdout line by line; stderr is captured. Ctrl-C kills the child,
    /// waits for the reap, and reports `interrupted`.
    pub async fn run(
        &self,
        action: Action,
        feature: &Feature,
        architecture: &[(String, String)],
    ) -> Result<AgentOutcome, AgentError> {
        let prompt = self.build_prompt(action, feature, architecture)?;
        let start = Instant::now();

        let mut cmd = Command::new(&self.settings.agent_command);
        cmd.arg("-p")
            .arg(&prompt)
            .arg("--max-turns")
            .arg(self.settings.max_agent_turns.to_string())
            .arg("--model")
            .arg(&self.settings.model)
            .arg("--output-format")
            .arg("text")
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| AgentError::SpawnFailed {
            command: self.settings.agent_command.clone(),
            source,
        })?;

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("{} agent working on {}", action, feature.id));
        spinner.enable_steady_tick(Duration::from_millis(120));

        let stdout = child
            .stdout
            .take()
            .context("Failed to capture agent stdout")?;
        let mut stderr = child
            .stderr
            .take()
            .context("Failed to capture agent stderr")?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut interrupted = false;
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line.context("Failed to read agent stdout")? {
                        Some(text) => spinner.println(text),
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    spinner.println(format!("[agent] Interrupt received, terminating {}", feature.id));
                    let _ = child.start_kill();
                    interrupted = true;
                    break;
                }
            }
        }

        let status = child.wait().await.context("Failed to reap agent process")?;
        let stderr_text = stderr_task.await.unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1);

        spinner.finish_and_clear();
        eprintln!(
            "[agent] {} session for {} finished in {:.1}s (exit: {})",
            action,
            feature.id,
            start.elapsed().as_secs_f64(),
            exit_code
        );

        Ok(AgentOutcome {
            exit_code,
            stderr: stderr_text,
            interrupted,
        })
    }
}
