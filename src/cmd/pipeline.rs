//! Pipeline-level commands: `status`, `guided`, and `autoplay`.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use console::style;

use framework::autoplay::Autoplay;
use framework::dashboard::api::status_summary;
use framework::scheduler::{blocked_features, next_action, Action};
use framework::store::models::ExecutionMode;
use framework::store::{Db, STATE_DIR};
use framework::ui;

pub fn cmd_status(root: &Path) -> Result<()> {
    let db = Db::open(root)?;
    let features = db.list_features(None, None)?;
    let summary = status_summary(&features);

    println!();
    println!("Pipeline Status");
    println!("===============");
    println!();

    if features.is_empty() {
        println!("No features yet. Create one with 'framework feature create -d <text>'");
        println!("or import a change with 'framework openspec import <change>'.");
        println!();
        return Ok(());
    }

    for (status, count) in &summary.counts {
        println!("  {:<18} {}", status, count);
    }
    println!();
    println!(
        "  {}/{} complete",
        summary.complete,
        summary.total
    );

    let blocked = blocked_features(&features);
    if !blocked.is_empty() {
        println!();
        println!("Blocked:");
        for (id, deps) in &blocked {
            println!("  {} {} waiting on {}", ui::BLOCKED, id, deps.join(", "));
        }
    }

    let sessions = db.recent_sessions(5)?;
    if !sessions.is_empty() {
        println!();
        println!("Recent activity:");
        for s in &sessions {
            println!(
                "  #{} {} {} on {} ({})",
                s.session_number,
                s.agent_role,
                s.outcome,
                s.feature_id,
                style(&s.timestamp).dim()
            );
        }
    }
    println!();
    Ok(())
}

pub fn cmd_guided(root: &Path) -> Result<()> {
    let db = Db::open(root)?;
    let features = db.list_features(None, None)?;
    let next = next_action(&features, &HashSet::new()).context("Scheduling failed")?;

    println!();
    match next {
        None => {
            let blocked = blocked_features(&features);
            if features.is_empty() {
                println!("Nothing to do: no features exist yet.");
            } else if blocked.is_empty() {
                println!("{}", style("All features are complete.").green());
            } else {
                println!("Nothing actionable. Blocked features:");
                for (id, deps) in &blocked {
                    println!("  {} waiting on {}", id, deps.join(", "));
                }
            }
        }
        Some((action, feature)) => {
            println!("Next step: {} for {}", style(action.as_str()).bold(), feature.id);
            println!("  {}", feature.description);
            println!();
            match action {
                Action::Pr => {
                    println!(
                        "  Create the PR: branch feature/{}, title \"{}: {}\",",
                        feature.id.to_lowercase(),
                        feature.id,
                        feature.description
                    );
                    println!(
                        "  then run: framework feature update {} --status pr-open",
                        feature.id
                    );
                }
                Action::Merge => {
                    println!("  Merge the open PR for {}, then run:", feature.id);
                    println!(
                        "  framework feature update {} --status complete",
                        feature.id
                    );
                }
                _ => {
                    let role = action.agent_role().unwrap_or("dev");
                    println!(
                        "  Run the {} agent with {}/prompts/{}.md against this feature.",
                        role, STATE_DIR, role
                    );
                    println!(
                        "  The agent records its own result; check with 'framework feature get {}'.",
                        feature.id
                    );
                }
            }
        }
    }
    println!();
    Ok(())
}

pub async fn cmd_autoplay(root: &Path, mode: Option<&str>, auto_merge: bool) -> Result<()> {
    let db = Db::open(root)?;
    let mut settings = db.settings()?;
    if let Some(raw) = mode {
        settings.execution_mode =
            ExecutionMode::from_str(raw).map_err(|e| anyhow::anyhow!(e))?;
    }
    if auto_merge {
        settings.auto_merge = true;
        settings.safe_mode = false;
    }

    let mut autoplay = Autoplay::new(root.to_path_buf(), settings);
    let report = autoplay.run(&db).await?;
    if report.exit_code() != 0 {
        std::process::exit(report.exit_code());
    }
    Ok(())
}
