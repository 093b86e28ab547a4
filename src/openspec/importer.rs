//! Change importer: turns OpenSpec artifacts into features.
//!
//! Task groups in `tasks.md` map 1:1 to features, upserted by the
//! `(change_id, task_group)` natural key so re-imports refresh content
//! without touching pipeline state. Groups are chained with sequential
//! dependencies so in-change order is honored.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use crate::errors::ImportError;
use crate::store::models::{NewFeature, UpdateFields};
use crate::store::Db;

use super::{ChangeArtifacts, OpenSpecCli};

/// One top-level numbered item from `tasks.md` plus its indented bullets.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskGroup {
    pub title: String,
    pub steps: Vec<String>,
}

/// Outcome of importing one change.
#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub change: String,
    pub created: Vec<String>,
    pub updated: Vec<String>,
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.created.len() + self.updated.len()
    }
}

fn group_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)[.)]\s+(.*\S)\s*$").expect("group regex"))
}

fn step_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-*]\s+(.*\S)\s*$").expect("step regex"))
}

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^###\s*Requirement:\s*(.*\S)\s*$").expect("requirement regex"))
}

fn scenario_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Keywords are uppercase by convention; matching them case-sensitively
    // keeps ordinary prose bullets ("and then we...") out of the steps.
    RE.get_or_init(|| {
        Regex::new(r"^\s*[-*]\s+((?:GIVEN|WHEN|THEN|AND)\b.*\S)\s*$").expect("scenario regex")
    })
}

/// Strip a leading `[ ]` / `[x]` checkbox marker from a step.
fn strip_checkbox(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^\[\s*[xX]?\s*\]\s*").expect("checkbox regex"));
    re.replace(text, "").to_string()
}

/// Parse `tasks.md` into task groups. A top-level numbered item starts a
/// group; indented bullets below it are its steps. Bullets before the
/// first numbered item are ignored.
pub fn parse_task_groups(tasks_md: &str) -> Vec<TaskGroup> {
    let mut groups: Vec<TaskGroup> = Vec::new();
    for line in tasks_md.lines() {
        if let Some(caps) = group_re().captures(line) {
            groups.push(TaskGroup {
                title: strip_checkbox(&caps[2]),
                steps: Vec::new(),
            });
            continue;
        }
        if let Some(caps) = step_re().captures(line) {
            if let Some(group) = groups.last_mut() {
                group.steps.push(strip_checkbox(&caps[1]));
            }
        }
    }
    groups
}

/// `### Requirement:` headings from aggregated spec content.
pub fn parse_requirements(spec_md: &str) -> Vec<String> {
    spec_md
        .lines()
        .filter_map(|line| requirement_re().captures(line))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// GIVEN/WHEN/THEN/AND scenario bullets, each contributing one
/// verification step.
pub fn parse_verification_steps(spec_md: &str) -> Vec<String> {
    spec_md
        .lines()
        .filter_map(|line| scenario_re().captures(line))
        .map(|caps| format!("{} verified", &caps[1]))
        .collect()
}

fn notes_for(group: &TaskGroup) -> String {
    if group.steps.is_empty() {
        return String::new();
    }
    let mut notes = String::from("Steps:\n");
    for step in &group.steps {
        notes.push_str(&format!("- {}\n", step));
    }
    notes
}

/// Upsert all task groups of one change into the store.
pub async fn import_change(
    db: &Db,
    cli: &OpenSpecCli,
    change: &str,
) -> Result<ImportSummary, ImportError> {
    let artifacts = cli.load_artifacts(change).await?;
    import_artifacts(db, cli.changes_dir().join(change).as_path(), change, &artifacts)
}

/// Upsert from already-loaded artifacts. Split out so parsing + upsert are
/// testable without the CLI probe.
pub fn import_artifacts(
    db: &Db,
    reference_dir: &Path,
    change: &str,
    artifacts: &ChangeArtifacts,
) -> Result<ImportSummary, ImportError> {
    let mut groups = parse_task_groups(&artifacts.tasks);
    if groups.is_empty() {
        // A change with no parseable groups still becomes one feature.
        groups.push(TaskGroup {
            title: change.to_string(),
            steps: Vec::new(),
        });
    }

    let spec_content = artifacts.aggregated_specs();
    let requirements = parse_requirements(&spec_content);
    let verification_steps = parse_verification_steps(&spec_content);
    let reference = reference_dir.display().to_string();

    let mut summary = ImportSummary {
        change: change.to_string(),
        ..Default::default()
    };
    let mut previous_id: Option<String> = None;

    for (index, group) in groups.iter().enumerate() {
        let task_group = (index + 1) as i64;
        let existing = db
            .get_feature_by_change_group(change, task_group)
            .map_err(ImportError::Other)?;

        let feature_id = match existing {
            None => {
                let created = db
                    .create_feature(&NewFeature {
                        category: change.to_string(),
                        description: group.title.clone(),
                        notes: notes_for(group),
                        requirements: requirements.clone(),
                        verification_steps: verification_steps.clone(),
                        assigned_to: "dev-agent".to_string(),
                        reviewed_by: "review-agent".to_string(),
                        tested_by: "qa-agent".to_string(),
                        openspec_change_id: change.to_string(),
                        openspec_task_group: task_group,
                        openspec_reference: reference.clone(),
                        ..Default::default()
                    })
                    .map_err(ImportError::Other)?;
                summary.created.push(created.id.clone());
                created.id
            }
            Some(feature) => {
                // Content refresh only: id, status, passes, and any
                // manually added dependencies are preserved.
                db.update_feature(
                    &feature.id,
                    &UpdateFields {
                        category: Some(change.to_string()),
                        description: Some(group.title.clone()),
                        notes: Some(notes_for(group)),
                        requirements: Some(requirements.clone()),
                        verification_steps: Some(verification_steps.clone()),
                        openspec_reference: Some(reference.clone()),
                        ..Default::default()
                    },
                )
                .map_err(ImportError::Other)?;
                summary.updated.push(feature.id.clone());
                feature.id
            }
        };

        // Sequential in-change ordering: group g depends on group g-1.
        if let Some(prev) = &previous_id {
            let current = db
                .get_feature(&feature_id)
                .map_err(ImportError::Other)?
                .ok_or_else(|| {
                    ImportError::Other(anyhow::anyhow!(
                        "Feature {} vanished during import",
                        feature_id
                    ))
                })?;
            if !current.depends_on.contains(prev) {
                let mut deps = current.depends_on.clone();
                deps.push(prev.clone());
                db.update_feature(
                    &feature_id,
                    &UpdateFields {
                        depends_on: Some(deps),
                        ..Default::default()
                    },
                )
                .map_err(ImportError::Other)?;
            }
        }
        previous_id = Some(feature_id);
    }

    Ok(summary)
}

/// Import every active change. Individual failures are reported and do not
/// stop the sweep.
pub async fn import_all(db: &Db, cli: &OpenSpecCli) -> Result<Vec<ImportSummary>> {
    let mut summaries = Vec::new();
    for change in cli.list_changes().await? {
        match import_change(db, cli, &change).await {
            Ok(summary) => summaries.push(summary),
            Err(e) => eprintln!("[openspec] Import of '{}' failed: {:#}", change, e),
        }
    }
    Ok(summaries)
}
