//! Feature CRUD and JSON round-trip commands.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use framework::store::models::{Feature, FeatureStatus, NewFeature, UpdateFields};
use framework::store::Db;
use framework::ui;

use crate::FeatureCommands;

/// Shape of the export file under `<root>/architecture/`.
#[derive(Serialize, Deserialize)]
struct ExportFile {
    features: Vec<Feature>,
}

fn default_export_path(root: &Path) -> PathBuf {
    root.join("architecture").join("feature-requirements.json")
}

pub fn cmd_feature(root: &Path, command: &FeatureCommands) -> Result<()> {
    let db = Db::open(root)?;
    match command {
        FeatureCommands::List { status, assigned } => {
            let status = match status.as_deref() {
                Some(raw) => Some(
                    FeatureStatus::from_str(raw).map_err(|e| anyhow::anyhow!(e))?,
                ),
                None => None,
            };
            let features = db.list_features(status, assigned.as_deref())?;
            for f in &features {
                println!("{}", ui::feature_line(f));
            }
            println!();
            println!("{} feature(s)", features.len());
        }
        FeatureCommands::Get { id } => {
            let feature = db
                .get_feature(id)?
                .with_context(|| format!("Feature {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&feature)?);
        }
        FeatureCommands::Create {
            description,
            category,
            depends,
            openspec,
            compliance,
        } => {
            let feature = db.create_feature(&NewFeature {
                description: description.clone(),
                category: category.clone().unwrap_or_default(),
                depends_on: depends.clone(),
                architecture_compliance: compliance.clone(),
                openspec_reference: openspec.clone().unwrap_or_default(),
                assigned_to: "dev-agent".to_string(),
                reviewed_by: "review-agent".to_string(),
                tested_by: "qa-agent".to_string(),
                ..Default::default()
            })?;
            println!("Created {}", ui::feature_line(&feature));
        }
        FeatureCommands::Update {
            id,
            status,
            passes,
            notes,
        } => {
            let status = match status.as_deref() {
                Some(raw) => Some(
                    FeatureStatus::from_str(raw).map_err(|e| anyhow::anyhow!(e))?,
                ),
                None => None,
            };
            let updated = db.update_feature(
                id,
                &UpdateFields {
                    status,
                    passes: *passes,
                    notes: notes.clone(),
                    ..Default::default()
                },
            )?;
            println!("Updated {}", ui::feature_line(&updated));
        }
        FeatureCommands::Delete { id, force } => {
            if db.get_feature(id)?.is_none() {
                anyhow::bail!("Feature {} not found", id);
            }
            if !force {
                let confirm = dialoguer::Confirm::new()
                    .with_prompt(format!("Delete {} permanently?", id))
                    .default(false)
                    .interact()
                    .unwrap_or(false);
                if !confirm {
                    println!("Delete cancelled");
                    return Ok(());
                }
            }
            db.delete_feature(id)?;
            println!("Deleted {}", id);
        }
        FeatureCommands::Export { output } => {
            let path = output.clone().unwrap_or_else(|| default_export_path(root));
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create export directory {}", parent.display())
                })?;
            }
            let features = db.list_features(None, None)?;
            let file = ExportFile { features };
            std::fs::write(&path, serde_json::to_string_pretty(&file)?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported {} feature(s) to {}", file.features.len(), path.display());
        }
        FeatureCommands::Import { input } => {
            let path = input.clone().unwrap_or_else(|| default_export_path(root));
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file: ExportFile = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid feature export in {}", path.display()))?;
            for feature in &file.features {
                db.insert_feature_full(feature)?;
            }
            println!("Imported {} feature(s) from {}", file.features.len(), path.display());
        }
    }
    Ok(())
}
