//! OpenSpec subcommands: `framework openspec`.

use std::path::Path;

use anyhow::Result;
use console::style;

use framework::openspec::{importer, maybe_archive, OpenSpecCli};
use framework::store::models::FeatureStatus;
use framework::store::Db;

use crate::OpenspecCommands;

pub async fn cmd_openspec(root: &Path, command: &OpenspecCommands) -> Result<()> {
    let cli = OpenSpecCli::new(root);
    match command {
        OpenspecCommands::Install => {
            cli.install().await?;
            println!("OpenSpec CLI installed");
        }
        OpenspecCommands::Refresh => {
            if !cli.available().await {
                anyhow::bail!("OpenSpec CLI not found; run 'framework openspec install' first");
            }
            cli.refresh().await?;
            println!("OpenSpec project files refreshed");
        }
        OpenspecCommands::Status => {
            match cli.version().await {
                Some(version) => println!("OpenSpec CLI: {}", version),
                None => println!("OpenSpec CLI: not installed (filesystem fallback active)"),
            }
            let db = Db::open(root)?;
            let changes = cli.list_changes().await?;
            if changes.is_empty() {
                println!("No active changes.");
                return Ok(());
            }
            println!("Active changes:");
            for change in &changes {
                let features = db.features_by_change(change)?;
                let complete = features
                    .iter()
                    .filter(|f| f.status == FeatureStatus::Complete)
                    .count();
                if features.is_empty() {
                    println!("  {} (not imported)", change);
                } else {
                    println!("  {} ({}/{} complete)", change, complete, features.len());
                }
            }
        }
        OpenspecCommands::Import { change, all } => {
            let db = Db::open(root)?;
            if *all {
                let summaries = importer::import_all(&db, &cli).await?;
                if summaries.is_empty() {
                    println!("No active changes to import.");
                }
                for s in &summaries {
                    print_summary(s);
                }
            } else {
                let name = change
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("Specify a change name or --all"))?;
                let summary = importer::import_change(&db, &cli, name).await?;
                print_summary(&summary);
            }
        }
        OpenspecCommands::Archive { feature_id } => {
            let db = Db::open(root)?;
            let feature = db
                .get_feature(feature_id)?
                .ok_or_else(|| anyhow::anyhow!("Feature {} not found", feature_id))?;
            if feature.openspec_change_id.is_empty() {
                anyhow::bail!("Feature {} does not belong to an OpenSpec change", feature_id);
            }
            if !maybe_archive(&db, &cli, feature_id).await? {
                println!(
                    "Change '{}' still has incomplete features; not archiving.",
                    feature.openspec_change_id
                );
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &importer::ImportSummary) {
    println!(
        "{} '{}': {} created, {} updated",
        style("Imported").green(),
        summary.change,
        summary.created.len(),
        summary.updated.len()
    );
    for id in &summary.created {
        println!("  + {}", id);
    }
    for id in &summary.updated {
        println!("  ~ {}", id);
    }
}
