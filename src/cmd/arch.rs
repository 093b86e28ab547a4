//! Architecture blob import/export: `framework arch`.
//!
//! The blobs are opaque JSON consumed by agents; the orchestrator only
//! copies them between `<root>/architecture/` and the store.

use std::path::Path;

use anyhow::{Context, Result};

use framework::store::models::ArchKind;
use framework::store::Db;

use crate::ArchCommands;

pub fn cmd_arch(root: &Path, command: &ArchCommands) -> Result<()> {
    let db = Db::open(root)?;
    let arch_dir = root.join("architecture");
    match command {
        ArchCommands::Import => {
            let mut imported = 0;
            for kind in ArchKind::ALL {
                let path = arch_dir.join(format!("{}.json", kind.as_str()));
                if !path.exists() {
                    continue;
                }
                let payload = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                db.arch_set(kind, &payload)?;
                println!("Imported {}", path.display());
                imported += 1;
            }
            if imported == 0 {
                println!(
                    "No architecture files found under {} (expected principles.json, patterns.json, standards.json)",
                    arch_dir.display()
                );
            }
        }
        ArchCommands::Export => {
            let blobs = db.arch_all()?;
            if blobs.is_empty() {
                println!("No architecture blobs in the store; run 'framework arch import' first.");
                return Ok(());
            }
            std::fs::create_dir_all(&arch_dir)
                .with_context(|| format!("Failed to create {}", arch_dir.display()))?;
            for (kind, payload) in blobs {
                let path = arch_dir.join(format!("{}.json", kind));
                std::fs::write(&path, &payload)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Exported {}", path.display());
            }
        }
    }
    Ok(())
}
