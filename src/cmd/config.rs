//! Config read/write: `framework config`.

use std::path::Path;

use anyhow::Result;

use framework::store::Db;

use crate::ConfigCommands;

pub fn cmd_config(root: &Path, command: &ConfigCommands) -> Result<()> {
    let db = Db::open(root)?;
    match command {
        ConfigCommands::Get { key } => {
            match db.config_get(key)? {
                Some(value) => println!("{}", value),
                None => anyhow::bail!("Unknown config key: {}", key),
            }
        }
        ConfigCommands::Set { key, value } => {
            db.config_set(key, value)?;
            println!("{} = {}", key, value);
        }
    }
    Ok(())
}
