//! Subcommand implementations.

pub mod coordinator;
pub mod evaluator;
pub mod worker;

use anyhow::Result;
use geodist_core::prelude::{Settings, SettingsLoader};
use std::path::PathBuf;

/// Assemble settings from defaults, the optional settings file, and the
/// environment.
pub fn load_settings(file: Option<&PathBuf>) -> Result<Settings> {
    let mut loader = SettingsLoader::new();
    if let Some(path) = file {
        loader = loader.with_file(path);
    }
    Ok(loader.load()?)
}
