//! Layered network settings.
//!
//! Everything the launcher feeds the three roles that is *not* part of the
//! simulation itself: addresses, the shared secret, delays, output paths.
//! Sources are layered with the usual precedence:
//!
//! 1. Defaults (lowest)
//! 2. A TOML settings file
//! 3. Environment variables prefixed with `GEODIST_` (highest)
//!
//! CLI flags override individual fields on top of the loaded value.

use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::metric::PotentialSpec;

/// Environment variable prefix for settings overrides.
/// Example: `GEODIST_COORDINATOR__BIND=0.0.0.0:5000`.
pub const ENV_PREFIX: &str = "GEODIST";

/// Environment variable separator for nested settings.
const ENV_SEPARATOR: &str = "__";

/// Errors while assembling settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A source failed to load or deserialize.
    #[error("settings error: {0}")]
    Load(#[from] config::ConfigError),
}

/// Coordinator-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Address the coordinator listens on.
    pub bind: String,
    /// Seconds a dispatched task may stay outstanding before its worker is
    /// presumed dead.
    pub task_timeout_seconds: u64,
    /// Prefix for the snapshot and animation written after termination;
    /// nothing is written when absent.
    pub output_prefix: Option<String>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
            task_timeout_seconds: 300,
            output_prefix: None,
        }
    }
}

/// Worker-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Address of the coordinator.
    pub coordinator: String,
    /// Addresses of this worker's private evaluator pool.
    pub evaluators: Vec<String>,
    /// Milliseconds to sleep after a WAIT before polling again.
    pub callback_delay_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            coordinator: "127.0.0.1:5000".to_string(),
            evaluators: vec!["127.0.0.1:5001".to_string()],
            callback_delay_ms: 1000,
        }
    }
}

/// Evaluator-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorSettings {
    /// Address the evaluator listens on.
    pub bind: String,
    /// The potential-energy surface to serve.
    #[serde(default)]
    pub potential: PotentialSpec,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5001".to_string(),
            potential: PotentialSpec::default(),
        }
    }
}

/// The full settings tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Shared secret for the connection handshake.
    pub secret: String,
    /// Coordinator settings.
    pub coordinator: CoordinatorSettings,
    /// Worker settings.
    pub worker: WorkerSettings,
    /// Evaluator settings.
    pub evaluator: EvaluatorSettings,
}

/// Settings loader with builder-style source selection.
#[derive(Debug, Default)]
pub struct SettingsLoader {
    custom_file: Option<PathBuf>,
    skip_env: bool,
}

impl SettingsLoader {
    /// Create a loader with default sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a TOML settings file on top of the defaults.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.custom_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Ignore `GEODIST_` environment overrides, for hermetic tests.
    pub fn skip_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Assemble the settings from all selected sources.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        let mut builder = ConfigBuilder::builder()
            .add_source(config::Config::try_from(&Settings::default())?);

        if let Some(ref path) = self.custom_file {
            tracing::debug!(path = %path.display(), "loading settings file");
            builder = builder.add_source(
                File::from(path.as_path()).format(config::FileFormat::Toml),
            );
        }
        if !self.skip_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        Ok(builder.build()?.try_deserialize()?)
    }
}
