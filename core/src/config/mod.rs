//! Configuration: the simulation description file and the layered network
//! settings.
//!
//! The simulation file is line-oriented; each line is a two-letter code,
//! an equals sign, and a value:
//!
//! ```text
//! st=start.xyz     # path to the start configuration
//! en=end.xyz       # path to the end configuration
//! ln=4             # interior nodes per local problem (L)
//! gn=16            # interior-node parameter of the global curve (G)
//! pa=5.0           # Maupertuis energy level(s), comma separated
//! to=1e-4          # termination tolerance on the sweep movement
//! ```
//!
//! Unrecognized codes are ignored. Network settings (addresses, secret,
//! delays) live separately in [`settings`].

pub mod settings;
pub mod structure;

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::curve::GlobalCurve;
use crate::geometry::{GeometryError, MassMatrix, Point};

pub use settings::{Settings, SettingsLoader, ENV_PREFIX};
pub use structure::{read_xyz, Structure, StructureError};

/// Errors while loading the simulation file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A required code never appeared.
    #[error("configuration is missing the {key:?} entry")]
    MissingKey {
        /// The absent two-letter code.
        key: &'static str,
    },

    /// A value failed to parse.
    #[error("invalid value for {key:?} at line {line}: {value:?}")]
    InvalidValue {
        /// The two-letter code.
        key: String,
        /// 1-based line number.
        line: usize,
        /// The raw value text.
        value: String,
    },

    /// A referenced structure file is unusable.
    #[error(transparent)]
    Structure(#[from] StructureError),

    /// The two endpoints disagree about the system.
    #[error("start and end configurations have {start} and {end} coordinates")]
    EndpointMismatch {
        /// Coordinate count of the start configuration.
        start: usize,
        /// Coordinate count of the end configuration.
        end: usize,
    },

    /// Derived geometry is unusable.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Everything the simulation file describes, with its derived quantities.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// The start endpoint p₀.
    pub start_point: Point,
    /// The end endpoint p_G.
    pub end_point: Point,
    /// Element symbol per atom; empty for synthetic systems.
    pub symbols: Vec<String>,
    /// Diagonal of the mass matrix, one weight per coordinate.
    pub masses: Vec<f64>,
    /// Interior nodes per local problem (L).
    pub local_nodes: usize,
    /// Interior-node parameter of the global curve (G).
    pub global_nodes: usize,
    /// Maupertuis metric parameters; the first entry is the energy level.
    pub metric_parameters: Vec<f64>,
    /// Termination tolerance on the per-sweep movement.
    pub tolerance: f64,
}

impl SimulationConfig {
    /// Load and derive from a simulation file. Structure paths are
    /// resolved relative to the file's own directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut start: Option<Structure> = None;
        let mut end: Option<Structure> = None;
        let mut local_nodes = None;
        let mut global_nodes = None;
        let mut metric_parameters = None;
        let mut tolerance = None;

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((code, value)) = trimmed.split_once('=') else {
                continue;
            };
            let code = code.trim();
            let value = value.trim();
            let invalid = || ConfigError::InvalidValue {
                key: code.to_string(),
                line,
                value: value.to_string(),
            };

            match code {
                "st" => start = Some(read_xyz(&base.join(value))?),
                "en" => end = Some(read_xyz(&base.join(value))?),
                "ln" => local_nodes = Some(value.parse().map_err(|_| invalid())?),
                "gn" => global_nodes = Some(value.parse().map_err(|_| invalid())?),
                "pa" => {
                    let parsed: Result<Vec<f64>, _> =
                        value.split(',').map(|v| v.trim().parse()).collect();
                    metric_parameters = Some(parsed.map_err(|_| invalid())?);
                }
                "to" => tolerance = Some(value.parse().map_err(|_| invalid())?),
                // Unknown codes are ignored; the format predates this
                // implementation and other tools add their own entries.
                _ => {}
            }
        }

        let start = start.ok_or(ConfigError::MissingKey { key: "st" })?;
        let end = end.ok_or(ConfigError::MissingKey { key: "en" })?;
        if start.coordinates.len() != end.coordinates.len() {
            return Err(ConfigError::EndpointMismatch {
                start: start.coordinates.len(),
                end: end.coordinates.len(),
            });
        }
        let masses = start.coordinate_masses()?;

        Ok(Self {
            start_point: start.coordinates.clone(),
            end_point: end.coordinates,
            symbols: start.symbols,
            masses,
            local_nodes: local_nodes.ok_or(ConfigError::MissingKey { key: "ln" })?,
            global_nodes: global_nodes.ok_or(ConfigError::MissingKey { key: "gn" })?,
            metric_parameters: metric_parameters
                .ok_or(ConfigError::MissingKey { key: "pa" })?,
            tolerance: tolerance.ok_or(ConfigError::MissingKey { key: "to" })?,
        })
    }

    /// Build a synthetic configuration directly from endpoints, with unit
    /// masses. The backbone of tests and toy problems.
    pub fn from_endpoints(
        start_point: Point,
        end_point: Point,
        local_nodes: usize,
        global_nodes: usize,
        energy: f64,
        tolerance: f64,
    ) -> Self {
        let masses = vec![1.0; start_point.len()];
        Self {
            start_point,
            end_point,
            symbols: Vec::new(),
            masses,
            local_nodes,
            global_nodes,
            metric_parameters: vec![energy],
            tolerance,
        }
    }

    /// Dimension D of the configuration space.
    pub fn dimension(&self) -> usize {
        self.start_point.len()
    }

    /// The Maupertuis energy level E.
    pub fn energy(&self) -> f64 {
        self.metric_parameters[0]
    }

    /// Total number of interior nodes of the global curve:
    /// G·(L − 1) + 1.
    pub fn total_interior(&self) -> usize {
        self.global_nodes * (self.local_nodes - 1) + 1
    }

    /// The mass matrix.
    pub fn mass_matrix(&self) -> Result<MassMatrix, GeometryError> {
        MassMatrix::new(self.masses.clone())
    }

    /// The initial global curve: the straight line between the endpoints.
    pub fn global_curve(&self) -> Result<GlobalCurve, GeometryError> {
        GlobalCurve::new(
            self.start_point.clone(),
            self.end_point.clone(),
            self.total_interior(),
        )
    }
}
