// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Post-termination artifacts.
//!
//! Produced only after a successful run: a JSON snapshot of the converged
//! curve with its run statistics, and an XYZ animation with one frame per
//! curve node so the transition path can be played back in a molecular
//! viewer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::SimulationConfig;
use crate::coordinator::RunReport;
use crate::geometry::Point;

/// Errors while writing artifacts.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Filesystem failure.
    #[error("cannot write {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Snapshot serialization failure.
    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The curve is not three coordinates per atom, so no XYZ animation
    /// can be written.
    #[error("dimension {dimension} is not a multiple of 3; no animation written")]
    NotAtomistic {
        /// The curve dimension.
        dimension: usize,
    },
}

/// The JSON snapshot of a finished run.
#[derive(Debug, Serialize, Deserialize)]
pub struct CurveSnapshot {
    /// The converged curve, point by point.
    pub points: Vec<Point>,
    /// Number of completed sweeps.
    pub sweeps: usize,
    /// Aggregate movement at the end of each sweep.
    pub movement_history: Vec<f64>,
    /// Dimension of the configuration space.
    pub dimension: usize,
    /// Interior nodes per local problem.
    pub local_nodes: usize,
    /// Termination tolerance the run was configured with.
    pub tolerance: f64,
    /// The Maupertuis metric parameters.
    pub metric_parameters: Vec<f64>,
    /// When the snapshot was written.
    pub finished_at: DateTime<Utc>,
}

/// Write the JSON snapshot of a run to `path`.
pub fn write_snapshot(
    path: &Path,
    report: &RunReport,
    config: &SimulationConfig,
) -> Result<(), OutputError> {
    let snapshot = CurveSnapshot {
        points: report.curve.points().to_vec(),
        sweeps: report.sweeps,
        movement_history: report.movement_history.clone(),
        dimension: config.dimension(),
        local_nodes: config.local_nodes,
        tolerance: config.tolerance,
        metric_parameters: config.metric_parameters.clone(),
        finished_at: Utc::now(),
    };
    let file = std::fs::File::create(path).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer_pretty(file, &snapshot)?;
    Ok(())
}

/// Write the converged curve as an XYZ animation: every curve node becomes
/// one frame of `symbols.len()` atoms. Atoms are labelled `X` when no
/// symbols are available.
pub fn write_xyz_animation(
    path: &Path,
    points: &[Point],
    symbols: &[String],
) -> Result<(), OutputError> {
    let dimension = points.first().map_or(0, Vec::len);
    if dimension == 0 || dimension % 3 != 0 {
        return Err(OutputError::NotAtomistic { dimension });
    }
    let atoms = dimension / 3;
    let io_error = |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = std::io::BufWriter::new(
        std::fs::File::create(path).map_err(io_error)?,
    );
    for (frame, point) in points.iter().enumerate() {
        writeln!(file, "{atoms}").map_err(io_error)?;
        writeln!(file, "frame {frame}").map_err(io_error)?;
        for atom in 0..atoms {
            let symbol = symbols.get(atom).map_or("X", String::as_str);
            writeln!(
                file,
                "{symbol} {:.10} {:.10} {:.10}",
                point[atom * 3],
                point[atom * 3 + 1],
                point[atom * 3 + 2],
            )
            .map_err(io_error)?;
        }
    }
    file.flush().map_err(io_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::GlobalCurve;

    fn report() -> RunReport {
        RunReport {
            curve: GlobalCurve::new(vec![0.0, 0.0, 0.0], vec![3.0, 0.0, 0.0], 2).unwrap(),
            sweeps: 4,
            movement_history: vec![1.0, 0.1, 0.01, 1e-7],
            dispatch_log: Vec::new(),
        }
    }

    #[test]
    fn test_snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let config = SimulationConfig::from_endpoints(
            vec![0.0, 0.0, 0.0],
            vec![3.0, 0.0, 0.0],
            2,
            2,
            5.0,
            1e-6,
        );

        write_snapshot(&path, &report(), &config).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let snapshot: CurveSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(snapshot.points.len(), 4);
        assert_eq!(snapshot.sweeps, 4);
        assert_eq!(snapshot.movement_history.len(), 4);
        assert!((snapshot.tolerance - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn test_animation_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.xyz");
        let report = report();

        write_xyz_animation(&path, report.curve.points(), &["H".to_string()]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // 4 frames × (count + comment + 1 atom).
        assert_eq!(lines.len(), 12);
        assert_eq!(lines[0], "1");
        assert!(lines[2].starts_with("H "));
    }

    #[test]
    fn test_non_atomistic_dimension_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.xyz");
        let points = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        assert!(matches!(
            write_xyz_animation(&path, &points, &[]),
            Err(OutputError::NotAtomistic { .. })
        ));
    }
}
