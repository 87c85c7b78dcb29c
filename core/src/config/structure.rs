//! Minimal structure-file loading.
//!
//! The endpoints of a run are molecular configurations on disk. All the
//! core needs from them is a flat coordinate vector, the element symbols
//! (for writing animations back out), and per-atom masses; this module is
//! that interface, reading plain XYZ files.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors while loading a structure file.
#[derive(Debug, Error)]
pub enum StructureError {
    /// The file could not be read.
    #[error("cannot read structure file {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not well-formed XYZ.
    #[error("malformed structure file {path} at line {line}")]
    Malformed {
        /// Offending path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
    },

    /// An element symbol without a known mass.
    #[error("unknown element symbol {symbol:?}")]
    UnknownElement {
        /// The unrecognized symbol.
        symbol: String,
    },
}

/// A loaded molecular configuration.
#[derive(Debug, Clone)]
pub struct Structure {
    /// Element symbol per atom.
    pub symbols: Vec<String>,
    /// Flat coordinates, three per atom.
    pub coordinates: Vec<f64>,
}

impl Structure {
    /// Number of atoms.
    pub fn atom_count(&self) -> usize {
        self.symbols.len()
    }

    /// Mass per atom, from the element table.
    pub fn atom_masses(&self) -> Result<Vec<f64>, StructureError> {
        self.symbols
            .iter()
            .map(|symbol| {
                atomic_mass(symbol).ok_or_else(|| StructureError::UnknownElement {
                    symbol: symbol.clone(),
                })
            })
            .collect()
    }

    /// Mass per coordinate: each atom's mass repeated for x, y, z. This is
    /// the diagonal of the mass matrix.
    pub fn coordinate_masses(&self) -> Result<Vec<f64>, StructureError> {
        Ok(self
            .atom_masses()?
            .into_iter()
            .flat_map(|mass| [mass, mass, mass])
            .collect())
    }
}

/// Standard atomic weights (u) for the elements a simulation here will
/// plausibly contain.
pub fn atomic_mass(symbol: &str) -> Option<f64> {
    Some(match symbol {
        "H" => 1.008,
        "He" => 4.002_6,
        "Li" => 6.94,
        "C" => 12.011,
        "N" => 14.007,
        "O" => 15.999,
        "F" => 18.998,
        "Na" => 22.990,
        "Mg" => 24.305,
        "Al" => 26.982,
        "Si" => 28.085,
        "P" => 30.974,
        "S" => 32.06,
        "Cl" => 35.45,
        "K" => 39.098,
        "Ca" => 40.078,
        "Fe" => 55.845,
        "Ni" => 58.693,
        "Cu" => 63.546,
        "Zn" => 65.38,
        "Ag" => 107.87,
        "Pt" => 195.08,
        "Au" => 196.97,
        _ => return None,
    })
}

/// Read an XYZ file: atom count, comment line, then `symbol x y z` rows.
pub fn read_xyz(path: &Path) -> Result<Structure, StructureError> {
    let text = std::fs::read_to_string(path).map_err(|source| StructureError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let malformed = |line: usize| StructureError::Malformed {
        path: path.to_path_buf(),
        line,
    };

    let mut lines = text.lines();
    let count: usize = lines
        .next()
        .and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| malformed(1))?;
    let _comment = lines.next().ok_or_else(|| malformed(2))?;

    let mut symbols = Vec::with_capacity(count);
    let mut coordinates = Vec::with_capacity(count * 3);
    for (offset, line) in lines.take(count).enumerate() {
        let row = 3 + offset;
        let mut fields = line.split_whitespace();
        let symbol = fields.next().ok_or_else(|| malformed(row))?;
        symbols.push(symbol.to_string());
        for _ in 0..3 {
            let value: f64 = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| malformed(row))?;
            coordinates.push(value);
        }
    }
    if symbols.len() != count {
        return Err(malformed(3 + symbols.len()));
    }

    Ok(Structure {
        symbols,
        coordinates,
    })
}
