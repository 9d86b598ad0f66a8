//! Precomputed geometries from XYZ files.
//!
//! Layout:
//! ```text
//! 3
//! O InChI=1S/H2O/h1H2 Lattice="10 0 0 0 10 0 0 0 10"
//! O  0.000  0.000  0.117
//! H  0.000  0.757 -0.469
//! H  0.000 -0.757 -0.469
//! ```
//! The comment line carries the canonical identifier, an optional
//! alternate form, and an optional extended-XYZ `Lattice` for periodic cells.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::formula::hill_formula;
use crate::preprocessor::{Geometry, PreparedMolecule, Preprocessor};
use moluni_core::{Error, Result};

/// Reads the descriptor as a path to an XYZ file.
pub struct XyzPreprocessor {
    /// Relative descriptors resolve against this directory.
    base_dir: Option<PathBuf>,
}

impl XyzPreprocessor {
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    pub fn with_base_dir(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: Some(base_dir.as_ref().to_path_buf()),
        }
    }

    fn resolve(&self, descriptor: &str) -> PathBuf {
        let path = PathBuf::from(descriptor.trim());
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

impl Default for XyzPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor for XyzPreprocessor {
    fn prepare(&self, descriptor: &str) -> Result<PreparedMolecule> {
        let path = self.resolve(descriptor);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::Preprocess(format!("{}: {}", path.display(), e)))?;
        let fallback_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| descriptor.to_string());

        let molecule = parse_xyz(&text, &fallback_name)
            .map_err(|msg| Error::Preprocess(format!("{}: {}", path.display(), msg)))?;
        debug!(
            "Prepared {} ({} atoms, {})",
            molecule.canonical_form,
            molecule.geometry.atom_count(),
            molecule.formula
        );
        Ok(molecule)
    }
}

/// Parse XYZ text. `fallback_name` is used when the comment line is blank.
pub fn parse_xyz(text: &str, fallback_name: &str) -> std::result::Result<PreparedMolecule, String> {
    let mut lines = text.lines();

    let count: usize = lines
        .next()
        .ok_or("empty file")?
        .trim()
        .parse()
        .map_err(|_| "first line must be the atom count".to_string())?;
    if count == 0 {
        return Err("atom count is zero".into());
    }

    let comment = lines.next().unwrap_or_default();
    let (lattice, comment) = take_lattice(comment)?;
    let mut tokens = comment.split_whitespace();
    let canonical_form = tokens
        .next()
        .map(str::to_string)
        .unwrap_or_else(|| fallback_name.to_string());
    let alternate_form = tokens.next().map(str::to_string);

    let mut elements = Vec::with_capacity(count);
    let mut positions = Vec::with_capacity(count);
    for (i, line) in lines.filter(|l| !l.trim().is_empty()).enumerate() {
        if i >= count {
            return Err(format!("more atom lines than the declared {}", count));
        }
        let mut fields = line.split_whitespace();
        let symbol = fields.next().unwrap_or_default();
        if !is_element_symbol(symbol) {
            return Err(format!("atom {}: invalid element symbol '{}'", i + 1, symbol));
        }
        let mut xyz = [0.0; 3];
        for slot in xyz.iter_mut() {
            *slot = fields
                .next()
                .and_then(|f| f.parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("atom {}: expected three finite coordinates", i + 1))?;
        }
        elements.push(symbol.to_string());
        positions.push(xyz);
    }
    if elements.len() != count {
        return Err(format!(
            "declared {} atoms but found {}",
            count,
            elements.len()
        ));
    }

    Ok(PreparedMolecule {
        canonical_form,
        alternate_form,
        formula: hill_formula(&elements),
        geometry: Geometry {
            elements,
            positions,
            lattice,
        },
    })
}

/// Split an extended-XYZ `Lattice="..."` entry out of the comment line.
fn take_lattice(comment: &str) -> std::result::Result<(Option<[[f64; 3]; 3]>, String), String> {
    const KEY: &str = "Lattice=\"";
    let Some(start) = comment.find(KEY) else {
        return Ok((None, comment.to_string()));
    };
    let body_start = start + KEY.len();
    let body_len = comment[body_start..]
        .find('"')
        .ok_or("unterminated Lattice entry")?;
    let body = &comment[body_start..body_start + body_len];

    let values: Vec<f64> = body
        .split_whitespace()
        .map(|v| v.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| "Lattice must hold nine numbers".to_string())?;
    if values.len() != 9 {
        return Err("Lattice must hold nine numbers".into());
    }
    let mut cell = [[0.0; 3]; 3];
    for (i, v) in values.into_iter().enumerate() {
        cell[i / 3][i % 3] = v;
    }

    let rest = format!(
        "{} {}",
        &comment[..start],
        &comment[body_start + body_len + 1..]
    );
    Ok((Some(cell), rest))
}

fn is_element_symbol(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {
            s.len() <= 3 && chars.all(|c| c.is_ascii_lowercase())
        }
        _ => false,
    }
}
