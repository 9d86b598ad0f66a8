//! Preprocessor trait and its output types.

use serde::{Deserialize, Serialize};

use moluni_core::{InputDescriptor, Result};

/// Cartesian geometry of one structure, in Ångström.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Element symbols, one per atom.
    pub elements: Vec<String>,
    /// Positions, one `[x, y, z]` per atom.
    pub positions: Vec<[f64; 3]>,
    /// Cell vectors for periodic systems.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lattice: Option<[[f64; 3]; 3]>,
}

impl Geometry {
    pub fn atom_count(&self) -> usize {
        self.elements.len()
    }
}

/// Result of preparing one descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedMolecule {
    /// Canonical identifier (e.g. SMILES).
    pub canonical_form: String,
    /// Alternate canonical form (e.g. InChI), when known.
    pub alternate_form: Option<String>,
    /// Empirical formula in Hill order.
    pub formula: String,
    pub geometry: Geometry,
}

impl PreparedMolecule {
    /// Informational descriptor stored alongside the job.
    pub fn descriptor(&self) -> InputDescriptor {
        InputDescriptor {
            canonical: Some(self.canonical_form.clone()),
            alternate: self.alternate_form.clone(),
            formula: Some(self.formula.clone()),
        }
    }
}

/// Trait for input preprocessors.
pub trait Preprocessor: Send + Sync {
    /// Prepare one descriptor. Failures are `Error::Preprocess`.
    fn prepare(&self, descriptor: &str) -> Result<PreparedMolecule>;
}
