//! Calculation request payload.

use serde::{Deserialize, Serialize};

use moluni_core::CalculationType;
use moluni_prep::PreparedMolecule;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoleculeBlock {
    pub elements: Vec<String>,
    pub positions: Vec<[f64; 3]>,
    /// Sent as `null` for non-periodic structures.
    pub lattice: Option<[[f64; 3]; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationBlock {
    #[serde(rename = "type")]
    pub kind: CalculationType,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub smiles: String,
    pub inchi: Option<String>,
    pub formula: String,
}

/// Body of a submit call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRequest {
    pub molecule: MoleculeBlock,
    pub calculation: CalculationBlock,
    pub metadata: RequestMetadata,
}

impl CalculationRequest {
    /// Build the payload for a prepared molecule with the type's default
    /// parameters.
    pub fn build(prepared: &PreparedMolecule, kind: CalculationType) -> Self {
        Self {
            molecule: MoleculeBlock {
                elements: prepared.geometry.elements.clone(),
                positions: prepared.geometry.positions.clone(),
                lattice: prepared.geometry.lattice,
            },
            calculation: CalculationBlock {
                kind,
                parameters: kind.parameters(),
            },
            metadata: RequestMetadata {
                smiles: prepared.canonical_form.clone(),
                inchi: prepared.alternate_form.clone(),
                formula: prepared.formula.clone(),
            },
        }
    }
}
