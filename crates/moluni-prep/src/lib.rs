//! Moluni Prep: turns an input descriptor into a calculation-ready geometry.
//!
//! The `Preprocessor` trait abstracts over how geometry is produced.
//! `XyzPreprocessor` reads precomputed geometries from XYZ files; anything
//! heavier (conformer generation, force-field relaxation) plugs in behind
//! the same trait.

pub mod formula;
pub mod preprocessor;
pub mod xyz;

pub use formula::hill_formula;
pub use preprocessor::{Geometry, PreparedMolecule, Preprocessor};
pub use xyz::XyzPreprocessor;
