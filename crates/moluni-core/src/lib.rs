//! Moluni Core: error taxonomy, configuration, calculation job model.

pub mod config;
pub mod error;
pub mod job;

pub use config::{DataPaths, MoluniConfig, RemoteConfig, TransportErrorPolicy};
pub use error::{Error, Result};
pub use job::*;
