//! Configuration pipeline.
//!
//! YAML documents come in as generic value trees; what comes out is one
//! materialized job configuration per (module, job) pair, with the three
//! scheduling keys resolved through the layered defaults.

mod loader;
mod materialize;

pub use loader::{ConfigError, load_config, read_document};
pub use materialize::{JobSpec, ModuleConfig, coerce_int, materialize};
