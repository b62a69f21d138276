//! Configuration and exported state
//!
//! Loading of the controller configuration and publishing of the metrics and
//! status documents.

pub mod config;
mod export;

pub use config::{parse_env_file, ControllerConfig};
pub use export::{
    read_status, write_atomic, ExportedSettings, Exporter, StatusSnapshot, TargetStatus,
};
