//! Analyzers shipped with the collector

pub mod log;
pub mod snapshot;

pub use log::LogAnalyzer;
pub use snapshot::SnapshotAnalyzer;
