//! modelshield-core: static security scanning and risk aggregation for
//! machine-learning model artifacts.
//!
//! The crate splits into a format-specific extractor ([`extract`]), a fixed
//! content ruleset ([`rules`]), byte/structural inspectors ([`inspect`],
//! [`anomaly`]), and the risk aggregator ([`scoring`]). [`scanner::scan`]
//! ties the extractor, ruleset, and whole-artifact checks together; the
//! inspectors are composed separately by the caller.

pub mod anomaly;
pub mod config;
pub mod extract;
pub mod finding;
pub mod inspect;
pub mod pickle;
pub mod rules;
pub mod scanner;
pub mod scoring;

pub use anomaly::{anomaly_detection, AnomalyReport};
pub use config::ScanConfig;
pub use extract::{ArtifactKind, Representation};
pub use finding::{Category, Finding, FindingSource, Severity};
pub use inspect::{byte_pattern_scan, dos_risk, file_hash, opcode_analysis};
pub use scanner::{scan, ScanError, ScanReport};
pub use scoring::{high_risk, recommendations, score, RiskScore};
