//! Scan orchestration: read the artifact once, extract its representation,
//! run the content rules, and append the whole-artifact checks in their
//! fixed order.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::config::ScanConfig;
use crate::extract::{self, ArtifactKind, Representation};
use crate::finding::{Category, Finding};
use crate::inspect;
use crate::rules;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one static scan.
#[derive(Debug)]
pub struct ScanReport {
    pub representation: Representation,
    pub findings: Vec<Finding>,
}

/// Scan one artifact. I/O failure reading the file is the only hard error;
/// everything downstream degrades into findings or synthetic content.
pub fn scan(path: &Path, config: &ScanConfig) -> Result<ScanReport, ScanError> {
    let data = std::fs::read(path)?;
    let kind = ArtifactKind::from_path(path);
    debug!(path = %path.display(), ?kind, size = data.len(), "scanning artifact");

    let mut findings = Vec::new();

    if kind.is_pickle_family() {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        findings.push(Finding::new(
            Category::InsecureSerialization,
            Some(1),
            format!("File extension: .{ext}"),
        ));
    }

    let representation = extract::extract(kind, &data);
    debug!(items = representation.len(), "extracted representation");
    findings.extend(rules::classify(&representation));

    findings.push(Finding::new(
        Category::WeakFileProtection,
        Some(1),
        "No encryption or signature detected",
    ));

    if let Some(version) = &config.library_version {
        // Plain string ordering, matching how these version tags have always
        // been compared upstream. "10.0.0" sorts below "2.0.0".
        if version.as_str() < config.vulnerable_below.as_str() {
            findings.push(Finding::new(
                Category::VulnerableLibrary,
                Some(1),
                format!("Inference library version: {version}"),
            ));
        }
    }

    // Case-sensitive on purpose: only a lowercase "doc" marker counts.
    let documented = representation
        .items()
        .iter()
        .any(|item| item.contains("doc") || item.contains('#'));
    if !documented {
        findings.push(Finding::new(
            Category::MissingDocumentation,
            Some(1),
            "No documentation or comments found",
        ));
    }

    if let Some(mode) = inspect::permission_bits(path) {
        if inspect::is_permissive(mode) {
            findings.push(Finding::new(
                Category::PermissivePermissions,
                Some(1),
                format!("File permissions: {mode:o}"),
            ));
        }
    }

    debug!(findings = findings.len(), "scan complete");
    Ok(ScanReport {
        representation,
        findings,
    })
}
