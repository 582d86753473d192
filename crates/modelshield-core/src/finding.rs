use serde::{Deserialize, Deserializer, Serialize};

/// Severity of a finding. The taxonomy is closed: anything a producer emits
/// is normalized into one of these three values before it enters a finding
/// list, and unknown labels fall back to `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// Case-insensitive normalization applied at every producer boundary.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        }
    }

    /// Contribution weight used by the risk aggregator.
    pub fn weight(self) -> f64 {
        match self {
            Severity::High => 1.0,
            Severity::Medium => 0.7,
            Severity::Low => 0.3,
        }
    }

    /// Nominal CVSS-like value used by the risk aggregator.
    pub fn nominal(self) -> f64 {
        match self {
            Severity::High => 7.5,
            Severity::Medium => 5.0,
            Severity::Low => 3.0,
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Severity::normalize(&raw))
    }
}

/// Fixed vulnerability taxonomy. Each category carries its report label, its
/// severity, and (for the byte/structural inspectors) a CWE code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    PlaintextMetadata,
    SensitiveMetadata,
    DebugArtifacts,
    HardcodedShapes,
    UnsafeCodeArtifacts,
    InsecureSerialization,
    WeakFileProtection,
    VulnerableLibrary,
    MissingDocumentation,
    PermissivePermissions,
    DangerousOpcode,
    OpcodeAnalysisFailed,
    SuspiciousBytePattern,
    OversizedArtifact,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::PlaintextMetadata => "Lack of Model Obfuscation / Plaintext Metadata",
            Category::SensitiveMetadata => "Plaintext Sensitive Metadata",
            Category::DebugArtifacts => "Exposed Debugging Information",
            Category::HardcodedShapes => "Hardcoded Input Shapes Without Validation",
            Category::UnsafeCodeArtifacts => "Custom Layers or Unsafe Code Artifacts",
            Category::InsecureSerialization => "Insecure Serialization Format (Pickle/Joblib)",
            Category::WeakFileProtection => "Missing or Weak File Protection",
            Category::VulnerableLibrary => "Use of Potentially Vulnerable Library",
            Category::MissingDocumentation => "Missing Model Documentation",
            Category::PermissivePermissions => "Overly Permissive Permissions",
            Category::DangerousOpcode => "Dangerous Pickle Opcode Detected",
            Category::OpcodeAnalysisFailed => "Pickle Analysis Failed",
            Category::SuspiciousBytePattern => "Suspicious Code Pattern",
            Category::OversizedArtifact => "Large Model File",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Category::SensitiveMetadata
            | Category::UnsafeCodeArtifacts
            | Category::InsecureSerialization
            | Category::PermissivePermissions
            | Category::DangerousOpcode
            | Category::SuspiciousBytePattern => Severity::High,
            Category::PlaintextMetadata
            | Category::HardcodedShapes
            | Category::WeakFileProtection
            | Category::VulnerableLibrary
            | Category::OpcodeAnalysisFailed => Severity::Medium,
            Category::DebugArtifacts
            | Category::MissingDocumentation
            | Category::OversizedArtifact => Severity::Low,
        }
    }

    pub fn cwe(self) -> Option<&'static str> {
        match self {
            Category::DangerousOpcode => Some("CWE-502"),
            Category::OpcodeAnalysisFailed => Some("CWE-20"),
            Category::SuspiciousBytePattern => Some("CWE-95"),
            Category::OversizedArtifact => Some("CWE-400"),
            _ => None,
        }
    }
}

/// Which scan stage produced a finding. The scanner itself never sets this;
/// the caller tags findings when it combines static, dynamic, and adversarial
/// results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSource {
    Static,
    Dynamic,
    Adversarial,
}

impl FindingSource {
    pub fn as_str(self) -> &'static str {
        match self {
            FindingSource::Static => "static",
            FindingSource::Dynamic => "dynamic",
            FindingSource::Adversarial => "adversarial",
        }
    }
}

/// One detected issue. `line` is the 1-based position in the extracted
/// representation; whole-file checks reference line 1 or carry no line at
/// all. `category` is always a non-empty label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub snippet: String,
    pub severity: Severity,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwe_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<FindingSource>,
}

impl Finding {
    pub fn new(category: Category, line: Option<usize>, snippet: impl Into<String>) -> Self {
        Self {
            line,
            snippet: snippet.into(),
            severity: category.severity(),
            category: category.label().to_string(),
            details: None,
            cwe_id: category.cwe().map(str::to_string),
            source: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn tagged(mut self, source: FindingSource) -> Self {
        self.source = Some(source);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, Finding, FindingSource, Severity};

    #[test]
    fn severity_normalizes_case_insensitively() {
        assert_eq!(Severity::normalize("HIGH"), Severity::High);
        assert_eq!(Severity::normalize("Medium"), Severity::Medium);
        assert_eq!(Severity::normalize("low"), Severity::Low);
    }

    #[test]
    fn unknown_severity_defaults_to_low() {
        assert_eq!(Severity::normalize("critical"), Severity::Low);
        assert_eq!(Severity::normalize(""), Severity::Low);
        assert_eq!(Severity::normalize("bogus"), Severity::Low);
    }

    #[test]
    fn severity_serializes_as_capitalized_label() {
        let json = serde_json::to_string(&Severity::High).expect("serialize");
        assert_eq!(json, "\"High\"");
    }

    #[test]
    fn severity_deserializes_through_normalization() {
        let parsed: Severity = serde_json::from_str("\"MEDIUM\"").expect("deserialize");
        assert_eq!(parsed, Severity::Medium);
        let parsed: Severity = serde_json::from_str("\"whatever\"").expect("deserialize");
        assert_eq!(parsed, Severity::Low);
    }

    #[test]
    fn categories_carry_fixed_severities_and_cwe_codes() {
        assert_eq!(Category::SensitiveMetadata.severity(), Severity::High);
        assert_eq!(Category::WeakFileProtection.severity(), Severity::Medium);
        assert_eq!(Category::MissingDocumentation.severity(), Severity::Low);
        assert_eq!(Category::DangerousOpcode.cwe(), Some("CWE-502"));
        assert_eq!(Category::OversizedArtifact.cwe(), Some("CWE-400"));
        assert_eq!(Category::SensitiveMetadata.cwe(), None);
    }

    #[test]
    fn every_category_has_a_nonempty_label() {
        let categories = [
            Category::PlaintextMetadata,
            Category::SensitiveMetadata,
            Category::DebugArtifacts,
            Category::HardcodedShapes,
            Category::UnsafeCodeArtifacts,
            Category::InsecureSerialization,
            Category::WeakFileProtection,
            Category::VulnerableLibrary,
            Category::MissingDocumentation,
            Category::PermissivePermissions,
            Category::DangerousOpcode,
            Category::OpcodeAnalysisFailed,
            Category::SuspiciousBytePattern,
            Category::OversizedArtifact,
        ];
        for category in categories {
            assert!(!category.label().is_empty());
        }
    }

    #[test]
    fn finding_builder_sets_category_defaults() {
        let finding = Finding::new(Category::DangerousOpcode, None, "GLOBAL os system")
            .with_details("offset 0")
            .tagged(FindingSource::Static);
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.category, "Dangerous Pickle Opcode Detected");
        assert_eq!(finding.cwe_id.as_deref(), Some("CWE-502"));
        assert_eq!(finding.source, Some(FindingSource::Static));
    }
}
