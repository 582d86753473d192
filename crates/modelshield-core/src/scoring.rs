//! Risk aggregation: collapse a finding list into one normalized score plus
//! a high-risk flag, and produce the fixed recommendation block.

use serde::Serialize;

use crate::finding::{Finding, Severity};

/// Aggregate risk over one finding set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskScore {
    pub score: f64,
    pub high_risk: bool,
}

/// Weighted severity average normalized to `[0, 100]`, rounded to two
/// decimals. An empty finding set scores 0.0 and is never high risk.
pub fn score(findings: &[Finding]) -> RiskScore {
    if findings.is_empty() {
        return RiskScore {
            score: 0.0,
            high_risk: false,
        };
    }
    let total: f64 = findings
        .iter()
        .map(|f| f.severity.weight() * f.severity.nominal())
        .sum();
    let normalized = total / (10.0 * findings.len() as f64) * 100.0;
    RiskScore {
        score: (normalized * 100.0).round() / 100.0,
        high_risk: high_risk(findings),
    }
}

/// True when any finding is High. Callers combining finding sets from
/// several stages derive their own flag over the union with this.
pub fn high_risk(findings: &[Finding]) -> bool {
    findings.iter().any(|f| f.severity == Severity::High)
}

/// Fixed remediation block: one count line, then the two standing advice
/// lines.
pub fn recommendations(findings: &[Finding]) -> Vec<String> {
    let lead = if findings.is_empty() {
        "No immediate vulnerabilities detected.".to_string()
    } else {
        format!("{} vulnerabilities found.", findings.len())
    };
    vec![
        lead,
        "Keep dependencies and libraries up to date.".to_string(),
        "Run regular model security scans.".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::{high_risk, recommendations, score};
    use crate::finding::{Category, Finding};

    fn finding(category: Category) -> Finding {
        Finding::new(category, Some(1), "snippet")
    }

    #[test]
    fn empty_set_scores_zero_and_low_risk() {
        let result = score(&[]);
        assert_eq!(result.score, 0.0);
        assert!(!result.high_risk);
    }

    #[test]
    fn single_high_finding_scores_75() {
        let result = score(&[finding(Category::SensitiveMetadata)]);
        assert_eq!(result.score, 75.0);
        assert!(result.high_risk);
    }

    #[test]
    fn single_medium_finding_scores_35() {
        let result = score(&[finding(Category::WeakFileProtection)]);
        assert_eq!(result.score, 35.0);
        assert!(!result.high_risk);
    }

    #[test]
    fn single_low_finding_scores_9() {
        let result = score(&[finding(Category::MissingDocumentation)]);
        assert_eq!(result.score, 9.0);
        assert!(!result.high_risk);
    }

    #[test]
    fn high_plus_low_averages_to_42() {
        let findings = [
            finding(Category::SensitiveMetadata),
            finding(Category::DebugArtifacts),
        ];
        let result = score(&findings);
        assert_eq!(result.score, 42.0);
        assert!(result.high_risk);
    }

    #[test]
    fn score_stays_within_bounds() {
        let findings: Vec<Finding> = (0..50)
            .map(|_| finding(Category::SensitiveMetadata))
            .collect();
        let result = score(&findings);
        assert!(result.score <= 100.0);
        assert!(result.score >= 0.0);
    }

    #[test]
    fn high_risk_requires_a_high_finding() {
        assert!(!high_risk(&[
            finding(Category::WeakFileProtection),
            finding(Category::MissingDocumentation),
        ]));
        assert!(high_risk(&[
            finding(Category::WeakFileProtection),
            finding(Category::InsecureSerialization),
        ]));
    }

    #[test]
    fn recommendations_lead_with_the_count() {
        let recs = recommendations(&[finding(Category::DebugArtifacts)]);
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0], "1 vulnerabilities found.");
        assert_eq!(recs[1], "Keep dependencies and libraries up to date.");
        assert_eq!(recs[2], "Run regular model security scans.");
    }

    #[test]
    fn recommendations_for_clean_scan() {
        let recs = recommendations(&[]);
        assert_eq!(recs[0], "No immediate vulnerabilities detected.");
        assert_eq!(recs.len(), 3);
    }
}
