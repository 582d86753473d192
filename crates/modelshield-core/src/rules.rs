//! The fixed content ruleset. Five case-insensitive category rules applied to
//! every item of a representation; each category match is its own finding and
//! nothing is deduplicated.

use std::sync::LazyLock;

use regex::Regex;

use crate::extract::Representation;
use crate::finding::{Category, Finding};

struct Rule {
    category: Category,
    trigger: &'static LazyLock<Regex>,
}

static PLAINTEXT_METADATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(layer|weight|bias|label|trainable)").unwrap());
static SENSITIVE_METADATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(username|password|email|token)").unwrap());
static DEBUG_ARTIFACTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(debug|log|trace|print)").unwrap());
static HARDCODED_SHAPES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(input_shape|shape=)").unwrap());
static UNSAFE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(lambda|custom|def )").unwrap());

static RULES: [Rule; 5] = [
    Rule {
        category: Category::PlaintextMetadata,
        trigger: &PLAINTEXT_METADATA,
    },
    Rule {
        category: Category::SensitiveMetadata,
        trigger: &SENSITIVE_METADATA,
    },
    Rule {
        category: Category::DebugArtifacts,
        trigger: &DEBUG_ARTIFACTS,
    },
    Rule {
        category: Category::HardcodedShapes,
        trigger: &HARDCODED_SHAPES,
    },
    Rule {
        category: Category::UnsafeCodeArtifacts,
        trigger: &UNSAFE_CODE,
    },
];

/// Run every rule over every item. `Entries` items are matched on key and
/// value independently; the finding snippet is the rendered `key: value`
/// item either way.
pub fn classify(representation: &Representation) -> Vec<Finding> {
    let mut findings = Vec::new();
    match representation {
        Representation::Lines(lines) => {
            for (index, line) in lines.iter().enumerate() {
                for rule in &RULES {
                    if rule.trigger.is_match(line) {
                        findings.push(Finding::new(
                            rule.category,
                            Some(index + 1),
                            line.trim(),
                        ));
                    }
                }
            }
        }
        Representation::Entries(entries) => {
            for (index, (key, value)) in entries.iter().enumerate() {
                let snippet = format!("{key}: {value}");
                for rule in &RULES {
                    if rule.trigger.is_match(key) || rule.trigger.is_match(value) {
                        findings.push(Finding::new(
                            rule.category,
                            Some(index + 1),
                            snippet.trim(),
                        ));
                    }
                }
            }
        }
    }
    findings
}
