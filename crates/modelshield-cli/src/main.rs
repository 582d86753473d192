use std::env;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};

use modelshield_core::{
    anomaly_detection, byte_pattern_scan, dos_risk, file_hash, high_risk, opcode_analysis,
    recommendations, scan, score, AnomalyReport, ArtifactKind, Finding, FindingSource,
    RiskScore, Severity,
};
use serde::Deserialize;
use serde_json::json;

mod config;

use config::AppConfig;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        print_help();
        return Ok(());
    }

    match args[0].as_str() {
        "scan" => run_scan(&args[1..]),
        "hash" => run_hash(&args[1..]),
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        cmd => Err(format!("unknown command `{cmd}`")),
    }
}

fn run_scan(args: &[String]) -> Result<(), String> {
    if args.is_empty() {
        return Err("scan requires an artifact path".to_string());
    }

    let target = PathBuf::from(&args[0]);

    let mut format_override = None;
    let mut output_path = None;
    let mut dynamic_path = None::<PathBuf>;
    let mut adversarial_path = None::<PathBuf>;
    let mut dos_threshold_override = None;
    let mut library_version_override = None;
    let mut vulnerable_below_override = None;
    let mut fail_on_high_flag = false;
    let mut config_path = PathBuf::from(".modelshield.toml");
    let mut use_config = true;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--format" => {
                i += 1;
                format_override = Some(OutputFormat::parse(
                    args.get(i).ok_or("--format requires a value")?,
                )?);
            }
            "--output" => {
                i += 1;
                output_path = Some(PathBuf::from(
                    args.get(i).ok_or("--output requires a value")?,
                ));
            }
            "--dynamic-findings" => {
                i += 1;
                dynamic_path = Some(PathBuf::from(
                    args.get(i).ok_or("--dynamic-findings requires a value")?,
                ));
            }
            "--adversarial-findings" => {
                i += 1;
                adversarial_path = Some(PathBuf::from(
                    args.get(i)
                        .ok_or("--adversarial-findings requires a value")?,
                ));
            }
            "--dos-threshold-mb" => {
                i += 1;
                let raw = args.get(i).ok_or("--dos-threshold-mb requires a value")?;
                dos_threshold_override = Some(
                    raw.parse::<u64>()
                        .map_err(|_| "invalid --dos-threshold-mb value".to_string())?,
                );
            }
            "--library-version" => {
                i += 1;
                library_version_override = Some(
                    args.get(i)
                        .ok_or("--library-version requires a value")?
                        .to_string(),
                );
            }
            "--vulnerable-below" => {
                i += 1;
                vulnerable_below_override = Some(
                    args.get(i)
                        .ok_or("--vulnerable-below requires a value")?
                        .to_string(),
                );
            }
            "--fail-on-high" => fail_on_high_flag = true,
            "--config" => {
                i += 1;
                config_path = PathBuf::from(args.get(i).ok_or("--config requires a value")?);
            }
            "--no-config" => use_config = false,
            other => return Err(format!("unknown scan option `{other}`")),
        }
        i += 1;
    }

    let app_config = if use_config {
        AppConfig::load_if_exists(&config_path)?
    } else {
        AppConfig::default()
    };

    let format = match format_override {
        Some(format) => format,
        None => match app_config.format.as_deref() {
            Some(raw) => OutputFormat::parse(raw)?,
            None => OutputFormat::Table,
        },
    };
    let fail_on_high = fail_on_high_flag || app_config.fail_on_high;

    let mut scan_config = app_config.scan_config();
    if let Some(threshold) = dos_threshold_override {
        scan_config.dos_threshold_mb = threshold;
    }
    if let Some(version) = library_version_override {
        scan_config.library_version = Some(version);
    }
    if let Some(threshold) = vulnerable_below_override {
        scan_config.vulnerable_below = threshold;
    }

    let report = scan(&target, &scan_config)
        .map_err(|err| format!("failed to scan {}: {err}", target.display()))?;
    let data = fs::read(&target)
        .map_err(|err| format!("failed to read {}: {err}", target.display()))?;

    let mut findings = Vec::new();
    findings.extend(tag_all(report.findings, FindingSource::Static));
    if ArtifactKind::from_path(&target).is_pickle_family() {
        findings.extend(tag_all(opcode_analysis(&target), FindingSource::Static));
    }
    findings.extend(tag_all(byte_pattern_scan(&data), FindingSource::Static));
    findings.extend(tag_all(
        dos_risk(data.len() as u64, scan_config.dos_threshold_mb),
        FindingSource::Static,
    ));

    if let Some(path) = dynamic_path.as_deref() {
        findings.extend(load_external_findings(path, FindingSource::Dynamic)?);
    }
    if let Some(path) = adversarial_path.as_deref() {
        findings.extend(load_external_findings(path, FindingSource::Adversarial)?);
    }

    let digest = file_hash(&target)
        .map_err(|err| format!("failed to hash {}: {err}", target.display()))?;
    let anomaly = anomaly_detection(&target);
    let risk = score(&findings);
    // The combined flag is derived here, over everything the scan stages
    // produced, independently of the aggregator's own flag.
    let combined_high_risk = high_risk(&findings);
    let advice = recommendations(&findings);

    let rendered = match format {
        OutputFormat::Table => render_table(
            &target,
            &digest,
            &findings,
            risk,
            combined_high_risk,
            &advice,
            &anomaly,
        ),
        OutputFormat::Json => render_json(
            &target,
            &digest,
            &findings,
            risk,
            combined_high_risk,
            &advice,
            &anomaly,
        ),
    };

    if let Some(path) = output_path {
        fs::write(&path, rendered)
            .map_err(|err| format!("failed to write {}: {err}", path.display()))?;
        println!("Wrote report to {}", path.display());
    } else {
        print!("{rendered}");
    }

    if fail_on_high && combined_high_risk {
        std::process::exit(2);
    }

    Ok(())
}

fn run_hash(args: &[String]) -> Result<(), String> {
    if args.is_empty() {
        return Err("hash requires an artifact path".to_string());
    }
    let target = PathBuf::from(&args[0]);
    let digest = file_hash(&target)
        .map_err(|err| format!("failed to hash {}: {err}", target.display()))?;
    println!("{digest}  {}", target.display());
    Ok(())
}

fn tag_all(findings: Vec<Finding>, source: FindingSource) -> Vec<Finding> {
    findings
        .into_iter()
        .map(|finding| finding.tagged(source))
        .collect()
}

/// Finding shape emitted by the dynamic and adversarial scan stages:
/// `title` or `attack` naming, free-form severity casing.
#[derive(Debug, Deserialize)]
struct ExternalFinding {
    title: Option<String>,
    attack: Option<String>,
    severity: Option<String>,
    description: Option<String>,
    details: Option<String>,
    line: Option<usize>,
}

impl ExternalFinding {
    fn into_finding(self, source: FindingSource) -> Finding {
        let category = self
            .title
            .or(self.attack)
            .unwrap_or_else(|| "Vulnerability".to_string());
        let severity = Severity::normalize(self.severity.as_deref().unwrap_or(""));
        let snippet = self
            .description
            .clone()
            .unwrap_or_else(|| category.clone());
        Finding {
            line: self.line,
            snippet,
            severity,
            category,
            details: self.details,
            cwe_id: None,
            source: Some(source),
        }
    }
}

fn load_external_findings(path: &Path, source: FindingSource) -> Result<Vec<Finding>, String> {
    let payload = fs::read_to_string(path)
        .map_err(|err| format!("failed to read findings {}: {err}", path.display()))?;
    let external: Vec<ExternalFinding> = serde_json::from_str(&payload)
        .map_err(|err| format!("invalid findings JSON {}: {err}", path.display()))?;
    Ok(external
        .into_iter()
        .map(|finding| finding.into_finding(source))
        .collect())
}

fn render_table(
    target: &Path,
    digest: &str,
    findings: &[Finding],
    risk: RiskScore,
    combined_high_risk: bool,
    advice: &[String],
    anomaly: &AnomalyReport,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "modelshield scan complete: {} findings in {}",
        findings.len(),
        target.display()
    );
    let _ = writeln!(out, "SHA-256: {digest}");

    if findings.is_empty() {
        out.push_str("No vulnerabilities detected.\n");
    } else {
        let _ = writeln!(
            out,
            "{:<10} {:<8} {:<44} {:<12} {}",
            "Severity", "Line", "Category", "Source", "Snippet"
        );
        let _ = writeln!(out, "{}", "-".repeat(120));
        for finding in findings {
            let line = finding
                .line
                .map(|line| line.to_string())
                .unwrap_or_else(|| "-".to_string());
            let source = finding
                .source
                .map(|source| source.as_str())
                .unwrap_or("-");
            let _ = writeln!(
                out,
                "{:<10} {:<8} {:<44} {:<12} {}",
                finding.severity.as_str(),
                line,
                truncate(&finding.category, 44),
                source,
                truncate(&finding.snippet, 48)
            );
        }
    }

    let high = count_severity(findings, Severity::High);
    let medium = count_severity(findings, Severity::Medium);
    let low = count_severity(findings, Severity::Low);
    let _ = writeln!(out, "Summary: high={high} medium={medium} low={low}");
    let _ = writeln!(
        out,
        "Risk score: {:.2} (high risk: {})",
        risk.score,
        if combined_high_risk { "yes" } else { "no" }
    );
    if anomaly.analysis_complete {
        let _ = writeln!(
            out,
            "Anomaly score: {:.2} (anomalous: {})",
            anomaly.anomaly_score,
            if anomaly.is_anomalous { "yes" } else { "no" }
        );
    } else {
        out.push_str("Anomaly analysis incomplete.\n");
    }
    out.push_str("Recommendations:\n");
    for line in advice {
        let _ = writeln!(out, "  - {line}");
    }
    out
}

fn render_json(
    target: &Path,
    digest: &str,
    findings: &[Finding],
    risk: RiskScore,
    combined_high_risk: bool,
    advice: &[String],
    anomaly: &AnomalyReport,
) -> String {
    let payload = json!({
        "artifact": target.display().to_string(),
        "sha256": digest,
        "findings": findings,
        "risk": {
            "score": risk.score,
            "high_risk": risk.high_risk,
        },
        "high_risk": combined_high_risk,
        "anomaly": anomaly,
        "recommendations": advice,
    });
    let mut rendered =
        serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string());
    rendered.push('\n');
    rendered
}

fn count_severity(findings: &[Finding], severity: Severity) -> usize {
    findings.iter().filter(|f| f.severity == severity).count()
}

/// Width is in characters; snippets come from artifact bytes and external
/// findings files, so byte slicing is not safe here.
fn truncate(input: &str, width: usize) -> String {
    if input.chars().count() <= width {
        return input.to_string();
    }
    let kept: String = input.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw.to_ascii_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown format `{other}` (expected table|json)")),
        }
    }
}

fn print_help() {
    println!("modelshield CLI\n");
    println!("Usage:");
    println!("  modelshield scan <file> [--format table|json] [--output FILE] [--dynamic-findings FILE] [--adversarial-findings FILE] [--dos-threshold-mb N] [--library-version V] [--vulnerable-below V] [--fail-on-high] [--config FILE] [--no-config]");
    println!("  modelshield hash <file>");
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    use modelshield_core::{AnomalyReport, FindingSource, RiskScore, Severity};

    use super::{
        load_external_findings, render_json, render_table, truncate, ExternalFinding,
        OutputFormat,
    };

    fn temp_path(name: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("modelshield-{stamp}-{name}"))
    }

    fn neutral_anomaly() -> AnomalyReport {
        AnomalyReport {
            anomaly_score: 0.5,
            is_anomalous: false,
            analysis_complete: true,
        }
    }

    #[test]
    fn output_format_parses_case_insensitively() {
        assert_eq!(OutputFormat::parse("TABLE").expect("parse"), OutputFormat::Table);
        assert_eq!(OutputFormat::parse("json").expect("parse"), OutputFormat::Json);
        assert!(OutputFormat::parse("yaml").is_err());
    }

    #[test]
    fn external_findings_normalize_severity_and_naming() {
        let path = temp_path("dynamic.json");
        std::fs::File::create(&path)
            .and_then(|mut f| {
                f.write_all(
                    br#"[
                        {"title": "Model Extraction", "severity": "HIGH"},
                        {"attack": "Evasion", "severity": "high", "description": "perturbed inputs"},
                        {"severity": "bogus"}
                    ]"#,
                )
            })
            .expect("write fixture");

        let findings =
            load_external_findings(&path, FindingSource::Dynamic).expect("ingest");
        std::fs::remove_file(&path).ok();

        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].category, "Model Extraction");
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[1].category, "Evasion");
        assert_eq!(findings[1].severity, Severity::High);
        assert_eq!(findings[1].snippet, "perturbed inputs");
        assert_eq!(findings[2].category, "Vulnerability");
        assert_eq!(findings[2].severity, Severity::Low);
        assert!(findings
            .iter()
            .all(|f| f.source == Some(FindingSource::Dynamic)));
    }

    #[test]
    fn external_finding_prefers_title_over_attack() {
        let external = ExternalFinding {
            title: Some("Title".to_string()),
            attack: Some("Attack".to_string()),
            severity: None,
            description: None,
            details: None,
            line: Some(3),
        };
        let finding = external.into_finding(FindingSource::Adversarial);
        assert_eq!(finding.category, "Title");
        assert_eq!(finding.line, Some(3));
        assert_eq!(finding.severity, Severity::Low);
    }

    #[test]
    fn json_report_carries_both_high_risk_derivations() {
        let risk = RiskScore {
            score: 75.0,
            high_risk: true,
        };
        let rendered = render_json(
            Path::new("model.pkl"),
            "deadbeef",
            &[],
            risk,
            true,
            &["Run regular model security scans.".to_string()],
            &neutral_anomaly(),
        );
        let parsed: serde_json::Value = serde_json::from_str(&rendered).expect("json");
        assert_eq!(parsed["risk"]["score"], 75.0);
        assert_eq!(parsed["risk"]["high_risk"], true);
        assert_eq!(parsed["high_risk"], true);
        assert_eq!(parsed["sha256"], "deadbeef");
        assert!(parsed["recommendations"].is_array());
        assert_eq!(parsed["anomaly"]["analysis_complete"], true);
    }

    #[test]
    fn table_report_mentions_score_and_recommendations() {
        let risk = RiskScore {
            score: 0.0,
            high_risk: false,
        };
        let rendered = render_table(
            Path::new("model.txt"),
            "cafe",
            &[],
            risk,
            false,
            &["No immediate vulnerabilities detected.".to_string()],
            &neutral_anomaly(),
        );
        assert!(rendered.contains("No vulnerabilities detected."));
        assert!(rendered.contains("Risk score: 0.00"));
        assert!(rendered.contains("No immediate vulnerabilities detected."));
    }

    #[test]
    fn truncate_appends_ellipsis() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long category name", 10), "a very ...");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate("пароль администратора", 10), "пароль ...");
        assert_eq!(truncate("пароль", 10), "пароль");
    }

    #[test]
    fn table_renders_multibyte_snippets() {
        let finding = modelshield_core::Finding {
            line: Some(1),
            snippet: "ключ: секретное значение достаточной длины для усечения в табличном отчёте"
                .to_string(),
            severity: Severity::High,
            category: "Обнаружены чувствительные метаданные модели".to_string(),
            details: None,
            cwe_id: None,
            source: Some(FindingSource::Dynamic),
        };
        let rendered = render_table(
            Path::new("model.pkl"),
            "cafe",
            &[finding],
            RiskScore {
                score: 75.0,
                high_risk: true,
            },
            true,
            &["1 vulnerabilities found.".to_string()],
            &neutral_anomaly(),
        );
        assert!(rendered.contains("High"));
        assert!(rendered.contains("..."));
    }
}
