//! Byte and structural inspectors. Each is independently callable and
//! returns findings rather than errors; only the content hash surfaces I/O
//! failures to the caller.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::finding::{Category, Finding};
use crate::pickle;
use crate::scanner::ScanError;

/// Opcodes that import or invoke host code. Matched exactly; BINSTRING and
/// SHORT_BINSTRING share a suffix with INST and must not trip this.
const DANGEROUS_MNEMONICS: [&str; 5] = ["GLOBAL", "STACK_GLOBAL", "REDUCE", "BUILD", "INST"];

/// Byte sequences worth flagging anywhere in the artifact head.
const SUSPICIOUS_PATTERNS: [&[u8]; 2] = [b"_import_", b"eval("];

/// Window inspected by the byte pattern scan and the entropy feature.
pub const HEAD_WINDOW: usize = 1024;

/// Disassemble a pickle-family artifact and flag dangerous opcodes.
///
/// Any failure to read or disassemble the stream collapses into a single
/// "analysis failed" finding; this inspector never errors.
pub fn opcode_analysis(path: &Path) -> Vec<Finding> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) => return vec![analysis_failed(err.to_string())],
    };
    let ops = match pickle::disassemble(&data) {
        Ok(ops) => ops,
        Err(err) => return vec![analysis_failed(err.to_string())],
    };

    let mut findings = Vec::new();
    for op in &ops {
        if DANGEROUS_MNEMONICS.contains(&op.mnemonic) {
            warn!(opcode = op.mnemonic, offset = op.offset, "dangerous pickle opcode");
            findings.push(
                Finding::new(Category::DangerousOpcode, None, op.to_string())
                    .with_details(format!("offset {}", op.offset)),
            );
        }
    }
    findings
}

fn analysis_failed(cause: String) -> Finding {
    Finding::new(Category::OpcodeAnalysisFailed, None, cause)
}

/// Scan the first [`HEAD_WINDOW`] bytes for literal suspicious patterns.
/// At most one finding is emitted no matter how many patterns match.
pub fn byte_pattern_scan(data: &[u8]) -> Vec<Finding> {
    let head = &data[..data.len().min(HEAD_WINDOW)];
    let hit = SUSPICIOUS_PATTERNS
        .iter()
        .any(|pattern| contains(head, pattern));
    if hit {
        warn!("suspicious byte pattern in artifact head");
        vec![Finding::new(
            Category::SuspiciousBytePattern,
            None,
            "Detected dangerous patterns in file",
        )]
    } else {
        Vec::new()
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Flag artifacts larger than `threshold_mb` megabytes.
pub fn dos_risk(size_bytes: u64, threshold_mb: u64) -> Vec<Finding> {
    if size_bytes > threshold_mb * 1024 * 1024 {
        vec![Finding::new(
            Category::OversizedArtifact,
            None,
            "Possible DoS risk from large file size",
        )
        .with_details(format!("{size_bytes} bytes, threshold {threshold_mb} MB"))]
    } else {
        Vec::new()
    }
}

/// Unix permission bits of the artifact, masked to the classic rwx triple.
#[cfg(unix)]
pub fn permission_bits(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .ok()
        .map(|meta| meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
pub fn permission_bits(_path: &Path) -> Option<u32> {
    None
}

/// World-readable-and-then-some modes the scanner flags.
pub fn is_permissive(mode: u32) -> bool {
    matches!(mode, 0o777 | 0o666 | 0o755)
}

/// SHA-256 of the file contents, streamed in 4096-byte chunks, hex-encoded.
pub fn file_hash(path: &Path) -> Result<String, ScanError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = file.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok(hex)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{
        byte_pattern_scan, dos_risk, file_hash, is_permissive, opcode_analysis,
    };
    use crate::finding::Severity;

    fn temp_path(name: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("modelshield-{stamp}-{name}"))
    }

    #[test]
    fn flags_global_and_reduce_opcodes() {
        let path = temp_path("global.pkl");
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(b"cos\nsystem\n(S'ls'\ntR."))
            .expect("write fixture");

        let findings = opcode_analysis(&path);
        std::fs::remove_file(&path).ok();

        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.severity == Severity::High));
        assert!(findings.iter().all(|f| f.cwe_id.as_deref() == Some("CWE-502")));
        assert!(findings[0].snippet.contains("GLOBAL"));
        assert!(findings[1].snippet.contains("REDUCE"));
    }

    #[test]
    fn benign_pickle_yields_no_opcode_findings() {
        let path = temp_path("benign.pkl");
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(b"\x80\x02U\x02hiq\x00."))
            .expect("write fixture");

        let findings = opcode_analysis(&path);
        std::fs::remove_file(&path).ok();
        assert!(findings.is_empty());
    }

    #[test]
    fn binary_string_opcodes_are_not_dangerous() {
        // BINSTRING and SHORT_BINSTRING end in the letters of INST.
        let mut data = vec![0x80, 0x02, b'T'];
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(b"hi");
        data.extend_from_slice(&[b'q', 0x00, b'0', b'U', 0x02]);
        data.extend_from_slice(b"ok");
        data.extend_from_slice(&[b'q', 0x01, b'.']);

        let path = temp_path("strings.pkl");
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(&data))
            .expect("write fixture");

        let findings = opcode_analysis(&path);
        std::fs::remove_file(&path).ok();
        assert!(findings.is_empty());
    }

    #[test]
    fn stack_global_is_flagged() {
        let mut data = vec![0x80, 0x04, 0x8c, 0x02];
        data.extend_from_slice(b"os");
        data.extend_from_slice(&[0x94, 0x8c, 0x06]);
        data.extend_from_slice(b"system");
        data.extend_from_slice(&[0x94, 0x93, b'.']);

        let path = temp_path("stackglobal.pkl");
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(&data))
            .expect("write fixture");

        let findings = opcode_analysis(&path);
        std::fs::remove_file(&path).ok();

        assert_eq!(findings.len(), 1);
        assert!(findings[0].snippet.contains("STACK_GLOBAL"));
        assert_eq!(findings[0].cwe_id.as_deref(), Some("CWE-502"));
    }

    #[test]
    fn broken_stream_yields_single_analysis_failed_finding() {
        let path = temp_path("broken.pkl");
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(b"\xff\xfe garbage"))
            .expect("write fixture");

        let findings = opcode_analysis(&path);
        std::fs::remove_file(&path).ok();

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].cwe_id.as_deref(), Some("CWE-20"));
    }

    #[test]
    fn missing_file_yields_analysis_failed_finding() {
        let findings = opcode_analysis(&temp_path("never-created.pkl"));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn byte_patterns_only_match_in_head_window() {
        assert_eq!(byte_pattern_scan(b"x = eval(payload)").len(), 1);
        assert_eq!(byte_pattern_scan(b"__import__ is spelled _import_").len(), 1);
        assert!(byte_pattern_scan(b"clean bytes").is_empty());

        let mut late = vec![b'a'; 2048];
        late.extend_from_slice(b"eval(");
        assert!(byte_pattern_scan(&late).is_empty());
    }

    #[test]
    fn two_patterns_still_give_one_finding() {
        let findings = byte_pattern_scan(b"eval(_import_)");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].cwe_id.as_deref(), Some("CWE-95"));
    }

    #[test]
    fn dos_risk_respects_threshold() {
        assert!(dos_risk(100 * 1024 * 1024, 100).is_empty());
        let findings = dos_risk(100 * 1024 * 1024 + 1, 100);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Low);
        assert_eq!(findings[0].cwe_id.as_deref(), Some("CWE-400"));
    }

    #[test]
    fn permissive_modes_are_the_classic_three() {
        assert!(is_permissive(0o777));
        assert!(is_permissive(0o666));
        assert!(is_permissive(0o755));
        assert!(!is_permissive(0o644));
        assert!(!is_permissive(0o600));
    }

    #[test]
    fn file_hash_matches_known_sha256() {
        let path = temp_path("hash.bin");
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(b"abc"))
            .expect("write fixture");

        let hex = file_hash(&path).expect("hash");
        std::fs::remove_file(&path).ok();
        assert_eq!(
            hex,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_hash_propagates_io_errors() {
        assert!(file_hash(&temp_path("absent.bin")).is_err());
    }
}
