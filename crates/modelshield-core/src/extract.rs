//! Format-specific extraction: turn an artifact's bytes into exactly one
//! line- or entry-addressable representation. Extraction never fails; every
//! decode problem collapses into a single synthetic line so the classifier
//! always has input.

use std::io::{Cursor, Read};
use std::path::Path;

use tracing::debug;
use zip::ZipArchive;

use crate::pickle::{self, Value};

/// Artifact family, decided by file extension alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `.pkl`, `.pickle`, `.joblib`
    PickleFamily,
    /// `.pt` script/trace containers
    TorchScript,
    /// everything else, read as text
    Text,
}

impl ArtifactKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "pkl" | "pickle" | "joblib" => ArtifactKind::PickleFamily,
            "pt" => ArtifactKind::TorchScript,
            _ => ArtifactKind::Text,
        }
    }

    pub fn is_pickle_family(self) -> bool {
        matches!(self, ArtifactKind::PickleFamily)
    }
}

/// The extracted content of one artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    Lines(Vec<String>),
    Entries(Vec<(String, String)>),
}

impl Representation {
    /// Items in scan order, rendered to the strings the classifier matches.
    /// Indices reported against them are 1-based.
    pub fn items(&self) -> Vec<String> {
        match self {
            Representation::Lines(lines) => lines.clone(),
            Representation::Entries(entries) => entries
                .iter()
                .map(|(key, value)| format!("{key}: {value}"))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Representation::Lines(lines) => lines.len(),
            Representation::Entries(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extract the representation for `data`. Infallible by design: parse
/// failures produce a one-line representation carrying the failure cause.
pub fn extract(kind: ArtifactKind, data: &[u8]) -> Representation {
    match kind {
        ArtifactKind::PickleFamily => extract_pickle(data),
        ArtifactKind::TorchScript => extract_torchscript(data),
        ArtifactKind::Text => Representation::Lines(decode_text_lines(data)),
    }
}

fn extract_pickle(data: &[u8]) -> Representation {
    match pickle::decode(data) {
        Ok(Value::Dict(entries)) => Representation::Entries(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        ),
        Ok(other) => Representation::Lines(
            other
                .to_string()
                .lines()
                .map(str::to_string)
                .collect(),
        ),
        Err(err) => {
            debug!(error = %err, "pickle decode failed, using synthetic line");
            Representation::Lines(vec![format!("<Could not parse pickle file: {err}>")])
        }
    }
}

fn extract_torchscript(data: &[u8]) -> Representation {
    match torchscript_code_listing(data) {
        Ok(lines) if !lines.is_empty() => return Representation::Lines(lines),
        Ok(_) => debug!("no code entries in container, trying data.pkl"),
        Err(err) => debug!(error = %err, "container listing failed, trying data.pkl"),
    }
    match torchscript_data_pickle(data) {
        Ok(value) => Representation::Lines(
            value.to_string().lines().map(str::to_string).collect(),
        ),
        Err(err) => {
            debug!(error = %err, "model decode failed, using synthetic line");
            Representation::Lines(vec![format!("<Could not parse model code: {err}>")])
        }
    }
}

/// Concatenated text of every `*.py` entry in the container, split to lines.
fn torchscript_code_listing(data: &[u8]) -> Result<Vec<String>, String> {
    let mut archive =
        ZipArchive::new(Cursor::new(data)).map_err(|err| err.to_string())?;
    let mut lines = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|err| err.to_string())?;
        if !entry.name().ends_with(".py") {
            continue;
        }
        let mut raw = Vec::new();
        entry
            .read_to_end(&mut raw)
            .map_err(|err| err.to_string())?;
        lines.extend(decode_text_lines(&raw));
    }
    Ok(lines)
}

/// Fallback: decode the container's `data.pkl`, or failing that treat the
/// whole file as a raw pickle stream.
fn torchscript_data_pickle(data: &[u8]) -> Result<Value, String> {
    if let Ok(mut archive) = ZipArchive::new(Cursor::new(data)) {
        let name = (0..archive.len())
            .filter_map(|index| {
                archive
                    .by_index(index)
                    .ok()
                    .map(|entry| entry.name().to_string())
            })
            .find(|name| name == "data.pkl" || name.ends_with("/data.pkl"));
        if let Some(name) = name {
            let mut raw = Vec::new();
            archive
                .by_name(&name)
                .map_err(|err| err.to_string())?
                .read_to_end(&mut raw)
                .map_err(|err| err.to_string())?;
            return pickle::decode(&raw).map_err(|err| err.to_string());
        }
        return Err("no data.pkl entry in container".to_string());
    }
    pickle::decode(data).map_err(|err| err.to_string())
}

/// Decode bytes as UTF-8, dropping undecodable byte runs, then split into
/// lines.
fn decode_text_lines(data: &[u8]) -> Vec<String> {
    let mut text = String::with_capacity(data.len());
    let mut rest = data;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                break;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                // from_utf8 guarantees the prefix is valid.
                if let Ok(valid) = std::str::from_utf8(valid) {
                    text.push_str(valid);
                }
                let skip = err.error_len().unwrap_or(after.len());
                if skip >= after.len() {
                    break;
                }
                rest = &after[skip..];
            }
        }
    }
    text.lines().map(str::to_string).collect()
}
