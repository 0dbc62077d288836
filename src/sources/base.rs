use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::constants::SYNTHESIZED_TITLE_CHARS;
use crate::normalize::classifier::LayerClassifier;
use crate::normalize::dates::DateNormalizer;
use crate::types::{
    CanonicalEvent, EventBuilder, EventValidationError, ImportError, SourceFile, SourceKind,
};

/// Everything an adapter produced for its share of the input files.
#[derive(Debug, Default)]
pub struct AdapterOutput {
    pub events: Vec<CanonicalEvent>,
    pub errors: Vec<ImportError>,
    /// Files the adapter read and interpreted.
    pub processed_files: usize,
    /// Files or records silently ignored (unsupported type, no usable date).
    pub ignored: usize,
}

impl AdapterOutput {
    pub fn merge(&mut self, other: AdapterOutput) {
        self.events.extend(other.events);
        self.errors.extend(other.errors);
        self.processed_files += other.processed_files;
        self.ignored += other.ignored;
    }

    pub fn error(&mut self, file: &SourceFile, message: impl Into<String>) {
        self.errors.push(ImportError::new(file.path.clone(), message));
    }

    pub fn error_with_raw(
        &mut self,
        file: &SourceFile,
        message: impl Into<String>,
        raw: impl Into<String>,
    ) {
        self.errors
            .push(ImportError::new(file.path.clone(), message).with_raw(raw));
    }

    /// Run the validation gate on a candidate. Records without a title are
    /// dropped without an error; any other rejection becomes one error.
    pub fn push_candidate(
        &mut self,
        file: &SourceFile,
        candidate: EventBuilder,
        raw: impl FnOnce() -> String,
    ) {
        match candidate.build() {
            Ok(event) => self.events.push(event),
            Err(EventValidationError::EmptyTitle) => {
                debug!("{}: dropped record without a title", file.path);
            }
            Err(e) => self.error_with_raw(file, e.to_string(), raw()),
        }
    }
}

/// Runtime knobs every adapter shares.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterSettings {
    pub dates: DateNormalizer,
    pub classifier: LayerClassifier,
}

/// One importer per source kind. Adapters are synchronous: the orchestrator
/// owns I/O and hands them fully loaded files.
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceKind;

    /// Human readable name for logs and summaries.
    fn name(&self) -> &'static str;

    /// Whether an archive member at `path` is worth extracting for this source.
    fn accepts(&self, path: &str) -> bool;

    /// Convert a batch of files into events. Never fails as a whole: problems
    /// are reported through [`AdapterOutput::errors`].
    fn import(&self, files: &[SourceFile]) -> AdapterOutput;
}

/// Per-run cap on how many records of one category get processed.
#[derive(Debug)]
pub struct RecordBudget {
    label: &'static str,
    limit: usize,
    used: usize,
    dropped: usize,
}

impl RecordBudget {
    pub fn new(label: &'static str, limit: usize) -> Self {
        Self {
            label,
            limit,
            used: 0,
            dropped: 0,
        }
    }

    /// Reserve one record. Returns false once the cap is reached.
    pub fn take(&mut self) -> bool {
        if self.used < self.limit {
            self.used += 1;
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    /// A truncation warning if anything was dropped.
    pub fn warning(&self) -> Option<ImportError> {
        (self.dropped > 0).then(|| {
            ImportError::general(format!(
                "{} truncated: processed {} of {} records (limit {})",
                self.label,
                self.used,
                self.used + self.dropped,
                self.limit
            ))
        })
    }
}

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

pub struct AdapterUtils;

impl AdapterUtils {
    /// Cut to `max` characters, appending an ellipsis when shortened.
    pub fn truncate_chars(text: &str, max: usize) -> String {
        if text.chars().count() <= max {
            return text.to_string();
        }
        let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }

    /// First line of free text, collapsed and shortened for use as a title.
    pub fn title_from_text(text: &str) -> Option<String> {
        let first = text.lines().map(str::trim).find(|l| !l.is_empty())?;
        let collapsed = WHITESPACE.replace_all(first, " ");
        Some(Self::truncate_chars(&collapsed, SYNTHESIZED_TITLE_CHARS))
    }

    /// Join the present parts with `separator`; `None` when all are empty.
    pub fn join_present(parts: &[Option<&str>], separator: &str) -> Option<String> {
        let present: Vec<&str> = parts
            .iter()
            .flatten()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        (!present.is_empty()).then(|| present.join(separator))
    }

    /// Deterministic natural key: `<source>:<kind>:<hash of parts>`.
    pub fn stable_id(source: SourceKind, kind: &str, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        let digest = hasher.finalize();
        format!("{}:{}:{}", source, kind, hex::encode(&digest[..12]))
    }

    /// Undo the double encoding in Facebook exports, where UTF-8 bytes were
    /// written as `\u00XX` escapes ("CafÃ©" -> "Café").
    pub fn fix_mojibake(text: &str) -> String {
        if text.is_ascii() || text.chars().any(|c| c as u32 > 0xFF) {
            return text.to_string();
        }
        let bytes: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
        match String::from_utf8(bytes) {
            Ok(fixed) => fixed,
            Err(_) => text.to_string(),
        }
    }

    pub fn json_str(value: &Value, key: &str) -> Option<String> {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::fix_mojibake)
    }

    /// Integer field that may also arrive as a numeric string.
    pub fn json_i64(value: &Value, key: &str) -> Option<i64> {
        match value.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn json_f64(value: &Value, key: &str) -> Option<f64> {
        match value.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Compact JSON for error reports.
    pub fn raw_json(value: &Value) -> String {
        serde_json::to_string(value).unwrap_or_default()
    }

    pub fn parse_json(file: &SourceFile) -> Result<Value, String> {
        let text = file.text();
        serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {e}"))
    }
}
