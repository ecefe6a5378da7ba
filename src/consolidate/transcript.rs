//! Transcript normalization.
//!
//! Session files are JSONL. Two message shapes exist in the wild: the old
//! `{role, content}` and the new `{message: {role, content}}`; content may
//! be a string or a list of text blocks. Everything downstream sees only
//! the normalized [`TranscriptMessage`]. Malformed lines are skipped, not
//! fatal — a partial transcript still consolidates.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::{EngramError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMessage {
    pub role: String,
    pub text: String,
}

/// Read and normalize a JSONL transcript file.
pub fn read_transcript(path: impl AsRef<Path>) -> Result<Vec<TranscriptMessage>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngramError::NotFound(format!("transcript {}", path.display()))
        } else {
            e.into()
        }
    })?;
    Ok(parse_lines(&raw))
}

/// Parse JSONL text into normalized messages, skipping malformed lines.
pub fn parse_lines(raw: &str) -> Vec<TranscriptMessage> {
    let mut messages = Vec::new();
    let mut skipped = 0usize;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => {
                if let Some(msg) = normalize(&value) {
                    messages.push(msg);
                }
            }
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, "skipped malformed transcript lines");
    }
    messages
}

/// Normalize one raw message. Returns `None` for roles other than
/// user/assistant or empty content.
fn normalize(value: &Value) -> Option<TranscriptMessage> {
    // New shape nests role/content under "message".
    let inner = match value.get("message") {
        Some(inner @ Value::Object(_)) => inner,
        _ => value,
    };

    let role = inner.get("role")?.as_str()?.to_string();
    if role != "user" && role != "assistant" {
        return None;
    }

    let text = content_text(inner.get("content")?);
    if text.trim().is_empty() {
        return None;
    }
    Some(TranscriptMessage { role, text })
}

/// Content is either a plain string or a list of blocks with `text` fields.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Join messages into the `role: text` form the pattern extractor scans.
pub fn conversation_text(messages: &[TranscriptMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
