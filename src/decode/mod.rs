mod chatgpt;
mod claude;
mod gemini;

use anyhow::Result;
use serde::Deserialize;

use crate::model::{CandidateRef, Conversation, Message, SourceKind};

const FRAGMENT_LIMIT: usize = 200;

// Raised when a payload cannot be mapped onto the canonical shape. Carries
// the offending fragment so a skipped item is diagnosable from logs alone.
#[derive(Debug)]
pub struct DecodeError {
    pub reason: String,
    pub fragment: String,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "decode failed: {}; fragment: {}", self.reason, self.fragment)
    }
}

impl std::error::Error for DecodeError {}

pub(crate) fn decode_error(reason: impl Into<String>, fragment: &str) -> anyhow::Error {
    let fragment = if fragment.len() > FRAGMENT_LIMIT {
        let mut end = FRAGMENT_LIMIT;
        while !fragment.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &fragment[..end])
    } else {
        fragment.to_string()
    };
    DecodeError {
        reason: reason.into(),
        fragment,
    }
    .into()
}

#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub candidates: Vec<CandidateRef>,
    pub next_cursor: Option<String>,
}

pub fn decode_list(source: SourceKind, raw: &str) -> Result<ListPage> {
    match source {
        SourceKind::Claude => claude::decode_list(raw),
        SourceKind::ChatGpt => chatgpt::decode_list(raw),
        SourceKind::Gemini => gemini::decode_list(raw),
    }
}

pub fn decode_detail(source: SourceKind, raw: &str, candidate: &CandidateRef) -> Result<Conversation> {
    match source {
        SourceKind::Claude => claude::decode_detail(raw, candidate),
        SourceKind::ChatGpt => chatgpt::decode_detail(raw, candidate),
        SourceKind::Gemini => gemini::decode_detail(raw, candidate),
    }
}

// Sources disagree on timestamp encodings (RFC 3339 strings, fractional unix
// seconds, [seconds, micros] pairs). Everything normalizes to UTC epoch
// milliseconds here and nowhere else.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawTime {
    Seconds(f64),
    Text(String),
}

impl RawTime {
    pub(crate) fn to_ms(&self) -> Option<i64> {
        match self {
            RawTime::Seconds(seconds) => Some(ms_from_epoch_seconds(*seconds)),
            RawTime::Text(text) => ms_from_rfc3339(text),
        }
    }
}

pub(crate) fn ms_from_rfc3339(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.timestamp_millis())
}

pub(crate) fn ms_from_epoch_seconds(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

pub(crate) fn ms_from_secs_micros(secs: i64, micros: i64) -> i64 {
    secs.saturating_mul(1000).saturating_add(micros / 1000)
}

// Assigns strictly increasing, gap-free sequence numbers after filtering has
// dropped system-authored and empty entries.
pub(crate) fn renumber(messages: &mut [Message]) {
    for (index, message) in messages.iter_mut().enumerate() {
        message.sequence_number = index as i64;
    }
}

pub(crate) fn fallback_times(
    messages: &[Message],
    created: Option<i64>,
    updated: Option<i64>,
) -> (i64, i64) {
    let first = messages.iter().find_map(|m| m.timestamp_ms);
    let last = messages.iter().rev().find_map(|m| m.timestamp_ms);
    let created = created.or(first).or(updated).unwrap_or(0);
    let updated = updated.or(last).unwrap_or(created).max(created);
    (created, updated)
}
