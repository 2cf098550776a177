use anyhow::Result;
use serde_json::Value;

use super::{decode_error, fallback_times, ms_from_secs_micros, renumber, ListPage};
use crate::model::{CandidateRef, Conversation, Message, Role, SourceKind};

const ANTI_XSSI_GUARD: &str = ")]}'";

// Conversation ids on the wire carry a "c_" routing prefix that is not part
// of the identity.
fn strip_routing_prefix(raw: &str) -> &str {
    raw.strip_prefix("c_").unwrap_or(raw)
}

// One logical JSON document arrives split across length-prefixed segments
// behind an anti-XSSI guard line. Segment boundaries are arbitrary, so the
// whole body must be reassembled before any structural parsing.
fn reassemble_segments(raw: &str) -> Result<String> {
    let mut remaining = raw;
    if let Some(stripped) = remaining.strip_prefix(ANTI_XSSI_GUARD) {
        remaining = stripped;
    }
    remaining = remaining.trim_start_matches(['\r', '\n']);

    let mut body = String::new();
    while !remaining.is_empty() {
        let Some((length_line, after)) = remaining.split_once('\n') else {
            return Err(decode_error("envelope segment has no length line", remaining));
        };
        let declared: usize = length_line.trim().parse().map_err(|_| {
            decode_error(
                format!("envelope segment length is not a number: {length_line:?}"),
                raw,
            )
        })?;
        if declared > after.len() || !after.is_char_boundary(declared) {
            return Err(decode_error(
                "envelope segment shorter than its declared length",
                raw,
            ));
        }
        let (segment, tail) = after.split_at(declared);
        body.push_str(segment);
        remaining = tail.trim_start_matches(['\r', '\n']);
    }
    Ok(body)
}

// An explicitly null inner document means "no data"; it ends pagination and
// is not a decode failure.
fn parse_envelope(raw: &str) -> Result<Option<Value>> {
    let body = reassemble_segments(raw)?;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| decode_error(format!("envelope body is not JSON: {e}"), trimmed))?;
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(value))
}

fn positional_time(value: Option<&Value>) -> Option<i64> {
    let pair = value?.as_array()?;
    let secs = pair.first()?.as_i64()?;
    let micros = pair.get(1).and_then(Value::as_i64).unwrap_or(0);
    Some(ms_from_secs_micros(secs, micros))
}

pub(super) fn decode_list(raw: &str) -> Result<ListPage> {
    let Some(value) = parse_envelope(raw)? else {
        return Ok(ListPage::default());
    };

    let items = value
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| decode_error("feed payload has no item array", raw))?;
    let next_cursor = value
        .get(1)
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    let mut candidates = Vec::new();
    for item in items {
        let Some(fields) = item.as_array() else {
            continue;
        };
        let Some(raw_id) = fields.first().and_then(Value::as_str) else {
            continue;
        };
        let external_id = strip_routing_prefix(raw_id);
        if external_id.is_empty() {
            continue;
        }
        candidates.push(CandidateRef {
            source: SourceKind::Gemini,
            external_id: external_id.to_string(),
            title: fields.get(1).and_then(Value::as_str).map(str::to_string),
            remote_updated_at_ms: positional_time(fields.get(2)),
        });
    }

    Ok(ListPage {
        candidates,
        next_cursor,
    })
}

pub(super) fn decode_detail(raw: &str, candidate: &CandidateRef) -> Result<Conversation> {
    let Some(value) = parse_envelope(raw)? else {
        return Err(decode_error("feed detail payload is null", raw));
    };
    let fields = value
        .as_array()
        .ok_or_else(|| decode_error("feed detail payload is not positional", raw))?;

    let external_id = fields
        .first()
        .and_then(Value::as_str)
        .map(strip_routing_prefix)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| candidate.external_id.clone());

    let mut messages = Vec::new();
    if let Some(entries) = fields.get(4).and_then(Value::as_array) {
        for entry in entries {
            let Some(parts) = entry.as_array() else {
                continue;
            };
            let role = match parts.first().and_then(Value::as_i64) {
                Some(0) => Role::User,
                Some(1) => Role::Assistant,
                // 2 marks system-authored entries; anything else is unknown
                _ => continue,
            };
            let content = parts
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if content.trim().is_empty() {
                continue;
            }
            messages.push(Message {
                role,
                content,
                timestamp_ms: positional_time(parts.get(2)),
                sequence_number: 0,
            });
        }
    }
    renumber(&mut messages);

    let (created_at_ms, updated_at_ms) = fallback_times(
        &messages,
        positional_time(fields.get(2)),
        positional_time(fields.get(3)).or(candidate.remote_updated_at_ms),
    );

    Ok(Conversation {
        source: SourceKind::Gemini,
        external_id,
        title: fields
            .get(1)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| candidate.title.clone())
            .unwrap_or_default(),
        created_at_ms,
        updated_at_ms,
        messages,
    })
}
