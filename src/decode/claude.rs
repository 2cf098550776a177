use anyhow::Result;
use serde::Deserialize;

use super::{decode_error, fallback_times, renumber, ListPage, RawTime};
use crate::model::{CandidateRef, Conversation, Message, Role, SourceKind};

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    conversations: Vec<ListItem>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    updated_at: Option<RawTime>,
}

#[derive(Debug, Deserialize)]
struct Detail {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    chat_messages: Vec<DetailMessage>,
    #[serde(default)]
    created_at: Option<RawTime>,
    #[serde(default)]
    updated_at: Option<RawTime>,
}

#[derive(Debug, Deserialize)]
struct DetailMessage {
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    created_at: Option<RawTime>,
}

// Ids sometimes arrive as the sidebar href ("/chat/<uuid>?query") instead of
// the bare uuid; downstream code must only ever see the bare form.
fn strip_routing_prefix(raw: &str) -> &str {
    let raw = raw.trim();
    let id = match raw.rsplit_once("/chat/") {
        Some((_, rest)) => rest,
        None => raw,
    };
    id.split(|c| c == '?' || c == '#').next().unwrap_or(id)
}

pub(super) fn decode_list(raw: &str) -> Result<ListPage> {
    let page: ListEnvelope = serde_json::from_str(raw)
        .map_err(|e| decode_error(format!("flat list payload: {e}"), raw))?;

    let mut candidates = Vec::new();
    for item in page.conversations {
        // Id-less stubs show up when the list is scraped from a rendering
        // surface; they carry nothing actionable.
        let Some(raw_id) = item.uuid.as_deref() else {
            continue;
        };
        let external_id = strip_routing_prefix(raw_id);
        if external_id.is_empty() {
            continue;
        }
        candidates.push(CandidateRef {
            source: SourceKind::Claude,
            external_id: external_id.to_string(),
            title: item.name,
            remote_updated_at_ms: item.updated_at.as_ref().and_then(RawTime::to_ms),
        });
    }

    Ok(ListPage {
        candidates,
        next_cursor: page.next_cursor,
    })
}

pub(super) fn decode_detail(raw: &str, candidate: &CandidateRef) -> Result<Conversation> {
    let detail: Detail = serde_json::from_str(raw)
        .map_err(|e| decode_error(format!("flat detail payload: {e}"), raw))?;

    let external_id = detail
        .uuid
        .as_deref()
        .map(strip_routing_prefix)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| candidate.external_id.clone());

    let mut messages = Vec::new();
    for entry in detail.chat_messages {
        let role = match entry.sender.as_deref() {
            Some("human") => Role::User,
            Some("assistant") => Role::Assistant,
            _ => continue,
        };
        let content = entry.text.unwrap_or_default();
        if content.trim().is_empty() {
            continue;
        }
        messages.push(Message {
            role,
            content,
            timestamp_ms: entry.created_at.as_ref().and_then(RawTime::to_ms),
            sequence_number: 0,
        });
    }
    renumber(&mut messages);

    let (created_at_ms, updated_at_ms) = fallback_times(
        &messages,
        detail.created_at.as_ref().and_then(RawTime::to_ms),
        detail
            .updated_at
            .as_ref()
            .and_then(RawTime::to_ms)
            .or(candidate.remote_updated_at_ms),
    );

    Ok(Conversation {
        source: SourceKind::Claude,
        external_id,
        title: detail
            .name
            .or_else(|| candidate.title.clone())
            .unwrap_or_default(),
        created_at_ms,
        updated_at_ms,
        messages,
    })
}
