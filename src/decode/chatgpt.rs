use std::collections::BTreeMap;

use anyhow::Result;
use serde::Deserialize;

use super::{decode_error, fallback_times, renumber, ListPage, RawTime};
use crate::model::{CandidateRef, Conversation, Message, Role, SourceKind};

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    items: Vec<ListItem>,
    #[serde(default)]
    offset: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    update_time: Option<RawTime>,
}

#[derive(Debug, Deserialize)]
struct Detail {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    create_time: Option<RawTime>,
    #[serde(default)]
    update_time: Option<RawTime>,
    #[serde(default)]
    mapping: BTreeMap<String, Node>,
    #[serde(default)]
    current_node: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Node {
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    message: Option<NodeMessage>,
}

#[derive(Debug, Deserialize)]
struct NodeMessage {
    #[serde(default)]
    author: Option<Author>,
    #[serde(default)]
    content: Option<NodeContent>,
    #[serde(default)]
    create_time: Option<RawTime>,
}

#[derive(Debug, Deserialize)]
struct Author {
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NodeContent {
    #[serde(default)]
    parts: Vec<serde_json::Value>,
    #[serde(default)]
    text: Option<String>,
}

impl NodeContent {
    // Parts mix plain strings with structured attachments; only the text
    // parts belong in the archive.
    fn joined_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Some(text) = part.as_str() {
                if text.is_empty() {
                    continue;
                }
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        if out.is_empty() {
            if let Some(text) = self.text.as_deref() {
                out.push_str(text);
            }
        }
        out
    }
}

pub(super) fn decode_list(raw: &str) -> Result<ListPage> {
    let page: ListEnvelope = serde_json::from_str(raw)
        .map_err(|e| decode_error(format!("tree list payload: {e}"), raw))?;

    let mut candidates = Vec::new();
    for item in &page.items {
        let Some(id) = item.id.as_deref() else {
            continue;
        };
        if id.is_empty() {
            continue;
        }
        candidates.push(CandidateRef {
            source: SourceKind::ChatGpt,
            external_id: id.to_string(),
            title: item.title.clone(),
            remote_updated_at_ms: item.update_time.as_ref().and_then(RawTime::to_ms),
        });
    }

    // This source pages by offset rather than by server-issued token; the
    // derived offset is folded into an opaque cursor here so nothing past
    // the decoder ever inspects it.
    let offset = page.offset.unwrap_or(0);
    let count = page.items.len() as u64;
    let next_cursor = match page.total {
        _ if count == 0 => None,
        Some(total) if offset + count < total => Some((offset + count).to_string()),
        Some(_) => None,
        None => match page.limit {
            Some(limit) if count == limit => Some((offset + count).to_string()),
            _ => None,
        },
    };

    Ok(ListPage {
        candidates,
        next_cursor,
    })
}

pub(super) fn decode_detail(raw: &str, candidate: &CandidateRef) -> Result<Conversation> {
    let detail: Detail = serde_json::from_str(raw)
        .map_err(|e| decode_error(format!("tree detail payload: {e}"), raw))?;

    let Some(current) = detail.current_node.as_deref() else {
        return Err(decode_error("tree detail payload has no current leaf", raw));
    };

    // Linear history is the current-leaf-to-root path, reversed; siblings
    // off that path are abandoned edits and never stored.
    let mut path: Vec<&Node> = Vec::new();
    let mut cursor = Some(current.to_string());
    while let Some(node_id) = cursor {
        if path.len() > detail.mapping.len() {
            return Err(decode_error("message graph contains a cycle", raw));
        }
        let Some(node) = detail.mapping.get(&node_id) else {
            return Err(decode_error(
                format!("message graph references unknown node {node_id}"),
                raw,
            ));
        };
        path.push(node);
        cursor = node.parent.clone();
    }
    path.reverse();

    let mut messages = Vec::new();
    for node in path {
        let Some(node_message) = node.message.as_ref() else {
            continue;
        };
        let role = match node_message
            .author
            .as_ref()
            .and_then(|a| a.role.as_deref())
        {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            // system / tool entries never reach the archive
            _ => continue,
        };
        let content = node_message
            .content
            .as_ref()
            .map(NodeContent::joined_text)
            .unwrap_or_default();
        if content.trim().is_empty() {
            continue;
        }
        messages.push(Message {
            role,
            content,
            timestamp_ms: node_message.create_time.as_ref().and_then(RawTime::to_ms),
            sequence_number: 0,
        });
    }
    renumber(&mut messages);

    let (created_at_ms, updated_at_ms) = fallback_times(
        &messages,
        detail.create_time.as_ref().and_then(RawTime::to_ms),
        detail
            .update_time
            .as_ref()
            .and_then(RawTime::to_ms)
            .or(candidate.remote_updated_at_ms),
    );

    Ok(Conversation {
        source: SourceKind::ChatGpt,
        external_id: detail
            .conversation_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| candidate.external_id.clone()),
        title: detail
            .title
            .or_else(|| candidate.title.clone())
            .unwrap_or_default(),
        created_at_ms,
        updated_at_ms,
        messages,
    })
}
