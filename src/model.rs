use serde::{Deserialize, Serialize};

pub const DEFAULT_QUICK_SYNC_WINDOW: i64 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Claude,
    ChatGpt,
    Gemini,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Claude => "claude",
            SourceKind::ChatGpt => "chatgpt",
            SourceKind::Gemini => "gemini",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "claude" => Some(SourceKind::Claude),
            "chatgpt" => Some(SourceKind::ChatGpt),
            "gemini" => Some(SourceKind::Gemini),
            _ => None,
        }
    }

    pub fn all() -> [SourceKind; 3] {
        [SourceKind::Claude, SourceKind::ChatGpt, SourceKind::Gemini]
    }

    // Whether this source's list endpoint returns items most-recent-first.
    // The quick-sync boundary cut and the first-item sync-state update are
    // only valid under this ordering, so it is declared per source instead
    // of assumed globally.
    pub fn list_newest_first(self) -> bool {
        match self {
            SourceKind::Claude | SourceKind::ChatGpt | SourceKind::Gemini => true,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp_ms: Option<i64>,
    pub sequence_number: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub source: SourceKind,
    pub external_id: String,
    pub title: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub messages: Vec<Message>,
}

// Minimal identity + remote timestamp pulled out of a list page; enough to
// decide staleness without fetching full detail.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateRef {
    pub source: SourceKind,
    pub external_id: String,
    pub title: Option<String>,
    pub remote_updated_at_ms: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyncState {
    pub last_full_sync_at_ms: Option<i64>,
    pub last_quick_sync_at_ms: Option<i64>,
    pub last_known_external_id: Option<String>,
    pub quick_sync_window: i64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            last_full_sync_at_ms: None,
            last_quick_sync_at_ms: None,
            last_known_external_id: None,
            quick_sync_window: DEFAULT_QUICK_SYNC_WINDOW,
        }
    }
}

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}
