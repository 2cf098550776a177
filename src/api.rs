use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Conversation, SourceKind};
use crate::resolve;
use crate::store::{self, SearchQuery, SearchResults, Stats, UpsertOutcome};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
}

// Ingests canonical records handed over by an external collaborator (e.g. a
// capture extension). Records already current locally are counted as
// skipped and left untouched, so importing stale data can never regress a
// fresher local copy.
pub fn import(conn: &Connection, conversations: Vec<Conversation>) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    for conversation in conversations {
        let stored = store::known_updated_at(
            conn,
            conversation.source,
            std::slice::from_ref(&conversation.external_id),
        )?;
        let stored = stored.get(&conversation.external_id).copied();
        if !resolve::needs_sync(Some(conversation.updated_at_ms), stored) {
            summary.skipped += 1;
            continue;
        }
        match store::upsert_conversation(conn, &conversation)? {
            UpsertOutcome::Inserted => summary.inserted += 1,
            UpsertOutcome::Updated => summary.updated += 1,
        }
    }
    debug!(
        inserted = summary.inserted,
        updated = summary.updated,
        skipped = summary.skipped,
        "import finished"
    );
    Ok(summary)
}

#[derive(Clone, Debug, Deserialize)]
pub struct CheckItem {
    pub source: SourceKind,
    pub external_id: String,
    pub updated_at_ms: Option<i64>,
}

// Returns the external ids that are missing or out of date locally.
pub fn check(conn: &Connection, items: &[CheckItem]) -> Result<Vec<String>> {
    let mut needs_sync = Vec::new();
    for item in items {
        if store::check(conn, item.source, &item.external_id, item.updated_at_ms)? {
            needs_sync.push(item.external_id.clone());
        }
    }
    Ok(needs_sync)
}

pub fn search(conn: &Connection, query: &SearchQuery) -> Result<SearchResults> {
    store::search(conn, query)
}

pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<Conversation>> {
    store::recent(conn, limit)
}

pub fn stats(conn: &Connection) -> Result<Stats> {
    store::stats(conn)
}
