use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};

use crate::model::{Conversation, Message, Role, SourceKind, SyncState, DEFAULT_QUICK_SYNC_WINDOW};
use crate::resolve;

const BUSY_TIMEOUT_MS: u64 = 5_000;
const CONFLICT_RETRY_DELAY_MS: u64 = 50;

fn db_path(app_dir: &Path) -> PathBuf {
    app_dir.join("chatstash.sqlite3")
}

pub fn open(app_dir: &Path) -> Result<Connection> {
    fs::create_dir_all(app_dir)?;
    let conn = Connection::open(db_path(app_dir))?;
    conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    migrate(&conn)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if user_version < 1 {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS conversations (
  id INTEGER PRIMARY KEY,
  source TEXT NOT NULL,
  external_id TEXT NOT NULL,
  title TEXT NOT NULL DEFAULT '',
  created_at INTEGER,
  updated_at INTEGER,
  message_count INTEGER NOT NULL DEFAULT 0,
  UNIQUE(source, external_id)
);

CREATE TABLE IF NOT EXISTS messages (
  conversation_id INTEGER NOT NULL,
  sequence_number INTEGER NOT NULL,
  role TEXT NOT NULL,
  content TEXT NOT NULL,
  timestamp INTEGER,
  PRIMARY KEY(conversation_id, sequence_number),
  FOREIGN KEY(conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_conversations_updated_at ON conversations(updated_at);

CREATE TABLE IF NOT EXISTS sync_state (
  source TEXT PRIMARY KEY,
  last_full_sync_at INTEGER,
  last_quick_sync_at INTEGER,
  last_known_external_id TEXT,
  quick_sync_window INTEGER NOT NULL DEFAULT 50
);

CREATE TABLE IF NOT EXISTS source_status (
  source TEXT PRIMARY KEY,
  last_success_at INTEGER,
  last_attempt_at INTEGER,
  consecutive_failures INTEGER NOT NULL DEFAULT 0,
  last_error TEXT
);

CREATE VIRTUAL TABLE IF NOT EXISTS conversations_fts USING fts5(title, body);

PRAGMA user_version = 1;
"#,
        )?;
    }

    if user_version < 2 {
        // v2: rows written before the decoders stripped routing decoration
        // may carry a "c_" id prefix, sometimes alongside a bare-id copy of
        // the same conversation.
        normalize_legacy_external_ids(conn)?;
        conn.execute_batch("PRAGMA user_version = 2;")?;
    }

    Ok(())
}

fn normalize_legacy_external_ids(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare(
        r#"SELECT id, external_id FROM conversations
           WHERE source = 'gemini' AND external_id LIKE 'c\_%' ESCAPE '\'"#,
    )?;
    let mut rows = stmt.query([])?;
    let mut prefixed: Vec<(i64, String)> = Vec::new();
    while let Some(row) = rows.next()? {
        prefixed.push((row.get(0)?, row.get(1)?));
    }
    drop(rows);
    drop(stmt);

    for (row_id, external_id) in prefixed {
        let normalized = match external_id.strip_prefix("c_") {
            Some(rest) => rest.to_string(),
            None => external_id.clone(),
        };
        let rival: Option<(i64, i64, i64)> = conn
            .query_row(
                r#"SELECT id, message_count, COALESCE(updated_at, 0)
                   FROM conversations WHERE source = 'gemini' AND external_id = ?1"#,
                params![normalized],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match rival {
            None => {
                conn.execute(
                    r#"UPDATE conversations SET external_id = ?2 WHERE id = ?1"#,
                    params![row_id, normalized],
                )?;
            }
            Some((rival_id, rival_messages, rival_updated)) => {
                let (own_messages, own_updated): (i64, i64) = conn.query_row(
                    r#"SELECT message_count, COALESCE(updated_at, 0) FROM conversations WHERE id = ?1"#,
                    params![row_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                // Keep the copy with the most messages, then the most recent.
                let keep_prefixed = (own_messages, own_updated) > (rival_messages, rival_updated);
                let loser = if keep_prefixed { rival_id } else { row_id };
                conn.execute(
                    r#"DELETE FROM conversations WHERE id = ?1"#,
                    params![loser],
                )?;
                conn.execute(
                    r#"DELETE FROM conversations_fts WHERE rowid = ?1"#,
                    params![loser],
                )?;
                if keep_prefixed {
                    conn.execute(
                        r#"UPDATE conversations SET external_id = ?2 WHERE id = ?1"#,
                        params![row_id, normalized],
                    )?;
                }
            }
        }
        tracing::debug!(external_id = %external_id, "normalized legacy conversation id");
    }

    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

// A second writer still holding the same key after one retry. Replacement is
// whole-row, so the caller must not paper over this by merging.
#[derive(Debug)]
pub struct StoreConflict {
    pub source: SourceKind,
    pub external_id: String,
}

impl std::fmt::Display for StoreConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "concurrent write on ({}, {})",
            self.source, self.external_id
        )
    }
}

impl std::error::Error for StoreConflict {}

fn is_busy(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == rusqlite::ErrorCode::DatabaseBusy
                || failure.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

pub fn upsert_conversation(conn: &Connection, conversation: &Conversation) -> Result<UpsertOutcome> {
    match upsert_once(conn, conversation) {
        Err(err) if is_busy(&err) => {
            std::thread::sleep(Duration::from_millis(CONFLICT_RETRY_DELAY_MS));
            upsert_once(conn, conversation).map_err(|retry_err| {
                if is_busy(&retry_err) {
                    anyhow::Error::new(StoreConflict {
                        source: conversation.source,
                        external_id: conversation.external_id.clone(),
                    })
                } else {
                    retry_err
                }
            })
        }
        other => other,
    }
}

fn full_text(conversation: &Conversation) -> String {
    let mut out = String::new();
    for message in &conversation.messages {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(message.role.as_str());
        out.push_str(": ");
        out.push_str(&message.content);
    }
    out
}

fn upsert_once(conn: &Connection, conversation: &Conversation) -> Result<UpsertOutcome> {
    conn.execute_batch("BEGIN IMMEDIATE;")?;

    let result: Result<UpsertOutcome> = (|| {
        let existing: Option<(i64, Option<i64>)> = conn
            .query_row(
                r#"SELECT id, updated_at FROM conversations
                   WHERE source = ?1 AND external_id = ?2"#,
                params![conversation.source.as_str(), conversation.external_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (row_id, outcome) = match existing {
            Some((row_id, stored_updated)) => {
                // A slower-finishing fetch of a stale snapshot must never
                // move updated_at backwards.
                let updated_at = stored_updated
                    .unwrap_or(conversation.updated_at_ms)
                    .max(conversation.updated_at_ms);
                conn.execute(
                    r#"UPDATE conversations
                       SET title = ?2, created_at = ?3, updated_at = ?4, message_count = ?5
                       WHERE id = ?1"#,
                    params![
                        row_id,
                        conversation.title,
                        conversation.created_at_ms,
                        updated_at,
                        conversation.messages.len() as i64
                    ],
                )?;
                (row_id, UpsertOutcome::Updated)
            }
            None => {
                conn.execute(
                    r#"INSERT INTO conversations
                       (source, external_id, title, created_at, updated_at, message_count)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    params![
                        conversation.source.as_str(),
                        conversation.external_id,
                        conversation.title,
                        conversation.created_at_ms,
                        conversation.updated_at_ms,
                        conversation.messages.len() as i64
                    ],
                )?;
                (conn.last_insert_rowid(), UpsertOutcome::Inserted)
            }
        };

        // The decoder output is the complete authoritative message set;
        // replace, never patch.
        conn.execute(
            r#"DELETE FROM messages WHERE conversation_id = ?1"#,
            params![row_id],
        )?;
        let mut insert = conn.prepare_cached(
            r#"INSERT INTO messages (conversation_id, sequence_number, role, content, timestamp)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
        )?;
        for message in &conversation.messages {
            insert.execute(params![
                row_id,
                message.sequence_number,
                message.role.as_str(),
                message.content,
                message.timestamp_ms
            ])?;
        }

        // The projection is rewritten inside this same transaction; if it
        // cannot be written the whole upsert rolls back.
        conn.execute(
            r#"DELETE FROM conversations_fts WHERE rowid = ?1"#,
            params![row_id],
        )?;
        conn.execute(
            r#"INSERT INTO conversations_fts (rowid, title, body) VALUES (?1, ?2, ?3)"#,
            params![row_id, conversation.title, full_text(conversation)],
        )?;

        Ok(outcome)
    })();

    match result {
        Ok(outcome) => {
            conn.execute_batch("COMMIT;")?;
            Ok(outcome)
        }
        Err(err) => {
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}

pub fn known_updated_at(
    conn: &Connection,
    source: SourceKind,
    external_ids: &[String],
) -> Result<HashMap<String, Option<i64>>> {
    let mut stmt = conn.prepare_cached(
        r#"SELECT updated_at FROM conversations WHERE source = ?1 AND external_id = ?2"#,
    )?;
    let mut known = HashMap::new();
    for external_id in external_ids {
        let stored: Option<Option<i64>> = stmt
            .query_row(params![source.as_str(), external_id], |row| row.get(0))
            .optional()?;
        if let Some(updated_at) = stored {
            known.insert(external_id.clone(), updated_at);
        }
    }
    Ok(known)
}

pub fn check(
    conn: &Connection,
    source: SourceKind,
    external_id: &str,
    remote_updated_at_ms: Option<i64>,
) -> Result<bool> {
    let stored: Option<Option<i64>> = conn
        .query_row(
            r#"SELECT updated_at FROM conversations WHERE source = ?1 AND external_id = ?2"#,
            params![source.as_str(), external_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(resolve::needs_sync(remote_updated_at_ms, stored))
}

fn load_messages(conn: &Connection, row_id: i64) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare_cached(
        r#"SELECT role, content, timestamp, sequence_number
           FROM messages
           WHERE conversation_id = ?1
           ORDER BY sequence_number ASC"#,
    )?;
    let mut rows = stmt.query(params![row_id])?;
    let mut messages = Vec::new();
    while let Some(row) = rows.next()? {
        let role: String = row.get(0)?;
        messages.push(Message {
            role: Role::parse(&role).ok_or_else(|| anyhow!("unknown message role: {role}"))?,
            content: row.get(1)?,
            timestamp_ms: row.get(2)?,
            sequence_number: row.get(3)?,
        });
    }
    Ok(messages)
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, String, Option<i64>, Option<i64>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn build_conversation(
    conn: &Connection,
    row: (i64, String, String, String, Option<i64>, Option<i64>),
) -> Result<Conversation> {
    let (row_id, source, external_id, title, created_at, updated_at) = row;
    let source =
        SourceKind::parse(&source).ok_or_else(|| anyhow!("unknown conversation source: {source}"))?;
    let created_at_ms = created_at.unwrap_or(0);
    Ok(Conversation {
        source,
        external_id,
        title,
        created_at_ms,
        updated_at_ms: updated_at.unwrap_or(created_at_ms),
        messages: load_messages(conn, row_id)?,
    })
}

pub fn get_conversation(
    conn: &Connection,
    source: SourceKind,
    external_id: &str,
) -> Result<Option<Conversation>> {
    let row = conn
        .query_row(
            r#"SELECT id, source, external_id, title, created_at, updated_at
               FROM conversations WHERE source = ?1 AND external_id = ?2"#,
            params![source.as_str(), external_id],
            conversation_from_row,
        )
        .optional()?;
    match row {
        Some(row) => Ok(Some(build_conversation(conn, row)?)),
        None => Ok(None),
    }
}

pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<Conversation>> {
    let mut stmt = conn.prepare_cached(
        r#"SELECT id, source, external_id, title, created_at, updated_at
           FROM conversations
           ORDER BY updated_at DESC
           LIMIT ?1"#,
    )?;
    let mut rows = stmt.query(params![i64::try_from(limit).unwrap_or(i64::MAX)])?;
    let mut raw = Vec::new();
    while let Some(row) = rows.next()? {
        raw.push(conversation_from_row(row)?);
    }
    drop(rows);
    drop(stmt);

    raw.into_iter()
        .map(|row| build_conversation(conn, row))
        .collect()
}

#[derive(Clone, Debug)]
pub struct SearchQuery {
    pub text: String,
    pub source: Option<SourceKind>,
    pub created_from_ms: Option<i64>,
    pub created_to_ms: Option<i64>,
    pub limit: usize,
    pub offset: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
            created_from_ms: None,
            created_to_ms: None,
            limit: 20,
            offset: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SearchHit {
    pub conversation: Conversation,
    pub title_snippet: String,
    pub body_snippet: String,
}

#[derive(Clone, Debug, Default)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub total: u64,
}

pub fn search(conn: &Connection, query: &SearchQuery) -> Result<SearchResults> {
    let mut where_sql = String::from("conversations_fts MATCH ?1");
    let mut args: Vec<Value> = vec![Value::from(query.text.clone())];
    if let Some(source) = query.source {
        args.push(Value::from(source.as_str().to_string()));
        where_sql.push_str(&format!(" AND c.source = ?{}", args.len()));
    }
    if let Some(from_ms) = query.created_from_ms {
        args.push(Value::from(from_ms));
        where_sql.push_str(&format!(" AND c.created_at >= ?{}", args.len()));
    }
    if let Some(to_ms) = query.created_to_ms {
        args.push(Value::from(to_ms));
        where_sql.push_str(&format!(" AND c.created_at <= ?{}", args.len()));
    }

    let count_sql = format!(
        "SELECT COUNT(*) FROM conversations c \
         JOIN conversations_fts ON conversations_fts.rowid = c.id \
         WHERE {where_sql}"
    );
    let total: i64 = conn.query_row(&count_sql, params_from_iter(args.iter()), |row| row.get(0))?;

    let mut page_args = args;
    page_args.push(Value::from(query.limit.max(1) as i64));
    let limit_index = page_args.len();
    page_args.push(Value::from(query.offset as i64));
    let offset_index = page_args.len();

    let select_sql = format!(
        "SELECT c.id, c.source, c.external_id, c.title, c.created_at, c.updated_at, \
                snippet(conversations_fts, 0, '<mark>', '</mark>', '...', 12), \
                snippet(conversations_fts, 1, '<mark>', '</mark>', '...', 32) \
         FROM conversations c \
         JOIN conversations_fts ON conversations_fts.rowid = c.id \
         WHERE {where_sql} \
         ORDER BY c.updated_at DESC \
         LIMIT ?{limit_index} OFFSET ?{offset_index}"
    );

    let mut stmt = conn.prepare(&select_sql)?;
    let mut rows = stmt.query(params_from_iter(page_args.iter()))?;
    let mut raw = Vec::new();
    while let Some(row) = rows.next()? {
        let base = conversation_from_row(row)?;
        let title_snippet: String = row.get(6)?;
        let body_snippet: String = row.get(7)?;
        raw.push((base, title_snippet, body_snippet));
    }
    drop(rows);
    drop(stmt);

    let mut hits = Vec::new();
    for (base, title_snippet, body_snippet) in raw {
        hits.push(SearchHit {
            conversation: build_conversation(conn, base)?,
            title_snippet,
            body_snippet,
        });
    }

    Ok(SearchResults {
        hits,
        total: total as u64,
    })
}

pub fn get_sync_state(conn: &Connection, source: SourceKind) -> Result<SyncState> {
    let state = conn
        .query_row(
            r#"SELECT last_full_sync_at, last_quick_sync_at, last_known_external_id, quick_sync_window
               FROM sync_state WHERE source = ?1"#,
            params![source.as_str()],
            |row| {
                Ok(SyncState {
                    last_full_sync_at_ms: row.get(0)?,
                    last_quick_sync_at_ms: row.get(1)?,
                    last_known_external_id: row.get(2)?,
                    quick_sync_window: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(state.unwrap_or_else(|| SyncState {
        quick_sync_window: DEFAULT_QUICK_SYNC_WINDOW,
        ..SyncState::default()
    }))
}

pub fn put_sync_state(conn: &Connection, source: SourceKind, state: &SyncState) -> Result<()> {
    conn.execute(
        r#"INSERT OR REPLACE INTO sync_state
           (source, last_full_sync_at, last_quick_sync_at, last_known_external_id, quick_sync_window)
           VALUES (?1, ?2, ?3, ?4, ?5)"#,
        params![
            source.as_str(),
            state.last_full_sync_at_ms,
            state.last_quick_sync_at_ms,
            state.last_known_external_id,
            state.quick_sync_window
        ],
    )?;
    Ok(())
}

#[derive(Clone, Debug)]
pub struct SourceStatus {
    pub source: SourceKind,
    pub last_success_at_ms: Option<i64>,
    pub last_attempt_at_ms: Option<i64>,
    pub consecutive_failures: i64,
    pub last_error: Option<String>,
}

pub fn record_run_success(conn: &Connection, source: SourceKind, at_ms: i64) -> Result<()> {
    conn.execute(
        r#"INSERT INTO source_status (source, last_success_at, last_attempt_at, consecutive_failures, last_error)
           VALUES (?1, ?2, ?2, 0, NULL)
           ON CONFLICT(source) DO UPDATE SET
             last_success_at = excluded.last_success_at,
             last_attempt_at = excluded.last_attempt_at,
             consecutive_failures = 0,
             last_error = NULL"#,
        params![source.as_str(), at_ms],
    )?;
    Ok(())
}

pub fn record_run_failure(conn: &Connection, source: SourceKind, at_ms: i64, error: &str) -> Result<()> {
    conn.execute(
        r#"INSERT INTO source_status (source, last_success_at, last_attempt_at, consecutive_failures, last_error)
           VALUES (?1, NULL, ?2, 1, ?3)
           ON CONFLICT(source) DO UPDATE SET
             last_attempt_at = excluded.last_attempt_at,
             consecutive_failures = source_status.consecutive_failures + 1,
             last_error = excluded.last_error"#,
        params![source.as_str(), at_ms, error],
    )?;
    Ok(())
}

pub fn get_source_status(conn: &Connection, source: SourceKind) -> Result<Option<SourceStatus>> {
    let status = conn
        .query_row(
            r#"SELECT last_success_at, last_attempt_at, consecutive_failures, last_error
               FROM source_status WHERE source = ?1"#,
            params![source.as_str()],
            |row| {
                Ok(SourceStatus {
                    source,
                    last_success_at_ms: row.get(0)?,
                    last_attempt_at_ms: row.get(1)?,
                    consecutive_failures: row.get(2)?,
                    last_error: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(status)
}

#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub total_conversations: u64,
    pub total_messages: u64,
    pub by_source: Vec<(String, u64)>,
    pub earliest_created_at_ms: Option<i64>,
    pub latest_created_at_ms: Option<i64>,
}

pub fn stats(conn: &Connection) -> Result<Stats> {
    let total_conversations: i64 =
        conn.query_row(r#"SELECT COUNT(*) FROM conversations"#, [], |row| row.get(0))?;
    let total_messages: i64 =
        conn.query_row(r#"SELECT COUNT(*) FROM messages"#, [], |row| row.get(0))?;

    let mut stmt = conn.prepare(
        r#"SELECT source, COUNT(*) FROM conversations GROUP BY source ORDER BY source"#,
    )?;
    let mut rows = stmt.query([])?;
    let mut by_source = Vec::new();
    while let Some(row) = rows.next()? {
        let source: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        by_source.push((source, count as u64));
    }
    drop(rows);
    drop(stmt);

    let (earliest, latest): (Option<i64>, Option<i64>) = conn.query_row(
        r#"SELECT MIN(created_at), MAX(created_at) FROM conversations"#,
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(Stats {
        total_conversations: total_conversations as u64,
        total_messages: total_messages as u64,
        by_source,
        earliest_created_at_ms: earliest,
        latest_created_at_ms: latest,
    })
}
