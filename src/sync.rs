use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::decode;
use crate::model::{now_ms, CandidateRef, SourceKind};
use crate::resolve;
use crate::store::{self, UpsertOutcome};
use crate::transport::SourceTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Quick,
}

#[derive(Clone, Debug)]
pub struct SyncOptions {
    // Quick-mode item cap; defaults to the stored per-source window.
    pub max_items: Option<usize>,
    pub detail_fetch_delay_ms: u64,
    pub detail_fetch_jitter_ms: u64,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_items: None,
            detail_fetch_delay_ms: 750,
            detail_fetch_jitter_ms: 500,
            cancel: None,
        }
    }
}

impl SyncOptions {
    pub fn for_test() -> Self {
        Self {
            max_items: None,
            detail_fetch_delay_ms: 0,
            detail_fetch_jitter_ms: 0,
            cancel: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SyncSummary {
    pub run_id: String,
    pub listed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub cancelled: bool,
}

pub fn run(
    conn: &Connection,
    transport: &impl SourceTransport,
    source: SourceKind,
    mode: SyncMode,
    options: &SyncOptions,
) -> Result<SyncSummary> {
    run_with_progress(conn, transport, source, mode, options, &mut |_, _| {})
}

pub fn run_with_progress(
    conn: &Connection,
    transport: &impl SourceTransport,
    source: SourceKind,
    mode: SyncMode,
    options: &SyncOptions,
    on_progress: &mut dyn FnMut(u64, u64),
) -> Result<SyncSummary> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let state = store::get_sync_state(conn, source)?;

    let candidates = match list_candidates(transport, source, mode, options, &state) {
        Ok(candidates) => candidates,
        Err(err) => {
            // Nothing item-shaped to skip: a dead list endpoint fails the
            // whole run, but the failure still lands in source_status.
            store::record_run_failure(conn, source, now_ms(), &err.to_string())?;
            return Err(err);
        }
    };

    let listed = candidates.len() as u64;
    let newest_listed = newest_listed_id(source, &candidates);

    let ids: Vec<String> = candidates
        .iter()
        .map(|candidate| candidate.external_id.clone())
        .collect();
    let known = store::known_updated_at(conn, source, &ids)?;
    let stale = resolve::filter_stale(candidates, &known);

    let mut summary = SyncSummary {
        run_id,
        listed,
        skipped: listed - stale.len() as u64,
        ..SyncSummary::default()
    };

    let total = stale.len() as u64;
    on_progress(0, total);
    for (index, candidate) in stale.iter().enumerate() {
        if let Some(cancel) = options.cancel.as_ref() {
            if cancel.load(Ordering::Relaxed) {
                summary.cancelled = true;
                break;
            }
        }
        if index > 0 {
            pace(options);
        }
        match fetch_and_store(conn, transport, candidate) {
            Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
            Ok(UpsertOutcome::Updated) => summary.updated += 1,
            Err(err) => {
                summary.failed += 1;
                warn!(
                    source = %source,
                    external_id = %candidate.external_id,
                    error = %err,
                    "item sync failed, continuing"
                );
            }
        }
        on_progress(index as u64 + 1, total);
    }

    let finished_at = now_ms();
    if summary.cancelled {
        // Upserted items stay durable; the boundary stays put so the next
        // quick run re-lists what this one never reached.
        info!(
            source = %source,
            run_id = %summary.run_id,
            inserted = summary.inserted,
            updated = summary.updated,
            "sync run cancelled"
        );
        return Ok(summary);
    }

    let mut state = state;
    if let Some(external_id) = newest_listed {
        state.last_known_external_id = Some(external_id);
    }
    match mode {
        SyncMode::Full => state.last_full_sync_at_ms = Some(finished_at),
        SyncMode::Quick => state.last_quick_sync_at_ms = Some(finished_at),
    }
    store::put_sync_state(conn, source, &state)?;
    store::record_run_success(conn, source, finished_at)?;

    info!(
        source = %source,
        run_id = %summary.run_id,
        listed = summary.listed,
        inserted = summary.inserted,
        updated = summary.updated,
        skipped = summary.skipped,
        failed = summary.failed,
        "sync run finished"
    );
    Ok(summary)
}

fn list_candidates(
    transport: &impl SourceTransport,
    source: SourceKind,
    mode: SyncMode,
    options: &SyncOptions,
    state: &crate::model::SyncState,
) -> Result<Vec<CandidateRef>> {
    // The boundary cut only holds when the list endpoint is known to return
    // items most-recent-first.
    let boundary = match (mode, source.list_newest_first()) {
        (SyncMode::Quick, true) => state.last_known_external_id.clone(),
        _ => None,
    };
    let max_items = match mode {
        SyncMode::Full => None,
        SyncMode::Quick => Some(
            options
                .max_items
                .unwrap_or(state.quick_sync_window.max(1) as usize),
        ),
    };

    let mut candidates: Vec<CandidateRef> = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let raw = transport.fetch_list_page(source, cursor.as_deref())?;
        let page = decode::decode_list(source, &raw)?;
        if page.candidates.is_empty() {
            break;
        }

        let mut done = false;
        for candidate in page.candidates {
            if let Some(boundary_id) = boundary.as_deref() {
                // Items at and after the boundary are already known; items
                // before it on this same page are still new.
                if candidate.external_id == boundary_id {
                    done = true;
                    break;
                }
            }
            candidates.push(candidate);
            if let Some(max) = max_items {
                if candidates.len() >= max {
                    done = true;
                    break;
                }
            }
        }
        if done {
            break;
        }

        // Continuation tokens are opaque; they are echoed into the next
        // request and never inspected here.
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(candidates)
}

fn newest_listed_id(source: SourceKind, candidates: &[CandidateRef]) -> Option<String> {
    if source.list_newest_first() {
        candidates.first().map(|c| c.external_id.clone())
    } else {
        candidates
            .iter()
            .max_by_key(|c| c.remote_updated_at_ms.unwrap_or(i64::MIN))
            .map(|c| c.external_id.clone())
    }
}

fn fetch_and_store(
    conn: &Connection,
    transport: &impl SourceTransport,
    candidate: &CandidateRef,
) -> Result<UpsertOutcome> {
    // Fetch completes before the store transaction opens; transactions never
    // span a network round-trip.
    let raw = transport.fetch_detail(candidate.source, &candidate.external_id)?;
    let conversation = decode::decode_detail(candidate.source, &raw, candidate)?;
    store::upsert_conversation(conn, &conversation)
}

// Courtesy pacing between detail fetches. A tunable, not a correctness
// requirement.
fn pace(options: &SyncOptions) {
    let jitter = if options.detail_fetch_jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=options.detail_fetch_jitter_ms)
    } else {
        0
    };
    let delay = options.detail_fetch_delay_ms + jitter;
    if delay > 0 {
        std::thread::sleep(Duration::from_millis(delay));
    }
}
