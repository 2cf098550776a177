use std::collections::HashMap;

use crate::model::CandidateRef;

// Staleness decision for one candidate. `stored` is the Store's view:
// `None` = no row at all, `Some(None)` = row exists but its timestamp is
// unknown. Unknown on either side always means "sync" — never "assume
// current".
pub fn needs_sync(remote_updated_at_ms: Option<i64>, stored: Option<Option<i64>>) -> bool {
    match stored {
        None => true,
        Some(None) => true,
        Some(Some(stored_ms)) => match remote_updated_at_ms {
            None => true,
            Some(remote_ms) => remote_ms > stored_ms,
        },
    }
}

// Pure and stateless, so re-running after a partial failure is safe and
// yields the same subset.
pub fn filter_stale(
    candidates: Vec<CandidateRef>,
    known: &HashMap<String, Option<i64>>,
) -> Vec<CandidateRef> {
    candidates
        .into_iter()
        .filter(|candidate| {
            needs_sync(
                candidate.remote_updated_at_ms,
                known.get(&candidate.external_id).copied(),
            )
        })
        .collect()
}
