use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chatstash::model::SourceKind;
use chatstash::store;
use chatstash::sync::{self, SyncMode, SyncOptions};
use chatstash::transport::StaticTransport;
use serde_json::json;

fn claude_list(ids: &[&str]) -> String {
    json!({
        "conversations": ids
            .iter()
            .map(|id| json!({
                "uuid": id,
                "name": format!("Conversation {id}"),
                "updated_at": "2024-02-01T00:00:00Z",
            }))
            .collect::<Vec<_>>(),
        "next_cursor": null,
    })
    .to_string()
}

fn claude_detail(id: &str) -> String {
    json!({
        "uuid": id,
        "name": format!("Conversation {id}"),
        "updated_at": "2024-02-01T00:00:00Z",
        "chat_messages": [
            {"sender": "human", "text": format!("question in {id}")},
            {"sender": "assistant", "text": format!("answer in {id}")},
        ],
    })
    .to_string()
}

#[test]
fn cancellation_lands_on_an_item_boundary_and_preserves_upserts() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = store::open(temp.path()).expect("open store");

    let transport = StaticTransport::new();
    transport.put_list_page(SourceKind::Claude, None, &claude_list(&["first", "second"]));
    transport.put_detail(SourceKind::Claude, "first", &claude_detail("first"));
    transport.put_detail(SourceKind::Claude, "second", &claude_detail("second"));

    let cancel = Arc::new(AtomicBool::new(false));
    let options = SyncOptions {
        cancel: Some(cancel.clone()),
        ..SyncOptions::for_test()
    };

    let flag = cancel.clone();
    let summary = sync::run_with_progress(
        &conn,
        &transport,
        SourceKind::Claude,
        SyncMode::Full,
        &options,
        &mut |done, _total| {
            if done == 1 {
                flag.store(true, Ordering::Relaxed);
            }
        },
    )
    .expect("cancelled run still returns a summary");

    assert!(summary.cancelled);
    assert_eq!(summary.inserted, 1);

    // The completed item stayed durable.
    let stored = store::recent(&conn, 10).expect("recent");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].external_id, "first");

    // The boundary did not advance, so nothing gets silently skipped later.
    let state = store::get_sync_state(&conn, SourceKind::Claude).expect("state");
    assert!(state.last_known_external_id.is_none());
    assert!(state.last_full_sync_at_ms.is_none());

    // A later uncancelled run picks up the remainder.
    let follow_up = sync::run(
        &conn,
        &transport,
        SourceKind::Claude,
        SyncMode::Full,
        &SyncOptions::for_test(),
    )
    .expect("follow-up run");
    assert_eq!(follow_up.inserted, 1);
    assert_eq!(follow_up.skipped, 1);
    assert_eq!(store::recent(&conn, 10).expect("recent").len(), 2);
}
