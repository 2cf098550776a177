use chatstash::model::{SourceKind, SyncState, DEFAULT_QUICK_SYNC_WINDOW};
use chatstash::store;

#[test]
fn state_written_by_one_process_lifetime_is_read_by_the_next() {
    let temp = tempfile::tempdir().expect("tempdir");

    let written = SyncState {
        last_full_sync_at_ms: Some(1_704_153_600_000),
        last_quick_sync_at_ms: Some(1_704_240_000_000),
        last_known_external_id: Some("newest".to_string()),
        quick_sync_window: 25,
    };

    {
        let conn = store::open(temp.path()).expect("open store");
        store::put_sync_state(&conn, SourceKind::ChatGpt, &written).expect("put state");
    }

    let conn = store::open(temp.path()).expect("reopen store");
    let read = store::get_sync_state(&conn, SourceKind::ChatGpt).expect("get state");
    assert_eq!(read, written);

    // Sources without a row get defaults, not an error.
    let fresh = store::get_sync_state(&conn, SourceKind::Gemini).expect("fresh state");
    assert!(fresh.last_known_external_id.is_none());
    assert_eq!(fresh.quick_sync_window, DEFAULT_QUICK_SYNC_WINDOW);
}
