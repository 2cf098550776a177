use chatstash::model::SourceKind;
use chatstash::store;
use chatstash::sync::{self, SyncMode, SyncOptions};
use chatstash::transport::StaticTransport;

#[test]
fn list_endpoint_failures_accumulate_and_a_success_clears_them() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = store::open(temp.path()).expect("open store");

    // Nothing canned: every list fetch fails, which fails the whole run.
    let transport = StaticTransport::new();

    sync::run(
        &conn,
        &transport,
        SourceKind::Gemini,
        SyncMode::Full,
        &SyncOptions::for_test(),
    )
    .expect_err("first run fails");
    sync::run(
        &conn,
        &transport,
        SourceKind::Gemini,
        SyncMode::Full,
        &SyncOptions::for_test(),
    )
    .expect_err("second run fails");

    let status = store::get_source_status(&conn, SourceKind::Gemini)
        .expect("status")
        .expect("status row");
    assert_eq!(status.consecutive_failures, 2);
    assert!(status.last_error.is_some());
    assert!(status.last_success_at_ms.is_none());
    assert!(status.last_attempt_at_ms.is_some());

    // An empty feed is a healthy outcome.
    transport.put_list_page(SourceKind::Gemini, None, ")]}'\n4\nnull\n");
    let summary = sync::run(
        &conn,
        &transport,
        SourceKind::Gemini,
        SyncMode::Full,
        &SyncOptions::for_test(),
    )
    .expect("third run succeeds");
    assert_eq!(summary.listed, 0);

    let status = store::get_source_status(&conn, SourceKind::Gemini)
        .expect("status")
        .expect("status row");
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_error.is_none());
    assert!(status.last_success_at_ms.is_some());
}
