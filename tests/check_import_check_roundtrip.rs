use chatstash::api::{self, CheckItem};
use chatstash::model::{Conversation, Message, Role, SourceKind};
use chatstash::store;

const JAN_2_2024_MS: i64 = 1_704_153_600_000;

fn item(updated_at_ms: Option<i64>) -> CheckItem {
    CheckItem {
        source: SourceKind::Claude,
        external_id: "x1".to_string(),
        updated_at_ms,
    }
}

fn conversation(updated_at_ms: i64) -> Conversation {
    Conversation {
        source: SourceKind::Claude,
        external_id: "x1".to_string(),
        title: "Checked conversation".to_string(),
        created_at_ms: updated_at_ms - 1_000,
        updated_at_ms,
        messages: vec![Message {
            role: Role::User,
            content: "only message".to_string(),
            timestamp_ms: Some(updated_at_ms - 1_000),
            sequence_number: 0,
        }],
    }
}

#[test]
fn an_unseen_item_needs_sync_and_stops_needing_it_after_import() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = store::open(temp.path()).expect("open store");

    let needs = api::check(&conn, &[item(Some(JAN_2_2024_MS))]).expect("first check");
    assert_eq!(needs, vec!["x1".to_string()]);

    let summary = api::import(&conn, vec![conversation(JAN_2_2024_MS)]).expect("import");
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.skipped, 0);

    // Identical timestamp: already current.
    let needs = api::check(&conn, &[item(Some(JAN_2_2024_MS))]).expect("second check");
    assert!(needs.is_empty());

    // Strictly newer remote: stale again.
    let needs = api::check(&conn, &[item(Some(JAN_2_2024_MS + 1))]).expect("third check");
    assert_eq!(needs, vec!["x1".to_string()]);

    // Unknown remote timestamp is conservatively treated as stale.
    let needs = api::check(&conn, &[item(None)]).expect("fourth check");
    assert_eq!(needs, vec!["x1".to_string()]);
}

#[test]
fn importing_already_current_records_counts_them_as_skipped() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = store::open(temp.path()).expect("open store");

    api::import(&conn, vec![conversation(JAN_2_2024_MS)]).expect("first import");

    let summary = api::import(
        &conn,
        vec![conversation(JAN_2_2024_MS), conversation(JAN_2_2024_MS + 500)],
    )
    .expect("second import");
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.skipped, 1);

    let stored = store::get_conversation(&conn, SourceKind::Claude, "x1")
        .expect("get")
        .expect("row exists");
    assert_eq!(stored.updated_at_ms, JAN_2_2024_MS + 500);
}
