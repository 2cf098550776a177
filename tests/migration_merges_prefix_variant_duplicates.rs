use chatstash::model::SourceKind;
use chatstash::store;
use rusqlite::params;

// Rows written before the decoders stripped routing decoration can carry a
// "c_" prefix, sometimes next to a bare-id copy of the same conversation.
// Reopening the store must merge them, keeping the better copy.
#[test]
fn reopening_normalizes_prefixed_ids_and_merges_duplicates() {
    let temp = tempfile::tempdir().expect("tempdir");

    {
        let conn = store::open(temp.path()).expect("open store");
        conn.execute(
            r#"INSERT INTO conversations (source, external_id, title, created_at, updated_at, message_count)
               VALUES ('gemini', 'c_dup', 'Prefixed copy', 100, 200, 3)"#,
            params![],
        )
        .expect("insert prefixed dup");
        conn.execute(
            r#"INSERT INTO conversations (source, external_id, title, created_at, updated_at, message_count)
               VALUES ('gemini', 'dup', 'Bare copy', 100, 300, 1)"#,
            params![],
        )
        .expect("insert bare dup");
        conn.execute(
            r#"INSERT INTO conversations (source, external_id, title, created_at, updated_at, message_count)
               VALUES ('gemini', 'c_solo', 'Solo prefixed', 100, 150, 2)"#,
            params![],
        )
        .expect("insert solo");
        // Pretend this database predates the normalization migration.
        conn.execute_batch("PRAGMA user_version = 1;").expect("rewind version");
    }

    let conn = store::open(temp.path()).expect("reopen runs migration");

    // The prefixed copy had more messages, so it won and took the bare id.
    let merged = store::get_conversation(&conn, SourceKind::Gemini, "dup")
        .expect("get merged")
        .expect("merged row exists");
    assert_eq!(merged.title, "Prefixed copy");

    let gone = store::get_conversation(&conn, SourceKind::Gemini, "c_dup").expect("get old id");
    assert!(gone.is_none());

    let solo = store::get_conversation(&conn, SourceKind::Gemini, "solo")
        .expect("get solo")
        .expect("solo renamed");
    assert_eq!(solo.title, "Solo prefixed");

    let stats = store::stats(&conn).expect("stats");
    assert_eq!(stats.total_conversations, 2);
}
