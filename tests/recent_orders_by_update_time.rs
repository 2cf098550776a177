use chatstash::api;
use chatstash::model::{Conversation, Message, Role, SourceKind};
use chatstash::store;

fn conversation(source: SourceKind, id: &str, updated_at_ms: i64) -> Conversation {
    Conversation {
        source,
        external_id: id.to_string(),
        title: format!("Conversation {id}"),
        created_at_ms: updated_at_ms - 10,
        updated_at_ms,
        messages: vec![Message {
            role: Role::User,
            content: format!("body of {id}"),
            timestamp_ms: Some(updated_at_ms - 10),
            sequence_number: 0,
        }],
    }
}

#[test]
fn recent_returns_most_recently_updated_first_with_messages() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = store::open(temp.path()).expect("open store");

    api::import(
        &conn,
        vec![
            conversation(SourceKind::Claude, "old", 1_000),
            conversation(SourceKind::Gemini, "newest", 3_000),
            conversation(SourceKind::ChatGpt, "middle", 2_000),
        ],
    )
    .expect("import");

    let top_two = api::recent(&conn, 2).expect("recent");
    let ids: Vec<&str> = top_two.iter().map(|c| c.external_id.as_str()).collect();
    assert_eq!(ids, vec!["newest", "middle"]);
    assert_eq!(top_two[0].messages.len(), 1);
    assert_eq!(top_two[0].messages[0].content, "body of newest");
}

#[test]
fn stats_count_rows_messages_and_sources() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conn = store::open(temp.path()).expect("open store");

    api::import(
        &conn,
        vec![
            conversation(SourceKind::Claude, "a", 1_000),
            conversation(SourceKind::Claude, "b", 2_000),
            conversation(SourceKind::Gemini, "c", 3_000),
        ],
    )
    .expect("import");

    let stats = api::stats(&conn).expect("stats");
    assert_eq!(stats.total_conversations, 3);
    assert_eq!(stats.total_messages, 3);
    assert_eq!(
        stats.by_source,
        vec![("claude".to_string(), 2), ("gemini".to_string(), 1)]
    );
    assert_eq!(stats.earliest_created_at_ms, Some(990));
    assert_eq!(stats.latest_created_at_ms, Some(2_990));
}
