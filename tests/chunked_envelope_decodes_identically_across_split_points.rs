use chatstash::decode;
use chatstash::model::{CandidateRef, Role, SourceKind};

fn envelope(segments: &[&str]) -> String {
    let mut out = String::from(")]}'\n");
    for segment in segments {
        out.push_str(&segment.len().to_string());
        out.push('\n');
        out.push_str(segment);
        out.push('\n');
    }
    out
}

fn candidate(id: &str) -> CandidateRef {
    CandidateRef {
        source: SourceKind::Gemini,
        external_id: id.to_string(),
        title: None,
        remote_updated_at_ms: None,
    }
}

// One logical detail document: id, title, created, updated, then messages
// as [role_code, text, [secs, micros]] with 2 marking a system entry.
const DETAIL_BODY: &str = concat!(
    r#"["c_feed1","Garden planning",[1704153600,0],[1704240000,500000],"#,
    r#"[[0,"What should I plant?",[1704153610,0]],"#,
    r#"[2,"internal routing note",[1704153611,0]],"#,
    r#"[1,"Tomatoes do well here.",[1704153620,250000]]]]"#
);

#[test]
fn split_points_do_not_change_the_decoded_conversation() {
    let whole = envelope(&[DETAIL_BODY]);

    let split_at = DETAIL_BODY.len() / 3;
    let (first, rest) = DETAIL_BODY.split_at(split_at);
    let (second, third) = rest.split_at(rest.len() / 2);
    let split = envelope(&[first, second, third]);

    let from_whole =
        decode::decode_detail(SourceKind::Gemini, &whole, &candidate("feed1")).expect("whole");
    let from_split =
        decode::decode_detail(SourceKind::Gemini, &split, &candidate("feed1")).expect("split");

    assert_eq!(from_whole, from_split);
}

#[test]
fn positional_detail_maps_onto_the_canonical_record() {
    let raw = envelope(&[DETAIL_BODY]);
    let conversation =
        decode::decode_detail(SourceKind::Gemini, &raw, &candidate("feed1")).expect("decode");

    // The "c_" routing prefix never leaves the decoder.
    assert_eq!(conversation.external_id, "feed1");
    assert_eq!(conversation.title, "Garden planning");
    assert_eq!(conversation.created_at_ms, 1_704_153_600_000);
    assert_eq!(conversation.updated_at_ms, 1_704_240_000_500);

    // The system-authored entry was dropped and numbering stayed gap-free.
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].role, Role::User);
    assert_eq!(conversation.messages[1].role, Role::Assistant);
    assert_eq!(conversation.messages[1].timestamp_ms, Some(1_704_153_620_250));
    assert_eq!(
        conversation
            .messages
            .iter()
            .map(|m| m.sequence_number)
            .collect::<Vec<_>>(),
        vec![0, 1]
    );
}

#[test]
fn null_list_body_means_end_of_pagination() {
    let raw = envelope(&["null"]);
    let page = decode::decode_list(SourceKind::Gemini, &raw).expect("null body");
    assert!(page.candidates.is_empty());
    assert!(page.next_cursor.is_none());
}

#[test]
fn list_candidates_carry_stripped_ids_and_cursor() {
    let body = r#"[[["c_one","First",[1704153600,0]],["c_two","Second",[1704067200,0]]],"tok-9"]"#;
    let raw = envelope(&[body]);
    let page = decode::decode_list(SourceKind::Gemini, &raw).expect("list");

    assert_eq!(page.candidates.len(), 2);
    assert_eq!(page.candidates[0].external_id, "one");
    assert_eq!(page.candidates[0].remote_updated_at_ms, Some(1_704_153_600_000));
    assert_eq!(page.next_cursor.as_deref(), Some("tok-9"));
}
