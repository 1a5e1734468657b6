use meeting_coordinator::nats::session_subject;
use meeting_coordinator::sync::MessageKind;
use meeting_coordinator::{
    Agenda, ClockEngine, Envelope, JoinMode, MeetingKey, SessionConfig, SessionEffect,
    SessionStateMachine, SyncMessage,
};

#[test]
fn test_session_subject() {
    assert_eq!(session_subject("meetings.sync", "abc-123"), "meetings.sync.abc-123");
}

#[test]
fn test_section_changed_wire_format() {
    let envelope = Envelope {
        session_id: "weekly-1".to_string(),
        sender_id: "alice".to_string(),
        seq: 3,
        message: SyncMessage::SectionChanged {
            section_id: "issues".to_string(),
            at_ms: 1_700_000_000_000,
            clock: ClockEngine::new(),
        },
    };

    let json = serde_json::to_string(&envelope).unwrap();
    assert!(json.contains("\"type\":\"section-changed\""));
    assert!(json.contains("\"sectionId\":\"issues\""));
    assert!(json.contains("\"senderId\":\"alice\""));
    assert!(json.contains("\"seq\":3"));
    assert!(json.contains("\"clock\":{\"lifecycle\":\"notStarted\""));
}

#[test]
fn test_parse_leadership_changed() {
    let json = r#"{
        "sessionId": "weekly-1",
        "senderId": "alice",
        "seq": 7,
        "message": {"type": "leadership-changed", "leaderId": "bob"}
    }"#;

    let envelope: Envelope = serde_json::from_str(json).unwrap();
    assert_eq!(envelope.kind(), MessageKind::LeadershipChanged);
    assert_eq!(envelope.message.stream().as_deref(), Some("leader"));
    assert_eq!(envelope.stamp().seq, 7);
}

#[test]
fn test_snapshot_survives_the_wire() {
    let mut leader = SessionStateMachine::new(
        "weekly-1",
        MeetingKey::new("acme", "leadership", "weekly"),
        "alice",
        Agenda::weekly(),
        SessionConfig::default(),
    );
    leader.join(JoinMode::Create, "Alice", 1_000).unwrap();
    leader.change_section("scorecard", 301_000).unwrap();
    leader.submit_rating(9, 302_000).unwrap();
    leader.drain_effects();

    let snapshot = leader.snapshot(310_000);
    let envelope = Envelope {
        session_id: "weekly-1".to_string(),
        sender_id: "alice".to_string(),
        seq: 0,
        message: SyncMessage::StateSnapshot {
            recipient_id: Some("bob".to_string()),
            snapshot: Box::new(snapshot.clone()),
        },
    };

    let bytes = serde_json::to_vec(&envelope).unwrap();
    let parsed: Envelope = serde_json::from_slice(&bytes).unwrap();
    match parsed.message {
        SyncMessage::StateSnapshot {
            recipient_id,
            snapshot: received,
        } => {
            assert_eq!(recipient_id.as_deref(), Some("bob"));
            assert_eq!(*received, snapshot);
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[test]
fn test_broadcasts_are_encodable() {
    let mut leader = SessionStateMachine::new(
        "weekly-1",
        MeetingKey::new("acme", "leadership", "weekly"),
        "alice",
        Agenda::weekly(),
        SessionConfig::default(),
    );
    leader.join(JoinMode::Create, "Alice", 1_000).unwrap();
    leader.pause(61_000).unwrap();

    let kinds: Vec<MessageKind> = leader
        .drain_effects()
        .into_iter()
        .filter_map(|effect| match effect {
            SessionEffect::Broadcast(envelope) => Some(envelope),
            _ => None,
        })
        .map(|envelope| {
            let json = serde_json::to_string(&envelope).unwrap();
            serde_json::from_str::<Envelope>(&json).unwrap().kind()
        })
        .collect();

    assert_eq!(
        kinds,
        vec![
            MessageKind::JoinRequest,
            MessageKind::TimerUpdate,
            MessageKind::TimerUpdate
        ]
    );
}
