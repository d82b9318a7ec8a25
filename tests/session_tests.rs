// Session state machine, wire event parsing, backoff policy and the
// outbound frame queue, tested without a live recognizer.

use chrono::Utc;
use speech_coach::audio::{frame_queue, EncodedFrame, PushOutcome};
use speech_coach::auth::Credential;
use speech_coach::session::{
    parse_inbound, strategy_for, BackoffPolicy, FailureKind, HandshakeMode, SessionConfig,
    SessionError, SessionState, TranscriptionSession, TransportEvent,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

fn frame(sequence: u64) -> EncodedFrame {
    EncodedFrame {
        sequence,
        payload: vec![0u8; 64],
        timestamp_ms: sequence * 80,
    }
}

fn test_credential() -> Credential {
    Credential::new("abc123".to_string(), Utc::now(), Duration::from_secs(300))
}

// ----------------------------------------------------------------------------
// State predicates
// ----------------------------------------------------------------------------

#[test]
fn test_state_predicates() {
    assert!(!SessionState::Idle.accepts_audio());
    assert!(SessionState::Connecting.accepts_audio());
    assert!(SessionState::Authenticating.accepts_audio());
    assert!(SessionState::Active.accepts_audio());
    assert!(!SessionState::Closing.accepts_audio());
    assert!(!SessionState::Closed.accepts_audio());
    assert!(!SessionState::Failed(FailureKind::ConnectTimeout).accepts_audio());

    assert!(SessionState::Closed.is_terminal());
    assert!(SessionState::Failed(FailureKind::Transport).is_terminal());
    assert!(!SessionState::Active.is_terminal());
}

#[test]
fn test_error_retryability() {
    assert!(SessionError::ConnectTimeout.is_retryable());
    assert!(SessionError::AbnormalClose {
        code: 4001,
        reason: String::new()
    }
    .is_retryable());
    assert!(!SessionError::AuthRejected("bad token".to_string()).is_retryable());
    assert!(!SessionError::SessionClosed.is_retryable());
}

// ----------------------------------------------------------------------------
// Wire events
// ----------------------------------------------------------------------------

#[test]
fn test_parse_session_begins() {
    let event =
        parse_inbound(r#"{"message_type":"SessionBegins","session_id":"s1"}"#).unwrap();
    match event {
        TransportEvent::SessionBegins {
            session_id,
            expires_at,
        } => {
            assert_eq!(session_id, "s1");
            assert!(expires_at.is_none());
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_parse_partial_transcript() {
    let raw = r#"{"message_type":"PartialTranscript","text":"hello wor","audio_start":0,"audio_end":400,"confidence":0.42}"#;
    match parse_inbound(raw).unwrap() {
        TransportEvent::Partial(payload) => {
            assert_eq!(payload.text, "hello wor");
            assert_eq!(payload.audio_start, 0);
            assert_eq!(payload.audio_end, 400);
            assert!((payload.confidence - 0.42).abs() < 1e-6);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_parse_final_transcript_with_words() {
    let raw = r#"{"message_type":"FinalTranscript","text":"hello world","audio_start":0,"audio_end":500,"confidence":0.9,"words":[{"text":"hello","start":0,"end":250,"confidence":0.91},{"text":"world","start":250,"end":500,"confidence":0.89}]}"#;
    match parse_inbound(raw).unwrap() {
        TransportEvent::Final(payload) => {
            assert_eq!(payload.text, "hello world");
            assert_eq!(payload.words.len(), 2);
            assert_eq!(payload.words[0].text, "hello");
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_parse_error_payloads() {
    match parse_inbound(r#"{"error":"Not authorized"}"#).unwrap() {
        TransportEvent::Error { code, message } => {
            assert_eq!(code, None);
            assert_eq!(message, "Not authorized");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    match parse_inbound(r#"{"error":{"code":4001,"message":"Not authorized"}}"#).unwrap() {
        TransportEvent::Error { code, message } => {
            assert_eq!(code, Some(4001));
            assert_eq!(message, "Not authorized");
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_unparseable_payload_is_an_error() {
    assert!(parse_inbound("not json at all").is_err());
    assert!(parse_inbound(r#"{"message_type":"SomethingElse"}"#).is_err());
}

// ----------------------------------------------------------------------------
// Handshake strategies
// ----------------------------------------------------------------------------

#[test]
fn test_token_query_handshake() {
    let strategy = strategy_for(HandshakeMode::TokenQuery);
    let url = strategy.request_url("wss://recognizer.test/ws", "abc123", 16000);
    assert_eq!(url, "wss://recognizer.test/ws?sample_rate=16000&token=abc123");
    assert!(strategy.auth_frame("abc123").is_none());
}

#[test]
fn test_auth_message_handshake() {
    let strategy = strategy_for(HandshakeMode::AuthMessage);
    let url = strategy.request_url("wss://recognizer.test/ws", "abc123", 16000);
    assert_eq!(url, "wss://recognizer.test/ws?sample_rate=16000");

    let frame = strategy.auth_frame("abc123").unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["authorization"], "abc123");
}

// ----------------------------------------------------------------------------
// Backoff policy
// ----------------------------------------------------------------------------

#[test]
fn test_backoff_doubles_up_to_the_cap() {
    let policy = BackoffPolicy::default();

    assert_eq!(policy.delay(1), Some(Duration::from_secs(1)));
    assert_eq!(policy.delay(2), Some(Duration::from_secs(2)));
    assert_eq!(policy.delay(3), Some(Duration::from_secs(4)));
    assert_eq!(policy.delay(4), Some(Duration::from_secs(8)));
    assert_eq!(policy.delay(5), Some(Duration::from_secs(16)));
    assert_eq!(policy.delay(6), None, "attempt budget is exhausted");
    assert_eq!(policy.delay(0), None);
}

#[test]
fn test_backoff_respects_cap() {
    let policy = BackoffPolicy {
        base: Duration::from_secs(1),
        cap: Duration::from_secs(5),
        max_attempts: 10,
    };
    assert_eq!(policy.delay(4), Some(Duration::from_secs(5)));
    assert_eq!(policy.delay(10), Some(Duration::from_secs(5)));
}

// ----------------------------------------------------------------------------
// Frame queue
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_queue_overflow_drops_newest_and_counts() {
    let (producer, mut rx) = frame_queue(4);

    let mut delivered = 0;
    for i in 0..10 {
        match producer.try_push(frame(i)) {
            PushOutcome::Delivered => delivered += 1,
            PushOutcome::DroppedFull => {}
            PushOutcome::Disconnected => panic!("consumer should still be alive"),
        }
    }

    assert_eq!(delivered, 4);
    assert_eq!(producer.dropped_frames(), 6);

    // Queued frames come out in push order; the dropped ones were the newest.
    for expected in 0..4 {
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.sequence, expected);
    }
}

#[test]
fn test_queue_reports_disconnected_consumer() {
    let (producer, rx) = frame_queue(4);
    drop(rx);
    assert_eq!(producer.try_push(frame(0)), PushOutcome::Disconnected);
    assert_eq!(producer.dropped_frames(), 0, "disconnects are not overflow drops");
}

// ----------------------------------------------------------------------------
// Session state machine against local sockets
// ----------------------------------------------------------------------------

/// A listener that accepts the TCP connection but never answers the
/// websocket upgrade, keeping the session in `Connecting`.
async fn silent_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[tokio::test]
async fn test_frames_buffer_while_connecting_and_overflow_drops() {
    let (listener, port) = silent_listener().await;
    let accept_task = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        // Hold the socket open without completing the upgrade.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let config = SessionConfig {
        ws_endpoint: format!("ws://127.0.0.1:{}/realtime", port),
        connect_timeout: Duration::from_millis(500),
        ..Default::default()
    };

    let (producer, frame_rx) = frame_queue(16);
    let (event_tx, _event_rx) = mpsc::unbounded_channel();
    let session = TranscriptionSession::new(config, test_credential());
    let handle = session.spawn(frame_rx, event_tx);
    let audio_tx = handle.audio_sender(producer);

    let mut state_rx = handle.state_receiver();
    state_rx
        .wait_for(|s| *s == SessionState::Connecting)
        .await
        .unwrap();

    // 100 frames arrive while the handshake is still in flight: none are
    // sent, the first 16 queue up, the rest are dropped and counted.
    for i in 0..100 {
        let _ = audio_tx.send(frame(i)).unwrap();
    }
    assert_eq!(audio_tx.dropped_frames(), 84);

    state_rx.wait_for(|s| s.is_terminal()).await.unwrap();
    assert_eq!(
        handle.state(),
        SessionState::Failed(FailureKind::ConnectTimeout)
    );

    // Terminal session: further sends fail instead of silently succeeding.
    assert!(matches!(
        audio_tx.send(frame(100)),
        Err(SessionError::SessionClosed)
    ));

    match handle.join().await {
        Err(SessionError::ConnectTimeout) => {}
        other => panic!("expected ConnectTimeout, got {:?}", other),
    }

    accept_task.abort();
}

#[tokio::test]
async fn test_connection_refused_fails_with_transport_error() {
    // Bind and drop to get a port nothing is listening on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = SessionConfig {
        ws_endpoint: format!("ws://127.0.0.1:{}/realtime", port),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    };

    let (_producer, frame_rx) = frame_queue(4);
    let (event_tx, _event_rx) = mpsc::unbounded_channel();
    let handle = TranscriptionSession::new(config, test_credential()).spawn(frame_rx, event_tx);

    let result = handle.join().await;
    match result {
        Err(e) => assert!(e.is_retryable(), "refused connection should be retryable"),
        Ok(close) => panic!("expected a failure, got {:?}", close),
    }
}
