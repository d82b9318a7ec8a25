// End-to-end pipeline run: WAV replay -> token endpoint -> mock
// recognizer -> aggregated transcript with coaching cues.

use futures::{SinkExt, StreamExt};
use speech_coach::audio::{CaptureConfig, CaptureKind, CaptureSourceFactory, ReplayPace};
use speech_coach::config::{
    AudioConfig, Config, FeedbackConfig, RecognizerConfig, RetryConfig, ServiceConfig,
    SessionTimeoutConfig,
};
use speech_coach::feedback::CueKind;
use speech_coach::session::{AudioWireFormat, HandshakeMode};
use speech_coach::{CoachEvent, CoachingPipeline};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const SESSION_BEGINS: &str = r#"{"message_type":"SessionBegins","session_id":"s1"}"#;
const FINAL: &str = r#"{"message_type":"FinalTranscript","text":"hello world","audio_start":0,"audio_end":500,"confidence":0.9,"words":[]}"#;

/// Half a second of silence, 16kHz mono 16-bit.
fn write_wav_fixture(path: &Path) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..8000 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Serve one token request with a canned response.
async fn token_endpoint(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/v2/realtime/token", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut buf = vec![0u8; 8192];
        let mut read = 0;
        loop {
            let n = socket.read(&mut buf[read..]).await.unwrap();
            if n == 0 {
                break;
            }
            read += n;
            let text = String::from_utf8_lossy(&buf[..read]).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text
                    .lines()
                    .find_map(|line| {
                        line.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if read >= header_end + 4 + content_length {
                    break;
                }
            }
        }

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
    });

    url
}

/// Mock recognizer: greets with SessionBegins, commits one final transcript
/// once audio starts flowing, then follows the close handshake.
async fn mock_recognizer() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();
        ws.send(Message::text(SESSION_BEGINS)).await.unwrap();

        let mut audio_frames = 0usize;
        let mut committed = false;
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                    audio_frames += 1;
                    if !committed && audio_frames >= 2 {
                        committed = true;
                        ws.send(Message::text(FINAL)).await.unwrap();
                    }
                }
                Ok(Message::Close(_)) => {
                    let _ = ws.close(None).await;
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    port
}

fn test_config(token_url: String, ws_port: u16) -> Config {
    Config {
        service: ServiceConfig {
            name: "speech-coach-test".to_string(),
        },
        recognizer: RecognizerConfig {
            token_endpoint: token_url,
            ws_endpoint: format!("ws://127.0.0.1:{}/realtime", ws_port),
            api_key: "VALIDKEY".to_string(),
            token_ttl_secs: 300,
            handshake: HandshakeMode::TokenQuery,
            audio_wire: AudioWireFormat::JsonBase64,
        },
        audio: AudioConfig::default(),
        session: SessionTimeoutConfig {
            connect_timeout_secs: 5,
            close_timeout_secs: 2,
            drain_on_stop: true,
        },
        retry: RetryConfig::default(),
        feedback: FeedbackConfig::default(),
    }
}

fn capture_for(path: PathBuf) -> Box<dyn speech_coach::audio::CaptureSource> {
    CaptureSourceFactory::create(
        CaptureKind::WavFile {
            path,
            pace: ReplayPace::Fast,
        },
        CaptureConfig::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_pipeline_produces_transcript_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let wav_path = dir.path().join("fixture.wav");
    write_wav_fixture(&wav_path);

    let token_url = token_endpoint("200 OK", r#"{"token":"abc123"}"#).await;
    let ws_port = mock_recognizer().await;

    let mut pipeline = CoachingPipeline::new(test_config(token_url, ws_port)).unwrap();
    let mut events = pipeline.event_stream().unwrap();

    let report = timeout(Duration::from_secs(15), pipeline.run(capture_for(wav_path)))
        .await
        .expect("pipeline run timed out")
        .unwrap();

    assert_eq!(report.transcript, "hello world");
    assert_eq!(report.stats.segments_finalized, 1);
    assert!(report.stats.frames_encoded >= 2);
    assert_eq!(report.stats.reconnect_attempts, 0);
    assert_eq!(report.segments[0].text, "hello world");
    assert!(!report.segments[0].best_effort);

    // "hello world" carries no filler words.
    assert!(report
        .recent_cues
        .iter()
        .all(|cue| cue.kind != CueKind::Filler));

    let mut saw_segment = false;
    let mut saw_end = false;
    while let Ok(event) = events.try_recv() {
        match event {
            CoachEvent::SegmentFinalized { segment, cues } => {
                saw_segment = true;
                assert_eq!(segment.text, "hello world");
                assert!(cues.iter().all(|cue| cue.kind != CueKind::Filler));
            }
            CoachEvent::Ended { .. } => saw_end = true,
            _ => {}
        }
    }
    assert!(saw_segment, "collaborators are notified of finalized segments");
    assert!(saw_end, "collaborators see the terminal notification");
}

#[tokio::test]
async fn test_pipeline_surfaces_auth_failure_as_could_not_start() {
    let dir = tempfile::tempdir().unwrap();
    let wav_path = dir.path().join("fixture.wav");
    write_wav_fixture(&wav_path);

    let token_url = token_endpoint("401 Unauthorized", r#"{"error":"invalid api key"}"#).await;
    // No recognizer needed: the pipeline must fail before connecting.
    let config = test_config(token_url, 1);

    let pipeline = CoachingPipeline::new(config).unwrap();
    let error = timeout(Duration::from_secs(10), pipeline.run(capture_for(wav_path)))
        .await
        .expect("pipeline run timed out")
        .unwrap_err();

    let rendered = format!("{:#}", error);
    assert!(
        rendered.contains("could not start"),
        "auth failures read as a start failure, not an interruption: {}",
        rendered
    );
}

#[tokio::test]
async fn test_pipeline_rejects_missing_api_key() {
    let mut config = test_config("http://127.0.0.1:1/token".to_string(), 1);
    config.recognizer.api_key = String::new();

    assert!(CoachingPipeline::new(config).is_err());
}
