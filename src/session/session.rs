use base64::Engine;
use chrono::{DateTime, Utc};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::audio::{EncodedFrame, FrameProducer, PushOutcome};
use crate::auth::Credential;

use super::config::SessionConfig;
use super::events::{parse_inbound, AudioEnvelope, AudioWireFormat, TransportEvent};
use super::handshake::{strategy_for, HandshakeStrategy};
use super::state::{SessionClose, SessionError, SessionState, StopMode};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// One streaming connection to the remote recognizer.
///
/// The session owns the socket for its whole lifetime: handshake, audio
/// upload, event download, and closure all run on a single spawned task, so
/// session state never needs a lock. Frames are sent strictly in capture
/// order and events are forwarded strictly in arrival order.
pub struct TranscriptionSession {
    config: SessionConfig,
    credential: Credential,
}

impl TranscriptionSession {
    /// Create a session in `Idle`. Nothing touches the network until
    /// [`TranscriptionSession::spawn`].
    pub fn new(config: SessionConfig, credential: Credential) -> Self {
        Self { config, credential }
    }

    /// Start the session task.
    ///
    /// `frames` is the consumer end of the outbound frame queue; `events`
    /// receives every transport event in arrival order.
    pub fn spawn(
        self,
        frames: mpsc::Receiver<EncodedFrame>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> SessionHandle {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let strategy = strategy_for(self.config.handshake);

        let task = tokio::spawn(run_session(
            self.config,
            self.credential,
            strategy,
            frames,
            events,
            state_tx,
            stop_rx,
        ));

        SessionHandle {
            state_rx,
            stop_tx,
            task,
        }
    }
}

/// Caller-side handle to a running session.
pub struct SessionHandle {
    state_rx: watch::Receiver<SessionState>,
    stop_tx: mpsc::Sender<StopMode>,
    task: JoinHandle<Result<SessionClose, SessionError>>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch receiver for state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Request a graceful stop. Idempotent; a second request is ignored.
    pub fn stop(&self, mode: StopMode) {
        let _ = self.stop_tx.try_send(mode);
    }

    /// Bind a frame producer to this session's state so that pushes into a
    /// terminal session fail instead of silently vanishing.
    pub fn audio_sender(&self, producer: FrameProducer) -> AudioSender {
        AudioSender {
            producer,
            state: self.state_rx.clone(),
        }
    }

    /// Wait for the session task to finish.
    pub async fn join(self) -> Result<SessionClose, SessionError> {
        self.task
            .await
            .unwrap_or_else(|e| Err(SessionError::Internal(e.to_string())))
    }
}

/// State-gated producer handle for the outbound frame queue.
pub struct AudioSender {
    producer: FrameProducer,
    state: watch::Receiver<SessionState>,
}

impl AudioSender {
    /// Hand a frame to the session without blocking.
    ///
    /// Frames pushed while the session is connecting or authenticating are
    /// buffered and sent once the session is active. Pushing into a closing
    /// or terminal session fails with `SessionClosed`.
    pub fn send(&self, frame: EncodedFrame) -> Result<PushOutcome, SessionError> {
        if !self.state.borrow().accepts_audio() {
            return Err(SessionError::SessionClosed);
        }
        Ok(self.producer.try_push(frame))
    }

    pub fn dropped_frames(&self) -> u64 {
        self.producer.dropped_frames()
    }
}

async fn run_session(
    config: SessionConfig,
    credential: Credential,
    strategy: Box<dyn HandshakeStrategy>,
    mut frames: mpsc::Receiver<EncodedFrame>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state_tx: watch::Sender<SessionState>,
    mut stop_rx: mpsc::Receiver<StopMode>,
) -> Result<SessionClose, SessionError> {
    let result = drive(
        &config,
        &credential,
        strategy.as_ref(),
        &mut frames,
        &events,
        &state_tx,
        &mut stop_rx,
    )
    .await;

    if let Err(e) = &result {
        warn!("Session failed: {}", e);
        let _ = state_tx.send_replace(SessionState::Failed(e.failure_kind()));
    }

    result
}

async fn drive(
    config: &SessionConfig,
    credential: &Credential,
    strategy: &dyn HandshakeStrategy,
    frames: &mut mpsc::Receiver<EncodedFrame>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    state_tx: &watch::Sender<SessionState>,
    stop_rx: &mut mpsc::Receiver<StopMode>,
) -> Result<SessionClose, SessionError> {
    let _ = state_tx.send_replace(SessionState::Connecting);

    // The full URL may carry the token, so only the endpoint is logged.
    debug!("Connecting to recognizer at {}", config.ws_endpoint);
    let url = strategy.request_url(&config.ws_endpoint, credential.token(), config.sample_rate);

    let (ws, _response) = match timeout(config.connect_timeout, connect_async(url)).await {
        Err(_) => return Err(SessionError::ConnectTimeout),
        Ok(Err(e)) if is_auth_rejection(&e) => return Err(SessionError::AuthRejected(e.to_string())),
        Ok(Err(e)) => return Err(SessionError::Transport(e)),
        Ok(Ok(pair)) => pair,
    };
    let (mut sink, mut stream) = ws.split();

    let _ = state_tx.send_replace(SessionState::Authenticating);
    if let Some(frame) = strategy.auth_frame(credential.token()) {
        sink.send(Message::text(frame)).await?;
    }

    let remote_expiry = match timeout(
        config.connect_timeout,
        await_session_begins(events, &mut stream),
    )
    .await
    {
        Err(_) => return Err(SessionError::ConnectTimeout),
        Ok(Err(e)) => return Err(e),
        Ok(Ok(expiry)) => expiry,
    };

    let _ = state_tx.send_replace(SessionState::Active);

    let mut effective_expiry = credential.expires_at();
    if let Some(remote) = remote_expiry {
        effective_expiry = effective_expiry.min(remote);
    }

    active_loop(
        config,
        effective_expiry,
        frames,
        stop_rx,
        events,
        state_tx,
        &mut sink,
        &mut stream,
    )
    .await
}

/// Wait for the recognizer to acknowledge the session.
///
/// Both handshake variants end here; the only difference upstream is
/// whether an auth frame was sent first.
async fn await_session_begins(
    events: &mpsc::UnboundedSender<TransportEvent>,
    stream: &mut WsSource,
) -> Result<Option<DateTime<Utc>>, SessionError> {
    while let Some(msg) = stream.next().await {
        match msg {
            Err(e) => return Err(SessionError::Transport(e)),
            Ok(Message::Text(raw)) => match parse_inbound(raw.as_str()) {
                Ok(TransportEvent::SessionBegins {
                    session_id,
                    expires_at,
                }) => {
                    info!("Recognizer session established: {}", session_id);
                    forward(
                        events,
                        TransportEvent::SessionBegins {
                            session_id,
                            expires_at,
                        },
                    );
                    return Ok(expires_at);
                }
                Ok(TransportEvent::Error { message, .. }) => {
                    return Err(SessionError::AuthRejected(message));
                }
                Ok(_) => warn!("Ignoring transcript event before session start"),
                Err(e) => warn!(
                    "Skipping unparseable handshake payload ({}): {}",
                    e,
                    raw.as_str()
                ),
            },
            Ok(Message::Close(frame)) => {
                let (code, reason) = close_details(frame);
                // Application close codes during the handshake are rejections.
                if code >= 4000 {
                    return Err(SessionError::AuthRejected(format!(
                        "close code {}: {}",
                        code, reason
                    )));
                }
                return Err(SessionError::AbnormalClose { code, reason });
            }
            Ok(_) => {}
        }
    }

    Err(SessionError::AbnormalClose {
        code: 1006,
        reason: "connection lost during handshake".to_string(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn active_loop(
    config: &SessionConfig,
    effective_expiry: DateTime<Utc>,
    frames: &mut mpsc::Receiver<EncodedFrame>,
    stop_rx: &mut mpsc::Receiver<StopMode>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    state_tx: &watch::Sender<SessionState>,
    sink: &mut WsSink,
    stream: &mut WsSource,
) -> Result<SessionClose, SessionError> {
    let margin = chrono::Duration::from_std(config.expiry_margin)
        .unwrap_or_else(|_| chrono::Duration::zero());
    let close_ahead = effective_expiry - margin;
    let until_expiry = (close_ahead - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    let expiry = tokio::time::sleep(until_expiry);
    tokio::pin!(expiry);

    let mut frames_open = true;

    loop {
        tokio::select! {
            maybe_stop = stop_rx.recv() => {
                // A dropped handle counts as a stop without draining.
                let mode = maybe_stop.unwrap_or(StopMode { drain: false });
                return close_gracefully(
                    config, frames, events, state_tx, sink, stream,
                    mode.drain, SessionClose::Stopped,
                ).await;
            }

            () = &mut expiry => {
                info!("Credential expiry approaching, closing the session proactively");
                return close_gracefully(
                    config, frames, events, state_tx, sink, stream,
                    false, SessionClose::CredentialExpired,
                ).await;
            }

            inbound = stream.next() => match inbound {
                None => {
                    return Err(SessionError::AbnormalClose {
                        code: 1006,
                        reason: "connection lost".to_string(),
                    });
                }
                Some(Err(e)) => return Err(SessionError::Transport(e)),
                Some(Ok(msg)) => {
                    if let Some(close) = handle_active_message(events, msg)? {
                        let _ = state_tx.send_replace(SessionState::Closed);
                        return Ok(close);
                    }
                }
            },

            maybe_frame = frames.recv(), if frames_open => match maybe_frame {
                Some(frame) => send_frame(sink, config.audio_wire, frame).await?,
                None => frames_open = false,
            },
        }
    }
}

/// Handle one inbound message while active. Returns `Some` when the remote
/// ended the session normally.
fn handle_active_message(
    events: &mpsc::UnboundedSender<TransportEvent>,
    msg: Message,
) -> Result<Option<SessionClose>, SessionError> {
    match msg {
        Message::Text(raw) => {
            match parse_inbound(raw.as_str()) {
                Ok(event) => {
                    if let TransportEvent::Error { code, message } = &event {
                        warn!("Recognizer reported an error ({:?}): {}", code, message);
                    }
                    forward(events, event);
                }
                // A payload we cannot parse is skipped, not fatal.
                Err(e) => warn!(
                    "Skipping unparseable recognizer payload ({}): {}",
                    e,
                    raw.as_str()
                ),
            }
            Ok(None)
        }
        Message::Close(frame) => {
            let (code, reason) = close_details(frame);
            forward(
                events,
                TransportEvent::Closed {
                    code,
                    reason: reason.clone(),
                },
            );
            if code == 1000 {
                info!("Recognizer closed the session normally");
                Ok(Some(SessionClose::RemoteClosed))
            } else {
                Err(SessionError::AbnormalClose { code, reason })
            }
        }
        Message::Binary(_) => {
            warn!("Ignoring unexpected binary frame from recognizer");
            Ok(None)
        }
        // Transport-level frames, answered by the websocket layer.
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(None),
    }
}

#[allow(clippy::too_many_arguments)]
async fn close_gracefully(
    config: &SessionConfig,
    frames: &mut mpsc::Receiver<EncodedFrame>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    state_tx: &watch::Sender<SessionState>,
    sink: &mut WsSink,
    stream: &mut WsSource,
    drain: bool,
    outcome: SessionClose,
) -> Result<SessionClose, SessionError> {
    let _ = state_tx.send_replace(SessionState::Closing);

    if drain {
        while let Ok(frame) = frames.try_recv() {
            if let Err(e) = send_frame(sink, config.audio_wire, frame).await {
                warn!("Drain interrupted, discarding remaining frames: {}", e);
                break;
            }
        }
    } else {
        while frames.try_recv().is_ok() {}
    }

    let close = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(close))).await {
        warn!("Failed to send close frame: {}", e);
    }

    if timeout(config.close_timeout, await_close_ack(events, stream))
        .await
        .is_err()
    {
        warn!("Timed out waiting for close acknowledgment, forcing closure");
    }

    let reason = match outcome {
        SessionClose::Stopped => "client stop",
        SessionClose::CredentialExpired => "credential expiry",
        SessionClose::RemoteClosed => "remote close",
    };
    forward(
        events,
        TransportEvent::Closed {
            code: 1000,
            reason: reason.to_string(),
        },
    );

    let _ = state_tx.send_replace(SessionState::Closed);
    info!("Session closed ({})", reason);
    Ok(outcome)
}

/// Consume the stream until the close acknowledgment, still forwarding any
/// transcript events that were already in flight.
async fn await_close_ack(events: &mpsc::UnboundedSender<TransportEvent>, stream: &mut WsSource) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) => return,
            Ok(Message::Text(raw)) => match parse_inbound(raw.as_str()) {
                Ok(event) => forward(events, event),
                Err(e) => debug!("Skipping unparseable payload during close: {}", e),
            },
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

async fn send_frame(
    sink: &mut WsSink,
    wire: AudioWireFormat,
    frame: EncodedFrame,
) -> Result<(), SessionError> {
    let message = match wire {
        AudioWireFormat::JsonBase64 => {
            let audio = base64::engine::general_purpose::STANDARD.encode(&frame.payload);
            let envelope = serde_json::to_string(&AudioEnvelope { audio_data: &audio })?;
            Message::text(envelope)
        }
        AudioWireFormat::Binary => Message::binary(frame.payload),
    };
    sink.send(message).await?;
    Ok(())
}

fn forward(events: &mpsc::UnboundedSender<TransportEvent>, event: TransportEvent) {
    if events.send(event).is_err() {
        debug!("Event consumer dropped, discarding recognizer event");
    }
}

fn close_details(frame: Option<CloseFrame>) -> (u16, String) {
    match frame {
        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
        None => (1005, String::new()),
    }
}

fn is_auth_rejection(error: &tungstenite::Error) -> bool {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            status == 401 || status == 403
        }
        _ => false,
    }
}
