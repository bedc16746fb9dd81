//! Socket lifecycle task.
//!
//! The state machine is `Disconnected → Connecting → Connected →
//! (Disconnected | ReconnectScheduled → Connecting)`, with a terminal
//! `Failed` once the attempt ceiling is reached. A manual logout closes with
//! the normal-closure code and never schedules a reconnect.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use palaver_shared::constants::RECONNECT_BASE_MS;
use palaver_shared::protocol::{ClientFrame, ServerFrame};

use crate::backoff::ReconnectState;
use crate::error::NetError;

/// Connection manager states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectScheduled,
    Failed,
}

/// Commands sent *into* the socket task.
#[derive(Debug)]
pub enum SocketCommand {
    /// Send one frame to the server.
    Send(ClientFrame),
    /// User-initiated close: normal closure, no reconnect.
    Logout,
}

/// Notifications sent *from* the socket task to the application.
#[derive(Debug, Clone)]
pub enum SocketNotification {
    /// Transport open and identity handshake complete; the application
    /// should run its full resync now.
    Connected { user: String },
    /// A validated frame arrived.
    Frame(ServerFrame),
    /// The connection dropped abnormally.
    ConnectionLost,
    /// A reconnect attempt is scheduled.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The attempt ceiling was reached; terminal until a manual restart.
    Failed,
    /// Manual logout completed.
    LoggedOut,
}

/// Configuration for spawning the socket task.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// WebSocket URL of the chat server.
    pub url: String,
    /// Already-issued identity token presented in the `Auth` frame.
    pub token: String,
    /// Base reconnect delay in milliseconds.
    pub base_reconnect_ms: u64,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            base_reconnect_ms: RECONNECT_BASE_MS,
        }
    }
}

/// Why a connection attempt or session ended.
enum SessionEnd {
    /// Abnormal, with the cause: schedule a reconnect.
    Abnormal(NetError),
    /// Normal closure (logout or server-initiated 1000): stop for good.
    Normal,
    /// The command channel is gone; the application is shutting down.
    CommandsClosed,
}

/// Spawn the socket task.
///
/// Returns channels for sending commands and receiving notifications. The
/// task runs until logout, terminal failure, or the command channel closing.
pub fn spawn_socket(
    config: SocketConfig,
) -> (mpsc::Sender<SocketCommand>, mpsc::Receiver<SocketNotification>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<SocketCommand>(64);
    let (notif_tx, notif_rx) = mpsc::channel::<SocketNotification>(64);

    tokio::spawn(socket_task(config, cmd_rx, notif_tx));

    (cmd_tx, notif_rx)
}

async fn socket_task(
    config: SocketConfig,
    mut cmd_rx: mpsc::Receiver<SocketCommand>,
    notif_tx: mpsc::Sender<SocketNotification>,
) {
    let mut reconnect = ReconnectState::new();
    let mut state = ConnState::Disconnected;
    debug!(?state, "connection manager starting");

    loop {
        state = ConnState::Connecting;
        debug!(url = %config.url, ?state, "connecting");

        let end = match connect_async(config.url.as_str()).await {
            Ok((stream, _response)) => {
                reconnect.reset();
                state = ConnState::Connected;
                debug!(?state, "transport open");
                run_session(&config, stream, &mut cmd_rx, &notif_tx).await
            }
            Err(e) => SessionEnd::Abnormal(e.into()),
        };

        match end {
            SessionEnd::Normal => {
                state = ConnState::Disconnected;
                debug!(?state, "closed normally");
                let _ = notif_tx.send(SocketNotification::LoggedOut).await;
                return;
            }
            SessionEnd::CommandsClosed => return,
            SessionEnd::Abnormal(cause) => {
                warn!(error = %cause, "connection lost");
                let _ = notif_tx.send(SocketNotification::ConnectionLost).await;
            }
        }

        let delay = match reconnect.schedule(config.base_reconnect_ms) {
            Some(delay) => delay,
            None => {
                state = ConnState::Failed;
                warn!(attempts = reconnect.attempts, ?state, "reconnect ceiling reached");
                let _ = notif_tx.send(SocketNotification::Failed).await;
                return;
            }
        };
        state = ConnState::ReconnectScheduled;

        info!(
            attempt = reconnect.attempts,
            delay_ms = delay.as_millis() as u64,
            ?state,
            "reconnect scheduled"
        );
        let _ = notif_tx
            .send(SocketNotification::ReconnectScheduled {
                attempt: reconnect.attempts,
                delay,
            })
            .await;

        // The wait doubles as the cancellation point: a logout while the
        // timer runs abandons the reconnect entirely.
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                reconnect.begin_attempt();
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(SocketCommand::Logout) => {
                    let _ = notif_tx.send(SocketNotification::LoggedOut).await;
                    return;
                }
                Some(SocketCommand::Send(frame)) => {
                    debug!(?frame, "dropping frame while disconnected");
                    reconnect.begin_attempt();
                }
                None => return,
            }
        }
    }
}

/// Drive one open connection until it ends, pumping commands out and frames
/// in. Malformed inbound payloads are dropped here, at the boundary.
async fn run_session(
    config: &SocketConfig,
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    cmd_rx: &mut mpsc::Receiver<SocketCommand>,
    notif_tx: &mpsc::Sender<SocketNotification>,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();

    // Identity handshake: present the token before anything else.
    let auth = ClientFrame::Auth {
        token: config.token.clone(),
    };
    match auth.to_text() {
        Ok(text) => {
            if let Err(e) = write.send(WsMessage::Text(text)).await {
                return SessionEnd::Abnormal(e.into());
            }
        }
        Err(e) => return SessionEnd::Abnormal(NetError::Encoding(e)),
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SocketCommand::Send(frame)) => {
                    let text = match frame.to_text() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "dropping unencodable frame");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(WsMessage::Text(text)).await {
                        return SessionEnd::Abnormal(e.into());
                    }
                }
                Some(SocketCommand::Logout) => {
                    let _ = write
                        .send(WsMessage::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "logout".into(),
                        })))
                        .await;
                    info!("logged out");
                    return SessionEnd::Normal;
                }
                None => return SessionEnd::CommandsClosed,
            },

            msg = read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    match ServerFrame::from_text(&text) {
                        Ok(ServerFrame::AuthOk { user }) => {
                            info!(user = %user, "identity handshake complete");
                            let _ = notif_tx
                                .send(SocketNotification::Connected { user })
                                .await;
                        }
                        Ok(frame) => {
                            let _ = notif_tx.send(SocketNotification::Frame(frame)).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "dropping malformed frame");
                        }
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let normal = matches!(
                        &frame,
                        Some(f) if f.code == CloseCode::Normal
                    );
                    info!(?frame, normal, "server closed connection");
                    return if normal {
                        SessionEnd::Normal
                    } else {
                        let reason = frame
                            .map(|f| format!("{}: {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "no close frame details".into());
                        SessionEnd::Abnormal(NetError::AbnormalClose(reason))
                    };
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Binary(_))) => {
                    debug!("ignoring unexpected binary frame");
                }
                Some(Err(e)) => return SessionEnd::Abnormal(e.into()),
                None => return SessionEnd::Abnormal(NetError::StreamEnded),
            }
        }
    }
}
