//! Per-tab stream handling.
//!
//! Each browser tab holds one WebSocket carrying the binary frame
//! protocol. The connection registers with its session on the first
//! non-zero RESIZE, then pumps frames both ways until disconnect or
//! shell exit. All outbound traffic funnels through one writer task so
//! frames never interleave.

use crate::protocol::{AckStatus, Frame};
use crate::pty::{Activity, ClientHandle, ClientId, Session, SessionRegistry};
use crate::transfer::TransferSlot;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

pub const PING_INTERVAL: Duration = Duration::from_secs(50);
pub const PONG_DEADLINE: Duration = Duration::from_secs(60);
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_client_id() -> ClientId {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Live streams per user, for SESSIONS_CHANGE fan-out. Keyed by user id,
/// independent of the per-session rosters, synchronized on its own.
#[derive(Clone, Default)]
pub struct UserStreams {
    inner: Arc<DashMap<String, Vec<(ClientId, UnboundedSender<Message>)>>>,
}

impl UserStreams {
    fn register(&self, user_id: &str, conn_id: ClientId, tx: UnboundedSender<Message>) {
        self.inner
            .entry(user_id.to_string())
            .or_default()
            .push((conn_id, tx));
    }

    fn remove(&self, user_id: &str, conn_id: ClientId) {
        if let Some(mut entry) = self.inner.get_mut(user_id) {
            entry.retain(|(id, _)| *id != conn_id);
        }
        self.inner.remove_if(user_id, |_, streams| streams.is_empty());
    }

    /// Tell every stream of `user_id` that the session list changed.
    pub fn notify_sessions_changed(&self, user_id: &str) {
        if let Some(streams) = self.inner.get(user_id) {
            let frame: Message = binary(Frame::SessionsChange);
            for (_, tx) in streams.iter() {
                let _ = tx.send(frame.clone());
            }
        }
    }
}

fn binary(frame: Frame) -> Message {
    Message::Binary(frame.encode().into())
}

/// Session-side delivery hooks for one connection. Everything becomes a
/// frame on the outbound queue; output gets the STDOUT type byte
/// prepended.
struct ConnHandle {
    tx: UnboundedSender<Message>,
    is_writer: Arc<AtomicBool>,
    client_id: ClientId,
}

impl ClientHandle for ConnHandle {
    fn output(&self, bytes: &[u8]) {
        if self.tx.send(binary(Frame::Stdout(bytes.to_vec()))).is_err() {
            debug!(client_id = self.client_id, "output dropped, stream gone");
        }
    }

    fn write_state(&self, writer: bool) {
        self.is_writer.store(writer, Ordering::SeqCst);
        let _ = self.tx.send(binary(Frame::WriteState { writer }));
    }

    fn size_changed(&self, cols: u16, rows: u16) {
        let _ = self.tx.send(binary(Frame::ResizeNotify { cols, rows }));
    }

    fn client_count(&self, count: u16) {
        let _ = self.tx.send(binary(Frame::ClientCount { count }));
    }
}

/// Serve one authenticated stream. `user_id` has already been verified;
/// session resolution failures close at the protocol level.
pub async fn handle_stream(
    socket: WebSocket,
    registry: Arc<SessionRegistry>,
    streams: UserStreams,
    user_id: String,
    session_id: String,
) {
    let session: Arc<Session> = match registry.get(&session_id) {
        Some(s) if s.user_id == user_id => s,
        Some(_) => {
            close_with(socket, "session not owned by caller").await;
            return;
        }
        None => {
            close_with(socket, "unknown session").await;
            return;
        }
    };
    if session.is_closed() {
        close_with(socket, "session closed").await;
        return;
    }

    let client_id = next_client_id();
    info!(client_id, session_id = %session_id, user_id = %user_id, "stream connected");

    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let write_task = tokio::spawn(write_pump(ws_sender, rx));

    streams.register(&user_id, client_id, tx.clone());

    let last_seen = Arc::new(Mutex::new(Instant::now()));
    let ping_task = tokio::spawn(ping_pump(tx.clone(), Arc::clone(&last_seen)));

    // Shell exit reaches every attached stream, whichever task saw it.
    let exit_task = tokio::spawn(exit_pump(session.exit_signal(), tx.clone()));

    let is_writer = Arc::new(AtomicBool::new(false));
    let mut registered = false;
    let mut slot = TransferSlot::default();

    while let Some(msg) = ws_receiver.next().await {
        *last_seen.lock() = Instant::now();
        match msg {
            Ok(Message::Binary(data)) => {
                let frame = match Frame::decode(&data) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(client_id, error = %e, "protocol violation");
                        let _ = tx.send(close_message("protocol violation"));
                        break;
                    }
                };
                match frame {
                    Frame::Stdin(input) => {
                        if registered && is_writer.load(Ordering::SeqCst) {
                            if let Err(e) = session.write_input(client_id, &input) {
                                warn!(client_id, error = %e, "input write failed");
                                break;
                            }
                        }
                    }
                    Frame::Resize { cols, rows } => {
                        if !registered {
                            // Nothing to join with until the tab reports a
                            // real viewport.
                            if cols == 0 || rows == 0 {
                                continue;
                            }
                            let handle = Arc::new(ConnHandle {
                                tx: tx.clone(),
                                is_writer: Arc::clone(&is_writer),
                                client_id,
                            });
                            if session.register_client(client_id, cols, rows, handle) {
                                registered = true;
                            } else {
                                let _ = tx.send(close_message("session closed"));
                                break;
                            }
                        } else {
                            let activity = if cols == 0 && rows == 0 {
                                Activity::Inactive
                            } else {
                                Activity::Active
                            };
                            session.set_activity(client_id, activity, cols, rows);
                        }
                    }
                    Frame::FileStart { size, name } => {
                        let ack = if !is_writer.load(Ordering::SeqCst) {
                            viewer_upload_rejected()
                        } else {
                            match session.cwd() {
                                Some(dir) => slot.start(&dir, &name, size),
                                None => Frame::FileAck {
                                    status: AckStatus::Error,
                                    message: "cannot resolve working directory".to_string(),
                                },
                            }
                        };
                        let _ = tx.send(binary(ack));
                    }
                    Frame::FileChunk { offset, data } => {
                        let ack = if !is_writer.load(Ordering::SeqCst) {
                            viewer_upload_rejected()
                        } else {
                            slot.chunk(offset, &data)
                        };
                        let _ = tx.send(binary(ack));
                    }
                    // Server-to-client frame types coming from a client
                    // carry no meaning here.
                    _ => {}
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = tx.send(Message::Pong(payload));
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Ok(Message::Text(_)) => {
                warn!(client_id, "unexpected text message");
                let _ = tx.send(close_message("protocol violation"));
                break;
            }
            Err(e) => {
                debug!(client_id, error = %e, "stream read failed");
                break;
            }
        }
    }

    slot.abort();
    streams.remove(&user_id, client_id);
    if registered {
        session.remove_client(client_id);
    }
    registry.remove_if_finished(&session_id);

    ping_task.abort();
    exit_task.abort();
    drop(tx);
    let _ = write_task.await;
    info!(client_id, session_id = %session_id, "stream disconnected");
}

fn viewer_upload_rejected() -> Frame {
    Frame::FileAck {
        status: AckStatus::Error,
        message: "viewer cannot upload files".to_string(),
    }
}

fn close_message(reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    }))
}

async fn close_with(mut socket: WebSocket, reason: &str) {
    debug!(reason, "rejecting stream");
    let _ = socket.send(close_message(reason)).await;
}

/// Drain the outbound queue onto the socket, one frame at a time, each
/// under the write deadline. Ends after a close frame, a failed write or
/// a missed deadline.
async fn write_pump(mut sender: SplitSink<WebSocket, Message>, mut rx: UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        match tokio::time::timeout(WRITE_DEADLINE, sender.send(msg)).await {
            Ok(Ok(())) => {
                if is_close {
                    break;
                }
            }
            Ok(Err(e)) => {
                debug!(error = %e, "stream write failed");
                break;
            }
            Err(_) => {
                warn!("write deadline exceeded");
                break;
            }
        }
    }
}

/// Ping every [`PING_INTERVAL`]; close when nothing (pong or otherwise)
/// has arrived within [`PONG_DEADLINE`].
async fn ping_pump(tx: UnboundedSender<Message>, last_seen: Arc<Mutex<Instant>>) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if last_seen.lock().elapsed() > PONG_DEADLINE {
            warn!("liveness deadline missed, closing stream");
            let _ = tx.send(close_message("liveness timeout"));
            return;
        }
        if tx.send(Message::Ping(Vec::new().into())).is_err() {
            return;
        }
    }
}

/// Wait for the session's exit signal and forward it as an EXIT frame,
/// then close.
async fn exit_pump(
    mut exit_rx: tokio::sync::watch::Receiver<Option<i32>>,
    tx: UnboundedSender<Message>,
) {
    loop {
        let code = *exit_rx.borrow();
        if let Some(code) = code {
            let _ = tx.send(binary(Frame::Exit { code: code as u32 }));
            let _ = tx.send(Message::Close(None));
            return;
        }
        if exit_rx.changed().await.is_err() {
            return;
        }
    }
}
