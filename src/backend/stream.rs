//! Backend event stream.
//!
//! One WebSocket connection per bound session delivers streaming reply
//! fragments and lifecycle notifications. Messages reach the handler in wire
//! order; malformed frames are dropped silently. The connection reconnects
//! with a fixed 5 second backoff while running and closes with a
//! "going away" frame on stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

pub type StreamHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

pub struct EventStream {
    base_url: String,
    running: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventStream {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            running: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
            worker: Mutex::new(None),
        }
    }

    fn ws_url(&self, session_id: &str) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{base}/ws/{session_id}")
    }

    /// Connect and begin delivering messages. At most one connection is
    /// active per stream; a second connect is ignored.
    pub fn connect(&self, session_id: &str, on_message: StreamHandler) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let url = self.ws_url(session_id);
        let running = Arc::clone(&self.running);
        let stop_signal = Arc::clone(&self.stop_signal);
        let handle = tokio::spawn(async move {
            run_loop(url, running, stop_signal, on_message).await;
        });
        *self.worker.lock() = Some(handle);
    }

    /// Close gracefully and stop reconnecting.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.stop_signal.notify_waiters();
        if let Some(handle) = self.worker.lock().take() {
            // The worker exits on its own after the close handshake; abort is
            // only the backstop for a worker stuck in connect.
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                handle.abort();
            });
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.stop_signal.notify_waiters();
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

async fn run_loop(
    url: String,
    running: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    on_message: StreamHandler,
) {
    while running.load(Ordering::Acquire) {
        match connect_async(url.as_str()).await {
            Ok((mut ws, _)) => {
                debug!(url, "Event stream connected");
                loop {
                    tokio::select! {
                        incoming = ws.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                // Best-effort: parse errors are dropped.
                                if let Ok(value) = serde_json::from_str(text.as_str()) {
                                    on_message(value);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(error = %err, "Event stream read failed");
                                break;
                            }
                        },
                        _ = stop_signal.notified() => {
                            let frame = CloseFrame {
                                code: CloseCode::Away,
                                reason: "going away".into(),
                            };
                            let _ = ws.send(Message::Close(Some(frame))).await;
                            let _ = ws.close(None).await;
                            return;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(url, error = %err, "Event stream connect failed");
            }
        }

        if !running.load(Ordering::Acquire) {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            _ = stop_signal.notified() => return,
        }
    }
}
