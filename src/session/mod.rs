//! Authenticated live channel with automatic reconnection.
//!
//! [`SessionManager::open`] spawns one task that owns the connection. The
//! task connects, decodes every inbound frame into a [`StreamEvent`] and
//! publishes it on a broadcast channel. When the connection drops without
//! the caller asking for it, the task force-closes it, announces
//! [`SessionEvent::Lost`] so dependents can clear live state, waits the
//! reconnect delay and tries again, forever. [`SessionHandle::close`] (or
//! dropping the handle) ends the task and cancels any pending retry.

mod event;
mod transport;
mod ws;

pub use event::StreamEvent;
pub use transport::{Connection, Connector};
pub use ws::WsConnector;

use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use crate::config::Config;
use crate::error::TrackerError;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller closed the session. Terminal.
    Requested,
    /// The connection failed or was dropped by the peer; a retry is pending.
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed(CloseReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened,
    Message(StreamEvent),
    /// The live connection is gone. Anything derived from it is stale.
    Lost { reason: String },
}

/// Creates sessions against one live endpoint.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    ws_base: String,
    reconnect_delay: Duration,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, config: &Config) -> Self {
        Self {
            connector,
            ws_base: config.ws_url.clone(),
            reconnect_delay: config.reconnect_delay,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    fn url_for(&self, token: &str) -> Result<Url, TrackerError> {
        let raw = format!("{}/ws/track/", self.ws_base.trim_end_matches('/'));
        let mut url: Url = raw
            .parse()
            .map_err(|e| TrackerError::InvalidEndpoint(format!("{raw}: {e}")))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// Starts a session for `token`.
    ///
    /// Returns the handle and a first event receiver, subscribed before the
    /// session task runs so no event is missed.
    pub fn open(
        &self,
        token: &str,
    ) -> Result<(SessionHandle, broadcast::Receiver<SessionEvent>), TrackerError> {
        let url = self.url_for(token)?;

        let (events, first_rx) = broadcast::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            connector: self.connector.clone(),
            url,
            reconnect_delay: self.reconnect_delay,
            events: events.clone(),
            state: state_tx,
            shutdown: shutdown_rx,
        };
        let span = tracing::info_span!("session", endpoint = %self.ws_base);
        let task = tokio::spawn(worker.run().instrument(span));

        let handle = SessionHandle {
            events,
            state: state_rx,
            shutdown: shutdown_tx,
            task: Some(task),
        };
        Ok((handle, first_rx))
    }
}

pub struct SessionHandle {
    events: broadcast::Sender<SessionEvent>,
    state: watch::Receiver<SessionState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// New event receiver. Drop it to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Closes the session for good. Idempotent.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Closes the session and waits for the task to release the connection.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

enum Exit {
    Shutdown,
    Lost(String),
}

struct Worker {
    connector: Arc<dyn Connector>,
    url: Url,
    reconnect_delay: Duration,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<SessionState>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            self.state.send_replace(SessionState::Connecting);
            debug!("Connecting");

            let attempt = tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => break,
                attempt = self.connector.connect(&self.url) => attempt,
            };

            let reason = match attempt {
                Ok(mut conn) => {
                    self.state.send_replace(SessionState::Open);
                    let _ = self.events.send(SessionEvent::Opened);
                    info!("Session open");

                    let exit = self.pump(conn.as_mut()).await;
                    conn.close().await;
                    match exit {
                        Exit::Shutdown => break,
                        Exit::Lost(reason) => reason,
                    }
                }
                Err(e) => format!("connect failed: {e}"),
            };

            self.state.send_replace(SessionState::Closed(CloseReason::Lost));
            let _ = self.events.send(SessionEvent::Lost {
                reason: reason.clone(),
            });
            warn!(
                reason = %reason,
                retry_in_ms = self.reconnect_delay.as_millis() as u64,
                "Session lost, scheduling reconnect"
            );

            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.state
            .send_replace(SessionState::Closed(CloseReason::Requested));
        info!("Session closed");
    }

    /// Forwards frames until the connection ends or shutdown is requested.
    async fn pump(&mut self, conn: &mut dyn Connection) -> Exit {
        loop {
            let frame = tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => return Exit::Shutdown,
                frame = conn.next_frame() => frame,
            };

            match frame {
                None => return Exit::Lost("closed by peer".to_string()),
                Some(Err(e)) => return Exit::Lost(e.to_string()),
                Some(Ok(text)) => match StreamEvent::decode(&text) {
                    Ok(event) => {
                        if let StreamEvent::Unknown { raw } = &event {
                            warn!(frame = %raw, "Unknown message type");
                        }
                        let _ = self.events.send(SessionEvent::Message(event));
                    }
                    Err(e) => warn!(error = %e, frame = %text, "Dropping malformed frame"),
                },
            }
        }
    }
}

/// Resolves once shutdown is flagged or the handle is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
