//! Live event stream for a running batch.
//!
//! An [`EventStream`] keeps at most one connection open, scoped to the batch it
//! was attached to. Frames are decoded and handed out in receipt order through
//! [`EventStream::next_signal`]. When the connection drops without a `detach`,
//! the session waits a fixed delay and connects again with the same batch id,
//! until a `done` frame arrives or the caller detaches.
//!
//! Events the backend emitted while no connection was open are not replayed:
//! the protocol has no resume point, so a reconnect only sees what is sent
//! after it.
//!
//! Every attach is tagged with a generation number. Signals produced by an
//! older generation are discarded, so a fast detach/attach sequence never
//! leaks events from the superseded connection.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::HttpBackend;
use crate::config;
use crate::error::{DashError, DashResult};
use crate::events::{BatchId, ProgressEvent, decode_frame};

/// Raw text frames of one physical connection
pub type FrameStream = Pin<Box<dyn Stream<Item = DashResult<String>> + Send>>;

/// Opens the streaming connection for a batch
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, batch: &BatchId) -> DashResult<FrameStream>;
}

/// WebSocket connector for the master's `websocket/<batch>` endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    backend: HttpBackend,
}

impl WsConnector {
    pub fn new(backend: HttpBackend) -> Self {
        Self { backend }
    }

    pub fn url_for(&self, batch: &BatchId) -> DashResult<Url> {
        self.backend.events_url(batch)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, batch: &BatchId) -> DashResult<FrameStream> {
        let url = self.url_for(batch)?;
        debug!(%url, "opening event stream");

        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| DashError::ConnectionLost(e.to_string()))?;

        let frames = socket.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => Some(
                    String::from_utf8(bytes.to_vec()).map_err(|e| DashError::ProtocolDecode(e.to_string())),
                ),
                Ok(_) => None,
                Err(e) => Some(Err(DashError::ConnectionLost(e.to_string()))),
            }
        });

        Ok(frames.boxed())
    }
}

/// What the session reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// A connection for `batch` is open
    Connected { batch: BatchId, attempt: u32 },
    /// A decoded frame, in receipt order
    Event(ProgressEvent),
    /// The connection closed unexpectedly; a reconnect is scheduled
    Lost { batch: BatchId, attempt: u32, reason: String },
    /// The reconnect cap was reached; the session stopped retrying
    GaveUp { batch: BatchId, attempts: u32 },
    /// The owner detached
    Detached { batch: BatchId },
}

/// Reconnect policy
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub reconnect_delay: Duration,
    /// `None` retries forever
    pub max_reconnects: Option<u32>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let timing = &config::get().timing;
        Self {
            reconnect_delay: timing.reconnect_delay,
            max_reconnects: timing.max_reconnects,
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn max_reconnects(mut self, max: Option<u32>) -> Self {
        self.max_reconnects = max;
        self
    }
}

struct Envelope {
    generation: u64,
    signal: StreamSignal,
}

struct ActiveSession {
    batch: BatchId,
    task: JoinHandle<()>,
}

/// One logical live connection, re-established on drop
pub struct EventStream {
    connector: Arc<dyn Connector>,
    config: StreamConfig,
    generation: u64,
    active: Option<ActiveSession>,
    local: VecDeque<StreamSignal>,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl EventStream {
    pub fn new(connector: Arc<dyn Connector>, config: StreamConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            connector,
            config,
            generation: 0,
            active: None,
            local: VecDeque::new(),
            tx,
            rx,
        }
    }

    /// Open a session for `batch`, superseding any current one
    pub fn attach(&mut self, batch: BatchId) {
        self.detach();
        self.generation += 1;

        info!(%batch, generation = self.generation, "attaching event stream");
        let task = tokio::spawn(run_session(
            self.connector.clone(),
            batch.clone(),
            self.generation,
            self.tx.clone(),
            self.config.clone(),
        ));
        self.active = Some(ActiveSession { batch, task });
    }

    /// Close the session on purpose. No reconnect follows. Returns `false`
    /// when nothing was attached.
    pub fn detach(&mut self) -> bool {
        let Some(session) = self.active.take() else {
            return false;
        };

        session.task.abort();
        // anything the old task already queued is now stale
        self.generation += 1;
        info!(batch = %session.batch, "event stream detached");
        self.local.push_back(StreamSignal::Detached { batch: session.batch });
        true
    }

    pub fn is_attached(&self) -> bool {
        self.active.is_some()
    }

    pub fn batch(&self) -> Option<&BatchId> {
        self.active.as_ref().map(|s| &s.batch)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Next signal of the current generation. Pends while nothing is
    /// attached; safe to use as a `select!` branch.
    pub async fn next_signal(&mut self) -> StreamSignal {
        if let Some(signal) = self.local.pop_front() {
            return signal;
        }

        loop {
            // we hold a sender, so the channel never closes
            let Some(envelope) = self.rx.recv().await else {
                return std::future::pending().await;
            };
            if envelope.generation == self.generation && self.active.is_some() {
                return envelope.signal;
            }
            debug!(
                generation = envelope.generation,
                current = self.generation,
                "discarding stale stream signal"
            );
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(session) = self.active.take() {
            session.task.abort();
        }
    }
}

async fn run_session(
    connector: Arc<dyn Connector>,
    batch: BatchId,
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
    config: StreamConfig,
) {
    let send = |signal: StreamSignal| tx.send(Envelope { generation, signal }).is_ok();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let reason = match connector.connect(&batch).await {
            Ok(mut frames) => {
                info!(%batch, attempt, "event stream connected");
                if !send(StreamSignal::Connected {
                    batch: batch.clone(),
                    attempt,
                }) {
                    return;
                }

                loop {
                    match frames.next().await {
                        Some(Ok(text)) => match decode_frame(&text) {
                            Ok(event) => {
                                let done = event.is_done();
                                if !send(StreamSignal::Event(event)) || done {
                                    return;
                                }
                            }
                            Err(e) => warn!(%batch, error = %e, "dropping frame"),
                        },
                        Some(Err(e)) => break e.to_string(),
                        None => break "closed by peer".to_string(),
                    }
                }
            }
            Err(e) => e.to_string(),
        };

        if config.max_reconnects.is_some_and(|max| attempt > max) {
            warn!(%batch, attempts = attempt, "event stream gave up reconnecting");
            send(StreamSignal::GaveUp {
                batch: batch.clone(),
                attempts: attempt,
            });
            return;
        }

        warn!(%batch, attempt, %reason, "lost event stream, reconnecting in {:?}", config.reconnect_delay);
        if !send(StreamSignal::Lost {
            batch: batch.clone(),
            attempt,
            reason,
        }) {
            return;
        }
        tokio::time::sleep(config.reconnect_delay).await;
    }
}
