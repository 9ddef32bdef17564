//! Throttled screenshot refreshing.
//!
//! Machines that produce output are marked dirty and queued once. The
//! refresher fetches one queued machine at a time: the dirty flag is cleared
//! when the fetch is dispatched, so output arriving mid-fetch queues the
//! machine again instead of being lost.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::Backend;
use crate::error::DashResult;
use crate::machine::MachineId;

/// DirtySet plus the FIFO of machines awaiting a fetch
#[derive(Debug, Default, Clone)]
pub struct RefreshQueue {
    dirty: HashMap<MachineId, bool>,
    queue: VecDeque<MachineId>,
    in_flight: Option<MachineId>,
}

impl RefreshQueue {
    /// Start with every known machine clean
    pub fn new(machines: impl IntoIterator<Item = MachineId>) -> Self {
        Self {
            dirty: machines.into_iter().map(|m| (m, false)).collect(),
            ..Self::default()
        }
    }

    /// Flag `machine` for a refresh. Returns `true` if it was appended to the
    /// queue, `false` if it was already pending or has no screen.
    pub fn mark_dirty(&mut self, machine: MachineId) -> bool {
        if !machine.has_screen() {
            return false;
        }
        let flag = self.dirty.entry(machine).or_insert(false);
        if *flag {
            return false;
        }
        *flag = true;
        self.queue.push_back(machine);
        true
    }

    pub fn is_dirty(&self, machine: MachineId) -> bool {
        self.dirty.get(&machine).copied().unwrap_or(false)
    }

    /// Machines awaiting a fetch, head first
    pub fn pending(&self) -> impl Iterator<Item = &MachineId> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn in_flight(&self) -> Option<MachineId> {
        self.in_flight
    }

    /// Pop the head and mark it in flight. `None` while a fetch is
    /// outstanding or nothing is queued.
    pub fn begin_next(&mut self) -> Option<MachineId> {
        if self.in_flight.is_some() {
            return None;
        }
        let machine = self.queue.pop_front()?;
        self.dirty.insert(machine, false);
        self.in_flight = Some(machine);
        Some(machine)
    }

    /// Clear the in-flight marker
    pub fn finish(&mut self, machine: MachineId) {
        if self.in_flight == Some(machine) {
            self.in_flight = None;
        }
    }
}

/// A decoded machine screenshot
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub machine: MachineId,
    /// PNG bytes
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub fetched_at: DateTime<Utc>,
}

impl Screenshot {
    /// Decode a base64 PNG payload, rejecting anything that isn't an image
    pub fn decode(machine: MachineId, payload: &str) -> DashResult<Self> {
        let png = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
        let (width, height) = image::io::Reader::new(Cursor::new(&png))
            .with_guessed_format()?
            .into_dimensions()?;

        Ok(Self {
            machine,
            png,
            width,
            height,
            fetched_at: Utc::now(),
        })
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Image(Screenshot),
    /// The backend had nothing to show
    Empty,
    Failed(String),
}

#[derive(Debug)]
pub struct FetchCompletion {
    pub machine: MachineId,
    pub outcome: FetchOutcome,
}

/// Drives at most one screenshot fetch at a time
pub struct ScreenshotRefresher {
    backend: Arc<dyn Backend>,
    queue: RefreshQueue,
    fetch: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<FetchCompletion>,
    rx: mpsc::UnboundedReceiver<FetchCompletion>,
}

impl ScreenshotRefresher {
    pub fn new(backend: Arc<dyn Backend>, machines: impl IntoIterator<Item = MachineId>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            backend,
            queue: RefreshQueue::new(machines),
            fetch: None,
            tx,
            rx,
        }
    }

    pub fn queue(&self) -> &RefreshQueue {
        &self.queue
    }

    pub fn mark_dirty(&mut self, machine: MachineId) -> bool {
        self.queue.mark_dirty(machine)
    }

    pub fn is_fetching(&self) -> bool {
        self.queue.in_flight().is_some()
    }

    /// Dispatch the next queued fetch unless one is already running
    pub fn pump(&mut self) -> Option<MachineId> {
        let machine = self.queue.begin_next()?;
        debug!(%machine, "fetching screenshot");

        let backend = self.backend.clone();
        let tx = self.tx.clone();
        self.fetch = Some(tokio::spawn(async move {
            let outcome = match backend.screenshot(machine).await {
                Ok(Some(payload)) => match Screenshot::decode(machine, &payload) {
                    Ok(shot) => FetchOutcome::Image(shot),
                    Err(e) => FetchOutcome::Failed(e.to_string()),
                },
                Ok(None) => FetchOutcome::Empty,
                Err(e) => FetchOutcome::Failed(e.to_string()),
            };
            let _ = tx.send(FetchCompletion { machine, outcome });
        }));

        Some(machine)
    }

    /// Wait for the outstanding fetch to finish. Pends when none is running.
    pub async fn next_completion(&mut self) -> FetchCompletion {
        match self.rx.recv().await {
            Some(completion) => completion,
            None => std::future::pending().await,
        }
    }

    /// Record a finished fetch; returns the image worth publishing
    pub fn complete(&mut self, completion: FetchCompletion) -> Option<Screenshot> {
        self.queue.finish(completion.machine);
        self.fetch = None;

        match completion.outcome {
            FetchOutcome::Image(shot) => Some(shot),
            FetchOutcome::Empty => None,
            FetchOutcome::Failed(reason) => {
                warn!(machine = %completion.machine, %reason, "screenshot fetch failed");
                None
            }
        }
    }
}

impl Drop for ScreenshotRefresher {
    fn drop(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
    }
}
