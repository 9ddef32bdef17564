//! Run state machine.
//!
//! ```text
//! Idle -[start ok]-> Starting -[attach]-> Running -[done]-> Finished -[ack]-> Idle
//! Idle -[active batch found on load]-> Running
//! Running -[reconnects exhausted]-> Idle (batch marked errored)
//! ```
//!
//! [`RunController`] is the only writer of [`RunState`]. A `Finished` state
//! accepts a new `start` directly; it only lingers so the last outcome can be
//! shown.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{Backend, HostSettings, StartReply};
use crate::error::{DashError, DashResult};
use crate::events::{BatchId, Outcome, ProgressEvent};
use crate::machine::MachineId;
use crate::preferences::OptionPayload;
use crate::results::ResultsView;
use crate::screens::{ScreenshotRefresher, Screenshot};
use crate::stream::{EventStream, StreamSignal};

const OBSERVER_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Starting,
    Running(BatchId),
    Finished(BatchId, Outcome),
}

impl RunState {
    pub fn batch(&self) -> Option<&BatchId> {
        match self {
            RunState::Running(batch) | RunState::Finished(batch, _) => Some(batch),
            RunState::Idle | RunState::Starting => None,
        }
    }

    /// Whether a new batch may be started or adopted
    pub fn accepts_start(&self) -> bool {
        matches!(self, RunState::Idle | RunState::Finished(..))
    }
}

/// Transient connection indicator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Connected,
    Reconnecting { attempt: u32 },
    /// Retries exhausted for this batch
    Failed,
    Closed,
}

/// Everything observers (log views, screenshot tiles, notices) receive
#[derive(Debug, Clone)]
pub enum DashboardEvent {
    StateChanged(RunState),
    Log { origin: MachineId, message: String },
    Connection { batch: BatchId, status: ConnectionStatus },
    /// A user-visible alert
    Notice(String),
    Screenshot(Arc<Screenshot>),
    Settings(HostSettings),
    Results(ResultsView),
}

pub struct RunController {
    backend: Arc<dyn Backend>,
    stream: EventStream,
    state: RunState,
    errored: Option<BatchId>,
    observers: broadcast::Sender<DashboardEvent>,
}

impl RunController {
    pub fn new(backend: Arc<dyn Backend>, stream: EventStream) -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            backend,
            stream,
            state: RunState::Idle,
            errored: None,
            observers,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Last batch whose stream gave up
    pub fn errored_batch(&self) -> Option<&BatchId> {
        self.errored.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.observers.subscribe()
    }

    pub fn observers(&self) -> broadcast::Sender<DashboardEvent> {
        self.observers.clone()
    }

    /// Running with a live (or reconnecting) stream
    pub fn is_connected(&self) -> bool {
        matches!(self.state, RunState::Running(_)) && self.stream.is_attached()
    }

    pub fn stream(&self) -> &EventStream {
        &self.stream
    }

    pub(crate) fn notify(&self, event: DashboardEvent) {
        // no subscribers is fine
        let _ = self.observers.send(event);
    }

    fn set_state(&mut self, state: RunState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "run state");
            self.state = state.clone();
            self.notify(DashboardEvent::StateChanged(state));
        }
    }

    /// Ask the backend for a new batch and follow it
    pub async fn start(&mut self, test: &str, options: &OptionPayload) -> DashResult<BatchId> {
        if !self.state.accepts_start() {
            return Err(DashError::AlreadyRunning);
        }

        self.set_state(RunState::Starting);
        let request = options.to_request(test);

        match self.backend.start(&request).await {
            Ok(StartReply::Started(batch)) => {
                info!(%batch, test, "batch started");
                self.follow(batch.clone());
                Ok(batch)
            }
            Ok(StartReply::Unavailable) => {
                warn!(test, "backend refused to start a batch");
                self.set_state(RunState::Idle);
                self.notify(DashboardEvent::Notice(DashError::BackendUnavailable.to_string()));
                Err(DashError::BackendUnavailable)
            }
            Err(e) => {
                warn!(test, error = %e, "start request failed");
                self.set_state(RunState::Idle);
                Err(e)
            }
        }
    }

    /// Resume observing a batch that is already running, without starting one
    pub async fn attach_if_running(&mut self) -> DashResult<Option<BatchId>> {
        if !self.state.accepts_start() {
            return Ok(None);
        }
        let batch = self.backend.status().await?;
        Ok(batch.filter(|b| self.adopt(b.clone())))
    }

    /// Follow `batch` reported by a status check. Ignored unless idle, and
    /// for the batch that just finished or was given up on.
    pub fn adopt(&mut self, batch: BatchId) -> bool {
        if !self.state.accepts_start()
            || self.state.batch() == Some(&batch)
            || self.errored.as_ref() == Some(&batch)
        {
            return false;
        }
        info!(%batch, "found running batch");
        self.follow(batch);
        true
    }

    fn follow(&mut self, batch: BatchId) {
        self.stream.attach(batch.clone());
        self.set_state(RunState::Running(batch));
    }

    /// Leave `Finished` for `Idle`
    pub fn acknowledge(&mut self) {
        if matches!(self.state, RunState::Finished(..)) {
            self.set_state(RunState::Idle);
        }
    }

    /// Next signal from the event stream
    pub async fn next_signal(&mut self) -> StreamSignal {
        self.stream.next_signal().await
    }

    /// Apply a stream signal. Returns `true` when the batch just finished.
    pub fn handle_signal(&mut self, signal: StreamSignal, screens: &mut ScreenshotRefresher) -> bool {
        match signal {
            StreamSignal::Event(event) => return self.on_event(event, screens),
            StreamSignal::Connected { batch, .. } => self.notify(DashboardEvent::Connection {
                batch,
                status: ConnectionStatus::Connected,
            }),
            StreamSignal::Lost { batch, attempt, .. } => self.notify(DashboardEvent::Connection {
                batch,
                status: ConnectionStatus::Reconnecting { attempt },
            }),
            StreamSignal::Detached { batch } => self.notify(DashboardEvent::Connection {
                batch,
                status: ConnectionStatus::Closed,
            }),
            StreamSignal::GaveUp { batch, attempts } => {
                warn!(%batch, attempts, "giving up on batch");
                self.stream.detach();
                self.errored = Some(batch.clone());
                self.notify(DashboardEvent::Connection {
                    batch,
                    status: ConnectionStatus::Failed,
                });
                self.set_state(RunState::Idle);
            }
        }
        false
    }

    /// Apply one progress event. Returns `true` on the terminal transition.
    pub fn on_event(&mut self, event: ProgressEvent, screens: &mut ScreenshotRefresher) -> bool {
        match event {
            ProgressEvent::Report { origin, message } => {
                screens.mark_dirty(origin);
                self.notify(DashboardEvent::Log { origin, message });
                false
            }
            ProgressEvent::Done { outcome } => {
                let RunState::Running(batch) = &self.state else {
                    debug!(?outcome, "done outside a running batch");
                    return false;
                };
                let batch = batch.clone();
                info!(%batch, %outcome, "batch finished");
                self.stream.detach();
                self.set_state(RunState::Finished(batch, outcome));
                true
            }
        }
    }

    /// Detach before dropping the controller
    pub fn shutdown(&mut self) {
        self.stream.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::roster;
    use crate::stream::StreamConfig;
    use crate::testing::{FakeBackend, ScriptedConnector, done_frame, report_frame};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn controller(backend: Arc<FakeBackend>, connector: Arc<ScriptedConnector>) -> RunController {
        let stream = EventStream::new(
            connector,
            StreamConfig {
                reconnect_delay: Duration::from_millis(1000),
                max_reconnects: None,
            },
        );
        RunController::new(backend, stream)
    }

    fn drain(rx: &mut broadcast::Receiver<DashboardEvent>) -> Vec<DashboardEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_start_attaches_stream() {
        let backend = FakeBackend::new();
        backend.reply_to_start(StartReply::Started(BatchId::new("b1").unwrap()));
        let connector = ScriptedConnector::new();
        connector.push_hanging(vec![]);
        let mut ctl = controller(backend.clone(), connector);

        let batch = ctl.start("exam", &OptionPayload::default()).await.unwrap();
        assert_eq!(batch.as_str(), "b1");
        assert_eq!(ctl.state(), &RunState::Running(batch));
        assert!(ctl.is_connected());
        assert_eq!(backend.start_requests.lock().unwrap()[0].test, "exam");
    }

    #[tokio::test]
    async fn test_start_rejected_while_running() {
        let backend = FakeBackend::new();
        backend.reply_to_start(StartReply::Started(BatchId::new("b1").unwrap()));
        let mut ctl = controller(backend.clone(), ScriptedConnector::new());

        ctl.start("exam", &OptionPayload::default()).await.unwrap();
        let second = ctl.start("exam", &OptionPayload::default()).await;
        assert!(matches!(second, Err(DashError::AlreadyRunning)));
        assert_eq!(backend.start_count(), 1);
    }

    #[tokio::test]
    async fn test_error_sentinel_returns_to_idle_with_one_notice() {
        let backend = FakeBackend::new();
        backend.reply_to_start(StartReply::Unavailable);
        let connector = ScriptedConnector::new();
        let mut ctl = controller(backend, connector.clone());
        let mut rx = ctl.subscribe();

        let result = ctl.start("exam", &OptionPayload::default()).await;
        assert!(matches!(result, Err(DashError::BackendUnavailable)));
        assert_eq!(ctl.state(), &RunState::Idle);
        assert!(!ctl.stream().is_attached());

        let notices = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, DashboardEvent::Notice(_)))
            .count();
        assert_eq!(notices, 1);

        tokio::task::yield_now().await;
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_start_failure_is_not_a_notice() {
        let backend = FakeBackend::new();
        let mut ctl = controller(backend, ScriptedConnector::new());
        let mut rx = ctl.subscribe();

        assert!(ctl.start("exam", &OptionPayload::default()).await.is_err());
        assert_eq!(ctl.state(), &RunState::Idle);
        assert!(!drain(&mut rx).iter().any(|e| matches!(e, DashboardEvent::Notice(_))));
    }

    #[tokio::test]
    async fn test_attach_if_running_skips_start() {
        let backend = FakeBackend::new();
        backend.set_status(Some("7"));
        let mut ctl = controller(backend.clone(), ScriptedConnector::new());
        let mut rx = ctl.subscribe();

        let batch = ctl.attach_if_running().await.unwrap().unwrap();
        assert_eq!(ctl.state(), &RunState::Running(batch));
        assert_eq!(backend.start_count(), 0);

        let states: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                DashboardEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![RunState::Running(BatchId::new("7").unwrap())]);
    }

    #[tokio::test]
    async fn test_attach_if_running_when_idle_backend() {
        let backend = FakeBackend::new();
        let mut ctl = controller(backend, ScriptedConnector::new());
        assert_eq!(ctl.attach_if_running().await.unwrap(), None);
        assert_eq!(ctl.state(), &RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_finishes_exactly_once() {
        let backend = FakeBackend::new();
        backend.set_status(Some("b9"));
        let connector = ScriptedConnector::new();
        connector.push_frames(vec![
            report_frame("machine_1", "working"),
            report_frame("machine_1", "still working"),
            done_frame("OK"),
        ]);
        let mut ctl = controller(backend.clone(), connector.clone());
        let mut screens = ScreenshotRefresher::new(backend, roster(1));
        ctl.attach_if_running().await.unwrap();

        let mut finished = 0;
        loop {
            let signal = ctl.next_signal().await;
            let closed = matches!(signal, StreamSignal::Detached { .. });
            if ctl.handle_signal(signal, &mut screens) {
                finished += 1;
            }
            if closed {
                break;
            }
        }

        assert_eq!(finished, 1);
        assert_eq!(
            ctl.state(),
            &RunState::Finished(BatchId::new("b9").unwrap(), Outcome::Ok)
        );
        assert!(!ctl.stream().is_attached());
        assert_eq!(screens.queue().len(), 1, "repeat reports queue the machine once");

        // a second done for the same batch changes nothing
        assert!(!ctl.on_event(ProgressEvent::Done { outcome: Outcome::Ok }, &mut screens));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.connect_count(), 1);

        ctl.acknowledge();
        assert_eq!(ctl.state(), &RunState::Idle);
    }

    #[tokio::test]
    async fn test_unattributed_report_is_logged_without_screenshot() {
        let backend = FakeBackend::new();
        let mut ctl = controller(backend.clone(), ScriptedConnector::new());
        let mut screens = ScreenshotRefresher::new(backend, roster(2));
        let mut rx = ctl.subscribe();

        let finished = ctl.on_event(
            ProgressEvent::Report {
                origin: MachineId::Unknown,
                message: "login failed".into(),
            },
            &mut screens,
        );
        assert!(!finished);
        assert!(screens.queue().is_empty());

        let logs: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                DashboardEvent::Log { origin, message } => Some((origin, message)),
                _ => None,
            })
            .collect();
        assert_eq!(logs, vec![(MachineId::Unknown, "login failed".to_string())]);
    }

    #[tokio::test]
    async fn test_finished_accepts_new_start() {
        let backend = FakeBackend::new();
        backend.reply_to_start(StartReply::Started(BatchId::new("b1").unwrap()));
        backend.reply_to_start(StartReply::Started(BatchId::new("b2").unwrap()));
        let mut ctl = controller(backend.clone(), ScriptedConnector::new());
        let mut screens = ScreenshotRefresher::new(backend, roster(0));

        ctl.start("exam", &OptionPayload::default()).await.unwrap();
        ctl.on_event(
            ProgressEvent::Done {
                outcome: Outcome::Fail("FAIL".into()),
            },
            &mut screens,
        );
        assert!(matches!(ctl.state(), RunState::Finished(_, Outcome::Fail(_))));

        let next = ctl.start("exam", &OptionPayload::default()).await.unwrap();
        assert_eq!(next.as_str(), "b2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gave_up_marks_batch_errored() {
        let backend = FakeBackend::new();
        backend.set_status(Some("b5"));
        let connector = ScriptedConnector::new();
        let stream = EventStream::new(
            connector,
            StreamConfig {
                reconnect_delay: Duration::from_millis(1000),
                max_reconnects: Some(1),
            },
        );
        let mut ctl = RunController::new(backend.clone(), stream);
        let mut screens = ScreenshotRefresher::new(backend, roster(0));
        ctl.attach_if_running().await.unwrap();

        loop {
            let signal = ctl.next_signal().await;
            let gave_up = matches!(signal, StreamSignal::GaveUp { .. });
            ctl.handle_signal(signal, &mut screens);
            if gave_up {
                break;
            }
        }

        assert_eq!(ctl.state(), &RunState::Idle);
        assert_eq!(ctl.errored_batch().map(BatchId::as_str), Some("b5"));

        // the status poll keeps reporting it; it is not picked up again
        assert!(!ctl.adopt(BatchId::new("b5").unwrap()));
        assert!(ctl.adopt(BatchId::new("b6").unwrap()));
    }
}
