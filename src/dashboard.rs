//! The dashboard event loop.
//!
//! [`Dashboard::run`] owns the controller, the screenshot refresher and the
//! pollers, and multiplexes them in one `select!`. Everything outside the
//! loop talks to it through a cloneable [`DashboardHandle`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{Backend, HostSettings};
use crate::config;
use crate::controller::{DashboardEvent, RunController};
use crate::error::{DashError, DashResult};
use crate::events::BatchId;
use crate::machine::roster;
use crate::poller::Poller;
use crate::preferences::OptionPayload;
use crate::results::{self, Panel, ResultPanels};
use crate::screens::ScreenshotRefresher;
use crate::stream::{Connector, EventStream, StreamConfig};

const COMMAND_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Numbered workers besides the master
    pub workers: u32,
    /// Cadence of the status and settings polls
    pub status_interval: Duration,
    pub screenshot_tick: Duration,
    pub stream: StreamConfig,
    pub panels: ResultPanels,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            workers: cfg.backend.workers,
            status_interval: cfg.timing.status_interval,
            screenshot_tick: cfg.timing.screenshot_tick,
            stream: StreamConfig::default(),
            panels: ResultPanels::default(),
        }
    }
}

impl DashboardConfig {
    pub fn workers(mut self, workers: u32) -> Self {
        self.workers = workers;
        self
    }

    pub fn panels(mut self, panels: ResultPanels) -> Self {
        self.panels = panels;
        self
    }
}

#[derive(Debug)]
pub enum Command {
    Start {
        test: String,
        options: OptionPayload,
        reply: oneshot::Sender<DashResult<BatchId>>,
    },
    Acknowledge,
    TogglePanel(Panel),
    RefreshResults,
    Shutdown,
}

/// Cloneable front door to a running [`Dashboard`]
#[derive(Clone)]
pub struct DashboardHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<DashboardEvent>,
}

impl DashboardHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    pub async fn start(&self, test: impl Into<String>, options: OptionPayload) -> DashResult<BatchId> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Start {
            test: test.into(),
            options,
            reply,
        })
        .await?;
        response.await.map_err(|_| DashError::DashboardStopped)?
    }

    pub async fn acknowledge(&self) -> DashResult<()> {
        self.send(Command::Acknowledge).await
    }

    pub async fn toggle_panel(&self, panel: Panel) -> DashResult<()> {
        self.send(Command::TogglePanel(panel)).await
    }

    pub async fn refresh_results(&self) -> DashResult<()> {
        self.send(Command::RefreshResults).await
    }

    pub async fn shutdown(&self) -> DashResult<()> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> DashResult<()> {
        self.commands.send(command).await.map_err(|_| DashError::DashboardStopped)
    }
}

pub struct Dashboard {
    backend: Arc<dyn Backend>,
    controller: RunController,
    screens: ScreenshotRefresher,
    config: DashboardConfig,
    panels: ResultPanels,
    commands: mpsc::Receiver<Command>,
}

impl Dashboard {
    pub fn new(
        backend: Arc<dyn Backend>,
        connector: Arc<dyn Connector>,
        config: DashboardConfig,
    ) -> (Self, DashboardHandle) {
        let stream = EventStream::new(connector, config.stream.clone());
        let controller = RunController::new(backend.clone(), stream);
        let screens = ScreenshotRefresher::new(backend.clone(), roster(config.workers));
        let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);

        let handle = DashboardHandle {
            commands: tx,
            events: controller.observers(),
        };
        let dashboard = Self {
            backend,
            controller,
            screens,
            panels: config.panels.clone(),
            config,
            commands,
        };
        (dashboard, handle)
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) -> DashResult<()> {
        match self.controller.attach_if_running().await {
            Ok(Some(batch)) => info!(%batch, "resuming running batch"),
            Ok(None) => debug!("no batch running"),
            Err(e) => warn!(error = %e, "initial status check failed"),
        }
        self.refresh_results().await;

        let status_backend = self.backend.clone();
        let mut status = Poller::spawn("status.json", self.config.status_interval, move || {
            let backend = status_backend.clone();
            async move { backend.status().await }
        });
        let settings_backend = self.backend.clone();
        let mut settings: Poller<HostSettings> =
            Poller::spawn("settings.json", self.config.status_interval, move || {
                let backend = settings_backend.clone();
                async move { backend.settings().await }
            });

        let mut screenshot_tick = tokio::time::interval(self.config.screenshot_tick);
        screenshot_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            status.set_enabled(self.controller.state().accepts_start());

            tokio::select! {
                signal = self.controller.next_signal() => {
                    if self.controller.handle_signal(signal, &mut self.screens) {
                        self.refresh_results().await;
                    }
                }
                completion = self.screens.next_completion() => {
                    if let Some(shot) = self.screens.complete(completion) {
                        self.controller.notify(DashboardEvent::Screenshot(Arc::new(shot)));
                    }
                    // drain the next dirty machine right away while the batch runs
                    if self.controller.is_connected() {
                        self.screens.pump();
                    }
                }
                _ = screenshot_tick.tick() => {
                    self.screens.pump();
                }
                Some(active) = status.changed() => {
                    if let Some(batch) = active {
                        self.controller.adopt(batch);
                    }
                }
                Some(host) = settings.changed() => {
                    self.controller.notify(DashboardEvent::Settings(host));
                }
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Start { test, options, reply }) => {
                            let result = self.controller.start(&test, &options).await;
                            let _ = reply.send(result);
                        }
                        Some(Command::Acknowledge) => self.controller.acknowledge(),
                        Some(Command::TogglePanel(panel)) => {
                            self.panels.toggle(panel);
                            self.refresh_results().await;
                        }
                        Some(Command::RefreshResults) => self.refresh_results().await,
                        Some(Command::Shutdown) | None => break,
                    }
                }
            }
        }

        self.controller.shutdown();
        info!("dashboard stopped");
        Ok(())
    }

    async fn refresh_results(&mut self) {
        match results::fetch(self.backend.as_ref(), &self.panels).await {
            Ok(view) => self.controller.notify(DashboardEvent::Results(view)),
            Err(e) => warn!(error = %e, "results refresh failed"),
        }
    }
}
