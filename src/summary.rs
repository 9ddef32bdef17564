//! Types for a followed batch's summary.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::controller::{ConnectionStatus, DashboardEvent, RunState};
use crate::events::{BatchId, Outcome};
use crate::machine::MachineId;

/// One report line
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub time: DateTime<Utc>,
    pub origin: MachineId,
    pub message: String,
}

/// Everything observed while following a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub batch: Option<BatchId>,

    /// Set once the batch finished
    pub outcome: Option<Outcome>,

    /// The stream gave up before a verdict arrived
    pub gave_up: bool,

    /// Reconnects after the first connection
    pub reconnects: u32,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub logs: Vec<LogLine>,

    /// Report lines per machine
    pub reports: BTreeMap<MachineId, usize>,

    /// Saved screenshot files, in capture order
    pub screenshots: Vec<PathBuf>,
}

impl RunSummary {
    pub fn record(&mut self, event: &DashboardEvent) {
        match event {
            DashboardEvent::StateChanged(RunState::Running(batch)) => {
                self.batch = Some(batch.clone());
                self.started_at = Some(Utc::now());
            }
            DashboardEvent::StateChanged(RunState::Finished(batch, outcome)) => {
                self.batch = Some(batch.clone());
                self.outcome = Some(outcome.clone());
                self.finished_at = Some(Utc::now());
            }
            DashboardEvent::Log { origin, message } => {
                *self.reports.entry(*origin).or_default() += 1;
                self.logs.push(LogLine {
                    time: Utc::now(),
                    origin: *origin,
                    message: message.clone(),
                });
            }
            DashboardEvent::Connection { status, .. } => match status {
                ConnectionStatus::Reconnecting { .. } => self.reconnects += 1,
                ConnectionStatus::Failed => {
                    self.gave_up = true;
                    self.finished_at = Some(Utc::now());
                }
                ConnectionStatus::Connected | ConnectionStatus::Closed => {}
            },
            _ => {}
        }
    }

    pub fn add_screenshot(&mut self, path: PathBuf) {
        self.screenshots.push(path);
    }

    /// A verdict arrived or the stream gave up
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some() || self.gave_up
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(Outcome::is_ok)
    }
}
