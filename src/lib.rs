//! robodash - Run orchestration and live status for a remote LMS test robot.
//!
//! This crate provides:
//! - A run controller that starts batches or resumes one already running
//! - Fixed-cadence polling of the master's status and host settings
//! - A reconnecting event stream scoped to the running batch
//! - A throttled screenshot refresher driven by machine output
//! - Result summaries and capture sessions for saved screenshots
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use robodash::{Dashboard, DashboardConfig, HttpBackend, OptionPayload, WsConnector};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = HttpBackend::new("http://127.0.0.1:11150")?;
//! let connector = Arc::new(WsConnector::new(backend.clone()));
//! let (dashboard, handle) = Dashboard::new(Arc::new(backend), connector, DashboardConfig::default());
//! tokio::spawn(dashboard.run());
//!
//! let batch = handle.start("exam_a", OptionPayload::default()).await?;
//! println!("started batch {}", batch);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod controller;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod machine;
pub mod poller;
pub mod preferences;
pub mod results;
pub mod screens;
pub mod session;
pub mod stream;
pub mod summary;

#[cfg(test)]
mod testing;

// Re-export the backend contract
pub use api::{Backend, HttpBackend, StartReply, StartRequest};

// Re-export run control
pub use controller::{ConnectionStatus, DashboardEvent, RunController, RunState};
pub use dashboard::{Command, Dashboard, DashboardConfig, DashboardHandle};

// Re-export protocol types
pub use error::{DashError, DashResult};
pub use events::{BatchId, Outcome, ProgressEvent, decode_frame};
pub use machine::{MachineId, roster};

// Re-export components
pub use poller::Poller;
pub use preferences::OptionPayload;
pub use results::{Panel, ResultPanels, ResultsView};
pub use screens::{RefreshQueue, Screenshot, ScreenshotRefresher};
pub use session::CaptureSession;
pub use stream::{Connector, EventStream, StreamConfig, StreamSignal, WsConnector};
pub use summary::RunSummary;
