//! The backend contract.
//!
//! [`Backend`] is the seam between the dashboard core and the robot master.
//! [`HttpBackend`] speaks the real JSON endpoints; tests substitute fakes.

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::DashResult;
use crate::events::BatchId;
use crate::machine::MachineId;

pub use client::HttpBackend;
pub use types::{
    Coverage, HostSettings, LongtermBucket, Performance, Preferences, QuestionCoverage, ResultCount, ResultCounts,
    ResultDetail, SettingEntry, StartReply, StartRequest, StatusReport, TestCatalog, WorkaroundEntry,
};

/// JSON resources and commands offered by the robot master
#[async_trait]
pub trait Backend: Send + Sync {
    async fn preferences(&self) -> DashResult<Preferences>;

    async fn tests(&self) -> DashResult<TestCatalog>;

    /// Ask the backend to start a batch
    async fn start(&self, request: &StartRequest) -> DashResult<StartReply>;

    /// The batch currently running, if any
    async fn status(&self) -> DashResult<Option<BatchId>>;

    async fn settings(&self) -> DashResult<HostSettings>;

    async fn set_looping(&self, looping: bool) -> DashResult<()>;

    async fn result_counts(&self) -> DashResult<ResultCounts>;

    async fn result_details(&self) -> DashResult<Vec<ResultDetail>>;

    async fn result_coverage(&self) -> DashResult<Coverage>;

    async fn result_performance(&self) -> DashResult<Performance>;

    async fn result_longterm(&self) -> DashResult<Vec<LongtermBucket>>;

    async fn delete_results(&self) -> DashResult<()>;

    /// Base64 PNG of the machine's screen; `None` when the backend has nothing
    async fn screenshot(&self, machine: MachineId) -> DashResult<Option<String>>;
}
