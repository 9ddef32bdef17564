//! In-memory fakes for the backend and the stream connector.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use tokio::time::Instant;

use crate::api::{
    Backend, Coverage, HostSettings, LongtermBucket, Performance, Preferences, ResultCounts, ResultDetail,
    StartReply, StartRequest, TestCatalog,
};
use crate::error::{DashError, DashResult};
use crate::events::BatchId;
use crate::machine::MachineId;
use crate::stream::{Connector, FrameStream};

pub(crate) fn report_frame(origin: &str, message: &str) -> String {
    serde_json::json!({"command": "report", "origin": origin, "message": message}).to_string()
}

pub(crate) fn done_frame(success: &str) -> String {
    serde_json::json!({"command": "done", "success": success}).to_string()
}

enum Script {
    Refuse,
    /// Deliver the frames, then close
    Frames(Vec<String>),
    /// Deliver the frames, then stay open
    Hang(Vec<String>),
}

/// Connector that plays back one script per connection attempt. Attempts
/// beyond the script are refused.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    connects: Mutex<Vec<Instant>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_refusal(&self) {
        self.scripts.lock().unwrap().push_back(Script::Refuse);
    }

    pub fn push_frames(&self, frames: Vec<String>) {
        self.scripts.lock().unwrap().push_back(Script::Frames(frames));
    }

    pub fn push_hanging(&self, frames: Vec<String>) {
        self.scripts.lock().unwrap().push_back(Script::Hang(frames));
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _batch: &BatchId) -> DashResult<FrameStream> {
        self.connects.lock().unwrap().push(Instant::now());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Refuse);
        match script {
            Script::Refuse => Err(DashError::ConnectionLost("connection refused".into())),
            Script::Frames(frames) => Ok(stream::iter(frames.into_iter().map(Ok)).boxed()),
            Script::Hang(frames) => Ok(stream::iter(frames.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
        }
    }
}

/// Backend with canned replies and call accounting
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub start_replies: Mutex<VecDeque<StartReply>>,
    pub start_requests: Mutex<Vec<StartRequest>>,
    pub status: Mutex<Option<BatchId>>,
    pub status_calls: AtomicUsize,
    pub screenshots: Mutex<HashMap<MachineId, String>>,
    pub screenshot_calls: Mutex<Vec<MachineId>>,
    pub screenshot_delay: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub counts: Mutex<ResultCounts>,
    pub coverage: Mutex<Coverage>,
    pub longterm: Mutex<Vec<LongtermBucket>>,
    pub deleted: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_screenshot_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            screenshot_delay: delay,
            ..Self::default()
        })
    }

    pub fn reply_to_start(&self, reply: StartReply) {
        self.start_replies.lock().unwrap().push_back(reply);
    }

    pub fn set_status(&self, batch: Option<&str>) {
        *self.status.lock().unwrap() = batch.and_then(BatchId::new);
    }

    pub fn start_count(&self) -> usize {
        self.start_requests.lock().unwrap().len()
    }

    pub fn screenshot_calls(&self) -> Vec<MachineId> {
        self.screenshot_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn preferences(&self) -> DashResult<Preferences> {
        Ok(Preferences::default())
    }

    async fn tests(&self) -> DashResult<TestCatalog> {
        Ok(TestCatalog::new())
    }

    async fn start(&self, request: &StartRequest) -> DashResult<StartReply> {
        self.start_requests.lock().unwrap().push(request.clone());
        self.start_replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DashError::ConnectionLost("no scripted reply".into()))
    }

    async fn status(&self) -> DashResult<Option<BatchId>> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status.lock().unwrap().clone())
    }

    async fn settings(&self) -> DashResult<HostSettings> {
        Ok(HostSettings::default())
    }

    async fn set_looping(&self, _looping: bool) -> DashResult<()> {
        Ok(())
    }

    async fn result_counts(&self) -> DashResult<ResultCounts> {
        Ok(self.counts.lock().unwrap().clone())
    }

    async fn result_details(&self) -> DashResult<Vec<ResultDetail>> {
        Ok(Vec::new())
    }

    async fn result_coverage(&self) -> DashResult<Coverage> {
        Ok(self.coverage.lock().unwrap().clone())
    }

    async fn result_performance(&self) -> DashResult<Performance> {
        Ok(vec![12.5, 40.0])
    }

    async fn result_longterm(&self) -> DashResult<Vec<LongtermBucket>> {
        Ok(self.longterm.lock().unwrap().clone())
    }

    async fn delete_results(&self) -> DashResult<()> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn screenshot(&self, machine: MachineId) -> DashResult<Option<String>> {
        self.screenshot_calls.lock().unwrap().push(machine);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.screenshot_delay.is_zero() {
            tokio::time::sleep(self.screenshot_delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.screenshots.lock().unwrap().get(&machine).cloned())
    }
}

/// Base64 of a small valid PNG
pub(crate) fn png_base64(width: u32, height: u32) -> String {
    use base64::Engine;
    use std::io::Cursor;

    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 80, 120]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
