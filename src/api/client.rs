//! reqwest implementation of [`Backend`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::types::{
    Coverage, HostSettings, LongtermBucket, LoopingUpdate, Performance, Preferences, ResultCounts, ResultDetail,
    StartReply, StartRequest, StatusReport, TestCatalog,
};
use super::Backend;
use crate::error::{DashError, DashResult};
use crate::events::BatchId;
use crate::machine::MachineId;

const PREFERENCES: &str = "preferences.json";
const TESTS: &str = "tests.json";
const START: &str = "start";
const STATUS: &str = "status.json";
const SETTINGS: &str = "settings.json";
const DELETE_RESULTS: &str = "delete-results";
const SCREENSHOT: &str = "screenshot/";
const RESULT_ARCHIVE: &str = "result/";
const EVENTS: &str = "websocket/";

/// HTTP client for the robot master
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    /// Create a client for the master at `base_url` (e.g. `http://host:11150`)
    pub fn new(base_url: &str) -> DashResult<Self> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> DashResult<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// WebSocket URL of the event stream for `batch`
    pub fn events_url(&self, batch: &BatchId) -> DashResult<Url> {
        let mut url = self.base.join(&format!("{}{}", EVENTS, batch))?;
        let scheme = if self.base.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) only swaps between special schemes, which url allows
        url.set_scheme(scheme)
            .map_err(|_| DashError::ProtocolDecode(format!("cannot derive ws url from {}", self.base)))?;
        Ok(url)
    }

    /// Download URL of a finished batch's result archive
    pub fn result_archive_url(&self, batch: &str) -> DashResult<Url> {
        Ok(self.base.join(&format!("{}{}.zip", RESULT_ARCHIVE, batch))?)
    }

    fn url(&self, resource: &str) -> DashResult<Url> {
        Ok(self.base.join(resource)?)
    }

    async fn get_text(&self, resource: &str) -> DashResult<String> {
        let response = self.client.get(self.url(resource)?).send().await?;
        let response = check_status(resource, response)?;
        Ok(response.text().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, resource: &str) -> DashResult<T> {
        let body = self.get_text(resource).await?;
        debug!(resource, bytes = body.len(), "fetched");
        Ok(serde_json::from_str(&body)?)
    }

    async fn results<T: DeserializeOwned>(&self, panel: &str) -> DashResult<T> {
        self.get_json(&format!("results-{}.json", panel)).await
    }
}

fn check_status(resource: &str, response: reqwest::Response) -> DashResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(DashError::HttpStatus {
            resource: resource.to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn preferences(&self) -> DashResult<Preferences> {
        self.get_json(PREFERENCES).await
    }

    async fn tests(&self) -> DashResult<TestCatalog> {
        self.get_json(TESTS).await
    }

    async fn start(&self, request: &StartRequest) -> DashResult<StartReply> {
        let response = self.client.post(self.url(START)?).json(request).send().await?;
        let body = check_status(START, response)?.text().await?;
        Ok(match BatchId::new(body) {
            Some(batch) => StartReply::Started(batch),
            None => StartReply::Unavailable,
        })
    }

    async fn status(&self) -> DashResult<Option<BatchId>> {
        let report: StatusReport = self.get_json(STATUS).await?;
        Ok(report.active_batch())
    }

    async fn settings(&self) -> DashResult<HostSettings> {
        self.get_json(SETTINGS).await
    }

    async fn set_looping(&self, looping: bool) -> DashResult<()> {
        let update = LoopingUpdate { is_looping: looping };
        let response = self.client.post(self.url(SETTINGS)?).json(&update).send().await?;
        check_status(SETTINGS, response)?;
        Ok(())
    }

    async fn result_counts(&self) -> DashResult<ResultCounts> {
        self.results("counts").await
    }

    async fn result_details(&self) -> DashResult<Vec<ResultDetail>> {
        self.results("details").await
    }

    async fn result_coverage(&self) -> DashResult<Coverage> {
        self.results("coverage").await
    }

    async fn result_performance(&self) -> DashResult<Performance> {
        self.results("performance").await
    }

    async fn result_longterm(&self) -> DashResult<Vec<LongtermBucket>> {
        self.results("longterm").await
    }

    async fn delete_results(&self) -> DashResult<()> {
        self.get_text(DELETE_RESULTS).await?;
        Ok(())
    }

    async fn screenshot(&self, machine: MachineId) -> DashResult<Option<String>> {
        let body = self.get_text(&format!("{}{}", SCREENSHOT, machine)).await?;
        let body = body.trim();
        Ok(if body.is_empty() { None } else { Some(body.to_string()) })
    }
}
