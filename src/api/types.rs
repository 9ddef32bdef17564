//! Wire types for the backend's JSON resources.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::events::BatchId;

/// One configurable setting as listed by `preferences.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub key: String,
    pub description: String,
    /// Settings are edited as text; numbers and strings both occur on the wire
    pub value: serde_json::Value,
}

/// One workaround toggle as listed by `preferences.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkaroundEntry {
    pub key: String,
    /// Usually `"W<n> <text>"`
    pub description: String,
    pub value: bool,
}

/// `GET preferences.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub settings: Vec<SettingEntry>,
    #[serde(default)]
    pub workarounds: Vec<WorkaroundEntry>,
}

/// `GET tests.json`: display name to test identifier
pub type TestCatalog = BTreeMap<String, String>;

/// Body of `POST start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub test: String,
    pub workarounds: BTreeMap<String, bool>,
    pub settings: BTreeMap<String, String>,
}

/// Reply of `POST start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartReply {
    Started(BatchId),
    /// The backend answered with its `error` sentinel
    Unavailable,
}

/// `GET status.json`: `{"batchId": ...}` while a batch runs, `{}` otherwise
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "batchId", default, deserialize_with = "lenient_id")]
    pub batch_id: Option<String>,
}

impl StatusReport {
    pub fn active_batch(&self) -> Option<BatchId> {
        self.batch_id.as_deref().and_then(BatchId::new)
    }
}

/// `GET settings.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(default, alias = "looping")]
    pub is_looping: bool,
    #[serde(default)]
    pub host_disk_free: String,
}

/// Body of `POST settings.json`
#[derive(Debug, Clone, Serialize)]
pub struct LoopingUpdate {
    pub is_looping: bool,
}

/// Per-status row of `results-counts.json`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCount {
    pub runs: u64,
    pub users: u64,
}

/// `GET results-counts.json`: status label to counts
pub type ResultCounts = BTreeMap<String, ResultCount>;

/// One row of `results-details.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDetail {
    pub time: String,
    pub elapsed: f64,
    pub success: String,
    pub batch: String,
}

/// Per-question row of `results-coverage.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionCoverage {
    pub name: String,
    #[serde(default)]
    pub cases: u64,
    #[serde(default)]
    pub observed: Option<u64>,
}

/// `GET results-coverage.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub cases: u64,
    pub observed: u64,
    #[serde(default)]
    pub questions: Vec<QuestionCoverage>,
}

/// `GET results-performance.json`: elapsed seconds per run
pub type Performance = Vec<f64>;

/// One bucket of `results-longterm.json`: `[date, success, users]`, where a
/// positive `success` marks the OK bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongtermBucket(pub String, pub i64, pub u64);

impl LongtermBucket {
    pub fn is_ok(&self) -> bool {
        self.1 > 0
    }

    pub fn users(&self) -> u64 {
        self.2
    }
}

/// Accept `"7"`, `7` or `null` for an id field
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_report_variants() {
        let running: StatusReport = serde_json::from_str(r#"{"batchId": "b-42"}"#).unwrap();
        assert_eq!(running.active_batch().unwrap().as_str(), "b-42");

        let numeric: StatusReport = serde_json::from_str(r#"{"batchId": 7}"#).unwrap();
        assert_eq!(numeric.active_batch().unwrap().as_str(), "7");

        let idle: StatusReport = serde_json::from_str("{}").unwrap();
        assert!(idle.active_batch().is_none());
    }

    #[test]
    fn test_host_settings_accepts_looping_alias() {
        let s: HostSettings = serde_json::from_str(r#"{"looping": true, "host_disk_free": "12 GB"}"#).unwrap();
        assert!(s.is_looping);
        assert_eq!(s.host_disk_free, "12 GB");
    }

    #[test]
    fn test_longterm_bucket() {
        let buckets: Vec<LongtermBucket> = serde_json::from_str(r#"[["2024-01-01", 1, 30], ["2024-01-01", 0, 2]]"#).unwrap();
        assert!(buckets[0].is_ok());
        assert!(!buckets[1].is_ok());
        assert_eq!(buckets[1].users(), 2);
    }
}
