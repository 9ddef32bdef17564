//! Batch identifiers and the progress events streamed while a batch runs.
//!
//! Frames arrive as JSON objects tagged by `command`:
//!
//! ```json
//! {"command": "report", "origin": "machine_2", "message": "logged in"}
//! {"command": "done", "success": "OK"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DashError, DashResult};
use crate::machine::MachineId;

/// Literal the backend returns from `start` when a batch could not be started
pub const ERROR_SENTINEL: &str = "error";

const SUCCESS_LABEL: &str = "OK";

/// Opaque identifier of one batch, assigned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Wrap a backend-issued id. Returns `None` for the error sentinel and for
    /// blank ids, which never name a real batch.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == ERROR_SENTINEL {
            None
        } else {
            Some(BatchId(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Final verdict of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Ok,
    /// Anything other than `OK`; the backend's label is kept for display
    Fail(String),
}

impl Outcome {
    pub fn from_label(label: &str) -> Self {
        if label == SUCCESS_LABEL {
            Outcome::Ok
        } else {
            Outcome::Fail(label.to_string())
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }

    pub fn label(&self) -> &str {
        match self {
            Outcome::Ok => SUCCESS_LABEL,
            Outcome::Fail(label) => label,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A decoded stream frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Informational line attributed to a machine
    Report { origin: MachineId, message: String },
    /// Terminal event for the current batch
    Done { outcome: Outcome },
}

impl ProgressEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, ProgressEvent::Done { .. })
    }
}

#[derive(Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
enum Frame {
    Report { origin: String, message: String },
    Done { success: String },
}

/// Decode one text frame. Unknown commands, bad JSON and origins that name no
/// machine are all reported as [`DashError::ProtocolDecode`]. The backend's
/// `machine_unknown` origin decodes to [`MachineId::Unknown`].
pub fn decode_frame(text: &str) -> DashResult<ProgressEvent> {
    let frame: Frame =
        serde_json::from_str(text).map_err(|e| DashError::ProtocolDecode(format!("{}: {}", e, text)))?;

    match frame {
        Frame::Report { origin, message } => {
            let origin = origin
                .parse()
                .map_err(|e: DashError| DashError::ProtocolDecode(e.to_string()))?;
            Ok(ProgressEvent::Report { origin, message })
        }
        Frame::Done { success } => Ok(ProgressEvent::Done {
            outcome: Outcome::from_label(&success),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_rejects_sentinel() {
        assert!(BatchId::new("error").is_none());
        assert!(BatchId::new("  ").is_none());
        assert_eq!(BatchId::new("7\n").unwrap().as_str(), "7");
    }

    #[test]
    fn test_decode_report() {
        let event = decode_frame(r#"{"command":"report","origin":"machine_2","message":"logged in"}"#).unwrap();
        assert_eq!(
            event,
            ProgressEvent::Report {
                origin: MachineId::Worker(2),
                message: "logged in".to_string()
            }
        );
    }

    #[test]
    fn test_decode_unattributed_report() {
        let event =
            decode_frame(r#"{"command":"report","origin":"machine_unknown","message":"login failed"}"#).unwrap();
        assert_eq!(
            event,
            ProgressEvent::Report {
                origin: MachineId::Unknown,
                message: "login failed".to_string()
            }
        );
    }

    #[test]
    fn test_decode_done() {
        let ok = decode_frame(r#"{"command":"done","success":"OK"}"#).unwrap();
        assert_eq!(ok, ProgressEvent::Done { outcome: Outcome::Ok });

        let fail = decode_frame(r#"{"command":"done","success":"FAIL/ERROR"}"#).unwrap();
        assert_eq!(
            fail,
            ProgressEvent::Done {
                outcome: Outcome::Fail("FAIL/ERROR".to_string())
            }
        );
        assert!(fail.is_done());
    }

    #[test]
    fn test_decode_malformed() {
        for frame in [
            "not json",
            r#"{"command":"ping"}"#,
            r#"{"command":"report","origin":"nobody","message":"x"}"#,
            r#"{"command":"done"}"#,
        ] {
            assert!(
                matches!(decode_frame(frame), Err(DashError::ProtocolDecode(_))),
                "frame should be rejected: {}",
                frame
            );
        }
    }
}
