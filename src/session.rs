//! Capture sessions for saved screenshots.
//!
//! Provides a directory per watched batch with:
//! - A unique name under the configured base directory
//! - Automatic cleanup unless explicitly preserved
//! - Session metadata in `.session.json`

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::config;
use crate::error::DashResult;
use crate::events::BatchId;
use crate::machine::MachineId;
use crate::screens::Screenshot;

const METADATA_FILE: &str = ".session.json";

/// Directory holding the screenshots captured while following one batch
#[derive(Debug)]
pub struct CaptureSession {
    pub id: String,
    pub dir: PathBuf,
    /// Keep files after the session is dropped
    pub keep: bool,
    pub batch: Option<BatchId>,
}

impl CaptureSession {
    /// New session under the configured base directory
    pub fn with_name(name: &str) -> Self {
        Self::with_name_in(config::session_base_dir(), name)
    }

    pub fn with_name_in(base: impl AsRef<Path>, name: &str) -> Self {
        let id = format!("{}_{}", sanitize_name(name), Utc::now().format("%Y%m%d_%H%M%S"));
        Self {
            dir: base.as_ref().join(&id),
            id,
            keep: false,
            batch: None,
        }
    }

    /// Use a caller-chosen directory. Kept by default.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "capture".to_string());
        Self {
            id,
            dir,
            keep: true,
            batch: None,
        }
    }

    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn for_batch(mut self, batch: BatchId) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Create the directory and write the metadata file
    pub fn init(&self) -> DashResult<()> {
        fs::create_dir_all(&self.dir)?;

        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_default();
        let metadata = serde_json::json!({
            "id": self.id,
            "created": Utc::now().to_rfc3339(),
            "host": host,
            "batch": self.batch,
        });
        fs::write(self.dir.join(METADATA_FILE), serde_json::to_string_pretty(&metadata)?)?;
        Ok(())
    }

    /// `<machine>_<HHMMSS_mmm>.png`
    pub fn screenshot_path(&self, shot: &Screenshot) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.png",
            shot.machine,
            shot.fetched_at.format("%H%M%S_%3f")
        ))
    }

    /// Path for the newest capture of a machine, used by one-off downloads
    pub fn latest_path(&self, machine: MachineId) -> PathBuf {
        self.dir.join(format!("{}.png", machine))
    }

    pub fn save_screenshot(&self, shot: &Screenshot) -> DashResult<PathBuf> {
        let path = self.screenshot_path(shot);
        fs::write(&path, &shot.png)?;
        debug!(path = %path.display(), "saved screenshot");
        Ok(path)
    }

    /// All PNG files in the session, sorted
    pub fn list_captures(&self) -> DashResult<Vec<PathBuf>> {
        let mut captures = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "png") {
                    captures.push(path);
                }
            }
        }
        captures.sort();
        Ok(captures)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::png_base64;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("exam a/b"), "exam_a_b");
    }

    #[test]
    fn test_save_and_list() {
        let base = TempDir::new().unwrap();
        let session = CaptureSession::with_name_in(base.path(), "exam 1")
            .keep(true)
            .for_batch(BatchId::new("17").unwrap());
        assert!(session.id.starts_with("exam_1_"));
        session.init().unwrap();

        let shot = Screenshot::decode(MachineId::Worker(3), &png_base64(2, 2)).unwrap();
        let path = session.save_screenshot(&shot).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("machine_3_"));
        assert_eq!(session.list_captures().unwrap(), vec![path]);

        let metadata: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(session.dir.join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!(metadata["batch"], "17");
    }

    #[test]
    fn test_drop_cleans_up_unless_kept() {
        let base = TempDir::new().unwrap();

        let dir = {
            let session = CaptureSession::with_name_in(base.path(), "temp");
            session.init().unwrap();
            session.dir.clone()
        };
        assert!(!dir.exists());

        let kept = CaptureSession::in_dir(base.path().join("mine"));
        kept.init().unwrap();
        let dir = kept.dir.clone();
        drop(kept);
        assert!(dir.exists());
    }
}
