//! Screenshot capture for a run
//!
//! Files land in `<dir>/<task>/` and are referenced to clients as
//! `<url_prefix>/<task>/<file>`. A failed capture is logged and yields no
//! reference; it never fails the action.

use std::path::PathBuf;
use std::sync::Arc;

use flowfuzz_bridge::DeviceBridge;
use flowfuzz_core::prelude::*;
use flowfuzz_core::Coordinate;

use crate::config::OutputSettings;

/// File name of the baseline screenshot after launch
pub fn start_file(case: usize) -> String {
    format!("test_{case}_start.png")
}

pub fn action_file(case: usize, action: usize) -> String {
    format!("test_{case}_action_{action}.png")
}

pub fn final_file(case: usize) -> String {
    format!("test_{case}_final.png")
}

/// Crash screenshot; uncorrelated crashes are numbered instead
pub fn crash_file(coordinate: Option<Coordinate>, sequence: usize) -> String {
    match coordinate {
        Some(at) => format!("crash_{}_{}.png", at.test_case_index, at.action_index),
        None => format!("crash_{sequence}.png"),
    }
}

/// Captures screenshots for one task
pub struct ScreenshotManager<B> {
    bridge: Arc<B>,
    dir: PathBuf,
    url_prefix: String,
}

impl<B: DeviceBridge + Sync> ScreenshotManager<B> {
    pub fn new(bridge: Arc<B>, output: &OutputSettings, task_id: &str) -> Self {
        Self {
            bridge,
            dir: output.screenshots_dir.join(task_id),
            url_prefix: format!(
                "{}/{}",
                output.screenshot_url_prefix.trim_end_matches('/'),
                task_id
            ),
        }
    }

    /// Reference a client uses for `file`
    pub fn url_for(&self, file: &str) -> String {
        format!("{}/{}", self.url_prefix, file)
    }

    pub fn path_for(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Capture the screen into `file`, returning its reference
    pub async fn capture(&self, file: &str) -> Option<String> {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(
                "Cannot create screenshot directory {}: {}",
                self.dir.display(),
                e
            );
            return None;
        }

        match self.bridge.capture(&self.path_for(file)).await {
            Ok(_) => Some(self.url_for(file)),
            Err(e) => {
                warn!("Screenshot {} failed: {}", file, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowfuzz_bridge::test_utils::{BridgeCall, FakeBridge};
    use tempfile::tempdir;

    fn output(dir: &std::path::Path) -> OutputSettings {
        OutputSettings {
            screenshots_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_file_names() {
        assert_eq!(start_file(0), "test_0_start.png");
        assert_eq!(action_file(1, 2), "test_1_action_2.png");
        assert_eq!(final_file(3), "test_3_final.png");
        assert_eq!(crash_file(Some(Coordinate::new(0, 1)), 5), "crash_0_1.png");
        assert_eq!(crash_file(None, 5), "crash_5.png");
    }

    #[tokio::test]
    async fn test_capture_returns_url() {
        let dir = tempdir().unwrap();
        let bridge = Arc::new(FakeBridge::new());
        let screenshots = ScreenshotManager::new(Arc::clone(&bridge), &output(dir.path()), "t1");

        let url = screenshots.capture(&start_file(0)).await;
        assert_eq!(url.as_deref(), Some("/screenshots/t1/test_0_start.png"));
        assert!(dir.path().join("t1").is_dir());

        let expected = dir.path().join("t1").join("test_0_start.png");
        assert_eq!(bridge.calls(), vec![BridgeCall::Capture(expected)]);
    }

    #[tokio::test]
    async fn test_failed_capture_yields_no_reference() {
        let dir = tempdir().unwrap();
        let bridge = Arc::new(FakeBridge::new().fail_captures());
        let screenshots = ScreenshotManager::new(bridge, &output(dir.path()), "t1");

        assert_eq!(screenshots.capture(&final_file(0)).await, None);
    }

    #[test]
    fn test_url_prefix_trailing_slash() {
        let bridge = Arc::new(FakeBridge::new());
        let settings = OutputSettings {
            screenshot_url_prefix: "/static/".to_string(),
            ..Default::default()
        };
        let screenshots = ScreenshotManager::new(bridge, &settings, "t9");
        assert_eq!(screenshots.url_for("a.png"), "/static/t9/a.png");
    }
}
