//! Test doubles for the connector and screenshot source

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use eyes_common::{
    imaging, Error, MatchResult, MatchWindowData, Result, RunningSession, SessionStartInfo,
    TestResults, Trigger,
};

use crate::capture::{Capture, CaptureContext, ScreenshotSource};
use crate::connector::EyesConnector;

pub fn solid(width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
    RgbaImage::from_pixel(width, height, color)
}

/// Always returns the same image
pub struct StaticSource {
    pub image: Vec<u8>,
    pub context: CaptureContext,
    pub captures: AtomicUsize,
}

impl StaticSource {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: imaging::pack(&image).unwrap(),
            context: CaptureContext::Image {
                location: Default::default(),
            },
            captures: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ScreenshotSource for StaticSource {
    async fn capture(&self) -> Result<Capture> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(Capture {
            image: self.image.clone(),
            context: self.context.clone(),
        })
    }

    async fn title(&self) -> Result<String> {
        Ok("Static".into())
    }
}

/// One recorded match or replace upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub tag: String,
    pub ignore_mismatch: bool,
    pub user_inputs: Vec<Trigger>,
    pub replace_step: Option<u32>,
    pub at: tokio::time::Instant,
}

/// Scripted connector: answers matches from a queue, falling back to `default_match`
pub struct MockConnector {
    pub script: Mutex<VecDeque<bool>>,
    pub default_match: bool,
    pub fail_matches: bool,
    pub fail_end: bool,
    pub new_baseline: bool,
    pub end_results: TestResults,
    pub uploads: Mutex<Vec<Upload>>,
    pub starts: AtomicUsize,
    pub ends: Mutex<Vec<(bool, bool)>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_match: true,
            fail_matches: false,
            fail_end: false,
            new_baseline: false,
            end_results: TestResults::default(),
            uploads: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            ends: Mutex::new(Vec::new()),
        }
    }
}

impl MockConnector {
    pub fn scripted(results: &[bool], default_match: bool) -> Self {
        Self {
            script: Mutex::new(results.iter().copied().collect()),
            default_match,
            ..Default::default()
        }
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().clone()
    }

    fn answer(&self, data: &MatchWindowData, replace_step: Option<u32>) -> Result<MatchResult> {
        self.uploads.lock().push(Upload {
            tag: data.tag.clone(),
            ignore_mismatch: data.ignore_mismatch,
            user_inputs: data.user_inputs.clone(),
            replace_step,
            at: tokio::time::Instant::now(),
        });
        if self.fail_matches {
            return Err(Error::Protocol {
                operation: "matchWindow".into(),
                status: 500,
                body: "scripted failure".into(),
            });
        }
        let as_expected = self.script.lock().pop_front().unwrap_or(self.default_match);
        Ok(MatchResult {
            as_expected,
            window_id: None,
        })
    }
}

#[async_trait]
impl EyesConnector for MockConnector {
    async fn start_session(&self, _start_info: &SessionStartInfo) -> Result<RunningSession> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(RunningSession {
            server_id: format!("session-{}", n),
            legacy_id: None,
            batch_id: None,
            baseline_id: None,
            results_url: Some(format!("http://results/session-{}", n)),
            is_new_baseline: self.new_baseline,
        })
    }

    async fn match_window(
        &self,
        _session: &RunningSession,
        data: &MatchWindowData,
        _image: &[u8],
    ) -> Result<MatchResult> {
        self.answer(data, None)
    }

    async fn replace_window(
        &self,
        _session: &RunningSession,
        step_index: u32,
        data: &MatchWindowData,
        _image: &[u8],
    ) -> Result<MatchResult> {
        self.answer(data, Some(step_index))
    }

    async fn end_session(
        &self,
        _session: &RunningSession,
        aborted: bool,
        save: bool,
    ) -> Result<TestResults> {
        self.ends.lock().push((aborted, save));
        if self.fail_end {
            return Err(Error::Protocol {
                operation: "stopSession".into(),
                status: 503,
                body: String::new(),
            });
        }
        Ok(self.end_results.clone())
    }
}
