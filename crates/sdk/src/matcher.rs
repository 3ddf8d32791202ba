//! Checkpoint match coordinator
//!
//! Runs one checkpoint against the service. While the retry budget lasts,
//! attempts are uploaded with `ignore_mismatch` set so the server does not
//! record transient mismatches; a checkpoint still failing once the budget
//! is spent gets exactly one more attempt carrying the caller's real flag.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use eyes_common::{
    EyesScreenshot, ImageMatchSettings, MatchResult, MatchWindowData, Region, Result,
    RunningSession, Trigger,
};

use crate::capture::{self, AppOutput, CaptureRules, ScreenshotSource};
use crate::connector::EyesConnector;

/// A validation request
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    pub tag: String,
    /// Context-relative region to validate instead of the whole screenshot
    pub region: Option<Region>,
    pub ignore_mismatch: bool,
    /// Retry budget; `None` uses the configured default
    pub retry_timeout: Option<Duration>,
    pub match_settings: Option<ImageMatchSettings>,
}

impl Checkpoint {
    pub fn window(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn region(tag: impl Into<String>, region: Region) -> Self {
        Self {
            tag: tag.into(),
            region: Some(region),
            ..Default::default()
        }
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = Some(timeout);
        self
    }

    pub fn ignoring_mismatch(mut self) -> Self {
        self.ignore_mismatch = true;
        self
    }
}

/// State shared by consecutive checkpoints of one test
#[derive(Debug, Default)]
pub struct MatchState {
    /// Screenshot of the last non-ignored checkpoint; delta baseline and
    /// reference for trigger coordinates
    pub last_screenshot: Option<EyesScreenshot>,
    /// Skip the retry loop on the next checkpoint
    pub run_once_on_timeout: bool,
    /// User inputs recorded since the last successful checkpoint
    pub user_inputs: Vec<Trigger>,
}

impl MatchState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Result of one checkpoint together with the screenshot that produced it
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub result: MatchResult,
    pub screenshot: EyesScreenshot,
}

impl MatchOutcome {
    pub fn as_expected(&self) -> bool {
        self.result.as_expected
    }
}

/// Bookkeeping for one retry loop
#[derive(Debug)]
struct RetryState {
    started: Instant,
    current_delay: Duration,
    attempts: u32,
    exhausted: bool,
}

impl RetryState {
    fn start(interval: Duration) -> Self {
        Self {
            started: Instant::now(),
            current_delay: interval,
            attempts: 0,
            exhausted: false,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Evaluates checkpoints for one running session
pub struct MatchWindowTask<'a> {
    connector: &'a dyn EyesConnector,
    source: &'a dyn ScreenshotSource,
    rules: &'a CaptureRules,
    session: &'a RunningSession,
    retry_interval: Duration,
}

impl<'a> MatchWindowTask<'a> {
    pub fn new(
        connector: &'a dyn EyesConnector,
        source: &'a dyn ScreenshotSource,
        rules: &'a CaptureRules,
        session: &'a RunningSession,
        retry_interval: Duration,
    ) -> Self {
        Self {
            connector,
            source,
            rules,
            session,
            retry_interval,
        }
    }

    /// Evaluate `checkpoint` with a retry budget of `retry_timeout`
    pub async fn match_window(
        &self,
        state: &mut MatchState,
        checkpoint: &Checkpoint,
        retry_timeout: Duration,
    ) -> Result<MatchOutcome> {
        let outcome = if retry_timeout.is_zero() || state.run_once_on_timeout {
            if !retry_timeout.is_zero() {
                debug!("Previous checkpoint failed, waiting {:?} before a single attempt", retry_timeout);
                tokio::time::sleep(retry_timeout).await;
            }
            self.attempt(state, checkpoint, checkpoint.ignore_mismatch).await?
        } else {
            self.retry(state, checkpoint, retry_timeout).await?
        };

        self.finalize(state, checkpoint, &outcome);
        Ok(outcome)
    }

    async fn retry(
        &self,
        state: &MatchState,
        checkpoint: &Checkpoint,
        retry_timeout: Duration,
    ) -> Result<MatchOutcome> {
        let mut retry = RetryState::start(self.retry_interval);
        loop {
            let outcome = self.attempt(state, checkpoint, true).await?;
            retry.attempts += 1;
            if outcome.as_expected() {
                debug!(
                    "'{}' matched after {} attempt(s) in {:?}",
                    checkpoint.tag,
                    retry.attempts,
                    retry.elapsed()
                );
                return Ok(outcome);
            }

            if retry.elapsed() >= retry_timeout {
                retry.exhausted = true;
                break;
            }
            tokio::time::sleep(retry.current_delay).await;
        }

        debug!(
            "'{}' still mismatching after {} attempt(s) (exhausted: {}), final attempt",
            checkpoint.tag, retry.attempts, retry.exhausted
        );
        self.attempt(state, checkpoint, checkpoint.ignore_mismatch)
            .await
    }

    async fn attempt(
        &self,
        state: &MatchState,
        checkpoint: &Checkpoint,
        ignore_mismatch: bool,
    ) -> Result<MatchOutcome> {
        let AppOutput {
            title,
            screenshot,
            upload,
        } = capture::acquire(
            self.source,
            self.rules,
            checkpoint.region,
            state.last_screenshot.as_ref(),
        )
        .await?;

        let data = MatchWindowData::new(
            title,
            checkpoint.tag.clone(),
            state.user_inputs.clone(),
            ignore_mismatch,
            checkpoint.match_settings.clone(),
        );
        let result = self
            .connector
            .match_window(self.session, &data, &upload)
            .await?;
        Ok(MatchOutcome { result, screenshot })
    }

    fn finalize(&self, state: &mut MatchState, checkpoint: &Checkpoint, outcome: &MatchOutcome) {
        if checkpoint.ignore_mismatch {
            return;
        }

        state.last_screenshot = Some(outcome.screenshot.clone());
        state.run_once_on_timeout = !outcome.as_expected();
        if outcome.as_expected() {
            state.user_inputs.clear();
        } else {
            info!("Mismatch found for '{}'", checkpoint.tag);
        }
    }

    /// Upload a replacement for step `step_index`; a single attempt, no retries
    pub async fn replace_window(
        &self,
        state: &MatchState,
        step_index: u32,
        checkpoint: &Checkpoint,
    ) -> Result<MatchOutcome> {
        let output = capture::acquire(
            self.source,
            self.rules,
            checkpoint.region,
            state.last_screenshot.as_ref(),
        )
        .await?;

        let data = MatchWindowData::new(
            output.title,
            checkpoint.tag.clone(),
            state.user_inputs.clone(),
            checkpoint.ignore_mismatch,
            checkpoint.match_settings.clone(),
        );
        let result = self
            .connector
            .replace_window(self.session, step_index, &data, &output.upload)
            .await?;
        Ok(MatchOutcome {
            result,
            screenshot: output.screenshot,
        })
    }
}
