//! Session lifecycle manager
//!
//! `Eyes` drives one test at a time: `open`, any number of `check` calls,
//! then `close` or `abort_if_not_closed`. The server session is started
//! lazily by the first checkpoint, so a test that never validates anything
//! never talks to the service.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use eyes_common::{
    AppEnvironment, BatchInfo, CoordinatesType, Error, FailureReports, Location, MatchResult,
    MouseAction, PropertyData, Region, Result, RunningSession, Screenshot, SessionStartInfo, Size,
    TestResults, TestResultsStatus, Trigger,
};

use crate::capture::{CaptureRules, ScreenshotSource};
use crate::config::EyesConfig;
use crate::connector::{EyesConnector, ServerConnector};
use crate::events::{EventObserver, Observers, ValidationInfo, ValidationResult};
use crate::matcher::{Checkpoint, MatchState, MatchWindowTask};

/// A test between `open` and `close`
#[derive(Debug)]
struct OpenTest {
    app_name: String,
    test_name: String,
    viewport_size: Option<Size>,
    aut_session_id: String,
    session: Option<RunningSession>,
    validation_id: u32,
}

/// Visual checkpoint session manager
pub struct Eyes {
    config: EyesConfig,
    connector: Arc<dyn EyesConnector>,
    source: Arc<dyn ScreenshotSource>,
    rules: CaptureRules,
    observers: Observers,
    batch: BatchInfo,
    properties: Vec<PropertyData>,
    test: Option<OpenTest>,
    state: MatchState,
}

impl Eyes {
    /// Create a manager talking to the service named in `config`
    pub fn new(config: EyesConfig, source: Arc<dyn ScreenshotSource>) -> Result<Self> {
        let api_key = config.api_key.clone().unwrap_or_default();
        let connector = ServerConnector::new(&config.server, api_key)?;
        Ok(Self::with_connector(config, Arc::new(connector), source))
    }

    pub fn with_connector(
        config: EyesConfig,
        connector: Arc<dyn EyesConnector>,
        source: Arc<dyn ScreenshotSource>,
    ) -> Self {
        let batch = config.batch();
        Self {
            config,
            connector,
            source,
            rules: CaptureRules::default(),
            observers: Observers::default(),
            batch,
            properties: Vec::new(),
            test: None,
            state: MatchState::default(),
        }
    }

    pub fn config(&self) -> &EyesConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.test.is_some()
    }

    pub fn batch(&self) -> &BatchInfo {
        &self.batch
    }

    pub fn set_batch(&mut self, batch: BatchInfo) {
        self.batch = batch;
    }

    pub fn set_capture_rules(&mut self, rules: CaptureRules) {
        self.rules = rules;
    }

    pub fn add_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.push(PropertyData {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn add_observer(&mut self, observer: Arc<dyn EventObserver>) {
        self.observers.add(observer);
    }

    /// Triggers queued for the next checkpoint
    pub fn user_inputs(&self) -> &[Trigger] {
        &self.state.user_inputs
    }

    /// Identifier of the current open test, fresh for every `open`
    pub fn aut_session_id(&self) -> Option<&str> {
        self.test.as_ref().map(|t| t.aut_session_id.as_str())
    }

    /// Begin a test. Opening over a running test aborts it and fails.
    pub async fn open(
        &mut self,
        app_name: &str,
        test_name: &str,
        viewport_size: Option<Size>,
    ) -> Result<()> {
        if self.config.is_disabled {
            debug!("open({}, {}): ignored, disabled", app_name, test_name);
            return Ok(());
        }

        if self.is_open() {
            self.abort_if_not_closed().await?;
            return Err(Error::InvalidConfig("A test is already running".into()));
        }

        if self.config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(Error::InvalidConfig("API key is missing".into()));
        }

        self.state.reset();
        let aut_session_id = Uuid::new_v4().to_string();
        info!(
            "Opened test '{}' of '{}' ({})",
            test_name, app_name, aut_session_id
        );
        self.test = Some(OpenTest {
            app_name: app_name.to_string(),
            test_name: test_name.to_string(),
            viewport_size,
            aut_session_id,
            session: None,
            validation_id: 0,
        });
        Ok(())
    }

    fn start_info(&self, test: &OpenTest) -> SessionStartInfo {
        SessionStartInfo {
            agent_id: self.config.agent_id.clone(),
            app_id_or_name: test.app_name.clone(),
            scenario_id_or_name: test.test_name.clone(),
            batch_info: self.batch.clone(),
            env_name: self.config.env_name.clone(),
            environment: AppEnvironment {
                os: self.config.host_os.clone(),
                hosting_app: self.config.host_app.clone(),
                display_size: test.viewport_size,
                inferred: None,
            },
            default_match_settings: self.config.default_match_settings.clone(),
            branch_name: self.config.branch_name.clone(),
            parent_branch_name: self.config.parent_branch_name.clone(),
            properties: self.properties.clone(),
        }
    }

    async fn ensure_session(&mut self) -> Result<()> {
        let test = self
            .test
            .as_ref()
            .ok_or_else(|| Error::InvalidState("Eyes not open".into()))?;
        if test.session.is_some() {
            return Ok(());
        }

        let start_info = self.start_info(test);
        let session = self.connector.start_session(&start_info).await?;
        let aut_session_id = test.aut_session_id.clone();
        if let Some(test) = self.test.as_mut() {
            test.session = Some(session);
        }
        self.observers.session_started(&aut_session_id).await;
        Ok(())
    }

    /// Validate the application's current state
    pub async fn check(&mut self, checkpoint: Checkpoint) -> Result<MatchResult> {
        if self.config.is_disabled {
            debug!("check({}): ignored, disabled", checkpoint.tag);
            return Ok(MatchResult {
                as_expected: true,
                window_id: None,
            });
        }

        self.ensure_session().await?;
        let test = self
            .test
            .as_mut()
            .ok_or_else(|| Error::InvalidState("Eyes not open".into()))?;
        let session = test
            .session
            .as_ref()
            .ok_or_else(|| Error::Internal("session missing after start".into()))?;

        test.validation_id += 1;
        let validation = ValidationInfo {
            validation_id: test.validation_id,
            tag: checkpoint.tag.clone(),
        };
        self.observers
            .checkpoint_will_start(&test.aut_session_id, &validation)
            .await;

        let retry_timeout = checkpoint
            .retry_timeout
            .unwrap_or_else(|| self.config.match_timeout());
        let task = MatchWindowTask::new(
            self.connector.as_ref(),
            self.source.as_ref(),
            &self.rules,
            session,
            self.config.match_interval(),
        );
        let outcome = match task
            .match_window(&mut self.state, &checkpoint, retry_timeout)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.observers
                    .checkpoint_ended(
                        &test.aut_session_id,
                        validation.validation_id,
                        &ValidationResult { as_expected: false },
                    )
                    .await;
                return Err(e);
            }
        };

        self.observers
            .checkpoint_ended(
                &test.aut_session_id,
                validation.validation_id,
                &ValidationResult {
                    as_expected: outcome.as_expected(),
                },
            )
            .await;

        if !outcome.as_expected()
            && !checkpoint.ignore_mismatch
            && self.config.failure_reports == FailureReports::Immediate
        {
            return Err(Error::TestFailed {
                message: format!(
                    "Mismatch found in '{}' of '{}'",
                    test.test_name, test.app_name
                ),
                results: None,
            });
        }

        Ok(outcome.result)
    }

    /// Upload a replacement screenshot for an already recorded step
    pub async fn replace_window(
        &mut self,
        step_index: u32,
        checkpoint: Checkpoint,
    ) -> Result<MatchResult> {
        if self.config.is_disabled {
            return Ok(MatchResult::default());
        }

        self.ensure_session().await?;
        let session = self
            .test
            .as_ref()
            .and_then(|t| t.session.as_ref())
            .ok_or_else(|| Error::InvalidState("Eyes not open".into()))?;

        let task = MatchWindowTask::new(
            self.connector.as_ref(),
            self.source.as_ref(),
            &self.rules,
            session,
            self.config.match_interval(),
        );
        Ok(task
            .replace_window(&self.state, step_index, &checkpoint)
            .await?
            .result)
    }

    /// End the test and collect its results.
    ///
    /// With `throw_on_failure`, an unresolved or failed test becomes an
    /// error carrying the results.
    pub async fn close(&mut self, throw_on_failure: bool) -> Result<TestResults> {
        if self.config.is_disabled {
            debug!("close(): ignored, disabled");
            return Ok(TestResults::default());
        }

        let test = self
            .test
            .take()
            .ok_or_else(|| Error::InvalidState("Eyes not open".into()))?;

        let Some(session) = test.session else {
            info!("Closed '{}' without checkpoints", test.test_name);
            let results = TestResults::default();
            self.observers
                .session_ended(&test.aut_session_id, &results)
                .await;
            return Ok(results);
        };

        let is_new = session.is_new_baseline;
        let save = (is_new && self.config.save_new_tests)
            || (!is_new && self.config.save_failed_tests);
        debug!("Ending session {} (save: {})", session.server_id, save);

        let mut results = self.connector.end_session(&session, false, save).await?;
        results.is_new = is_new;
        results.url = session.results_url.clone();
        info!("'{}' of '{}': {}", test.test_name, test.app_name, results);

        self.observers
            .session_ended(&test.aut_session_id, &results)
            .await;

        if throw_on_failure {
            let url = results.url.clone().unwrap_or_default();
            match results.status {
                TestResultsStatus::Unresolved if is_new => {
                    return Err(Error::NewTest {
                        message: format!(
                            "'{}' of '{}'. Please approve the new baseline at {}",
                            test.test_name, test.app_name, url
                        ),
                        results: Box::new(results),
                    });
                }
                TestResultsStatus::Unresolved => {
                    return Err(Error::DiffsFound {
                        message: format!(
                            "Test '{}' of '{}' detected differences! See details at: {}",
                            test.test_name, test.app_name, url
                        ),
                        results: Box::new(results),
                    });
                }
                TestResultsStatus::Failed => {
                    return Err(Error::TestFailed {
                        message: format!(
                            "'{}' of '{}'. See details at {}",
                            test.test_name, test.app_name, url
                        ),
                        results: Some(Box::new(results)),
                    });
                }
                TestResultsStatus::Passed => {}
            }
        }

        Ok(results)
    }

    /// Abort the open test, if any. End-session failures are logged, not returned.
    pub async fn abort_if_not_closed(&mut self) -> Result<Option<TestResults>> {
        let Some(test) = self.test.take() else {
            return Ok(None);
        };
        let Some(session) = test.session else {
            debug!("Aborted '{}' before any session started", test.test_name);
            let results = TestResults {
                is_aborted: true,
                ..Default::default()
            };
            self.observers
                .session_ended(&test.aut_session_id, &results)
                .await;
            return Ok(Some(results));
        };

        match self.connector.end_session(&session, true, false).await {
            Ok(mut results) => {
                results.is_new = session.is_new_baseline;
                results.url = session.results_url.clone();
                info!("Aborted '{}': {}", test.test_name, results);
                self.observers
                    .session_ended(&test.aut_session_id, &results)
                    .await;
                Ok(Some(results))
            }
            Err(e) => {
                warn!("Failed to abort session {}: {}", session.server_id, e);
                Ok(None)
            }
        }
    }

    /// Record a mouse action. `cursor` is relative to `control`, which is in
    /// context-relative coordinates.
    pub fn add_mouse_trigger(&mut self, action: MouseAction, control: Region, cursor: Location) {
        if self.config.is_disabled {
            return;
        }
        let Some(last) = &self.state.last_screenshot else {
            info!("Ignoring {} (no screenshot)", action);
            return;
        };

        let cursor = cursor.offset_by(control.location());
        let cursor_in_screenshot =
            match last.location_in_screenshot(cursor, CoordinatesType::ContextRelative) {
                Ok(location) => location,
                Err(_) => {
                    info!("Ignoring {} (out of bounds)", action);
                    return;
                }
            };

        let control_in_screenshot = match last.intersected_region(
            control,
            CoordinatesType::ContextRelative,
            CoordinatesType::ScreenshotAsIs,
        ) {
            Ok(region) => region,
            Err(e) => {
                info!("Ignoring {} ({})", action, e);
                return;
            }
        };

        let location = if control_in_screenshot.is_empty() {
            cursor_in_screenshot
        } else {
            Location::new(
                cursor_in_screenshot.x - control_in_screenshot.left,
                cursor_in_screenshot.y - control_in_screenshot.top,
            )
        };

        let trigger = Trigger::Mouse {
            mouse_action: action,
            control: control_in_screenshot,
            location,
        };
        debug!("Added {}", trigger);
        self.state.user_inputs.push(trigger);
    }

    /// Record text typed into `control` (context-relative coordinates)
    pub fn add_text_trigger(&mut self, control: Region, text: &str) {
        if self.config.is_disabled {
            return;
        }
        if text.is_empty() {
            return;
        }
        let Some(last) = &self.state.last_screenshot else {
            info!("Ignoring '{}' (no screenshot)", text);
            return;
        };

        let control_in_screenshot = match last.intersected_region(
            control,
            CoordinatesType::ContextRelative,
            CoordinatesType::ScreenshotAsIs,
        ) {
            Ok(region) => region,
            Err(e) => {
                info!("Ignoring '{}' ({})", text, e);
                return;
            }
        };
        if !control.is_empty() && control_in_screenshot.is_empty() {
            info!("Ignoring '{}' (out of bounds)", text);
            return;
        }

        let trigger = Trigger::Text {
            control: control_in_screenshot,
            text: text.to_string(),
        };
        debug!("Added {}", trigger);
        self.state.user_inputs.push(trigger);
    }
}
