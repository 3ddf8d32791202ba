//! Wire types exchanged with the comparison service

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::geometry::{Location, Region, Size};

/// A server-side test session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningSession {
    /// Identifier used in session URLs
    #[serde(rename = "id")]
    pub server_id: String,
    #[serde(rename = "sessionId", default)]
    pub legacy_id: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub baseline_id: Option<String>,
    #[serde(rename = "url", default)]
    pub results_url: Option<String>,
    /// Set from the session-start status code, not from the body
    #[serde(skip)]
    pub is_new_baseline: bool,
}

/// Batch a test belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub started_at: String,
}

impl BatchInfo {
    pub fn new(name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl Default for BatchInfo {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Environment the application under test runs in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEnvironment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosting_app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_size: Option<Size>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferred: Option<String>,
}

/// Comparison strictness applied by the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchLevel {
    None,
    Layout,
    Content,
    #[default]
    Strict,
    Exact,
}

/// Thresholds used with `MatchLevel::Exact`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactMatchSettings {
    pub min_diff_intensity: u32,
    pub min_diff_width: u32,
    pub min_diff_height: u32,
    pub match_threshold: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMatchSettings {
    #[serde(default)]
    pub match_level: MatchLevel,
    #[serde(default)]
    pub ignore_caret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<ExactMatchSettings>,
    /// Regions the service should not compare
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<Region>,
}

/// Free-form key/value attached to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyData {
    pub name: String,
    pub value: String,
}

/// Body of the session-start request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartInfo {
    pub agent_id: String,
    pub app_id_or_name: String,
    pub scenario_id_or_name: String,
    pub batch_info: BatchInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_name: Option<String>,
    pub environment: AppEnvironment,
    pub default_match_settings: ImageMatchSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyData>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseAction {
    #[default]
    None,
    Click,
    RightClick,
    DoubleClick,
    Move,
    Down,
    Up,
}

impl fmt::Display for MouseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A user input recorded between checkpoints, in screenshot coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "triggerType")]
pub enum Trigger {
    #[serde(rename_all = "camelCase")]
    Mouse {
        mouse_action: MouseAction,
        control: Region,
        location: Location,
    },
    #[serde(rename_all = "camelCase")]
    Text { control: Region, text: String },
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Mouse {
                mouse_action,
                control,
                location,
            } => write!(f, "{} [{}] {}", mouse_action, control, location),
            Trigger::Text { control, text } => write!(f, "Text [{}] {}", control, text),
        }
    }
}

/// Application output of one match attempt; the image travels outside the JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppOutput {
    pub title: String,
    #[serde(default)]
    pub screenshot64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOptions {
    pub name: String,
    pub user_inputs: Vec<Trigger>,
    pub ignore_mismatch: bool,
    pub ignore_match: bool,
    pub force_mismatch: bool,
    pub force_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_match_settings: Option<ImageMatchSettings>,
}

/// Metadata part of a match/replace upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchWindowData {
    pub user_inputs: Vec<Trigger>,
    pub app_output: AppOutput,
    pub tag: String,
    pub ignore_mismatch: bool,
    pub options: MatchOptions,
}

impl MatchWindowData {
    pub fn new(
        title: String,
        tag: String,
        user_inputs: Vec<Trigger>,
        ignore_mismatch: bool,
        settings: Option<ImageMatchSettings>,
    ) -> Self {
        Self {
            options: MatchOptions {
                name: tag.clone(),
                user_inputs: user_inputs.clone(),
                ignore_mismatch,
                ignore_match: false,
                force_mismatch: false,
                force_match: false,
                image_match_settings: settings,
            },
            user_inputs,
            app_output: AppOutput {
                title,
                screenshot64: None,
            },
            tag,
            ignore_mismatch,
        }
    }
}

/// Outcome of one match attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub as_expected: bool,
    #[serde(default)]
    pub window_id: Option<i64>,
}

/// When a mismatching checkpoint becomes an error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReports {
    /// Fail the checkpoint call itself
    Immediate,
    /// Only report when the test is closed
    #[default]
    OnClose,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestResultsStatus {
    #[default]
    Passed,
    Unresolved,
    Failed,
}

impl fmt::Display for TestResultsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Aggregate tally returned when a session ends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestResults {
    pub steps: u32,
    pub matches: u32,
    pub mismatches: u32,
    pub missing: u32,
    pub exact_matches: u32,
    pub strict_matches: u32,
    pub content_matches: u32,
    pub layout_matches: u32,
    pub none_matches: u32,
    pub status: TestResultsStatus,
    pub is_new: bool,
    pub is_aborted: bool,
    pub url: Option<String>,
}

impl TestResults {
    pub fn is_passed(&self) -> bool {
        self.status == TestResultsStatus::Passed
    }
}

impl fmt::Display for TestResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (steps: {}, matches: {}, mismatches: {}, missing: {})",
            self.status, self.steps, self.matches, self.mismatches, self.missing
        )
    }
}
