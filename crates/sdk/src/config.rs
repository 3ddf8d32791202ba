//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use eyes_common::{BatchInfo, Error, FailureReports, ImageMatchSettings, Result};

pub const DEFAULT_SERVER_URL: &str = "https://eyesapi.applitools.com";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EyesConfig {
    /// API key; falls back to `APPLITOOLS_API_KEY`
    pub api_key: Option<String>,

    /// Comparison service connection
    pub server: ServerConfig,

    /// Identifies this client to the service
    pub agent_id: String,

    /// Default retry budget for a checkpoint
    pub match_timeout_ms: u64,

    /// Delay between attempts inside the retry loop
    pub match_interval_ms: u64,

    pub default_match_settings: ImageMatchSettings,

    pub failure_reports: FailureReports,

    /// Save the baseline of a new test on close
    pub save_new_tests: bool,

    /// Save a failed test as the new baseline on close
    pub save_failed_tests: bool,

    pub branch_name: Option<String>,
    pub parent_branch_name: Option<String>,

    /// Batch name; the batch itself is created per manager
    pub batch_name: Option<String>,
    /// Fixed batch id, used to group runs from several processes
    pub batch_id: Option<String>,

    pub host_os: Option<String>,
    pub host_app: Option<String>,
    pub env_name: Option<String>,

    /// Turn every operation into a no-op
    pub is_disabled: bool,
}

impl Default for EyesConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            server: ServerConfig::default(),
            agent_id: eyes_common::default_agent_id(),
            match_timeout_ms: 2000,
            match_interval_ms: 500,
            default_match_settings: ImageMatchSettings::default(),
            failure_reports: FailureReports::OnClose,
            save_new_tests: true,
            save_failed_tests: false,
            branch_name: None,
            parent_branch_name: None,
            batch_name: None,
            batch_id: None,
            host_os: None,
            host_app: None,
            env_name: None,
            is_disabled: false,
        }
    }
}

/// Connection to the comparison service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL; falls back to `APPLITOOLS_SERVER_URL`
    pub url: String,

    pub proxy: Option<ProxySettings>,

    /// Per-request timeout
    pub timeout_ms: u64,

    pub poll: PollSchedule,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            proxy: None,
            timeout_ms: 300_000,
            poll: PollSchedule::default(),
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub uri: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Delay schedule for polling a long-running server task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSchedule {
    pub initial_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2000,
            factor: 1.5,
            max_delay_ms: 10_000,
        }
    }
}

impl EyesConfig {
    /// Load configuration from file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?
        } else {
            Self::default()
        };
        Ok(config.with_env())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Fill unset values from the environment
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.api_key.is_none() {
            self.api_key = lookup("APPLITOOLS_API_KEY");
        }
        if self.server.url == DEFAULT_SERVER_URL {
            if let Some(url) = lookup("APPLITOOLS_SERVER_URL") {
                self.server.url = url;
            }
        }
        if self.batch_id.is_none() {
            self.batch_id = lookup("APPLITOOLS_BATCH_ID");
        }
        if self.batch_name.is_none() {
            self.batch_name = lookup("APPLITOOLS_BATCH_NAME");
        }
        self
    }

    pub fn match_timeout(&self) -> Duration {
        Duration::from_millis(self.match_timeout_ms)
    }

    pub fn match_interval(&self) -> Duration {
        Duration::from_millis(self.match_interval_ms)
    }

    /// The batch new sessions are started in
    pub fn batch(&self) -> BatchInfo {
        let mut batch = BatchInfo::new(self.batch_name.clone());
        if let Some(id) = &self.batch_id {
            batch.id = id.clone();
        }
        batch
    }
}
