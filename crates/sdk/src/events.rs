//! Session and checkpoint event notifications

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use eyes_common::{Result, TestResults};

/// Describes a checkpoint about to be evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationInfo {
    pub validation_id: u32,
    pub tag: String,
}

/// Outcome reported when a checkpoint ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationResult {
    pub as_expected: bool,
}

/// Receives lifecycle events; every hook defaults to doing nothing.
///
/// Errors returned by an observer are logged and never reach the caller of
/// the session manager.
#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn session_started(&self, _aut_session_id: &str) -> Result<()> {
        Ok(())
    }

    async fn session_ended(
        &self,
        _aut_session_id: &str,
        _results: &TestResults,
    ) -> Result<()> {
        Ok(())
    }

    async fn checkpoint_will_start(
        &self,
        _aut_session_id: &str,
        _validation: &ValidationInfo,
    ) -> Result<()> {
        Ok(())
    }

    async fn checkpoint_ended(
        &self,
        _aut_session_id: &str,
        _validation_id: u32,
        _result: &ValidationResult,
    ) -> Result<()> {
        Ok(())
    }
}

/// Ordered list of registered observers
#[derive(Default, Clone)]
pub struct Observers {
    inner: Vec<Arc<dyn EventObserver>>,
}

impl Observers {
    pub fn add(&mut self, observer: Arc<dyn EventObserver>) {
        self.inner.push(observer);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub async fn session_started(&self, aut_session_id: &str) {
        for observer in &self.inner {
            if let Err(e) = observer.session_started(aut_session_id).await {
                warn!("session_started observer failed: {}", e);
            }
        }
    }

    pub async fn session_ended(&self, aut_session_id: &str, results: &TestResults) {
        for observer in &self.inner {
            if let Err(e) = observer.session_ended(aut_session_id, results).await {
                warn!("session_ended observer failed: {}", e);
            }
        }
    }

    pub async fn checkpoint_will_start(&self, aut_session_id: &str, validation: &ValidationInfo) {
        for observer in &self.inner {
            if let Err(e) = observer
                .checkpoint_will_start(aut_session_id, validation)
                .await
            {
                warn!("checkpoint_will_start observer failed: {}", e);
            }
        }
    }

    pub async fn checkpoint_ended(
        &self,
        aut_session_id: &str,
        validation_id: u32,
        result: &ValidationResult,
    ) {
        for observer in &self.inner {
            if let Err(e) = observer
                .checkpoint_ended(aut_session_id, validation_id, result)
                .await
            {
                warn!("checkpoint_ended observer failed: {}", e);
            }
        }
    }
}
