//! Eyes SDK
//!
//! Visual checkpoint client: opens a test, validates screenshots of the
//! application against the comparison service and reports the results.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use eyes_sdk::{Checkpoint, Eyes, EyesConfig, ScreenshotSource};
//! # async fn run(source: Arc<dyn ScreenshotSource>) -> eyes_common::Result<()> {
//! let mut eyes = Eyes::new(EyesConfig::default().with_env(), source)?;
//! eyes.open("My App", "Login page", None).await?;
//! eyes.check(Checkpoint::window("logged out")).await?;
//! let results = eyes.close(true).await?;
//! println!("{}", results);
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod connector;
pub mod events;
pub mod matcher;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use capture::{Capture, CaptureContext, CaptureRules, CutRule, ScaleRule, ScreenshotSource};
pub use config::{EyesConfig, PollSchedule, ProxySettings, ServerConfig};
pub use connector::{EyesConnector, ServerConnector};
pub use events::{EventObserver, ValidationInfo, ValidationResult};
pub use matcher::{Checkpoint, MatchOutcome};
pub use session::Eyes;
