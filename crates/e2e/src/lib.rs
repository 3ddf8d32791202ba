//! Eyes E2E harness
//!
//! Runs the client against an in-process fake of the comparison service:
//!
//! ```text
//! Eyes ──reqwest──▶ FakeServer (axum, 127.0.0.1:0)
//!  │                   ├── POST   /api/sessions/running
//!  │                   ├── POST   /api/sessions/running/:id
//!  │                   ├── PUT    /api/sessions/running/:id/:step
//!  │                   ├── DELETE /api/sessions/running/:id
//!  │                   └── GET/DELETE /api/tasks/:id[/result]
//!  └── SyntheticApp (ScreenshotSource)
//! ```

pub mod error;
pub mod server;
pub mod source;

pub use error::{E2eError, E2eResult};
pub use server::{Behavior, FakeServer, RecordedEnd, RecordedUpload, API_KEY};
pub use source::SyntheticApp;

use eyes_sdk::{EyesConfig, PollSchedule, ServerConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// Install a test-friendly subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Client configuration pointing at `server`, with short delays
pub fn client_config(server: &FakeServer) -> EyesConfig {
    EyesConfig {
        api_key: Some(API_KEY.to_string()),
        server: ServerConfig {
            url: server.url(),
            poll: PollSchedule {
                initial_delay_ms: 5,
                factor: 1.5,
                max_delay_ms: 20,
            },
            ..Default::default()
        },
        match_timeout_ms: 200,
        match_interval_ms: 50,
        ..Default::default()
    }
}
