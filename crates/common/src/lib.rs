//! Eyes Common Library
//!
//! Geometry, screenshot model, delta codec and wire types shared by the
//! Eyes client crates.

pub mod delta;
pub mod error;
pub mod geometry;
pub mod imaging;
pub mod screenshot;
pub mod types;

// Re-export commonly used types
pub use delta::{compress_by_raw_blocks, DeltaPayload};
pub use error::{Error, Result};
pub use geometry::{CoordinatesType, Location, Region, Size};
pub use screenshot::{EyesScreenshot, FrameScreenshot, ImageScreenshot, Screenshot};
pub use types::*;

/// Client version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Agent identifier sent with every session start
pub fn default_agent_id() -> String {
    format!("eyes-rs/{}", VERSION)
}
