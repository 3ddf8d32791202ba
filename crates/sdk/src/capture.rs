//! Screenshot acquisition
//!
//! Pulls raw bytes from a [`ScreenshotSource`], applies the capture rules,
//! builds the screenshot model and prepares the upload bytes, delta-encoded
//! against the previous checkpoint when possible.

use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use eyes_common::screenshot::FrameContext;
use eyes_common::{
    delta, imaging, CoordinatesType, Error, EyesScreenshot, FrameScreenshot, ImageScreenshot,
    Location, Region, Result, Screenshot,
};

/// Raw output of a screenshot source
#[derive(Debug, Clone)]
pub struct Capture {
    /// Encoded image bytes, any format the image codec understands
    pub image: Vec<u8>,
    pub context: CaptureContext,
}

/// Geometry reported along with a capture
#[derive(Debug, Clone)]
pub enum CaptureContext {
    /// A plain image placed at `location` in context-relative space
    Image { location: Location },
    /// A browser capture with frame chain and scroll state
    Frames(FrameContext),
}

impl Capture {
    pub fn image(bytes: Vec<u8>) -> Self {
        Self {
            image: bytes,
            context: CaptureContext::Image {
                location: Location::ZERO,
            },
        }
    }
}

/// Produces screenshots of the application under test
#[async_trait]
pub trait ScreenshotSource: Send + Sync {
    async fn capture(&self) -> Result<Capture>;

    async fn title(&self) -> Result<String>;
}

/// How a raw capture is scaled before use
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleRule {
    /// Multiply both dimensions by the ratio
    Fixed(f64),
    /// Undo a device pixel ratio
    DevicePixelRatio(f64),
}

impl ScaleRule {
    pub fn ratio(&self) -> f64 {
        match *self {
            ScaleRule::Fixed(ratio) => ratio,
            ScaleRule::DevicePixelRatio(dpr) => 1.0 / dpr,
        }
    }
}

/// Pixels trimmed from each edge of a raw capture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutRule {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl CutRule {
    pub fn apply(&self, image: &RgbaImage) -> Result<RgbaImage> {
        let width = image.width().saturating_sub(self.left + self.right);
        let height = image.height().saturating_sub(self.top + self.bottom);
        if width == 0 || height == 0 {
            return Err(Error::OutOfBounds(format!(
                "cutting {:?} leaves nothing of a {}x{} image",
                self,
                image.width(),
                image.height()
            )));
        }
        imaging::crop(
            image,
            Region::new(self.left as i32, self.top as i32, width, height),
        )
    }
}

/// Post-processing applied to every raw capture, in order: rotate, scale, cut
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureRules {
    pub scale: Option<ScaleRule>,
    pub cut: Option<CutRule>,
    /// Clockwise, multiple of 90
    pub rotation: Option<i32>,
}

impl CaptureRules {
    pub fn apply(&self, image: RgbaImage) -> Result<RgbaImage> {
        let mut image = image;
        if let Some(degrees) = self.rotation {
            image = imaging::rotate(&image, degrees)?;
        }
        if let Some(rule) = self.scale {
            image = imaging::scale(&image, rule.ratio())?;
        }
        if let Some(cut) = self.cut {
            image = cut.apply(&image)?;
        }
        Ok(image)
    }
}

/// Everything one match attempt uploads
#[derive(Debug, Clone)]
pub struct AppOutput {
    pub title: String,
    pub screenshot: EyesScreenshot,
    /// PNG bytes, delta-encoded against the previous screenshot when smaller
    pub upload: Vec<u8>,
}

/// Build the screenshot model for a processed raster
pub fn build_screenshot(image: RgbaImage, context: CaptureContext) -> Result<EyesScreenshot> {
    Ok(match context {
        CaptureContext::Image { location } => ImageScreenshot::with_location(image, location).into(),
        CaptureContext::Frames(ctx) => FrameScreenshot::new(image, ctx)?.into(),
    })
}

/// Capture, process and encode the application output.
///
/// `region` is in context-relative coordinates; `last` is the screenshot of
/// the previous non-ignored checkpoint.
pub async fn acquire(
    source: &dyn ScreenshotSource,
    rules: &CaptureRules,
    region: Option<Region>,
    last: Option<&EyesScreenshot>,
) -> Result<AppOutput> {
    let capture = source.capture().await?;
    let raw = imaging::parse(&capture.image)?;
    trace!("Captured {}x{} image", raw.width(), raw.height());

    let processed = rules.apply(raw)?;
    let mut screenshot = build_screenshot(processed, capture.context)?;
    if let Some(region) = region {
        screenshot = screenshot.sub_screenshot(region, CoordinatesType::ContextRelative, false)?;
    }

    let png = imaging::pack(screenshot.image())?;
    let upload = delta::compress_by_raw_blocks(
        screenshot.image(),
        &png,
        last.map(|s| s.image()),
    )?
    .into_owned();
    debug!(
        "Prepared {} upload bytes from {} PNG bytes",
        upload.len(),
        png.len()
    );

    let title = source.title().await?;
    Ok(AppOutput {
        title,
        screenshot,
        upload,
    })
}
