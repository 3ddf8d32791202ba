//! Screenshot model
//!
//! A captured screenshot is an immutable raster plus enough geometry to map
//! between three coordinate spaces:
//!
//! - `ScreenshotAsIs`: raw pixel coordinates of the stored image
//! - `ContextAsIs`: relative to the current frame, ignoring its scroll offset
//! - `ContextRelative`: relative to the current frame, including its scroll offset
//!
//! Two variants exist. [`ImageScreenshot`] wraps a plain image placed at some
//! location; [`FrameScreenshot`] carries the frame chain, scroll position and
//! frame window reported by a browser driver. Cropping never mutates the
//! source: a sub-screenshot is a new value re-anchored to the crop.

mod frame;
mod plain;

pub use self::frame::{Frame, FrameContext, FrameScreenshot, ScreenshotType};
pub use self::plain::ImageScreenshot;

use image::RgbaImage;

use crate::error::{Error, Result};
use crate::geometry::{CoordinatesType, Location, Region, Size};

/// Operations shared by all screenshot variants
pub trait Screenshot: Sized {
    fn image(&self) -> &RgbaImage;

    /// The valid-content rectangle of the image, in as-is coordinates
    fn frame_window(&self) -> Region;

    fn convert_location(
        &self,
        location: Location,
        from: CoordinatesType,
        to: CoordinatesType,
    ) -> Result<Location>;

    /// Intersect `region` (given in `space`) with the visible part of the
    /// screenshot and express the result in `result_space`. An empty
    /// intersection comes back unconverted.
    fn intersected_region(
        &self,
        region: Region,
        space: CoordinatesType,
        result_space: CoordinatesType,
    ) -> Result<Region>;

    fn sub_screenshot(
        &self,
        region: Region,
        space: CoordinatesType,
        throw_if_clipped: bool,
    ) -> Result<Self>;

    /// Map `location` to as-is coordinates, failing if it is not visible
    fn location_in_screenshot(&self, location: Location, space: CoordinatesType)
        -> Result<Location>;

    fn convert_region_location(
        &self,
        region: Region,
        from: CoordinatesType,
        to: CoordinatesType,
    ) -> Result<Region> {
        let location = self.convert_location(region.location(), from, to)?;
        Ok(region.with_location(location))
    }

    fn size(&self) -> Size {
        Size::new(self.image().width(), self.image().height())
    }
}

/// A screenshot of either variant
#[derive(Debug, Clone)]
pub enum EyesScreenshot {
    Image(ImageScreenshot),
    Frame(FrameScreenshot),
}

impl From<ImageScreenshot> for EyesScreenshot {
    fn from(s: ImageScreenshot) -> Self {
        EyesScreenshot::Image(s)
    }
}

impl From<FrameScreenshot> for EyesScreenshot {
    fn from(s: FrameScreenshot) -> Self {
        EyesScreenshot::Frame(s)
    }
}

impl Screenshot for EyesScreenshot {
    fn image(&self) -> &RgbaImage {
        match self {
            EyesScreenshot::Image(s) => s.image(),
            EyesScreenshot::Frame(s) => s.image(),
        }
    }

    fn frame_window(&self) -> Region {
        match self {
            EyesScreenshot::Image(s) => s.frame_window(),
            EyesScreenshot::Frame(s) => s.frame_window(),
        }
    }

    fn convert_location(
        &self,
        location: Location,
        from: CoordinatesType,
        to: CoordinatesType,
    ) -> Result<Location> {
        match self {
            EyesScreenshot::Image(s) => s.convert_location(location, from, to),
            EyesScreenshot::Frame(s) => s.convert_location(location, from, to),
        }
    }

    fn intersected_region(
        &self,
        region: Region,
        space: CoordinatesType,
        result_space: CoordinatesType,
    ) -> Result<Region> {
        match self {
            EyesScreenshot::Image(s) => s.intersected_region(region, space, result_space),
            EyesScreenshot::Frame(s) => s.intersected_region(region, space, result_space),
        }
    }

    fn sub_screenshot(
        &self,
        region: Region,
        space: CoordinatesType,
        throw_if_clipped: bool,
    ) -> Result<Self> {
        Ok(match self {
            EyesScreenshot::Image(s) => s.sub_screenshot(region, space, throw_if_clipped)?.into(),
            EyesScreenshot::Frame(s) => s.sub_screenshot(region, space, throw_if_clipped)?.into(),
        })
    }

    fn location_in_screenshot(
        &self,
        location: Location,
        space: CoordinatesType,
    ) -> Result<Location> {
        match self {
            EyesScreenshot::Image(s) => s.location_in_screenshot(location, space),
            EyesScreenshot::Frame(s) => s.location_in_screenshot(location, space),
        }
    }
}

/// Shared clipping check for `sub_screenshot`
fn check_sub_region(
    requested: Region,
    as_is: Region,
    frame_window: Region,
    throw_if_clipped: bool,
) -> Result<()> {
    if as_is.is_empty() || (throw_if_clipped && as_is.size() != requested.size()) {
        return Err(Error::OutOfBounds(format!(
            "region {} is out of screenshot bounds {}",
            requested, frame_window
        )));
    }
    Ok(())
}
