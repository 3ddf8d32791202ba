//! Screenshot taken through a browser driver, possibly inside nested frames

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use super::{check_sub_region, Screenshot};
use crate::error::{Error, Result};
use crate::geometry::{CoordinatesType, Location, Region, Size};
use crate::imaging;

/// Whether the image shows just the viewport or the whole frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotType {
    Viewport,
    EntireFrame,
}

impl ScreenshotType {
    /// An image no larger than the viewport is a viewport screenshot
    pub fn detect(image: Size, viewport: Size) -> Self {
        if image.width <= viewport.width && image.height <= viewport.height {
            ScreenshotType::Viewport
        } else {
            ScreenshotType::EntireFrame
        }
    }
}

/// One entry of a frame chain, outermost first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Location of the frame inside its parent's content
    pub location: Location,
    /// Client size of the frame
    pub inner_size: Size,
    /// Scroll position of the parent when the frame was entered
    pub parent_scroll: Location,
}

/// Page metrics reported by the driver alongside the raw image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameContext {
    #[serde(default)]
    pub frames: Vec<Frame>,
    /// Scroll position of the current frame
    #[serde(default)]
    pub scroll_position: Location,
    pub viewport_size: Size,
    /// Full size of the top-level page, when known
    #[serde(default)]
    pub entire_size: Option<Size>,
    #[serde(default)]
    pub screenshot_type: Option<ScreenshotType>,
    /// Overrides the computed frame location, used when re-anchoring crops
    #[serde(default)]
    pub frame_location_in_screenshot: Option<Location>,
}

#[derive(Debug, Clone)]
pub struct FrameScreenshot {
    image: RgbaImage,
    screenshot_type: ScreenshotType,
    frames: Vec<Frame>,
    scroll_position: Location,
    frame_location_in_screenshot: Location,
    frame_size: Size,
    frame_window: Region,
}

impl FrameScreenshot {
    pub fn new(image: RgbaImage, context: FrameContext) -> Result<Self> {
        let image_size = imaging::size_of(&image);
        let screenshot_type = context
            .screenshot_type
            .unwrap_or_else(|| ScreenshotType::detect(image_size, context.viewport_size));

        let frame_location_in_screenshot = context
            .frame_location_in_screenshot
            .unwrap_or_else(|| frame_location(&context.frames, screenshot_type));

        let frame_size = match context.frames.last() {
            Some(frame) => frame.inner_size,
            None if screenshot_type == ScreenshotType::Viewport => context.viewport_size,
            None => context.entire_size.unwrap_or(image_size),
        };

        Self::assemble(
            image,
            screenshot_type,
            context.frames,
            context.scroll_position,
            frame_location_in_screenshot,
            frame_size,
        )
    }

    fn assemble(
        image: RgbaImage,
        screenshot_type: ScreenshotType,
        frames: Vec<Frame>,
        scroll_position: Location,
        frame_location_in_screenshot: Location,
        frame_size: Size,
    ) -> Result<Self> {
        let image_bounds = Region::from_parts(Location::ZERO, imaging::size_of(&image));
        let frame_window =
            Region::from_parts(frame_location_in_screenshot, frame_size).intersect(&image_bounds);
        if frame_window.is_empty() {
            return Err(Error::Capture("got an empty frame window for screenshot".into()));
        }

        Ok(Self {
            image,
            screenshot_type,
            frames,
            scroll_position,
            frame_location_in_screenshot,
            frame_size,
            frame_window,
        })
    }

    pub fn screenshot_type(&self) -> ScreenshotType {
        self.screenshot_type
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame_location_in_screenshot(&self) -> Location {
        self.frame_location_in_screenshot
    }

    /// Top-level page, captured whole: both context spaces coincide
    fn is_flat(&self) -> bool {
        self.frames.is_empty() && self.screenshot_type == ScreenshotType::EntireFrame
    }
}

/// Location of the innermost frame inside the screenshot
fn frame_location(frames: &[Frame], screenshot_type: ScreenshotType) -> Location {
    let Some((first, rest)) = frames.split_first() else {
        return Location::ZERO;
    };

    let mut location = first.location;
    // the top-level scroll only shows up in viewport captures
    if screenshot_type == ScreenshotType::Viewport {
        location = location.offset_by(first.parent_scroll.negate());
    }
    for frame in rest {
        location = location
            .offset_by(frame.location)
            .offset_by(frame.parent_scroll.negate());
    }
    location
}

impl Screenshot for FrameScreenshot {
    fn image(&self) -> &RgbaImage {
        &self.image
    }

    fn frame_window(&self) -> Region {
        self.frame_window
    }

    fn convert_location(
        &self,
        location: Location,
        from: CoordinatesType,
        to: CoordinatesType,
    ) -> Result<Location> {
        use CoordinatesType::*;

        if from == to {
            return Ok(location);
        }

        let frame = self.frame_location_in_screenshot;
        let scroll = self.scroll_position;

        if self.is_flat() {
            return Ok(match (from, to) {
                (ContextRelative | ContextAsIs, ScreenshotAsIs) => location.offset_by(frame),
                (ScreenshotAsIs, ContextRelative | ContextAsIs) => {
                    location.offset_by(frame.negate())
                }
                _ => location,
            });
        }

        match (from, to) {
            (ContextAsIs, ContextRelative) => Ok(location.offset_by(scroll)),
            (ContextAsIs, ScreenshotAsIs) => Ok(location.offset_by(frame)),
            (ContextRelative, ContextAsIs) => Ok(location.offset_by(scroll.negate())),
            (ContextRelative, ScreenshotAsIs) => Ok(location
                .offset_by(scroll.negate())
                .offset_by(frame)),
            (ScreenshotAsIs, ContextAsIs) => Ok(location.offset_by(frame.negate())),
            (ScreenshotAsIs, ContextRelative) => Ok(location
                .offset_by(frame.negate())
                .offset_by(scroll)),
            _ => Err(Error::UnsupportedConversion { from, to }),
        }
    }

    fn intersected_region(
        &self,
        region: Region,
        space: CoordinatesType,
        result_space: CoordinatesType,
    ) -> Result<Region> {
        if region.is_empty() {
            return Ok(region);
        }

        let as_is = self.convert_region_location(region, space, CoordinatesType::ScreenshotAsIs)?;
        let clip = match space {
            CoordinatesType::ContextAsIs | CoordinatesType::ContextRelative => self.frame_window,
            CoordinatesType::ScreenshotAsIs => Region::from_parts(Location::ZERO, self.size()),
        };

        let intersected = as_is.intersect(&clip);
        if intersected.is_empty() {
            return Ok(intersected);
        }

        self.convert_region_location(intersected, CoordinatesType::ScreenshotAsIs, result_space)
    }

    fn sub_screenshot(
        &self,
        region: Region,
        space: CoordinatesType,
        throw_if_clipped: bool,
    ) -> Result<Self> {
        let as_is = self.intersected_region(region, space, CoordinatesType::ScreenshotAsIs)?;
        check_sub_region(region, as_is, self.frame_window, throw_if_clipped)?;

        let image = imaging::crop(&self.image, as_is)?;

        // the frame origin moves by the crop offset, expressed in context-as-is space
        let context_location = self.convert_location(
            as_is.location(),
            CoordinatesType::ScreenshotAsIs,
            CoordinatesType::ContextAsIs,
        )?;

        Self::assemble(
            image,
            self.screenshot_type,
            self.frames.clone(),
            self.scroll_position,
            context_location.negate(),
            self.frame_size,
        )
    }

    fn location_in_screenshot(
        &self,
        location: Location,
        space: CoordinatesType,
    ) -> Result<Location> {
        let as_is = self.convert_location(location, space, CoordinatesType::ScreenshotAsIs)?;
        if !self.frame_window.contains(as_is) {
            return Err(Error::OutOfBounds(format!(
                "location {} ('{}') is not visible in screenshot",
                location, space
            )));
        }
        Ok(as_is)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use proptest::prelude::*;
    use CoordinatesType::*;

    fn canvas(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 1, 255]))
    }

    fn framed_viewport() -> FrameScreenshot {
        let context = FrameContext {
            frames: vec![
                Frame {
                    location: Location::new(50, 40),
                    inner_size: Size::new(300, 200),
                    parent_scroll: Location::new(0, 10),
                },
                Frame {
                    location: Location::new(20, 30),
                    inner_size: Size::new(120, 80),
                    parent_scroll: Location::new(5, 5),
                },
            ],
            scroll_position: Location::new(0, 25),
            viewport_size: Size::new(400, 300),
            ..Default::default()
        };
        FrameScreenshot::new(canvas(400, 300), context).unwrap()
    }

    #[test]
    fn test_detect_type() {
        assert_eq!(
            ScreenshotType::detect(Size::new(400, 300), Size::new(400, 300)),
            ScreenshotType::Viewport
        );
        assert_eq!(
            ScreenshotType::detect(Size::new(400, 900), Size::new(400, 300)),
            ScreenshotType::EntireFrame
        );
    }

    #[test]
    fn test_frame_location_accumulates_chain() {
        let shot = framed_viewport();
        // (50, 40 - 10) + (20 - 5, 30 - 5)
        assert_eq!(shot.frame_location_in_screenshot(), Location::new(65, 55));
        assert_eq!(shot.frame_window(), Region::new(65, 55, 120, 80));
    }

    #[test]
    fn test_context_relative_goes_through_scroll() {
        let shot = framed_viewport();
        let as_is = shot
            .convert_location(Location::new(10, 30), ContextRelative, ScreenshotAsIs)
            .unwrap();
        assert_eq!(as_is, Location::new(75, 60));

        let context_as_is = shot
            .convert_location(Location::new(10, 30), ContextRelative, ContextAsIs)
            .unwrap();
        assert_eq!(context_as_is, Location::new(10, 5));
    }

    #[test]
    fn test_flat_entire_page_ignores_scroll() {
        let context = FrameContext {
            scroll_position: Location::new(0, 500),
            viewport_size: Size::new(100, 100),
            ..Default::default()
        };
        let shot = FrameScreenshot::new(canvas(100, 400), context).unwrap();
        assert_eq!(shot.screenshot_type(), ScreenshotType::EntireFrame);
        let l = Location::new(10, 350);
        assert_eq!(shot.convert_location(l, ContextRelative, ScreenshotAsIs).unwrap(), l);
        assert_eq!(shot.convert_location(l, ContextRelative, ContextAsIs).unwrap(), l);
    }

    #[test]
    fn test_empty_frame_window_is_rejected() {
        let context = FrameContext {
            viewport_size: Size::new(100, 100),
            frame_location_in_screenshot: Some(Location::new(500, 500)),
            ..Default::default()
        };
        assert!(matches!(
            FrameScreenshot::new(canvas(100, 100), context),
            Err(Error::Capture(_))
        ));
    }

    #[test]
    fn test_intersection_uses_frame_window_for_context_regions() {
        let shot = framed_viewport();
        // context-relative (0, 25) is the frame's top-left corner
        let r = shot
            .intersected_region(Region::new(-10, 15, 50, 50), ContextRelative, ScreenshotAsIs)
            .unwrap();
        assert_eq!(r, Region::new(65, 55, 40, 40));

        // as-is regions are only clipped to the image
        let r = shot
            .intersected_region(Region::new(0, 0, 50, 50), ScreenshotAsIs, ScreenshotAsIs)
            .unwrap();
        assert_eq!(r, Region::new(0, 0, 50, 50));
    }

    #[test]
    fn test_sub_screenshot_throws_when_clipped() {
        let shot = framed_viewport();
        let region = Region::new(100, 25, 40, 40);
        assert!(matches!(
            shot.sub_screenshot(region, ContextRelative, true),
            Err(Error::OutOfBounds(_))
        ));

        let sub = shot.sub_screenshot(region, ContextRelative, false).unwrap();
        assert_eq!(sub.size(), Size::new(20, 40));
    }

    #[test]
    fn test_sub_screenshot_is_reanchored() {
        let shot = framed_viewport();
        let region = Region::new(10, 35, 30, 20);
        let sub = shot.sub_screenshot(region, ContextRelative, true).unwrap();

        assert_eq!(sub.size(), Size::new(30, 20));
        // the region's own corner maps to the crop origin
        assert_eq!(
            sub.convert_location(region.location(), ContextRelative, ScreenshotAsIs)
                .unwrap(),
            Location::ZERO
        );
        assert_eq!(sub.image().get_pixel(0, 0), &Rgba([75, 65, 1, 255]));
        // the source is untouched
        assert_eq!(shot.size(), Size::new(400, 300));
    }

    #[test]
    fn test_location_in_screenshot_checks_frame_window() {
        let shot = framed_viewport();
        assert_eq!(
            shot.location_in_screenshot(Location::new(0, 25), ContextRelative)
                .unwrap(),
            Location::new(65, 55)
        );
        assert!(shot
            .location_in_screenshot(Location::new(0, 0), ContextRelative)
            .is_err());
    }

    fn space() -> impl Strategy<Value = CoordinatesType> {
        prop_oneof![Just(ScreenshotAsIs), Just(ContextAsIs), Just(ContextRelative)]
    }

    proptest! {
        #[test]
        fn prop_round_trip_all_pairs(
            from in space(),
            to in space(),
            x in -2000i32..2000,
            y in -2000i32..2000,
            flat in any::<bool>(),
        ) {
            let shot = if flat {
                FrameScreenshot::new(canvas(50, 120), FrameContext {
                    scroll_position: Location::new(3, 40),
                    viewport_size: Size::new(50, 60),
                    ..Default::default()
                }).unwrap()
            } else {
                framed_viewport()
            };
            let l = Location::new(x, y);
            let there = shot.convert_location(l, from, to).unwrap();
            prop_assert_eq!(shot.convert_location(there, to, from).unwrap(), l);
        }
    }
}
