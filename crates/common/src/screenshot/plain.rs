//! Screenshot of a plain image placed at a known location

use image::RgbaImage;

use super::{check_sub_region, Screenshot};
use crate::error::{Error, Result};
use crate::geometry::{CoordinatesType, Location, Region};
use crate::imaging;

/// A plain image whose context-relative bounds are `location` + image size.
///
/// Only `ContextRelative` and `ScreenshotAsIs` are meaningful here; any
/// conversion involving `ContextAsIs` is rejected.
#[derive(Debug, Clone)]
pub struct ImageScreenshot {
    image: RgbaImage,
    bounds: Region,
}

impl ImageScreenshot {
    pub fn new(image: RgbaImage) -> Self {
        Self::with_location(image, Location::ZERO)
    }

    pub fn with_location(image: RgbaImage, location: Location) -> Self {
        let bounds = Region::from_parts(location, imaging::size_of(&image));
        Self { image, bounds }
    }

    /// Context-relative bounds of the image
    pub fn bounds(&self) -> Region {
        self.bounds
    }
}

impl Screenshot for ImageScreenshot {
    fn image(&self) -> &RgbaImage {
        &self.image
    }

    fn frame_window(&self) -> Region {
        Region::from_parts(Location::ZERO, self.bounds.size())
    }

    fn convert_location(
        &self,
        location: Location,
        from: CoordinatesType,
        to: CoordinatesType,
    ) -> Result<Location> {
        use CoordinatesType::*;

        match (from, to) {
            _ if from == to => Ok(location),
            (ContextRelative, ScreenshotAsIs) => {
                Ok(location.offset(-self.bounds.left, -self.bounds.top))
            }
            (ScreenshotAsIs, ContextRelative) => {
                Ok(location.offset(self.bounds.left, self.bounds.top))
            }
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

        let intersected = self
            .convert_region_location(region, space, CoordinatesType::ContextRelative)?
            .intersect(&self.bounds);
        if intersected.is_empty() {
            return Ok(intersected);
        }

        self.convert_region_location(intersected, CoordinatesType::ContextRelative, result_space)
    }

    fn sub_screenshot(
        &self,
        region: Region,
        space: CoordinatesType,
        throw_if_clipped: bool,
    ) -> Result<Self> {
        let as_is = self.intersected_region(region, space, CoordinatesType::ScreenshotAsIs)?;
        check_sub_region(region, as_is, self.bounds, throw_if_clipped)?;

        let image = imaging::crop(&self.image, as_is)?;
        let relative = self.convert_region_location(
            as_is,
            CoordinatesType::ScreenshotAsIs,
            CoordinatesType::ContextRelative,
        )?;

        Ok(Self::with_location(image, relative.location()))
    }

    fn location_in_screenshot(
        &self,
        location: Location,
        space: CoordinatesType,
    ) -> Result<Location> {
        let relative = self.convert_location(location, space, CoordinatesType::ContextRelative)?;
        if !self.bounds.contains(relative) {
            return Err(Error::OutOfBounds(format!(
                "location {} is not visible in screenshot {}",
                location, self.bounds
            )));
        }
        self.convert_location(relative, CoordinatesType::ContextRelative, CoordinatesType::ScreenshotAsIs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use proptest::prelude::*;
    use CoordinatesType::*;

    fn shot_at(x: i32, y: i32) -> ImageScreenshot {
        let image = RgbaImage::from_fn(100, 80, |x, y| Rgba([x as u8, y as u8, 0, 255]));
        ImageScreenshot::with_location(image, Location::new(x, y))
    }

    #[test]
    fn test_context_as_is_is_unsupported() {
        let shot = shot_at(10, 20);
        let err = shot
            .convert_location(Location::ZERO, ContextAsIs, ScreenshotAsIs)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedConversion { from: ContextAsIs, to: ScreenshotAsIs }
        ));
        assert!(shot
            .convert_location(Location::ZERO, ContextRelative, ContextAsIs)
            .is_err());
    }

    #[test]
    fn test_sub_screenshot_reanchors() {
        let shot = shot_at(10, 20);
        let sub = shot
            .sub_screenshot(Region::new(30, 40, 20, 10), ContextRelative, true)
            .unwrap();

        assert_eq!(sub.bounds(), Region::new(30, 40, 20, 10));
        // as-is (20, 20) in the parent is the new origin
        assert_eq!(sub.image().get_pixel(0, 0), &Rgba([20, 20, 0, 255]));
        assert_eq!(
            sub.convert_location(Location::new(30, 40), ContextRelative, ScreenshotAsIs)
                .unwrap(),
            Location::ZERO
        );
    }

    #[test]
    fn test_sub_screenshot_clipped() {
        let shot = shot_at(0, 0);
        let region = Region::new(90, 70, 20, 20);
        assert!(matches!(
            shot.sub_screenshot(region, ContextRelative, true),
            Err(Error::OutOfBounds(_))
        ));

        let sub = shot.sub_screenshot(region, ContextRelative, false).unwrap();
        assert_eq!(sub.bounds(), Region::new(90, 70, 10, 10));
    }

    #[test]
    fn test_sub_screenshot_outside_fails() {
        let shot = shot_at(0, 0);
        assert!(matches!(
            shot.sub_screenshot(Region::new(200, 0, 10, 10), ContextRelative, false),
            Err(Error::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_location_in_screenshot() {
        let shot = shot_at(10, 20);
        assert_eq!(
            shot.location_in_screenshot(Location::new(15, 25), ContextRelative)
                .unwrap(),
            Location::new(5, 5)
        );
        assert!(shot
            .location_in_screenshot(Location::new(5, 25), ContextRelative)
            .is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            ox in -500i32..500, oy in -500i32..500,
            x in -1000i32..1000, y in -1000i32..1000,
            forward in any::<bool>(),
        ) {
            let shot = shot_at(ox, oy);
            let (a, b) = if forward { (ContextRelative, ScreenshotAsIs) } else { (ScreenshotAsIs, ContextRelative) };
            let l = Location::new(x, y);
            let there = shot.convert_location(l, a, b).unwrap();
            prop_assert_eq!(shot.convert_location(there, b, a).unwrap(), l);
        }
    }
}
