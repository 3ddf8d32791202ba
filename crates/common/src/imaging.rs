//! Raster image helpers over the `image` crate
//!
//! Screenshots travel as PNG bytes and are handled in memory as RGBA8.

use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, RgbaImage};

use crate::error::{Error, Result};
use crate::geometry::{Region, Size};

/// Decode any supported image format into RGBA8
pub fn parse(bytes: &[u8]) -> Result<RgbaImage> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Encode as PNG
pub fn pack(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buf, CompressionType::Best, PngFilter::Adaptive);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(buf)
}

pub fn size_of(image: &RgbaImage) -> Size {
    Size::new(image.width(), image.height())
}

/// Copy out `region`, which must lie inside the image
pub fn crop(image: &RgbaImage, region: Region) -> Result<RgbaImage> {
    let bounds = Region::new(0, 0, image.width(), image.height());
    if region.is_empty() || !bounds.contains_region(&region) {
        return Err(Error::OutOfBounds(format!(
            "crop region {} is outside image {}",
            region,
            size_of(image)
        )));
    }

    Ok(imageops::crop_imm(
        image,
        region.left as u32,
        region.top as u32,
        region.width,
        region.height,
    )
    .to_image())
}

/// Resize by `ratio`; a ratio of 1 returns an untouched copy
pub fn scale(image: &RgbaImage, ratio: f64) -> Result<RgbaImage> {
    if !(ratio.is_finite() && ratio > 0.0) {
        return Err(Error::InvalidConfig(format!("invalid scale ratio {}", ratio)));
    }
    if (ratio - 1.0).abs() < f64::EPSILON {
        return Ok(image.clone());
    }

    let target = size_of(image).scale(ratio);
    if target.is_empty() {
        return Err(Error::OutOfBounds(format!(
            "scaling {} by {} leaves no pixels",
            size_of(image),
            ratio
        )));
    }

    Ok(imageops::resize(
        image,
        target.width,
        target.height,
        FilterType::CatmullRom,
    ))
}

/// Rotate clockwise by a multiple of 90 degrees (negative is counter-clockwise)
pub fn rotate(image: &RgbaImage, degrees: i32) -> Result<RgbaImage> {
    if degrees % 90 != 0 {
        return Err(Error::InvalidConfig(format!(
            "rotation must be a multiple of 90 degrees, got {}",
            degrees
        )));
    }

    Ok(match degrees.rem_euclid(360) {
        90 => imageops::rotate90(image),
        180 => imageops::rotate180(image),
        270 => imageops::rotate270(image),
        _ => image.clone(),
    })
}
