//! Screenshot source rendering a synthetic application

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;

use eyes_common::{imaging, Region, Result};
use eyes_sdk::{Capture, ScreenshotSource};

struct Scene {
    seed: u32,
    banner: Option<(Region, Rgba<u8>)>,
    title: String,
}

/// Renders a noisy background with an optional banner; tests change the
/// scene between checkpoints to simulate the application moving on.
///
/// The noise keeps PNG output large, so small changes are cheaper to send
/// as a delta.
pub struct SyntheticApp {
    width: u32,
    height: u32,
    scene: Mutex<Scene>,
}

impl SyntheticApp {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            scene: Mutex::new(Scene {
                seed: 0x9e37_79b9,
                banner: None,
                title: "Synthetic App".to_string(),
            }),
        }
    }

    pub fn show_banner(&self, region: Region, color: Rgba<u8>) {
        self.scene.lock().banner = Some((region, color));
    }

    pub fn hide_banner(&self) {
        self.scene.lock().banner = None;
    }

    pub fn set_title(&self, title: &str) {
        self.scene.lock().title = title.to_string();
    }

    pub fn render(&self) -> RgbaImage {
        let scene = self.scene.lock();
        let seed = scene.seed;
        let mut image = RgbaImage::from_fn(self.width, self.height, |x, y| texel(seed, x, y));
        if let Some((region, color)) = scene.banner {
            let bounds = Region::new(0, 0, self.width, self.height);
            let visible = region.intersect(&bounds);
            for y in visible.top..visible.bottom() {
                for x in visible.left..visible.right() {
                    image.put_pixel(x as u32, y as u32, color);
                }
            }
        }
        image
    }
}

fn texel(seed: u32, x: u32, y: u32) -> Rgba<u8> {
    let mut h = seed ^ x.wrapping_mul(0x85eb_ca6b) ^ y.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2c1b_3c6d);
    h ^= h >> 12;
    let [r, g, b, _] = h.to_le_bytes();
    Rgba([r, g, b, 255])
}

#[async_trait]
impl ScreenshotSource for SyntheticApp {
    async fn capture(&self) -> Result<Capture> {
        Ok(Capture::image(imaging::pack(&self.render())?))
    }

    async fn title(&self) -> Result<String> {
        Ok(self.scene.lock().title.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_is_clipped_to_canvas() {
        let app = SyntheticApp::new(20, 10);
        app.show_banner(Region::new(15, 5, 10, 10), Rgba([255, 0, 0, 255]));
        let image = app.render();

        assert_eq!(*image.get_pixel(19, 9), Rgba([255, 0, 0, 255]));
        assert_ne!(*image.get_pixel(14, 9), Rgba([255, 0, 0, 255]));

        app.hide_banner();
        assert_ne!(*app.render().get_pixel(19, 9), Rgba([255, 0, 0, 255]));
        assert_eq!(app.render(), app.render());
    }
}
