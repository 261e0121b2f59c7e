use std::path::Path;

use image::{ImageFormat, Rgba, RgbaImage};

use crate::error::Result;

/// Host copy of the accumulation and render target images.
#[derive(Debug, Clone)]
pub struct Capture {
    pub width: u32,
    pub height: u32,
    pub samples_so_far: u32,
    /// Running radiance sums, row major.
    pub accumulation: Vec<[f32; 4]>,
    /// Displayed colors, row major.
    pub render_target: Vec<[u8; 4]>,
}

impl Capture {
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// What the tracer should have written to the render target, computed from the sums.
    pub fn averaged_pixel(&self, x: u32, y: u32) -> [f32; 4] {
        let sum = self.accumulation[self.index(x, y)];
        if self.samples_so_far == 0 {
            return [0.0; 4];
        }
        sum.map(|channel| channel / self.samples_so_far as f32)
    }

    /// Largest difference between the averaged sums and the stored 8 bit colors, in [0, 1] units.
    /// The alpha channel is not compared.
    pub fn max_round_trip_error(&self) -> f32 {
        let mut max_error = 0.0f32;
        for y in 0..self.height {
            for x in 0..self.width {
                let expected = self.averaged_pixel(x, y);
                let stored = self.render_target[self.index(x, y)];
                for channel in 0..3 {
                    let expected = expected[channel].clamp(0.0, 1.0);
                    let stored = stored[channel] as f32 / 255.0;
                    max_error = max_error.max((expected - stored).abs());
                }
            }
        }
        max_error
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        let image = RgbaImage::from_fn(self.width, self.height, |x, y| {
            let [r, g, b, _] = self.render_target[self.index(x, y)];
            Rgba([r, g, b, 255])
        });
        image.save_with_format(path, ImageFormat::Png)?;
        log::info!("Saved {}x{} image to {}", self.width, self.height, path.display());
        Ok(())
    }
}
