use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::features::Backbone;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Fresh, empty scratch directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("vestis-{}-{}-{}", name, std::process::id(), n));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn write_image(path: &Path, width: u32, height: u32, rgb: [u8; 3]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    RgbImage::from_pixel(width, height, Rgb(rgb)).save(path).unwrap();
}

/// Deterministic stand-in for the ONNX backbone: mean of each channel over
/// the top and bottom halves of the image, scaled to `[0, 1]`.
pub struct HalvesBackbone;

impl Backbone for HalvesBackbone {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let (_, h) = image.dimensions();
        let rgb = image.to_rgb8();
        let mut sums = [0f64; 6];
        let mut counts = [0f64; 2];
        for (_, y, px) in rgb.enumerate_pixels() {
            let half = if y < h / 2 { 0 } else { 1 };
            counts[half] += 1.0;
            for c in 0..3 {
                sums[half * 3 + c] += px.0[c] as f64 / 255.0;
            }
        }
        Ok(sums
            .iter()
            .enumerate()
            .map(|(i, s)| (s / counts[i / 3].max(1.0)) as f32)
            .collect())
    }
}
