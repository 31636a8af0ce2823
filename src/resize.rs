use image::{imageops::FilterType, DynamicImage};
use std::path::Path;

use crate::artifacts::create_dir;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::index::sorted_image_files;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeSummary {
    pub category: String,
    pub written: usize,
    pub skipped: usize,
}

/// Exact square resize; the aspect ratio is not kept.
pub fn resize_square(img: &DynamicImage, size: u32) -> DynamicImage {
    img.resize_exact(size, size, FilterType::CatmullRom)
}

/// Resize every accepted image of `input_dir` into `output_dir`, keeping
/// file names. Returns `(written, skipped)`.
pub fn resize_dir(input_dir: &Path, output_dir: &Path, cfg: &PipelineConfig) -> Result<(usize, usize)> {
    create_dir(output_dir)?;
    let files = sorted_image_files(input_dir, cfg)?;

    let mut written = 0;
    let mut skipped = 0;
    for name in &files {
        let src = input_dir.join(name);
        let img = match image::open(&src) {
            Ok(img) => img,
            Err(e) if cfg.skip_corrupt => {
                log::warn!("skipping {:?}: {}", src, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(Error::image(&src)(e)),
        };

        let mut out = resize_square(&img, cfg.image_size);
        let dst = output_dir.join(name);
        // the JPEG encoder rejects alpha channels
        if name.ends_with(".jpg") || name.ends_with(".jpeg") {
            out = DynamicImage::ImageRgb8(out.to_rgb8());
        }
        out.save(&dst).map_err(|e| Error::Encode { path: dst.clone(), source: e })?;
        log::debug!("resized {:?} -> {:?}", src, dst);
        written += 1;
    }
    Ok((written, skipped))
}

/// Resize stage: source category folders into the processed tree.
pub fn run(cfg: &PipelineConfig) -> Result<Vec<ResizeSummary>> {
    let mut summaries = Vec::with_capacity(cfg.categories.len());
    for category in &cfg.categories {
        let input = cfg.source_category_dir(category);
        let output = cfg.processed_category_dir(category);
        let (written, skipped) = resize_dir(&input, &output, cfg)?;
        log::info!(
            "{}: resized {} images to {}x{} ({} skipped)",
            category.name, written, cfg.image_size, cfg.image_size, skipped
        );
        summaries.push(ResizeSummary {
            category: category.name.clone(),
            written,
            skipped,
        });
    }
    Ok(summaries)
}
