//! Feature extraction: one embedding per resized image, one matrix per
//! category, plus the row index that ties matrix rows back to files.

use image::{imageops::FilterType, DynamicImage};
use ndarray::Array2;
use ort::{inputs, GraphOptimizationLevel, Session, Tensor};
use std::path::Path;

use crate::artifacts::{create_dir, write_matrix};
use crate::config::{PipelineConfig, PixelScale, TensorLayout};
use crate::error::{Error, Result};
use crate::index::{sorted_image_files, RowIndex};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A frozen image model that maps one decoded image to a flat embedding.
pub trait Backbone {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>>;
}

/// Resize to the model input size and lay the pixels out as a single-image
/// batch in `layout`, scaled per `scale`.
pub fn image_to_tensor(img: &DynamicImage, size: u32, scale: PixelScale, layout: TensorLayout) -> Vec<f32> {
    let rgb = img.resize_exact(size, size, FilterType::Nearest).to_rgb8();
    let side = size as usize;
    let mut out = vec![0f32; 3 * side * side];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let mut v = pixel.0[c] as f32 / 255.0;
            if scale == PixelScale::Imagenet {
                v = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
            let at = match layout {
                TensorLayout::Nhwc => (y * side + x) * 3 + c,
                TensorLayout::Nchw => c * side * side + y * side + x,
            };
            out[at] = v;
        }
    }
    out
}

/// Backbone exported to ONNX (e.g. EfficientNet-B4 without its top), run
/// through ONNX Runtime. The first graph output is taken as the embedding.
pub struct OnnxBackbone {
    session: Session,
    input_size: u32,
    scale: PixelScale,
    layout: TensorLayout,
}

impl OnnxBackbone {
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        if !cfg.model_path.is_file() {
            return Err(Error::Config(format!("model file {:?} not found", cfg.model_path)));
        }
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(cfg.threads.max(1))?
            .commit_from_file(&cfg.model_path)?;
        if session.outputs.is_empty() {
            return Err(Error::Config(format!("model {:?} has no outputs", cfg.model_path)));
        }
        log::info!("loaded backbone {:?}", cfg.model_path);

        Ok(Self {
            session,
            input_size: cfg.model_input_size,
            scale: cfg.pixel_scale,
            layout: cfg.tensor_layout,
        })
    }
}

impl Backbone for OnnxBackbone {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let side = self.input_size as usize;
        let shape = match self.layout {
            TensorLayout::Nhwc => [1, side, side, 3],
            TensorLayout::Nchw => [1, 3, side, side],
        };
        let data = image_to_tensor(image, self.input_size, self.scale, self.layout);
        let input = Tensor::from_array((shape, data))?;

        let outputs = self.session.run(inputs![input]?)?;
        let name = self.session.outputs[0].name.as_str();
        let (_, embedding) = outputs[name].try_extract_raw_tensor::<f32>()?;
        Ok(embedding.to_vec())
    }
}

/// Embed `files` of `dir` in the given order. Skipped files (decode
/// failures with `skip_corrupt`) are left out of the returned names.
pub fn extract_dir<B: Backbone + ?Sized>(
    backbone: &B,
    dir: &Path,
    files: &[String],
    skip_corrupt: bool,
) -> Result<(Array2<f32>, Vec<String>)> {
    let mut flat: Vec<f32> = Vec::new();
    let mut kept: Vec<String> = Vec::with_capacity(files.len());
    let mut dim: Option<usize> = None;

    for name in files {
        let path = dir.join(name);
        let img = match image::open(&path) {
            Ok(img) => img,
            Err(e) if skip_corrupt => {
                log::warn!("skipping {:?}: {}", path, e);
                continue;
            }
            Err(e) => return Err(Error::image(&path)(e)),
        };
        let embedding = backbone.embed(&img)?;
        match dim {
            None => dim = Some(embedding.len()),
            Some(d) if d != embedding.len() => {
                return Err(Error::shape(format!("embedding of {:?}", path), d, embedding.len()));
            }
            Some(_) => {}
        }
        log::debug!("embedded {:?}", path);
        flat.extend(embedding);
        kept.push(name.clone());
    }

    let ncols = dim.unwrap_or(0);
    let data = Array2::from_shape_vec((kept.len(), ncols), flat)
        .map_err(|_| Error::shape(format!("features of {:?}", dir), kept.len() * ncols, 0))?;
    Ok((data, kept))
}

/// Extraction stage with the configured ONNX backbone.
pub fn run(cfg: &PipelineConfig) -> Result<RowIndex> {
    let backbone = OnnxBackbone::from_config(cfg)?;
    run_with(cfg, &backbone)
}

/// Extraction stage with any backbone: writes `<name>_features.npy` per
/// category and the row index.
pub fn run_with<B: Backbone + ?Sized>(cfg: &PipelineConfig, backbone: &B) -> Result<RowIndex> {
    let store = cfg.artifacts();
    create_dir(store.dir())?;

    let mut index = RowIndex::new();
    for category in &cfg.categories {
        let dir = cfg.processed_category_dir(category);
        let files = sorted_image_files(&dir, cfg)?;
        let (features, kept) = extract_dir(backbone, &dir, &files, cfg.skip_corrupt)?;
        if kept.is_empty() {
            log::warn!("{}: no images found in {:?}", category.name, dir);
        }
        write_matrix(&store.features(category), &features)?;
        for name in &kept {
            index.push(&category.name, name);
        }
        log::info!("{}: extracted {} feature vectors of length {}", category.name, features.nrows(), features.ncols());
    }
    index.write_tsv(store.index())?;
    Ok(index)
}
