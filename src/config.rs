use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::artifacts::ArtifactStore;
use crate::error::{Error, Result};

/// One image category: `name` prefixes its feature file, `dir` is the folder
/// name used under both the source and the processed root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub dir: String,
}

impl Category {
    pub fn new(name: &str, dir: &str) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.to_string(),
        }
    }
}

/// How pixel values are scaled before the forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PixelScale {
    /// `[0, 255]` to `[0, 1]`
    Unit,
    /// `[0, 1]` followed by ImageNet channel mean/std normalization
    Imagenet,
}

/// Input tensor layout expected by the exported backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    Nhwc,
    Nchw,
}

/// Every tunable of the pipeline. Defaults reproduce the original run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub root: PathBuf,
    pub source_dir: String,
    pub processed_dir: String,
    pub categories: Vec<Category>,
    pub extensions: Vec<String>,
    pub image_size: u32,
    pub skip_corrupt: bool,

    pub model_path: PathBuf,
    pub model_input_size: u32,
    pub pixel_scale: PixelScale,
    pub tensor_layout: TensorLayout,
    pub threads: usize,

    pub reduced_dims: usize,
    pub n_clusters: usize,
    pub batch_size: usize,
    pub max_iter: usize,
    pub tolerance: f32,
    pub max_no_improvement: usize,
    pub seed: u64,

    pub perplexity: f64,
    pub sample_size: usize,
    pub run_tag: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            source_dir: "Vestis_Data".to_string(),
            processed_dir: "ProcessedImages".to_string(),
            categories: vec![
                Category::new("men", "men_fashion"),
                Category::new("women", "women_fashion"),
            ],
            extensions: vec!["jpg".to_string(), "png".to_string()],
            image_size: 224,
            skip_corrupt: false,
            model_path: PathBuf::from("models/efficientnet_b4_notop.onnx"),
            model_input_size: 224,
            pixel_scale: PixelScale::Unit,
            tensor_layout: TensorLayout::Nhwc,
            threads: 4,
            reduced_dims: 500,
            n_clusters: 100,
            batch_size: 512,
            max_iter: 200,
            tolerance: 0.0,
            max_no_improvement: 10,
            seed: 42,
            perplexity: 30.0,
            sample_size: 5,
            run_tag: None,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config; missing keys keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path).map_err(Error::io(path.as_ref()))?;
        let cfg: Self = serde_json::from_reader(file)
            .map_err(|e| Error::Config(format!("{:?}: {}", path.as_ref(), e)))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(Error::Config("at least one category is required".into()));
        }
        if self.extensions.is_empty() {
            return Err(Error::Config("at least one image extension is required".into()));
        }
        if self.image_size == 0 || self.model_input_size == 0 {
            return Err(Error::Config("image sizes must be positive".into()));
        }
        let mut names: Vec<&str> = self.categories.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.categories.len() {
            return Err(Error::Config("category names must be unique".into()));
        }
        Ok(())
    }

    pub fn source_root(&self) -> PathBuf {
        self.root.join(&self.source_dir)
    }

    pub fn processed_root(&self) -> PathBuf {
        self.root.join(&self.processed_dir)
    }

    pub fn source_category_dir(&self, category: &Category) -> PathBuf {
        self.source_root().join(&category.dir)
    }

    pub fn processed_category_dir(&self, category: &Category) -> PathBuf {
        self.processed_root().join(&category.dir)
    }

    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(self.processed_root(), self.run_tag.clone())
    }

    /// Suffix match against the configured extensions, case-sensitive.
    pub fn is_accepted(&self, filename: &str) -> bool {
        self.extensions.iter().any(|ext| {
            filename.len() > ext.len() + 1
                && filename.ends_with(ext.as_str())
                && filename.as_bytes()[filename.len() - ext.len() - 1] == b'.'
        })
    }
}
