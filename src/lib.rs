//! Fashion-photo clustering pipeline.
//!
//! Five stages exchange data only through files in the processed directory:
//! [`resize`], [`features`], [`cluster`], [`verify`] and [`inspect`].
//! Every stage takes a [`PipelineConfig`].

pub mod artifacts;
pub mod cluster;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod index;
pub mod inspect;
pub mod kmeans;
pub mod resize;
pub mod verify;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{Category, PipelineConfig, PixelScale, TensorLayout};
pub use dataset::DataSet;
pub use error::{Error, Result};
pub use features::{Backbone, OnnxBackbone};
pub use index::RowIndex;
pub use kmeans::{KMeansModel, MiniBatchKMeans};
