//! Row index: the persisted mapping from feature-matrix row to image file.
//!
//! Extraction writes it once; clustering checks its length and inspection
//! resolves sampled rows through it, so no stage re-derives the row order
//! from a directory listing.

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::config::{Category, PipelineConfig};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub row: usize,
    pub category: String,
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowIndex {
    entries: Vec<IndexEntry>,
}

impl RowIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next row and return its number.
    pub fn push(&mut self, category: &str, file: &str) -> usize {
        let row = self.entries.len();
        self.entries.push(IndexEntry {
            row,
            category: category.to_string(),
            file: file.to_string(),
        });
        row
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn get(&self, row: usize) -> Option<&IndexEntry> {
        self.entries.get(row)
    }

    /// Files of one category, in row order.
    pub fn files_of(&self, category: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.category == category)
            .map(|e| e.file.as_str())
            .collect()
    }

    /// Path of the resized image behind `row`.
    pub fn resolve(&self, row: usize, cfg: &PipelineConfig) -> Option<PathBuf> {
        let entry = self.get(row)?;
        let category = cfg.categories.iter().find(|c| c.name == entry.category)?;
        Some(cfg.processed_category_dir(category).join(&entry.file))
    }

    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(&path).map_err(Error::io(path.as_ref()))?;
        let mut wtr = WriterBuilder::new().delimiter(b'\t').from_writer(file);
        for entry in &self.entries {
            wtr.serialize(entry)?;
        }
        wtr.flush().map_err(Error::io(path.as_ref()))?;
        log::info!("wrote {:?} ({} rows)", path.as_ref(), self.entries.len());
        Ok(())
    }

    pub fn read_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path).map_err(Error::io(path.as_ref()))?;

        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(file);

        let mut entries: Vec<IndexEntry> = Vec::new();
        for result in rdr.deserialize() {
            let entry: IndexEntry = result?;
            if entry.row != entries.len() {
                return Err(Error::shape(
                    format!("{:?} row numbering", path.as_ref()),
                    entries.len(),
                    entry.row,
                ));
            }
            entries.push(entry);
        }
        Ok(Self { entries })
    }
}

/// Accepted image files of `dir`, sorted by filename.
pub fn sorted_image_files(dir: &Path, cfg: &PipelineConfig) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(Error::io(dir))? {
        let entry = entry.map_err(Error::io(dir))?;
        let is_file = entry.file_type().map_err(Error::io(dir))?.is_file();
        let Ok(name) = entry.file_name().into_string() else {
            log::warn!("skipping non UTF-8 file name in {:?}", dir);
            continue;
        };
        if is_file && cfg.is_accepted(&name) {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

/// Compare the index against what is on disk now. Returns the categories
/// whose current listing differs from the rows recorded at extraction.
pub fn stale_categories(index: &RowIndex, cfg: &PipelineConfig) -> Result<Vec<Category>> {
    let mut stale = Vec::new();
    for category in &cfg.categories {
        let current = sorted_image_files(&cfg.processed_category_dir(category), cfg)?;
        if index.files_of(&category.name) != current {
            stale.push(category.clone());
        }
    }
    Ok(stale)
}
