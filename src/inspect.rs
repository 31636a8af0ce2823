use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::path::PathBuf;

use crate::artifacts::read_labels;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::index::{stale_categories, RowIndex};
use crate::verify::cluster_sizes;

/// The most populous label and its size. Ties go to the smallest label.
pub fn largest_cluster(labels: &[i64]) -> Option<(i64, usize)> {
    let mut best: Option<(i64, usize)> = None;
    for (label, count) in cluster_sizes(labels) {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((label, count));
        }
    }
    best
}

/// Up to `size` distinct rows carrying `label`, drawn uniformly.
pub fn sample_members<R: Rng + ?Sized>(labels: &[i64], label: i64, size: usize, rng: &mut R) -> Vec<usize> {
    let members: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, l)| **l == label)
        .map(|(i, _)| i)
        .collect();
    let amount = size.min(members.len());
    rand::seq::index::sample(rng, members.len(), amount)
        .into_iter()
        .map(|i| members[i])
        .collect()
}

/// Horizontal strip of square tiles; unreadable images stay blank.
pub fn contact_sheet(paths: &[PathBuf], tile: u32) -> RgbImage {
    let mut sheet = RgbImage::from_pixel(tile * paths.len().max(1) as u32, tile, Rgb([255, 255, 255]));
    for (i, path) in paths.iter().enumerate() {
        match image::open(path) {
            Ok(img) => {
                let thumb = img.resize_exact(tile, tile, FilterType::Triangle).to_rgb8();
                imageops::replace(&mut sheet, &thumb, i as i64 * tile as i64, 0);
            }
            Err(e) => log::error!("Error loading image {:?}: {}", path, e),
        }
    }
    sheet
}

#[derive(Debug, Clone)]
pub struct Inspection {
    pub label: i64,
    pub count: usize,
    /// `(row, image path)` of the sampled members
    pub samples: Vec<(usize, PathBuf)>,
    pub sheet: PathBuf,
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Largest cluster: {} ({} outfits)", self.label, self.count)?;
        for (row, path) in &self.samples {
            write!(f, "\nIndex: {} {}", row, path.display())?;
        }
        Ok(())
    }
}

/// Inspect stage: sample the largest cluster and resolve rows through the
/// row index written at extraction.
pub fn run(cfg: &PipelineConfig) -> Result<Inspection> {
    let store = cfg.artifacts();
    let labels = read_labels(&store.labels())?;
    let index = RowIndex::read_tsv(store.index())?;
    if index.len() != labels.len() {
        return Err(Error::shape("row index vs. cluster labels", labels.len(), index.len()));
    }
    for category in stale_categories(&index, cfg)? {
        log::warn!(
            "{:?} changed since feature extraction; rows resolve through the saved index",
            cfg.processed_category_dir(&category)
        );
    }

    let (label, count) =
        largest_cluster(&labels).ok_or_else(|| Error::Fit("no cluster labels to inspect".into()))?;
    if count < cfg.sample_size {
        log::warn!("cluster {} has only {} members, sampling all of them", label, count);
    }

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut samples = Vec::new();
    for row in sample_members(&labels, label, cfg.sample_size, &mut rng) {
        let path = index
            .resolve(row, cfg)
            .ok_or_else(|| Error::IndexMismatch(format!("row {row} has no known category")))?;
        if !path.is_file() {
            return Err(Error::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "indexed image is missing"),
            });
        }
        samples.push((row, path));
    }

    let paths: Vec<PathBuf> = samples.iter().map(|(_, p)| p.clone()).collect();
    let sheet_path = store.samples(label);
    contact_sheet(&paths, cfg.image_size)
        .save(&sheet_path)
        .map_err(|e| Error::Encode { path: sheet_path.clone(), source: e })?;
    log::info!("wrote {:?}", sheet_path);

    Ok(Inspection { label, count, samples, sheet: sheet_path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::write_labels;
    use crate::testutil::{scratch_dir, write_image};
    use image::GenericImageView;

    #[test]
    fn test_largest_cluster() {
        assert_eq!(largest_cluster(&[2, 1, 1, 0, 1, 2]), Some((1, 3)));
        // tie goes to the smaller label
        assert_eq!(largest_cluster(&[5, 3, 5, 3]), Some((3, 2)));
        assert_eq!(largest_cluster(&[]), None);
    }

    #[test]
    fn test_sample_without_replacement() {
        let labels: Vec<i64> = (0..100).map(|i| if i % 3 == 0 { 7 } else { i % 2 }).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let mut rows = sample_members(&labels, 7, 5, &mut rng);
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|&r| labels[r] == 7));
        rows.sort_unstable();
        rows.dedup();
        assert_eq!(rows.len(), 5);

        let few = sample_members(&[4, 4, 1], 4, 5, &mut rng);
        assert_eq!(few.len(), 2);
    }

    fn setup(name: &str) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.root = scratch_dir(name);
        cfg.image_size = 8;
        cfg.sample_size = 2;
        let men = cfg.processed_category_dir(&cfg.categories[0]);
        let women = cfg.processed_category_dir(&cfg.categories[1]);
        write_image(&men.join("a.jpg"), 8, 8, [255, 0, 0]);
        write_image(&men.join("b.jpg"), 8, 8, [0, 255, 0]);
        write_image(&women.join("c.jpg"), 8, 8, [0, 0, 255]);
        write_image(&women.join("d.jpg"), 8, 8, [0, 0, 255]);

        let mut index = RowIndex::new();
        for (cat, file) in [("men", "a.jpg"), ("men", "b.jpg"), ("women", "c.jpg"), ("women", "d.jpg")] {
            index.push(cat, file);
        }
        let store = cfg.artifacts();
        index.write_tsv(store.index()).unwrap();
        write_labels(&store.labels(), &[0, 1, 1, 2]).unwrap();
        cfg
    }

    #[test]
    fn test_inspect_maps_rows_to_files() {
        let cfg = setup("inspect_map");
        let inspection = run(&cfg).unwrap();
        assert_eq!((inspection.label, inspection.count), (1, 2));

        let mut files: Vec<String> = inspection
            .samples
            .iter()
            .map(|(_, p)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["b.jpg", "c.jpg"]);
        assert!(inspection.to_string().starts_with("Largest cluster: 1 (2 outfits)"));

        let sheet = image::open(&inspection.sheet).unwrap();
        assert_eq!(sheet.dimensions(), (16, 8));
    }

    #[test]
    fn test_inspect_resolves_through_index_not_listing() {
        let cfg = setup("inspect_stale");
        // a file sorting first appears after extraction
        let men = cfg.processed_category_dir(&cfg.categories[0]);
        write_image(&men.join("0.jpg"), 8, 8, [9, 9, 9]);

        let inspection = run(&cfg).unwrap();
        let rows: Vec<usize> = inspection.samples.iter().map(|(r, _)| *r).collect();
        for (row, path) in &inspection.samples {
            let expected = if *row == 1 { "b.jpg" } else { "c.jpg" };
            assert!(path.ends_with(expected));
        }
        assert!(rows.iter().all(|r| *r == 1 || *r == 2));
    }

    #[test]
    fn test_missing_indexed_file() {
        let cfg = setup("inspect_missing");
        std::fs::remove_file(cfg.processed_category_dir(&cfg.categories[0]).join("b.jpg")).unwrap();
        assert!(matches!(run(&cfg), Err(Error::Io { .. })));
    }

    #[test]
    fn test_label_index_mismatch() {
        let cfg = setup("inspect_len");
        write_labels(&cfg.artifacts().labels(), &[0, 1, 1]).unwrap();
        assert!(matches!(run(&cfg), Err(Error::ShapeMismatch { .. })));
    }
}
