//! File names of everything the stages exchange, and the `.npy` helpers
//! that read and write them.

use ndarray::{Array1, Array2, ArrayD};
use ndarray_npy::{read_npy, write_npy};
use std::path::{Path, PathBuf};

use crate::config::Category;
use crate::error::{Error, Result};

pub const INDEX_FILE: &str = "image_index.tsv";

/// Resolves artifact paths inside the processed directory. Derived artifacts
/// carry the run tag, if any, so every stage of one run agrees on the names.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    tag: Option<String>,
}

impl ArtifactStore {
    pub fn new(dir: PathBuf, tag: Option<String>) -> Self {
        Self { dir, tag }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn tagged(&self, stem: &str, ext: &str) -> PathBuf {
        match &self.tag {
            Some(tag) => self.dir.join(format!("{stem}_{tag}.{ext}")),
            None => self.dir.join(format!("{stem}.{ext}")),
        }
    }

    pub fn features(&self, category: &Category) -> PathBuf {
        self.dir.join(format!("{}_features.npy", category.name))
    }

    pub fn index(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn reduced(&self) -> PathBuf {
        self.tagged("all_features_reduced", "npy")
    }

    pub fn labels(&self) -> PathBuf {
        self.tagged("cluster_labels", "npy")
    }

    pub fn tsne(&self) -> PathBuf {
        self.tagged("tsne_embedding", "npy")
    }

    pub fn tsne_table(&self) -> PathBuf {
        self.tagged("tsne_embedding", "tsv")
    }

    pub fn samples(&self, label: i64) -> PathBuf {
        self.tagged(&format!("cluster_{label}_samples"), "png")
    }
}

pub fn write_matrix(path: &Path, data: &Array2<f32>) -> Result<()> {
    write_npy(path, data).map_err(Error::npy(path))?;
    log::info!("wrote {:?} ({} x {})", path, data.nrows(), data.ncols());
    Ok(())
}

/// Read an `f32` array of any rank and flatten everything past the first
/// axis, so `n x 7 x 7 x C` feature maps become `n x (7*7*C)`.
pub fn read_matrix(path: &Path) -> Result<Array2<f32>> {
    let data: ArrayD<f32> = read_npy(path).map_err(Error::npy(path))?;
    if data.ndim() == 0 {
        return Err(Error::shape(format!("{:?} rank", path), 2, 0));
    }
    let nrows = data.shape()[0];
    let ncols: usize = data.shape()[1..].iter().product();
    let data = data.as_standard_layout().into_owned();
    data.into_shape((nrows, ncols))
        .map_err(|_| Error::shape(format!("{:?} flatten", path), nrows * ncols, nrows))
}

pub fn write_labels(path: &Path, labels: &[usize]) -> Result<()> {
    let labels: Array1<i64> = labels.iter().map(|&l| l as i64).collect();
    write_npy(path, &labels).map_err(Error::npy(path))?;
    log::info!("wrote {:?} ({} labels)", path, labels.len());
    Ok(())
}

/// Labels are written as `i64`; `i32` files from other tools are widened.
pub fn read_labels(path: &Path) -> Result<Vec<i64>> {
    match read_npy::<_, Array1<i64>>(path) {
        Ok(labels) => Ok(labels.to_vec()),
        Err(wide) => match read_npy::<_, Array1<i32>>(path) {
            Ok(labels) => Ok(labels.iter().map(|&l| l as i64).collect()),
            Err(_) => Err(Error::npy(path)(wide)),
        },
    }
}

pub(crate) fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(Error::io(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::scratch_dir;
    use ndarray::{array, Array4};

    #[test]
    fn test_tagged_names() {
        let plain = ArtifactStore::new(PathBuf::from("p"), None);
        assert_eq!(plain.labels(), PathBuf::from("p/cluster_labels.npy"));
        assert_eq!(plain.index(), PathBuf::from("p/image_index.tsv"));

        let tagged = ArtifactStore::new(PathBuf::from("p"), Some("v1".into()));
        assert_eq!(tagged.labels(), PathBuf::from("p/cluster_labels_v1.npy"));
        assert_eq!(tagged.reduced(), PathBuf::from("p/all_features_reduced_v1.npy"));
        assert_eq!(tagged.samples(3), PathBuf::from("p/cluster_3_samples_v1.png"));
        // feature files belong to extraction, not to a clustering run
        let men = Category::new("men", "men_fashion");
        assert_eq!(tagged.features(&men), PathBuf::from("p/men_features.npy"));
    }

    #[test]
    fn test_read_matrix_flattens_feature_maps() {
        let dir = scratch_dir("artifacts_flatten");
        let path = dir.join("maps.npy");
        let maps = Array4::<f32>::from_shape_fn((3, 2, 2, 4), |(i, y, x, c)| {
            (i * 100 + y * 10 + x * 4 + c) as f32
        });
        write_npy(&path, &maps).unwrap();

        let flat = read_matrix(&path).unwrap();
        assert_eq!(flat.dim(), (3, 16));
        assert_eq!(flat[[1, 0]], 100.0);
        assert_eq!(flat[[2, 15]], maps[[2, 1, 1, 3]]);
    }

    #[test]
    fn test_labels_are_int64() {
        let dir = scratch_dir("artifacts_labels");
        let path = dir.join("labels.npy");
        write_labels(&path, &[0, 2, 1]).unwrap();
        assert_eq!(read_labels(&path).unwrap(), vec![0, 2, 1]);

        let m = array![[1.0f32, 2.0], [3.0, 4.0]];
        let mpath = dir.join("m.npy");
        write_matrix(&mpath, &m).unwrap();
        assert_eq!(read_matrix(&mpath).unwrap(), m);
    }

    #[test]
    fn test_int32_labels_are_widened() {
        let dir = scratch_dir("artifacts_labels_i32");
        let path = dir.join("labels.npy");
        write_npy(&path, &array![3i32, 0, 3, 1]).unwrap();
        assert_eq!(read_labels(&path).unwrap(), vec![3, 0, 3, 1]);
    }

    #[test]
    fn test_missing_file_is_npy_error() {
        let dir = scratch_dir("artifacts_missing");
        assert!(matches!(
            read_labels(&dir.join("nope.npy")),
            Err(Error::Npy { .. })
        ));
    }
}
