use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_reduction::Pca;
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};

use crate::artifacts::read_matrix;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::index::RowIndex;

/// Represents the concatenated feature matrix of all categories
#[derive(Debug, Clone)]
pub struct DataSet {
    pub data: Array2<f32>,
    /// `(category name, row count)` in concatenation order
    pub segments: Vec<(String, usize)>,
}

impl DataSet {
    /// Stack per-category matrices in the given order. Empty matrices are
    /// allowed; all others must agree on their column count.
    pub fn concatenate(parts: Vec<(String, Array2<f32>)>) -> Result<Self> {
        let ncols = parts.iter().find(|(_, m)| m.nrows() > 0).map(|(_, m)| m.ncols());
        let Some(ncols) = ncols else {
            return Err(Error::Fit("no feature rows to concatenate".into()));
        };

        let mut views: Vec<ArrayView2<f32>> = Vec::with_capacity(parts.len());
        for (name, m) in &parts {
            if m.nrows() > 0 && m.ncols() != ncols {
                return Err(Error::shape(format!("{name} feature columns"), ncols, m.ncols()));
            }
            if m.nrows() > 0 {
                views.push(m.view());
            }
        }
        let data = concatenate(Axis(0), &views)
            .map_err(|_| Error::shape("feature concatenation", ncols, 0))?;
        let segments = parts.into_iter().map(|(name, m)| (name, m.nrows())).collect();

        Ok(Self { data, segments })
    }

    /// Read `<name>_features.npy` of every configured category
    pub fn load(cfg: &PipelineConfig) -> Result<Self> {
        let store = cfg.artifacts();
        let mut parts = Vec::with_capacity(cfg.categories.len());
        for category in &cfg.categories {
            let m = read_matrix(&store.features(category))?;
            log::info!("{}: loaded {} rows x {} columns", category.name, m.nrows(), m.ncols());
            parts.push((category.name.clone(), m));
        }
        Self::concatenate(parts)
    }

    /// The row index must describe exactly the rows of this data set,
    /// category by category.
    pub fn check_index(&self, index: &RowIndex) -> Result<()> {
        if index.len() != self.data.nrows() {
            return Err(Error::shape("row index length", self.data.nrows(), index.len()));
        }
        let mut offset = 0;
        for (name, n) in &self.segments {
            for entry in &index.entries()[offset..offset + n] {
                if entry.category != *name {
                    return Err(Error::IndexMismatch(format!(
                        "row {} belongs to {}, expected {}",
                        entry.row, entry.category, name
                    )));
                }
            }
            offset += n;
        }
        Ok(())
    }

    /// Fit PCA (no whitening) and return the data projected to `dims` columns
    pub fn reduce(&self, dims: usize) -> Result<Array2<f32>> {
        let (nrows, ncols) = self.data.dim();
        if dims == 0 || dims > nrows.min(ncols) {
            return Err(Error::Fit(format!(
                "cannot project {nrows} x {ncols} features to {dims} components; \
                 at most min(rows, columns) = {} are possible",
                nrows.min(ncols)
            )));
        }

        let records = self.data.mapv(|x| x as f64);
        let dataset = DatasetBase::from(records);
        let pca: Pca<f64> = Pca::params(dims)
            .whiten(false)
            .fit(&dataset)
            .map_err(|e| Error::Fit(format!("PCA: {e}")))?;
        let reduced: Array2<f64> = pca.predict(dataset.records());
        log::info!("PCA reduced {} columns to {}", ncols, reduced.ncols());

        // rank-deficient input yields fewer components; the missing ones carry no variance
        let mut out = Array2::<f32>::zeros((nrows, dims));
        let found = reduced.ncols().min(dims);
        if found < dims {
            log::warn!("features have rank {}, padding {} zero components", found, dims - found);
        }
        out.slice_mut(s![.., ..found])
            .assign(&reduced.slice(s![.., ..found]).mapv(|x| x as f32));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn parts() -> Vec<(String, Array2<f32>)> {
        vec![
            ("men".to_string(), array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]),
            ("women".to_string(), array![[0.0, 5.0, 0.0]]),
        ]
    }

    #[test]
    fn test_concatenation_alignment() {
        let ds = DataSet::concatenate(parts()).unwrap();
        assert_eq!(ds.data.dim(), (3, 3));
        assert_eq!(ds.data.row(1), array![1.0, 0.0, 0.0]);
        assert_eq!(ds.data.row(2), array![0.0, 5.0, 0.0]);
        assert_eq!(ds.segments, vec![("men".to_string(), 2), ("women".to_string(), 1)]);
    }

    #[test]
    fn test_empty_part_is_skipped() {
        let mut p = parts();
        p.insert(0, ("kids".to_string(), Array2::zeros((0, 0))));
        let ds = DataSet::concatenate(p).unwrap();
        assert_eq!(ds.data.nrows(), 3);
        assert_eq!(ds.segments[0], ("kids".to_string(), 0));
        assert_eq!(ds.segments[1], ("men".to_string(), 2));
    }

    #[test]
    fn test_column_mismatch() {
        let mut p = parts();
        p[1].1 = array![[1.0, 2.0]];
        assert!(matches!(
            DataSet::concatenate(p),
            Err(Error::ShapeMismatch { expected: 3, found: 2, .. })
        ));
    }

    #[test]
    fn test_check_index() {
        let ds = DataSet::concatenate(parts()).unwrap();
        let mut index = RowIndex::new();
        index.push("men", "a.jpg");
        index.push("men", "b.jpg");
        assert!(ds.check_index(&index).is_err());
        index.push("women", "c.jpg");
        assert!(ds.check_index(&index).is_ok());

        let mut swapped = RowIndex::new();
        swapped.push("women", "c.jpg");
        swapped.push("men", "a.jpg");
        swapped.push("men", "b.jpg");
        assert!(ds.check_index(&swapped).is_err());
    }

    #[test]
    fn test_reduce_keeps_rows() {
        let data = Array2::from_shape_fn((6, 4), |(i, j)| ((i * 7 + j * 3) % 5) as f32 + i as f32);
        let ds = DataSet { data, segments: vec![("men".into(), 6)] };
        let reduced = ds.reduce(2).unwrap();
        assert_eq!(reduced.dim(), (6, 2));
        // projected data is centred
        for col in reduced.columns() {
            assert_abs_diff_eq!(col.sum(), 0.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_reduce_rank_deficient_keeps_width() {
        // every row is a combination of two directions
        let u = [1.0f32, 0.0, 2.0, -1.0, 0.5, 3.0, 0.0, 1.0];
        let v = [0.0f32, 1.0, -1.0, 0.0, 2.0, 0.0, 1.5, -2.0];
        let data = Array2::from_shape_fn((20, 8), |(i, j)| {
            i as f32 * u[j] + ((i * i) % 7) as f32 * v[j]
        });
        let ds = DataSet { data, segments: vec![("men".into(), 20)] };
        let reduced = ds.reduce(5).unwrap();
        assert_eq!(reduced.dim(), (20, 5));
        for col in reduced.columns().into_iter().skip(2) {
            for x in col {
                assert_abs_diff_eq!(*x, 0.0, epsilon = 1e-2);
            }
        }

        let flat = DataSet { data: Array2::ones((20, 8)), segments: vec![("men".into(), 20)] };
        let reduced = flat.reduce(2).unwrap();
        assert_eq!(reduced.dim(), (20, 2));
        assert!(reduced.iter().all(|x| x.abs() < 1e-3));
    }

    #[test]
    fn test_reduce_too_many_components() {
        let ds = DataSet::concatenate(parts()).unwrap();
        assert!(matches!(ds.reduce(4), Err(Error::Fit(_))));
        assert!(matches!(ds.reduce(0), Err(Error::Fit(_))));
    }
}
