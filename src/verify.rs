use csv::WriterBuilder;
use linfa::traits::Transformer;
use linfa_tsne::TSneParams;
use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;

use crate::artifacts::{read_labels, read_matrix, write_matrix};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};

/// Number of rows carrying each label, ordered by label.
pub fn cluster_sizes(labels: &[i64]) -> BTreeMap<i64, usize> {
    let mut sizes = BTreeMap::new();
    for &label in labels {
        *sizes.entry(label).or_insert(0) += 1;
    }
    sizes
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterStats {
    pub n_clusters: usize,
    pub smallest: usize,
    pub largest: usize,
    pub mean: f64,
    pub median: f64,
}

impl ClusterStats {
    pub fn from_labels(labels: &[i64]) -> Result<Self> {
        let mut counts: Vec<usize> = cluster_sizes(labels).into_values().collect();
        if counts.is_empty() {
            return Err(Error::Fit("no cluster labels to summarise".into()));
        }
        counts.sort_unstable();

        let n = counts.len();
        let mean = counts.iter().sum::<usize>() as f64 / n as f64;
        let median = if n % 2 == 1 {
            counts[n / 2] as f64
        } else {
            (counts[n / 2 - 1] + counts[n / 2]) as f64 / 2.0
        };

        Ok(Self {
            n_clusters: n,
            smallest: counts[0],
            largest: counts[n - 1],
            mean,
            median,
        })
    }
}

impl fmt::Display for ClusterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Cluster Distribution ===")?;
        writeln!(f, "Total clusters: {}", self.n_clusters)?;
        writeln!(f, "Cluster size statistics:")?;
        writeln!(f, "- Average: {:.1} outfits per cluster", self.mean)?;
        writeln!(f, "- Largest: {} outfits", self.largest)?;
        writeln!(f, "- Smallest: {} outfits", self.smallest)?;
        write!(f, "- Median: {:.1} outfits", self.median)
    }
}

/// Barnes-Hut t-SNE down to two dimensions. A perplexity too large for the
/// point count is lowered to `floor((n - 1) / 3)`.
pub fn tsne_2d(data: &Array2<f32>, perplexity: f64, seed: u64) -> Result<Array2<f32>> {
    let n = data.nrows();
    if n < 4 {
        return Err(Error::Fit(format!("t-SNE needs at least 4 points, got {n}")));
    }
    let first = data.row(0);
    if data.ncols() == 0 || data.outer_iter().all(|row| row == first) {
        return Err(Error::Fit("t-SNE needs distinct points".into()));
    }
    let limit = ((n - 1) / 3) as f64;
    let perplexity = if perplexity > limit {
        log::warn!("perplexity {} too large for {} points, using {}", perplexity, n, limit);
        limit
    } else {
        perplexity
    };

    let records = data.mapv(|x| x as f64);
    let embedding: Array2<f64> = TSneParams::embedding_size_with_rng(2, SmallRng::seed_from_u64(seed))
        .perplexity(perplexity)
        .approx_threshold(0.5)
        .max_iter(1000)
        .transform(records)
        .map_err(|e| Error::Fit(format!("t-SNE: {e}")))?;

    Ok(embedding.mapv(|x| x as f32))
}

fn write_embedding_table(path: &Path, embedding: &Array2<f32>, labels: &[i64]) -> Result<()> {
    let file = File::create(path).map_err(Error::io(path))?;
    let mut wtr = WriterBuilder::new().delimiter(b'\t').from_writer(file);
    wtr.write_record(["x", "y", "label"])?;
    for (row, label) in embedding.outer_iter().zip(labels) {
        wtr.write_record([row[0].to_string(), row[1].to_string(), label.to_string()])?;
    }
    wtr.flush().map_err(Error::io(path))?;
    log::info!("wrote {:?}", path);
    Ok(())
}

/// Verify stage: cluster size statistics and, optionally, the t-SNE view.
pub fn run(cfg: &PipelineConfig, with_tsne: bool) -> Result<ClusterStats> {
    let store = cfg.artifacts();
    let features = read_matrix(&store.reduced())?;
    let labels = read_labels(&store.labels())?;
    if labels.len() != features.nrows() {
        return Err(Error::shape("cluster labels", features.nrows(), labels.len()));
    }

    let stats = ClusterStats::from_labels(&labels)?;

    if with_tsne {
        log::info!("running t-SNE on {} points", features.nrows());
        let embedding = tsne_2d(&features, cfg.perplexity, cfg.seed)?;
        write_matrix(&store.tsne(), &embedding)?;
        write_embedding_table(&store.tsne_table(), &embedding, &labels)?;
    }
    Ok(stats)
}
