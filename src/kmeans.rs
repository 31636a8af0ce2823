use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};

/// Mini-batch K-means (Sculley 2010): each step moves the nearest centroid
/// of every sampled point toward it with a per-centroid rate `1 / count`.
#[derive(Debug, Clone)]
pub struct MiniBatchKMeans {
    pub n_clusters: usize,
    pub batch_size: usize,
    /// passes over the data
    pub max_iter: usize,
    /// stop when the summed centroid movement of a step drops below this; 0 disables
    pub tolerance: f32,
    /// stop after this many steps without improvement of the smoothed batch inertia; 0 disables
    pub max_no_improvement: usize,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct KMeansModel {
    pub centroids: Array2<f32>,
    pub labels: Vec<usize>,
    /// sum of squared distances of every point to its centroid
    pub inertia: f32,
    pub steps: usize,
}

/// Squared Euclidean distance
#[inline]
fn sq_dist(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: ArrayView1<f32>, centroids: ArrayView2<f32>) -> (usize, f32) {
    let mut best_cluster = 0;
    let mut best_dist = f32::MAX;
    for (ci, c_row) in centroids.outer_iter().enumerate() {
        let dist = sq_dist(point, c_row);
        if dist < best_dist {
            best_dist = dist;
            best_cluster = ci;
        }
    }
    (best_cluster, best_dist)
}

fn assign_all(data: ArrayView2<f32>, centroids: ArrayView2<f32>) -> (Vec<usize>, f32) {
    let mut inertia = 0.0;
    let labels = data
        .outer_iter()
        .map(|row| {
            let (c, d) = nearest(row, centroids);
            inertia += d;
            c
        })
        .collect();
    (labels, inertia)
}

impl MiniBatchKMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            batch_size: 512,
            max_iter: 200,
            tolerance: 0.0,
            max_no_improvement: 10,
            seed: 42,
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(cfg.n_clusters)
            .batch_size(cfg.batch_size)
            .max_iter(cfg.max_iter)
            .tolerance(cfg.tolerance)
            .max_no_improvement(cfg.max_no_improvement)
            .seed(cfg.seed)
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn max_no_improvement(mut self, steps: usize) -> Self {
        self.max_no_improvement = steps;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn fit(&self, data: ArrayView2<f32>) -> Result<KMeansModel> {
        let (nrows, ncols) = data.dim();
        let k = self.n_clusters;

        if k == 0 {
            return Err(Error::Fit("the number of clusters must be positive".into()));
        }
        if nrows < k {
            return Err(Error::Fit(format!("Not enough data points ({}) for {} clusters", nrows, k)));
        }
        if self.batch_size == 0 {
            return Err(Error::Fit("the batch size must be positive".into()));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);

        // Randomly select k initial centroids
        let mut indices: Vec<usize> = (0..nrows).collect();
        indices.shuffle(&mut rng);

        let mut centroids = Array2::<f32>::zeros((k, ncols));
        for (ci, &idx) in indices.iter().take(k).enumerate() {
            centroids.row_mut(ci).assign(&data.row(idx));
        }

        let batch = self.batch_size.min(nrows);
        let steps_per_pass = (nrows + batch - 1) / batch;
        let total_steps = self.max_iter * steps_per_pass;
        let alpha = (2.0 * batch as f32 / (nrows as f32 + 1.0)).min(1.0);

        let mut counts = vec![0usize; k];
        let mut smoothed: Option<f32> = None;
        let mut best = f32::MAX;
        let mut no_improvement = 0;
        let mut steps = 0;

        for step in 0..total_steps {
            steps = step + 1;

            // Step 1: move the nearest centroid of each sampled point
            let mut batch_inertia = 0.0;
            let mut movement = 0.0;
            for _ in 0..batch {
                let point = data.row(rng.gen_range(0..nrows));
                let (c, dist) = nearest(point, centroids.view());
                batch_inertia += dist;
                counts[c] += 1;

                let eta = 1.0 / counts[c] as f32;
                for (cv, &pv) in centroids.row_mut(c).iter_mut().zip(point.iter()) {
                    let delta = eta * (pv - *cv);
                    *cv += delta;
                    movement += delta.abs();
                }
            }
            batch_inertia /= batch as f32;

            // Step 2: convergence checks
            if self.tolerance > 0.0 && movement < self.tolerance {
                log::debug!("k-means converged after {} steps (movement {})", steps, movement);
                break;
            }
            let ewa = match smoothed {
                None => batch_inertia,
                Some(prev) => prev * (1.0 - alpha) + batch_inertia * alpha,
            };
            smoothed = Some(ewa);
            if ewa < best {
                best = ewa;
                no_improvement = 0;
            } else {
                no_improvement += 1;
                if self.max_no_improvement > 0 && no_improvement >= self.max_no_improvement {
                    log::debug!("k-means stopped after {} steps without improvement", no_improvement);
                    break;
                }
            }

            // Step 3: after each pass, move centroids that never got a point
            // onto the worst-served point of a fresh sample
            if steps % steps_per_pass == 0 {
                for ci in 0..k {
                    if counts[ci] > 0 {
                        continue;
                    }
                    let (far, far_dist) = (0..batch)
                        .map(|_| rng.gen_range(0..nrows))
                        .map(|i| (i, nearest(data.row(i), centroids.view()).1))
                        .fold((0, 0.0f32), |acc, cand| if cand.1 > acc.1 { cand } else { acc });
                    if far_dist > 0.0 {
                        centroids.row_mut(ci).assign(&data.row(far));
                    }
                }
                log::debug!("pass {} done, smoothed inertia {}", steps / steps_per_pass, ewa);
            }
        }

        let (labels, inertia) = assign_all(data, centroids.view());
        log::info!(
            "mini-batch k-means: {} clusters, {} steps, inertia {:.3}",
            k, steps, inertia
        );

        Ok(KMeansModel { centroids, labels, inertia, steps })
    }
}
