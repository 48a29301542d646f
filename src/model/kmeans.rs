//! K-Means clustering with k-means++ initialization and seeded restarts.

use ndarray::{Array2, ArrayView1, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::error::SegmentationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeans {
    pub n_clusters: usize,
    pub max_iter: usize,
    /// Independent k-means++ restarts; the lowest-inertia run is kept.
    pub n_init: usize,
    pub tol: f64,
    pub random_state: u64,
    /// Fitted cluster centroids (n_clusters × n_features)
    centroids: Option<Array2<f64>>,
    /// Sum of squared distances to the nearest centroid
    pub inertia: Option<f64>,
    pub n_iter: Option<usize>,
}

impl Default for KMeans {
    fn default() -> Self {
        Self::new(5)
    }
}

struct RunResult {
    centroids: Array2<f64>,
    labels: Vec<u32>,
    inertia: f64,
    n_iter: usize,
}

impl KMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            max_iter: 300,
            n_init: 10,
            tol: 1e-4,
            random_state: 0,
            centroids: None,
            inertia: None,
            n_iter: None,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn centroids(&self) -> Option<&Array2<f64>> {
        self.centroids.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.centroids.is_some()
    }

    fn euclidean_sq(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
    }

    fn nearest(row: &ArrayView1<f64>, centroids: &Array2<f64>) -> (u32, f64) {
        let mut best_c = 0;
        let mut best_dist = f64::MAX;
        for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
            let d = Self::euclidean_sq(row, &centroid);
            if d < best_dist {
                best_dist = d;
                best_c = c;
            }
        }
        (best_c as u32, best_dist)
    }

    fn assign(x: &Array2<f64>, centroids: &Array2<f64>) -> Vec<(u32, f64)> {
        (0..x.nrows())
            .into_par_iter()
            .map(|i| Self::nearest(&x.row(i), centroids))
            .collect()
    }

    fn distinct_points(x: &Array2<f64>) -> usize {
        x.axis_iter(Axis(0))
            .map(|row| row.iter().map(|v| (v + 0.0).to_bits()).collect::<Vec<u64>>())
            .collect::<HashSet<_>>()
            .len()
    }

    fn validate(&self, x: &Array2<f64>) -> Result<(), SegmentationError> {
        if self.n_clusters == 0 {
            return Err(SegmentationError::InvalidArgument {
                message: "n_clusters must be at least 1".to_string(),
            });
        }
        if self.n_init == 0 || self.max_iter == 0 {
            return Err(SegmentationError::InvalidArgument {
                message: "n_init and max_iter must be at least 1".to_string(),
            });
        }
        if x.nrows() == 0 {
            return Err(SegmentationError::InsufficientData {
                message: "no samples to cluster".to_string(),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(SegmentationError::InvalidArgument {
                message: "clustering input contains non-finite values".to_string(),
            });
        }
        let distinct = Self::distinct_points(x);
        if distinct < self.n_clusters {
            return Err(SegmentationError::InsufficientData {
                message: format!(
                    "{} distinct points < n_clusters ({})",
                    distinct, self.n_clusters
                ),
            });
        }
        Ok(())
    }

    /// K-means++: each next centroid is drawn with probability proportional to
    /// its squared distance from the nearest centroid chosen so far.
    fn kmeans_pp_init(x: &Array2<f64>, k: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
        let n_samples = x.nrows();
        let mut centroids = Array2::zeros((k, x.ncols()));

        let first = rng.random_range(0..n_samples);
        centroids.row_mut(0).assign(&x.row(first));

        let mut closest: Vec<f64> = (0..n_samples)
            .map(|i| Self::euclidean_sq(&x.row(i), &centroids.row(0)))
            .collect();

        for c in 1..k {
            let total: f64 = closest.iter().sum();
            let chosen = if total <= 0.0 {
                rng.random_range(0..n_samples)
            } else {
                let r = rng.random::<f64>() * total;
                let mut cumulative = 0.0;
                let mut chosen = None;
                for (i, &d) in closest.iter().enumerate() {
                    cumulative += d;
                    if cumulative > r {
                        chosen = Some(i);
                        break;
                    }
                }
                // Rounding can leave r at the very end of the range.
                chosen.unwrap_or_else(|| {
                    closest
                        .iter()
                        .rposition(|d| *d > 0.0)
                        .unwrap_or(n_samples - 1)
                })
            };

            centroids.row_mut(c).assign(&x.row(chosen));
            for (i, d) in closest.iter_mut().enumerate() {
                let candidate = Self::euclidean_sq(&x.row(i), &centroids.row(c));
                if candidate < *d {
                    *d = candidate;
                }
            }
        }

        centroids
    }

    fn single_run(&self, x: &Array2<f64>, tol: f64, rng: &mut ChaCha8Rng) -> RunResult {
        let k = self.n_clusters;
        let mut centroids = Self::kmeans_pp_init(x, k, rng);
        let mut n_iter = 0;

        for iter in 0..self.max_iter {
            n_iter = iter + 1;
            let assignment = Self::assign(x, &centroids);

            let mut new_centroids = Array2::zeros(centroids.dim());
            let mut counts = vec![0usize; k];
            for (i, (c, _)) in assignment.iter().enumerate() {
                let c = *c as usize;
                counts[c] += 1;
                let mut target = new_centroids.row_mut(c);
                target += &x.row(i);
            }

            let mut distances: Vec<f64> = assignment.iter().map(|(_, d)| *d).collect();
            for c in 0..k {
                if counts[c] > 0 {
                    let mut row = new_centroids.row_mut(c);
                    row /= counts[c] as f64;
                } else {
                    // Empty cluster: move it onto the point farthest from its centroid.
                    let far = distances
                        .iter()
                        .enumerate()
                        .fold((0, f64::MIN), |best, (i, d)| if *d > best.1 { (i, *d) } else { best })
                        .0;
                    new_centroids.row_mut(c).assign(&x.row(far));
                    distances[far] = 0.0;
                }
            }

            let shift: f64 = centroids
                .iter()
                .zip(new_centroids.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();

            centroids = new_centroids;

            if shift <= tol {
                break;
            }
        }

        let assignment = Self::assign(x, &centroids);
        let inertia = assignment.iter().map(|(_, d)| d).sum();
        let labels = assignment.into_iter().map(|(c, _)| c).collect();

        RunResult {
            centroids,
            labels,
            inertia,
            n_iter,
        }
    }

    /// Fits the model and returns the cluster label of every row.
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<Vec<u32>, SegmentationError> {
        self.validate(x)?;

        // Convergence tolerance relative to the mean per-feature variance.
        let mean_variance = x.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0);
        let tol = self.tol * mean_variance;

        let mut seeds = ChaCha8Rng::seed_from_u64(self.random_state);
        let mut best: Option<RunResult> = None;

        for run in 0..self.n_init {
            let mut rng = ChaCha8Rng::seed_from_u64(seeds.random::<u64>());
            let result = self.single_run(x, tol, &mut rng);
            debug!(
                "k-means run {} finished after {} iterations with inertia {}",
                run, result.n_iter, result.inertia
            );

            let better = match &best {
                Some(current) => result.inertia < current.inertia,
                None => true,
            };
            if better {
                best = Some(result);
            }
        }

        let best = best.ok_or_else(|| SegmentationError::InternalError {
            message: "k-means produced no runs".to_string(),
        })?;

        self.centroids = Some(best.centroids);
        self.inertia = Some(best.inertia);
        self.n_iter = Some(best.n_iter);
        Ok(best.labels)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<u32>, SegmentationError> {
        let centroids = self
            .centroids
            .as_ref()
            .ok_or(SegmentationError::ModelNotFitted)?;
        if x.ncols() != centroids.ncols() {
            return Err(SegmentationError::InvalidArgument {
                message: format!(
                    "expected {} features, got {}",
                    centroids.ncols(),
                    x.ncols()
                ),
            });
        }

        Ok(Self::assign(x, centroids)
            .into_iter()
            .map(|(c, _)| c)
            .collect())
    }
}
