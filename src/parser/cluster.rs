//! Body/noise separation.
//!
//! Running headers and footers sit at nearly the same coordinates on every
//! page with nearly the same length, so in `(x0, y0, x1, y1, text length)`
//! space they form small dense groups apart from the body text. The clusterer
//! only has to produce labels; the most populous label is the body and every
//! other label collapses into a single noise cluster.

use rayon::prelude::*;
use tracing::debug;

use super::blocks::{ClusteredBlock, TextBlock, BODY_CLUSTER, NOISE_CLUSTER};

pub type FeatureVector = [f64; 5];

/// Label assigned by [`Dbscan`] to points that belong to no cluster.
pub const DBSCAN_NOISE: i64 = -1;

pub const DEFAULT_EPS: f64 = 0.5;
pub const DEFAULT_MIN_SAMPLES: usize = 5;

pub trait Clusterer {
    /// One label per input point, same order.
    fn labels(&self, points: &[FeatureVector]) -> Vec<i64>;
}

/// Density-based clustering with Euclidean distance. `min_samples` counts the
/// point itself.
#[derive(Debug, Clone, Copy)]
pub struct Dbscan {
    pub eps: f64,
    pub min_samples: usize,
}

impl Default for Dbscan {
    fn default() -> Self {
        Dbscan {
            eps: DEFAULT_EPS,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }
}

impl Dbscan {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Dbscan { eps, min_samples }
    }

    fn neighborhoods(&self, points: &[FeatureVector]) -> Vec<Vec<usize>> {
        let eps2 = self.eps * self.eps;
        points
            .par_iter()
            .map(|p| {
                points
                    .iter()
                    .enumerate()
                    .filter(|(_, q)| squared_distance(p, q) <= eps2)
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect()
    }
}

impl Clusterer for Dbscan {
    fn labels(&self, points: &[FeatureVector]) -> Vec<i64> {
        let neighborhoods = self.neighborhoods(points);
        let is_core: Vec<bool> = neighborhoods
            .iter()
            .map(|n| n.len() >= self.min_samples)
            .collect();

        let mut labels = vec![DBSCAN_NOISE; points.len()];
        let mut next_label = 0i64;
        let mut stack = Vec::new();

        for start in 0..points.len() {
            if labels[start] != DBSCAN_NOISE || !is_core[start] {
                continue;
            }
            let mut i = start;
            loop {
                if labels[i] == DBSCAN_NOISE {
                    labels[i] = next_label;
                    if is_core[i] {
                        stack.extend(
                            neighborhoods[i]
                                .iter()
                                .copied()
                                .filter(|&j| labels[j] == DBSCAN_NOISE),
                        );
                    }
                }
                match stack.pop() {
                    Some(j) => i = j,
                    None => break,
                }
            }
            next_label += 1;
        }

        labels
    }
}

fn squared_distance(a: &FeatureVector, b: &FeatureVector) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub fn features(block: &TextBlock) -> FeatureVector {
    let r = block.rect;
    [r.0, r.1, r.2, r.3, block.text_length() as f64]
}

/// The label with the most members; ties go to the label seen first.
pub fn majority_label(labels: &[i64]) -> Option<i64> {
    let mut counts: Vec<(i64, usize)> = Vec::new();
    for &label in labels {
        match counts.iter_mut().find(|(l, _)| *l == label) {
            Some((_, n)) => *n += 1,
            None => counts.push((label, 1)),
        }
    }

    let mut best: Option<(i64, usize)> = None;
    for (label, n) in counts {
        if best.map_or(true, |(_, m)| n > m) {
            best = Some((label, n));
        }
    }
    best.map(|(label, _)| label)
}

pub struct NoiseClusterer<C = Dbscan> {
    clusterer: C,
}

impl<C: Clusterer> NoiseClusterer<C> {
    pub fn new(clusterer: C) -> Self {
        NoiseClusterer { clusterer }
    }

    /// Label every block of the document as body or noise. Order is kept.
    pub fn cluster(&self, blocks: Vec<TextBlock>) -> Vec<ClusteredBlock> {
        let points: Vec<FeatureVector> = blocks.iter().map(features).collect();
        let labels = self.clusterer.labels(&points);

        let distinct = {
            let mut l = labels.clone();
            l.sort_unstable();
            l.dedup();
            l.len()
        };
        debug!("{} clusters for {} blocks", distinct, blocks.len());

        let body = majority_label(&labels);
        blocks
            .into_iter()
            .zip(labels)
            .map(|(block, label)| ClusteredBlock {
                block,
                cluster: if Some(label) == body {
                    BODY_CLUSTER
                } else {
                    NOISE_CLUSTER
                },
            })
            .collect()
    }
}
