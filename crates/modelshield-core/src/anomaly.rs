//! Statistical outlier detection over cheap byte-level features. The
//! detector is a small isolation forest driven by a fixed-seed PRNG so a
//! given artifact always produces the same report.

use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::inspect::HEAD_WINDOW;

/// Feature vector width. Features beyond the measured ones are zero-padded.
pub const FEATURE_DIM: usize = 10;

const TREE_COUNT: usize = 100;
const SUBSAMPLE: usize = 256;
const CONTAMINATION: f64 = 0.1;
const SEED: u64 = 42;

/// Outcome of the anomaly inspector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub anomaly_score: f64,
    pub is_anomalous: bool,
    pub analysis_complete: bool,
}

impl AnomalyReport {
    fn incomplete() -> Self {
        Self {
            anomaly_score: 0.0,
            is_anomalous: false,
            analysis_complete: false,
        }
    }
}

/// Shannon entropy of a byte slice, in bits per byte. Empty input scores 0.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    let total = data.len() as f64;
    counts
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Measure `[file size, head entropy]`, zero-padded to [`FEATURE_DIM`].
/// Returns `None` when the file cannot be read.
pub fn extract_features(path: &Path) -> Option<[f64; FEATURE_DIM]> {
    let data = std::fs::read(path).ok()?;
    let head = &data[..data.len().min(HEAD_WINDOW)];
    let mut features = [0.0; FEATURE_DIM];
    features[0] = data.len() as f64;
    features[1] = shannon_entropy(head);
    Some(features)
}

/// Run the outlier detector over the artifact's features.
///
/// A population of one has no meaningful outliers; the detector reports the
/// neutral score and no anomaly, but still marks the analysis complete.
pub fn anomaly_detection(path: &Path) -> AnomalyReport {
    let Some(features) = extract_features(path) else {
        debug!("feature extraction failed, anomaly analysis incomplete");
        return AnomalyReport::incomplete();
    };
    let forest = IsolationForest::fit(&[features.to_vec()], SEED);
    let score = forest.score(&features);
    AnomalyReport {
        anomaly_score: score,
        is_anomalous: forest.is_outlier(score),
        analysis_complete: true,
    }
}

/// xorshift64: tiny deterministic generator, used only to pick tree splits.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9e3779b97f4a7c15 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn next_index(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

enum Node {
    Leaf { size: usize },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Isolation forest over fixed-width feature vectors. Deterministic for a
/// given seed and training set.
pub struct IsolationForest {
    trees: Vec<Node>,
    subsample: usize,
    threshold: f64,
}

impl IsolationForest {
    pub fn fit(samples: &[Vec<f64>], seed: u64) -> Self {
        let mut rng = XorShift64::new(seed);
        let subsample = samples.len().min(SUBSAMPLE).max(1);
        let depth_limit = (subsample as f64).log2().ceil().max(1.0) as usize;

        let mut trees = Vec::with_capacity(TREE_COUNT);
        for _ in 0..TREE_COUNT {
            let mut picked = Vec::with_capacity(subsample);
            for _ in 0..subsample {
                picked.push(samples[rng.next_index(samples.len())].clone());
            }
            trees.push(build_tree(&picked, &mut rng, 0, depth_limit));
        }

        let mut forest = Self {
            trees,
            subsample,
            threshold: 0.5,
        };
        forest.threshold = forest.fit_threshold(samples);
        forest
    }

    /// Contamination quantile over the training scores. With a degenerate
    /// population every score ties, so the threshold sits above them all.
    fn fit_threshold(&self, samples: &[Vec<f64>]) -> f64 {
        if samples.len() < 2 {
            return 0.5;
        }
        let mut scores: Vec<f64> = samples.iter().map(|s| self.score(s)).collect();
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let cut = ((samples.len() as f64) * (1.0 - CONTAMINATION)).floor() as usize;
        scores[cut.min(samples.len() - 1)]
    }

    /// Anomaly score in (0, 1]; higher is more isolated. A single-sample
    /// population always yields the neutral 0.5.
    pub fn score(&self, sample: &[f64]) -> f64 {
        if self.subsample < 2 {
            return 0.5;
        }
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| path_length(tree, sample, 0))
            .sum();
        let mean = total / self.trees.len() as f64;
        let norm = average_path_length(self.subsample);
        (2.0_f64).powf(-mean / norm)
    }

    pub fn is_outlier(&self, score: f64) -> bool {
        if self.subsample < 2 {
            return false;
        }
        score > self.threshold
    }
}

fn build_tree(samples: &[Vec<f64>], rng: &mut XorShift64, depth: usize, limit: usize) -> Node {
    if samples.len() <= 1 || depth >= limit {
        return Node::Leaf {
            size: samples.len(),
        };
    }
    let feature = rng.next_index(FEATURE_DIM);
    let (min, max) = samples.iter().fold((f64::MAX, f64::MIN), |(lo, hi), s| {
        (lo.min(s[feature]), hi.max(s[feature]))
    });
    if max <= min {
        return Node::Leaf {
            size: samples.len(),
        };
    }
    let threshold = min + rng.next_f64() * (max - min);
    let (left, right): (Vec<Vec<f64>>, Vec<Vec<f64>>) = samples
        .iter()
        .cloned()
        .partition(|s| s[feature] < threshold);
    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(&left, rng, depth + 1, limit)),
        right: Box::new(build_tree(&right, rng, depth + 1, limit)),
    }
}

fn path_length(node: &Node, sample: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if sample[*feature] < *threshold {
                path_length(left, sample, depth + 1)
            } else {
                path_length(right, sample, depth + 1)
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` items.
fn average_path_length(n: usize) -> f64 {
    if n < 2 {
        return 0.0;
    }
    let n = n as f64;
    const EULER: f64 = 0.577_215_664_901_532_9;
    2.0 * ((n - 1.0).ln() + EULER) - 2.0 * (n - 1.0) / n
}
