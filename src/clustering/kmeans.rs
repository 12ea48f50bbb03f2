// K-means cluster assignment for feedback embeddings.
//
// Lloyd's algorithm with k-means++ seeding and squared Euclidean distance.
// Every run starts from the same RNG seed and tries several initializations,
// keeping the one with the lowest inertia, so identical feedback always
// produces identical clusters.
//
// The requested cluster count is clamped to the number of items: asking for
// five clusters over three feedback entries clusters into three.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::error::ClusterError;

/// Seed used for every clustering run.
pub const DEFAULT_SEED: u64 = 42;

/// Tuning knobs for the k-means search.
#[derive(Debug, Clone)]
pub struct KMeansParams {
    /// Independent k-means++ initializations per run (default 10)
    pub n_init: usize,
    /// Lloyd iterations allowed per initialization (default 300)
    pub max_iterations: usize,
    /// Convergence threshold on the summed squared centroid movement, relative
    /// to the mean per-dimension variance of the input (default 1e-4)
    pub tolerance: f64,
    /// RNG seed shared by all initializations of a run
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            n_init: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            seed: DEFAULT_SEED,
        }
    }
}

/// The cluster count actually used: never more than the items, never below 1.
pub fn effective_k(requested_k: usize, n_items: usize) -> usize {
    requested_k.min(n_items).max(1)
}

/// Assign each vector a cluster label in `[0, effective_k)` using the
/// default parameters.
pub fn cluster(vectors: &[Vec<f64>], requested_k: usize) -> Result<Vec<usize>, ClusterError> {
    cluster_with(vectors, requested_k, &KMeansParams::default())
}

/// Assign each vector a cluster label in `[0, effective_k)`.
///
/// Labels are renumbered in order of first appearance, so the first vector
/// is always in cluster 0.
pub fn cluster_with(
    vectors: &[Vec<f64>],
    requested_k: usize,
    params: &KMeansParams,
) -> Result<Vec<usize>, ClusterError> {
    let dim = validate(vectors)?;
    let n = vectors.len();
    let k = effective_k(requested_k, n);

    if k == 1 {
        return Ok(vec![0; n]);
    }

    let tolerance = scaled_tolerance(vectors, dim, params.tolerance);
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Fit, f64)> = None;

    for restart in 0..params.n_init.max(1) {
        let fit = lloyd(vectors, k, dim, params.max_iterations, tolerance, &mut rng);
        let inertia = fit.inertia(vectors);
        debug!(
            restart,
            inertia,
            iterations = fit.iterations,
            "k-means initialization finished"
        );

        let improved = match &best {
            Some((_, current)) => inertia < *current,
            None => true,
        };
        if improved {
            best = Some((fit, inertia));
        }
    }

    let labels = best
        .map(|(fit, _)| fit.labels)
        .unwrap_or_else(|| vec![0; n]);
    Ok(relabel_by_first_appearance(&labels))
}

/// Check the input is non-empty, uniformly sized and finite. Returns the dimension.
fn validate(vectors: &[Vec<f64>]) -> Result<usize, ClusterError> {
    let first = vectors.first().ok_or(ClusterError::EmptyInput)?;
    let dim = first.len();
    if dim == 0 {
        return Err(ClusterError::ZeroDimension);
    }

    for (index, v) in vectors.iter().enumerate() {
        if v.len() != dim {
            return Err(ClusterError::DimensionMismatch {
                index,
                expected: dim,
                found: v.len(),
            });
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(ClusterError::NonFinite { index });
        }
    }

    Ok(dim)
}

/// `tolerance` times the mean per-dimension (population) variance, so the
/// stopping rule does not depend on the scale of the input.
fn scaled_tolerance(vectors: &[Vec<f64>], dim: usize, tolerance: f64) -> f64 {
    let n = vectors.len() as f64;
    let mut total_variance = 0.0;
    for d in 0..dim {
        let mean = vectors.iter().map(|v| v[d]).sum::<f64>() / n;
        total_variance += vectors.iter().map(|v| (v[d] - mean).powi(2)).sum::<f64>() / n;
    }
    tolerance * total_variance / dim as f64
}

/// One finished initialization.
struct Fit {
    labels: Vec<usize>,
    centroids: Vec<Vec<f64>>,
    iterations: usize,
}

impl Fit {
    /// Within-cluster sum of squared distances.
    fn inertia(&self, vectors: &[Vec<f64>]) -> f64 {
        vectors
            .iter()
            .zip(&self.labels)
            .map(|(v, &label)| squared_distance(v, &self.centroids[label]))
            .sum()
    }
}

fn lloyd(
    vectors: &[Vec<f64>],
    k: usize,
    dim: usize,
    max_iterations: usize,
    tolerance: f64,
    rng: &mut StdRng,
) -> Fit {
    let mut centroids = kmeans_plus_plus(vectors, k, rng);
    let mut labels = vec![usize::MAX; vectors.len()];
    let mut iterations = 0;

    while iterations < max_iterations.max(1) {
        iterations += 1;

        let changed = assign(vectors, &centroids, &mut labels);
        fill_empty_clusters(vectors, &centroids, &mut labels, k);

        let updated = centroids_from_labels(vectors, &labels, k, dim);
        let shift: f64 = centroids
            .iter()
            .zip(&updated)
            .map(|(old, new)| squared_distance(old, new))
            .sum();
        centroids = updated;

        if !changed || shift <= tolerance {
            break;
        }
    }

    // Labels must match the centroids being returned, even when the
    // iteration cap stopped the loop right after an update
    assign(vectors, &centroids, &mut labels);
    fill_empty_clusters(vectors, &centroids, &mut labels, k);

    Fit {
        labels,
        centroids,
        iterations,
    }
}

/// k-means++ seeding: the first centroid is uniform, each later one is drawn
/// with probability proportional to its squared distance from the nearest
/// centroid chosen so far.
fn kmeans_plus_plus(vectors: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = vectors.len();
    let first = rng.random_range(0..n);
    let mut centroids = vec![vectors[first].clone()];
    let mut nearest: Vec<f64> = vectors
        .iter()
        .map(|v| squared_distance(v, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = nearest.iter().sum();

        let next = if total > 0.0 {
            let threshold = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            // Rounding can leave the threshold just past the final sum
            let mut chosen = nearest.iter().rposition(|&d| d > 0.0).unwrap_or(n - 1);
            for (i, &d) in nearest.iter().enumerate() {
                cumulative += d;
                if cumulative > threshold {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            // Every point coincides with a centroid already
            rng.random_range(0..n)
        };

        let centroid = vectors[next].clone();
        for (d, v) in nearest.iter_mut().zip(vectors) {
            *d = d.min(squared_distance(v, &centroid));
        }
        centroids.push(centroid);
    }

    centroids
}

/// Move every vector to its nearest centroid (lowest index on ties).
/// Returns whether any label changed.
fn assign(vectors: &[Vec<f64>], centroids: &[Vec<f64>], labels: &mut [usize]) -> bool {
    let mut changed = false;
    for (v, label) in vectors.iter().zip(labels.iter_mut()) {
        let nearest = nearest_centroid(v, centroids);
        if *label != nearest {
            *label = nearest;
            changed = true;
        }
    }
    changed
}

fn nearest_centroid(v: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_distance(v, c);
        if d < best_distance {
            best_distance = d;
            best = i;
        }
    }
    best
}

/// Give each empty cluster the point farthest from its centroid, taken from
/// a cluster that still has more than one member. With k <= n there is
/// always such a donor.
fn fill_empty_clusters(
    vectors: &[Vec<f64>],
    centroids: &[Vec<f64>],
    labels: &mut [usize],
    k: usize,
) {
    let mut counts = vec![0usize; k];
    for &label in labels.iter() {
        counts[label] += 1;
    }

    for empty in 0..k {
        if counts[empty] > 0 {
            continue;
        }

        let mut donor: Option<(usize, f64)> = None;
        for (i, v) in vectors.iter().enumerate() {
            let label = labels[i];
            if counts[label] <= 1 {
                continue;
            }
            let d = squared_distance(v, &centroids[label]);
            let farther = match donor {
                Some((_, best)) => d > best,
                None => true,
            };
            if farther {
                donor = Some((i, d));
            }
        }

        if let Some((i, _)) = donor {
            counts[labels[i]] -= 1;
            labels[i] = empty;
            counts[empty] += 1;
        }
    }
}

fn centroids_from_labels(
    vectors: &[Vec<f64>],
    labels: &[usize],
    k: usize,
    dim: usize,
) -> Vec<Vec<f64>> {
    let mut sums = vec![vec![0.0_f64; dim]; k];
    let mut counts = vec![0usize; k];

    for (v, &label) in vectors.iter().zip(labels) {
        counts[label] += 1;
        for (acc, x) in sums[label].iter_mut().zip(v) {
            *acc += x;
        }
    }

    for (sum, &count) in sums.iter_mut().zip(&counts) {
        if count > 0 {
            for val in sum.iter_mut() {
                *val /= count as f64;
            }
        }
    }

    sums
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Renumber labels so they appear as 0, 1, 2, ... in input order.
fn relabel_by_first_appearance(labels: &[usize]) -> Vec<usize> {
    let mut mapping: Vec<Option<usize>> = Vec::new();
    let mut next = 0;
    labels
        .iter()
        .map(|&label| {
            if label >= mapping.len() {
                mapping.resize(label + 1, None);
            }
            *mapping[label].get_or_insert_with(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three tight groups around distinct corners of the unit cube.
    fn three_blobs() -> Vec<Vec<f64>> {
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.98, 0.05, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![0.05, 0.97, 0.01],
            vec![0.99, 0.0, 0.02],
            vec![0.0, 0.03, 0.99],
        ]
    }

    #[test]
    fn test_effective_k_clamps() {
        assert_eq!(effective_k(5, 3), 3);
        assert_eq!(effective_k(5, 10), 5);
        assert_eq!(effective_k(0, 4), 1);
        assert_eq!(effective_k(3, 0), 1);
    }

    #[test]
    fn test_single_vector_gets_label_zero() {
        let labels = cluster(&[vec![0.3, 0.4]], 5).unwrap();
        assert_eq!(labels, vec![0]);
    }

    #[test]
    fn test_separated_groups_are_recovered() {
        let labels = cluster(&three_blobs(), 3).unwrap();
        assert_eq!(labels, vec![0, 1, 0, 2, 1, 0, 2]);
    }

    #[test]
    fn test_labels_within_effective_k() {
        let vectors = three_blobs();
        for requested in 0..10 {
            let labels = cluster(&vectors, requested).unwrap();
            let k = effective_k(requested, vectors.len());
            assert_eq!(labels.len(), vectors.len());
            assert!(
                labels.iter().all(|&l| l < k),
                "labels {labels:?} exceed k={k}"
            );
        }
    }

    #[test]
    fn test_more_clusters_than_items() {
        let vectors = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.5, 0.5]];
        let labels = cluster(&vectors, 5).unwrap();
        // k clamps to 3, and every cluster gets one item
        let mut sorted = labels.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2]);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let vectors: Vec<Vec<f64>> = (0..40)
            .map(|i| {
                let t = i as f64 * 0.37;
                vec![t.sin(), t.cos(), (t * 0.5).sin()]
            })
            .collect();
        let first = cluster(&vectors, 5).unwrap();
        let second = cluster(&vectors, 5).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_identical_vectors_do_not_fail() {
        let vectors = vec![vec![0.5, 0.5]; 6];
        let labels = cluster(&vectors, 3).unwrap();
        assert_eq!(labels.len(), 6);
        assert!(labels.iter().all(|&l| l < 3));
        assert_eq!(labels[0], 0);
    }

    #[test]
    fn test_k_one_puts_everything_together() {
        let labels = cluster(&three_blobs(), 1).unwrap();
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_first_item_is_cluster_zero() {
        let mut vectors = three_blobs();
        vectors.rotate_left(3);
        let labels = cluster(&vectors, 3).unwrap();
        assert_eq!(labels[0], 0);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(cluster(&[], 3), Err(ClusterError::EmptyInput));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert_eq!(
            cluster(&[vec![], vec![]], 2),
            Err(ClusterError::ZeroDimension)
        );
    }

    #[test]
    fn test_ragged_dimensions_rejected() {
        let err = cluster(&[vec![1.0, 2.0], vec![1.0]], 2).unwrap_err();
        assert_eq!(
            err,
            ClusterError::DimensionMismatch {
                index: 1,
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_nan_rejected() {
        let err = cluster(&[vec![1.0, 2.0], vec![f64::NAN, 0.0]], 2).unwrap_err();
        assert_eq!(err, ClusterError::NonFinite { index: 1 });
    }

    #[test]
    fn test_single_initialization_still_works() {
        let params = KMeansParams {
            n_init: 1,
            ..KMeansParams::default()
        };
        let labels = cluster_with(&three_blobs(), 3, &params).unwrap();
        assert_eq!(labels.len(), 7);
    }

    #[test]
    fn test_relabel_by_first_appearance() {
        assert_eq!(
            relabel_by_first_appearance(&[2, 2, 0, 1, 0]),
            vec![0, 0, 1, 2, 1]
        );
    }

    #[test]
    fn test_fill_empty_clusters_moves_farthest_point() {
        let vectors = vec![vec![0.0], vec![0.1], vec![5.0]];
        let centroids = vec![vec![0.0], vec![10.0]];
        let mut labels = vec![0, 0, 0];
        fill_empty_clusters(&vectors, &centroids, &mut labels, 2);
        assert_eq!(labels, vec![0, 0, 1]);
    }

    #[test]
    fn test_capped_run_labels_match_returned_centroids() {
        let vectors: Vec<Vec<f64>> = (0..60)
            .map(|i| {
                let t = i as f64 * 0.61;
                vec![t.sin() * (1.0 + i as f64 * 0.05), (t * 1.7).cos()]
            })
            .collect();

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let fit = lloyd(&vectors, 4, 2, 2, 0.0, &mut rng);

            let mut counts = vec![0usize; 4];
            for &label in &fit.labels {
                counts[label] += 1;
            }
            for (v, &label) in vectors.iter().zip(&fit.labels) {
                // Singletons may be points moved into an emptied cluster
                if counts[label] > 1 {
                    assert_eq!(label, nearest_centroid(v, &fit.centroids), "seed {seed}");
                }
            }
        }
    }

    #[test]
    fn test_tolerance_scales_with_variance() {
        // Variance 1.0 along x and 0.0 along y
        let vectors = vec![vec![0.0, 3.0], vec![2.0, 3.0]];
        assert!((scaled_tolerance(&vectors, 2, 1e-4) - 5e-5).abs() < 1e-15);

        let scaled: Vec<Vec<f64>> = vectors
            .iter()
            .map(|v| v.iter().map(|x| x * 10.0).collect())
            .collect();
        assert!((scaled_tolerance(&scaled, 2, 1e-4) - 5e-3).abs() < 1e-12);
    }

    #[test]
    fn test_identical_vectors_have_zero_tolerance() {
        let vectors = vec![vec![0.5, 0.5]; 4];
        assert_eq!(scaled_tolerance(&vectors, 2, 1e-4), 0.0);
    }
}
