//! Batch clustering over cluster vectors: density-based with automatic eps
//! estimation, Ward agglomerative, and k-means with elbow selection, plus
//! silhouette and Calinski-Harabasz diagnostics.

use std::collections::VecDeque;

use crate::config::ClusterAlgorithm;

/// Floor for the estimated neighborhood radius. Keeps a degenerate k-distance
/// distribution (e.g. many identical vectors) from collapsing eps to zero.
const EPS_FLOOR: f64 = 0.1;
const KDIST_NEIGHBOR: usize = 4;
const KDIST_PERCENTILE: f64 = 0.75;
const KMEANS_MAX_ITERATIONS: usize = 100;
const ELBOW_IMPROVEMENT: f64 = 0.15;

#[derive(Debug, Clone)]
pub struct ClusterRun {
    pub algorithm: ClusterAlgorithm,
    /// Per input vector: index into `clusters`, or `None` for noise and for
    /// members of clusters discarded as too small.
    pub assignments: Vec<Option<usize>>,
    /// Valid clusters only (size >= min_group_size), as input indices.
    pub clusters: Vec<Vec<usize>>,
    /// Raw clusters dropped for falling under the size floor.
    pub discarded_clusters: usize,
    pub silhouette: f64,
    pub calinski_harabasz: f64,
}

impl ClusterRun {
    fn empty(algorithm: ClusterAlgorithm, n: usize) -> Self {
        Self {
            algorithm,
            assignments: vec![None; n],
            clusters: Vec::new(),
            discarded_clusters: 0,
            silhouette: 0.0,
            calinski_harabasz: 0.0,
        }
    }
}

/// Partition the given vectors. Inputs smaller than `min_group_size` cannot
/// produce any valid cluster, so the run comes back empty rather than erroring.
pub fn run_clustering(
    vectors: &[Vec<f64>],
    algorithm: ClusterAlgorithm,
    min_group_size: usize,
) -> ClusterRun {
    let n = vectors.len();
    if n < min_group_size {
        return ClusterRun::empty(algorithm, n);
    }

    let raw_labels: Vec<Option<usize>> = match algorithm {
        ClusterAlgorithm::Density => {
            let eps = estimate_eps(vectors);
            let min_samples = (n / 10).max(3);
            dbscan(vectors, eps, min_samples)
        }
        ClusterAlgorithm::Hierarchical => {
            let target = (n / 5).clamp(3, 8).min(n);
            ward_agglomerative(vectors, target)
                .into_iter()
                .map(Some)
                .collect()
        }
        ClusterAlgorithm::Centroid => {
            let k = elbow_k(vectors);
            let (labels, _) = kmeans(vectors, k);
            labels.into_iter().map(Some).collect()
        }
    };

    finalize(vectors, raw_labels, algorithm, min_group_size)
}

/// Drop undersized clusters, renumber the survivors, compute diagnostics.
fn finalize(
    vectors: &[Vec<f64>],
    raw_labels: Vec<Option<usize>>,
    algorithm: ClusterAlgorithm,
    min_group_size: usize,
) -> ClusterRun {
    let max_label = raw_labels.iter().flatten().copied().max();
    let mut buckets: Vec<Vec<usize>> = match max_label {
        Some(max) => vec![Vec::new(); max + 1],
        None => Vec::new(),
    };
    for (i, label) in raw_labels.iter().enumerate() {
        if let Some(label) = label {
            buckets[*label].push(i);
        }
    }

    let mut clusters = Vec::new();
    let mut discarded_clusters = 0;
    let mut assignments = vec![None; vectors.len()];
    for bucket in buckets {
        if bucket.is_empty() {
            continue;
        }
        if bucket.len() < min_group_size {
            discarded_clusters += 1;
            continue;
        }
        let cluster_idx = clusters.len();
        for &i in &bucket {
            assignments[i] = Some(cluster_idx);
        }
        clusters.push(bucket);
    }

    let silhouette = silhouette_score(vectors, &assignments);
    let calinski_harabasz = calinski_harabasz(vectors, &assignments);

    ClusterRun {
        algorithm,
        assignments,
        clusters,
        discarded_clusters,
        silhouette,
        calinski_harabasz,
    }
}

fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    euclidean_squared(a, b).sqrt()
}

fn euclidean_squared(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

// ── Density ───────────────────────────────────────────────

/// 75th percentile of each point's distance to its 4th nearest neighbor,
/// floored so identical inputs never degenerate the radius to zero.
pub fn estimate_eps(vectors: &[Vec<f64>]) -> f64 {
    let n = vectors.len();
    if n <= KDIST_NEIGHBOR {
        return EPS_FLOOR;
    }
    let mut kdists = Vec::with_capacity(n);
    for i in 0..n {
        let mut dists: Vec<f64> = (0..n)
            .filter(|&j| j != i)
            .map(|j| euclidean_distance(&vectors[i], &vectors[j]))
            .collect();
        dists.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        kdists.push(dists[KDIST_NEIGHBOR - 1]);
    }
    kdists.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((kdists.len() - 1) as f64 * KDIST_PERCENTILE).round() as usize;
    kdists[idx].max(EPS_FLOOR)
}

fn region_query(vectors: &[Vec<f64>], center: usize, eps: f64) -> Vec<usize> {
    (0..vectors.len())
        .filter(|&j| j != center && euclidean_distance(&vectors[center], &vectors[j]) <= eps)
        .collect()
}

fn dbscan(vectors: &[Vec<f64>], eps: f64, min_samples: usize) -> Vec<Option<usize>> {
    let n = vectors.len();
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_cluster = 0usize;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let neighbors = region_query(vectors, i, eps);
        // a neighborhood includes the point itself
        if neighbors.len() + 1 < min_samples {
            continue;
        }
        labels[i] = Some(next_cluster);
        let mut queue: VecDeque<usize> = neighbors.into();
        while let Some(j) = queue.pop_front() {
            if labels[j].is_none() {
                labels[j] = Some(next_cluster);
            }
            if !visited[j] {
                visited[j] = true;
                let expansion = region_query(vectors, j, eps);
                if expansion.len() + 1 >= min_samples {
                    queue.extend(expansion);
                }
            }
        }
        next_cluster += 1;
    }

    labels
}

// ── Hierarchical ──────────────────────────────────────────

/// Agglomerative clustering with Ward linkage via the Lance-Williams update,
/// cut at `target` clusters.
pub fn ward_agglomerative(vectors: &[Vec<f64>], target: usize) -> Vec<usize> {
    let n = vectors.len();
    if n == 0 {
        return Vec::new();
    }
    let target = target.clamp(1, n);

    // squared-distance matrix between live clusters
    let mut dist = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = euclidean_squared(&vectors[i], &vectors[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let mut active: Vec<bool> = vec![true; n];
    let mut sizes: Vec<usize> = vec![1; n];
    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut live = n;

    while live > target {
        let mut best = f64::MAX;
        let mut pair = (0, 0);
        for i in 0..n {
            if !active[i] {
                continue;
            }
            for j in (i + 1)..n {
                if active[j] && dist[i][j] < best {
                    best = dist[i][j];
                    pair = (i, j);
                }
            }
        }

        let (i, j) = pair;
        let (ni, nj) = (sizes[i] as f64, sizes[j] as f64);
        for k in 0..n {
            if !active[k] || k == i || k == j {
                continue;
            }
            let nk = sizes[k] as f64;
            let updated = ((ni + nk) * dist[i][k] + (nj + nk) * dist[j][k] - nk * dist[i][j])
                / (ni + nj + nk);
            dist[i][k] = updated;
            dist[k][i] = updated;
        }

        let absorbed = std::mem::take(&mut members[j]);
        members[i].extend(absorbed);
        sizes[i] += sizes[j];
        active[j] = false;
        live -= 1;
    }

    let mut labels = vec![0usize; n];
    let mut next = 0;
    for i in 0..n {
        if active[i] {
            for &m in &members[i] {
                labels[m] = next;
            }
            next += 1;
        }
    }
    labels
}

// ── Centroid ──────────────────────────────────────────────

/// Deterministic k-means++ seeding: median-norm start, then farthest point
/// from the chosen set. No RNG, so repeated runs agree.
fn kmeans_pp_init(vectors: &[Vec<f64>], k: usize) -> Vec<Vec<f64>> {
    let n = vectors.len();
    let mut norms: Vec<(usize, f64)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i, v.iter().map(|x| x * x).sum::<f64>().sqrt()))
        .collect();
    norms.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    let first = norms[n / 2].0;

    let mut centroids = vec![vectors[first].clone()];
    while centroids.len() < k {
        let farthest = (0..n)
            .map(|i| {
                let nearest = centroids
                    .iter()
                    .map(|c| euclidean_squared(&vectors[i], c))
                    .fold(f64::MAX, f64::min);
                (i, nearest)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
        centroids.push(vectors[farthest].clone());
    }
    centroids
}

pub fn kmeans(vectors: &[Vec<f64>], k: usize) -> (Vec<usize>, Vec<Vec<f64>>) {
    let n = vectors.len();
    if n == 0 || k == 0 {
        return (Vec::new(), Vec::new());
    }
    if k >= n {
        return ((0..n).collect(), vectors.to_vec());
    }

    let dim = vectors[0].len();
    let mut centroids = kmeans_pp_init(vectors, k);
    let mut assignments = vec![0usize; n];

    for _ in 0..KMEANS_MAX_ITERATIONS {
        let mut changed = false;
        for (i, vector) in vectors.iter().enumerate() {
            let mut best = 0;
            let mut best_dist = f64::MAX;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = euclidean_squared(vector, centroid);
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0f64; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, &cluster) in assignments.iter().enumerate() {
            counts[cluster] += 1;
            for (d, value) in vectors[i].iter().enumerate() {
                sums[cluster][d] += value;
            }
        }
        for (c, sum) in sums.into_iter().enumerate() {
            if counts[c] > 0 {
                centroids[c] = sum.into_iter().map(|s| s / counts[c] as f64).collect();
            }
        }
    }

    (assignments, centroids)
}

fn inertia(vectors: &[Vec<f64>], assignments: &[usize], centroids: &[Vec<f64>]) -> f64 {
    vectors
        .iter()
        .zip(assignments.iter())
        .map(|(v, &c)| euclidean_squared(v, &centroids[c]))
        .sum()
}

/// Pick k by scanning inertia for k = 2..=min(10, N/3) and stopping where the
/// relative improvement flattens out.
pub fn elbow_k(vectors: &[Vec<f64>]) -> usize {
    let n = vectors.len();
    let k_max = (n / 3).min(10);
    if k_max < 2 {
        return 1;
    }

    let mut previous = {
        let (assignments, centroids) = kmeans(vectors, 2);
        inertia(vectors, &assignments, &centroids)
    };
    for k in 3..=k_max {
        let (assignments, centroids) = kmeans(vectors, k);
        let current = inertia(vectors, &assignments, &centroids);
        if previous <= f64::EPSILON {
            return k - 1;
        }
        if (previous - current) / previous < ELBOW_IMPROVEMENT {
            return k - 1;
        }
        previous = current;
    }
    k_max
}

// ── Diagnostics ───────────────────────────────────────────

/// Mean silhouette coefficient over assigned points; 0 when fewer than two
/// clusters survive. Observability only, never a correctness gate.
pub fn silhouette_score(vectors: &[Vec<f64>], assignments: &[Option<usize>]) -> f64 {
    let assigned: Vec<usize> = (0..vectors.len())
        .filter(|&i| assignments[i].is_some())
        .collect();
    let labels: std::collections::BTreeSet<usize> =
        assigned.iter().filter_map(|&i| assignments[i]).collect();
    if labels.len() < 2 || assigned.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    for &i in &assigned {
        let Some(own) = assignments[i] else {
            continue;
        };
        let same: Vec<usize> = assigned
            .iter()
            .copied()
            .filter(|&j| j != i && assignments[j] == Some(own))
            .collect();
        let a_i = if same.is_empty() {
            0.0
        } else {
            same.iter()
                .map(|&j| euclidean_distance(&vectors[i], &vectors[j]))
                .sum::<f64>()
                / same.len() as f64
        };

        let b_i = labels
            .iter()
            .filter(|&&label| label != own)
            .map(|&label| {
                let other: Vec<usize> = assigned
                    .iter()
                    .copied()
                    .filter(|&j| assignments[j] == Some(label))
                    .collect();
                other
                    .iter()
                    .map(|&j| euclidean_distance(&vectors[i], &vectors[j]))
                    .sum::<f64>()
                    / other.len() as f64
            })
            .fold(f64::MAX, f64::min);

        let denom = a_i.max(b_i);
        total += if denom == 0.0 { 0.0 } else { (b_i - a_i) / denom };
    }
    total / assigned.len() as f64
}

/// Calinski-Harabasz separation index over assigned points; 0 when undefined.
pub fn calinski_harabasz(vectors: &[Vec<f64>], assignments: &[Option<usize>]) -> f64 {
    let assigned: Vec<usize> = (0..vectors.len())
        .filter(|&i| assignments[i].is_some())
        .collect();
    let labels: std::collections::BTreeSet<usize> =
        assigned.iter().filter_map(|&i| assignments[i]).collect();
    let n = assigned.len();
    let k = labels.len();
    if k < 2 || n <= k {
        return 0.0;
    }

    let dim = vectors[0].len();
    let mut global = vec![0.0f64; dim];
    for &i in &assigned {
        for d in 0..dim {
            global[d] += vectors[i][d];
        }
    }
    for value in global.iter_mut() {
        *value /= n as f64;
    }

    let mut between = 0.0;
    let mut within = 0.0;
    for &label in &labels {
        let cluster: Vec<usize> = assigned
            .iter()
            .copied()
            .filter(|&i| assignments[i] == Some(label))
            .collect();
        let mut centroid = vec![0.0f64; dim];
        for &i in &cluster {
            for d in 0..dim {
                centroid[d] += vectors[i][d];
            }
        }
        for value in centroid.iter_mut() {
            *value /= cluster.len() as f64;
        }
        between += cluster.len() as f64 * euclidean_squared(&centroid, &global);
        within += cluster
            .iter()
            .map(|&i| euclidean_squared(&vectors[i], &centroid))
            .sum::<f64>();
    }

    if within <= f64::EPSILON {
        return 0.0;
    }
    (between / (k - 1) as f64) / (within / (n - k) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic jitter so blob members are close but not identical.
    fn jitter(i: usize) -> f64 {
        ((i * 37) % 10) as f64 * 0.005
    }

    fn blob(center: f64, count: usize, offset: usize) -> Vec<Vec<f64>> {
        (0..count)
            .map(|i| {
                let mut v = vec![center; 12];
                v[0] += jitter(i + offset);
                v[1] -= jitter(i + offset + 3);
                v
            })
            .collect()
    }

    #[test]
    fn too_few_vectors_yields_empty_run() {
        let vectors = blob(0.5, 3, 0);
        let run = run_clustering(&vectors, ClusterAlgorithm::Density, 5);
        assert!(run.clusters.is_empty());
        assert!(run.assignments.iter().all(Option::is_none));
    }

    #[test]
    fn density_separates_two_blobs() {
        let mut vectors = blob(0.1, 6, 0);
        vectors.extend(blob(0.9, 6, 6));
        let run = run_clustering(&vectors, ClusterAlgorithm::Density, 5);
        assert_eq!(run.clusters.len(), 2);
        // blob membership is contiguous in the input
        assert_eq!(run.assignments[0], run.assignments[5]);
        assert_eq!(run.assignments[6], run.assignments[11]);
        assert_ne!(run.assignments[0], run.assignments[6]);
    }

    #[test]
    fn near_identical_profiles_form_one_cluster() {
        let vectors = blob(0.5, 6, 0);
        let run = run_clustering(&vectors, ClusterAlgorithm::Density, 5);
        assert_eq!(run.clusters.len(), 1);
        assert_eq!(run.clusters[0].len(), 6);
        assert!(run.assignments.iter().all(|a| *a == Some(0)));
    }

    #[test]
    fn undersized_clusters_are_discarded() {
        // the trio forms a raw cluster but stays under the size floor of 5
        let mut vectors = blob(0.1, 8, 0);
        vectors.extend(blob(0.9, 8, 8));
        vectors.extend(blob(2.5, 3, 16));
        let run = run_clustering(&vectors, ClusterAlgorithm::Hierarchical, 5);
        assert_eq!(run.clusters.len(), 2);
        assert_eq!(run.discarded_clusters, 1);
        for i in 16..19 {
            assert!(run.assignments[i].is_none());
        }
    }

    #[test]
    fn isolated_point_is_noise() {
        let mut vectors = blob(0.1, 10, 0);
        vectors.push(vec![5.0; 12]);
        let run = run_clustering(&vectors, ClusterAlgorithm::Density, 5);
        assert_eq!(run.clusters.len(), 1);
        assert!(run.assignments[10].is_none());
    }

    #[test]
    fn eps_floor_holds_for_identical_points() {
        let vectors = vec![vec![0.5; 12]; 10];
        assert!((estimate_eps(&vectors) - 0.1).abs() < 1e-12);
        // and the degenerate input still clusters without a division error
        let run = run_clustering(&vectors, ClusterAlgorithm::Density, 5);
        assert_eq!(run.clusters.len(), 1);
    }

    #[test]
    fn hierarchical_separates_three_blobs() {
        let mut vectors = blob(0.1, 5, 0);
        vectors.extend(blob(0.5, 5, 5));
        vectors.extend(blob(0.9, 5, 10));
        let run = run_clustering(&vectors, ClusterAlgorithm::Hierarchical, 5);
        assert_eq!(run.clusters.len(), 3);
        assert_eq!(run.assignments[0], run.assignments[4]);
        assert_eq!(run.assignments[5], run.assignments[9]);
        assert_ne!(run.assignments[0], run.assignments[5]);
        assert_ne!(run.assignments[5], run.assignments[10]);
    }

    #[test]
    fn ward_cut_produces_requested_count() {
        let mut vectors = blob(0.1, 5, 0);
        vectors.extend(blob(0.5, 5, 5));
        vectors.extend(blob(0.9, 5, 10));
        let labels = ward_agglomerative(&vectors, 3);
        let distinct: std::collections::BTreeSet<usize> = labels.iter().copied().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn centroid_separates_two_blobs() {
        // zero within-blob variance pins the elbow at k = 2
        let mut vectors = vec![vec![0.1; 12]; 9];
        vectors.extend(vec![vec![0.9; 12]; 9]);
        let run = run_clustering(&vectors, ClusterAlgorithm::Centroid, 5);
        assert_eq!(run.clusters.len(), 2);
        assert_eq!(run.clusters[0].len(), 9);
        assert_eq!(run.clusters[1].len(), 9);
    }

    #[test]
    fn elbow_k_stays_in_bounds() {
        let mut vectors = blob(0.1, 10, 0);
        vectors.extend(blob(0.9, 10, 10));
        let k = elbow_k(&vectors);
        assert!(k >= 2);
        assert!(k <= 6); // min(10, 20/3)
    }

    #[test]
    fn elbow_k_degrades_to_one_for_tiny_input() {
        let vectors = blob(0.5, 5, 0);
        assert_eq!(elbow_k(&vectors), 1);
    }

    #[test]
    fn kmeans_is_deterministic() {
        let mut vectors = blob(0.1, 8, 0);
        vectors.extend(blob(0.9, 8, 8));
        let (a1, _) = kmeans(&vectors, 2);
        let (a2, _) = kmeans(&vectors, 2);
        assert_eq!(a1, a2);
    }

    #[test]
    fn silhouette_high_for_separated_blobs() {
        let mut vectors = blob(0.1, 6, 0);
        vectors.extend(blob(0.9, 6, 6));
        let assignments: Vec<Option<usize>> =
            (0..12).map(|i| Some(if i < 6 { 0 } else { 1 })).collect();
        assert!(silhouette_score(&vectors, &assignments) > 0.8);
    }

    #[test]
    fn diagnostics_zero_for_single_cluster() {
        let vectors = blob(0.5, 6, 0);
        let assignments: Vec<Option<usize>> = vec![Some(0); 6];
        assert_eq!(silhouette_score(&vectors, &assignments), 0.0);
        assert_eq!(calinski_harabasz(&vectors, &assignments), 0.0);
    }

    #[test]
    fn calinski_harabasz_positive_for_separated_blobs() {
        let mut vectors = blob(0.1, 6, 0);
        vectors.extend(blob(0.9, 6, 6));
        let assignments: Vec<Option<usize>> =
            (0..12).map(|i| Some(if i < 6 { 0 } else { 1 })).collect();
        assert!(calinski_harabasz(&vectors, &assignments) > 1.0);
    }
}
