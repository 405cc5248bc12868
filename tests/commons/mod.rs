use rand::{rngs::StdRng, Rng, SeedableRng};

/// Random starting layout in [-1, 1]^n_dim
pub fn create_random_layout(n_points: usize, n_dim: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_points)
        .map(|_| {
            (0..n_dim)
                .map(|_| rng.random::<f64>() * 2.0 - 1.0)
                .collect()
        })
        .collect()
}

/// Directed edge list fully connecting two clusters of `cluster_size` points
///
/// Cluster 0 holds points `0..cluster_size`, cluster 1 the rest. Every
/// within-cluster ordered pair becomes an edge with a sampling period of 1,
/// so each edge fires every epoch.
pub fn create_two_cluster_edges(cluster_size: usize) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
    let mut head = Vec::new();
    let mut tail = Vec::new();

    for cluster in 0..2 {
        let base = cluster * cluster_size;
        for i in 0..cluster_size {
            for j in 0..cluster_size {
                if i != j {
                    head.push(base + i);
                    tail.push(base + j);
                }
            }
        }
    }

    let eps = vec![1.0; head.len()];
    (head, tail, eps)
}

pub fn euclidean_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Mean distance over all cross pairs of two point sets
pub fn mean_pairwise_dist(embd: &[Vec<f64>], set_a: &[usize], set_b: &[usize]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &i in set_a {
        for &j in set_b {
            if i != j {
                sum += euclidean_dist(&embd[i], &embd[j]);
                count += 1;
            }
        }
    }
    sum / count as f64
}

pub fn all_finite(embd: &[Vec<f64>]) -> bool {
    embd.iter().all(|p| p.iter().all(|v| v.is_finite()))
}
