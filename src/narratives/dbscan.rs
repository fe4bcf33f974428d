//! Density-based clustering over cosine distance.
//!
//! Core points (at least `min_samples` neighbours within `eps`, the point
//! itself included) that are within `eps` of each other form one cluster.
//! A border point joins the cluster of its nearest core neighbour. Everything
//! else is noise.

use std::collections::VecDeque;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    (1.0 - cosine_similarity(a, b)).max(0.0)
}

/// Pairwise cosine distance matrix
pub fn distance_matrix(vectors: &[Vec<f32>]) -> Vec<Vec<f64>> {
    let n = vectors.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = cosine_distance(&vectors[i], &vectors[j]);
            matrix[i][j] = d;
            matrix[j][i] = d;
        }
    }
    matrix
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dbscan {
    pub eps: f64,
    pub min_samples: usize,
}

impl Dbscan {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self {
            eps,
            min_samples: min_samples.max(1),
        }
    }

    /// Cluster id per point (`None` = noise). Ids are dense and follow the
    /// lowest point index of each cluster.
    pub fn fit(&self, vectors: &[Vec<f32>]) -> Vec<Option<usize>> {
        let distances = distance_matrix(vectors);
        self.fit_distances(&distances)
    }

    pub fn fit_distances(&self, distances: &[Vec<f64>]) -> Vec<Option<usize>> {
        let n = distances.len();
        let neighbours: Vec<Vec<usize>> = (0..n)
            .map(|i| (0..n).filter(|&j| distances[i][j] <= self.eps).collect())
            .collect();
        let is_core: Vec<bool> = neighbours
            .iter()
            .map(|nb| nb.len() >= self.min_samples)
            .collect();

        let mut labels: Vec<Option<usize>> = vec![None; n];
        let mut next_label = 0;

        // Connected components over core-to-core edges
        for start in 0..n {
            if !is_core[start] || labels[start].is_some() {
                continue;
            }
            labels[start] = Some(next_label);
            let mut queue = VecDeque::from([start]);
            while let Some(point) = queue.pop_front() {
                for &other in &neighbours[point] {
                    if is_core[other] && labels[other].is_none() {
                        labels[other] = Some(next_label);
                        queue.push_back(other);
                    }
                }
            }
            next_label += 1;
        }

        // Border points follow their nearest core neighbour
        for point in 0..n {
            if is_core[point] {
                continue;
            }
            let nearest_core = neighbours[point]
                .iter()
                .copied()
                .filter(|&other| is_core[other])
                .min_by(|&a, &b| {
                    distances[point][a]
                        .total_cmp(&distances[point][b])
                        .then(a.cmp(&b))
                });
            labels[point] = nearest_core.and_then(|core| labels[core]);
        }

        labels
    }
}

/// Group point indices by cluster id, noise returned separately
pub fn group_labels(labels: &[Option<usize>]) -> (Vec<Vec<usize>>, Vec<usize>) {
    let cluster_count = labels.iter().flatten().max().map_or(0, |max| max + 1);
    let mut clusters = vec![Vec::new(); cluster_count];
    let mut noise = Vec::new();
    for (index, label) in labels.iter().enumerate() {
        match label {
            Some(cluster) => clusters[*cluster].push(index),
            None => noise.push(index),
        }
    }
    (clusters, noise)
}

/// Index (into `members`) of the point with the highest mean similarity to the
/// other members; ties resolve to the first
pub fn most_central(members: &[usize], vectors: &[Vec<f32>]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (local, &i) in members.iter().enumerate() {
        let mean = members
            .iter()
            .map(|&j| cosine_similarity(&vectors[i], &vectors[j]))
            .sum::<f64>()
            / members.len() as f64;
        match best {
            Some((_, best_mean)) if mean <= best_mean => {}
            _ => best = Some((local, mean)),
        }
    }
    best.map(|(local, _)| local)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(angle_deg: f64) -> Vec<f32> {
        let rad = angle_deg.to_radians();
        vec![rad.cos() as f32, rad.sin() as f32]
    }

    #[test]
    fn test_cosine_distance_basics() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_two_close_points_and_one_outlier() {
        // 10 degrees apart ~ distance 0.015; 90 degrees = 1.0
        let vectors = vec![unit(0.0), unit(10.0), unit(100.0)];
        let labels = Dbscan::new(0.3, 2).fit(&vectors);
        assert_eq!(labels, vec![Some(0), Some(0), None]);
    }

    #[test]
    fn test_min_samples_one_makes_every_point_a_cluster() {
        let vectors = vec![unit(0.0), unit(120.0), unit(240.0)];
        let labels = Dbscan::new(0.3, 1).fit(&vectors);
        assert_eq!(labels, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn test_chain_of_core_points_is_one_cluster() {
        // 0-30-60 degrees: neighbours within eps, ends are not
        let vectors = vec![unit(0.0), unit(30.0), unit(60.0)];
        let eps = 1.0 - 40f64.to_radians().cos();
        let labels = Dbscan::new(eps, 2).fit(&vectors);
        assert_eq!(labels, vec![Some(0), Some(0), Some(0)]);
    }

    #[test]
    fn test_border_point_joins_nearest_core() {
        // Two groups of four (mutual distance 0.1) and point 8, which only
        // reaches one member of each group and so is not core itself.
        let mut distances = vec![vec![0.9; 9]; 9];
        for i in 0..9 {
            distances[i][i] = 0.0;
        }
        for group in [0..4, 4..8] {
            for i in group.clone() {
                for j in group.clone() {
                    if i != j {
                        distances[i][j] = 0.1;
                    }
                }
            }
        }
        distances[8][3] = 0.25;
        distances[3][8] = 0.25;
        distances[8][4] = 0.2;
        distances[4][8] = 0.2;

        let labels = Dbscan::new(0.3, 4).fit_distances(&distances);
        assert_eq!(&labels[0..4], &[Some(0); 4]);
        assert_eq!(&labels[4..8], &[Some(1); 4]);
        assert_eq!(labels[8], Some(1));
    }

    #[test]
    fn test_group_labels_and_centrality() {
        let labels = vec![Some(1), None, Some(0), Some(1)];
        let (clusters, noise) = group_labels(&labels);
        assert_eq!(clusters, vec![vec![2], vec![0, 3]]);
        assert_eq!(noise, vec![1]);

        let vectors = vec![unit(0.0), unit(10.0), unit(20.0)];
        assert_eq!(most_central(&[0, 1, 2], &vectors), Some(1));
        assert_eq!(most_central(&[], &vectors), None);
    }
}
