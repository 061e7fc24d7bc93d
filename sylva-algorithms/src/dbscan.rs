use anyhow::{ensure, Result};
use rayon::prelude::*;
use sylva_core::labels::{LabelAssignment, NOISE};
use sylva_core::nalgebra::Vector3;

pub use crate::neighbours::Projection;
use crate::neighbours::SpatialIndex;

/// Parameters of the density clustering
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DbscanParams {
    /// Neighbourhood radius
    pub eps: f64,
    /// Minimum number of other points within `eps` that make a point a core point
    pub min_samples: usize,
    /// Cluster on the horizontal projection or on full 3D positions. The horizontal projection keeps vertically
    /// fragmented stems together, but can merge overlapping crowns
    pub projection: Projection,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self {
            eps: 0.5,
            min_samples: 50,
            projection: Projection::Horizontal,
        }
    }
}

impl DbscanParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.eps.is_finite() && self.eps > 0.0,
            "eps must be a positive number, got {}",
            self.eps
        );
        Ok(())
    }
}

/// Density based clustering (DBSCAN).
///
/// A point is a core point if at least `min_samples` other points lie within `eps` of it. Core points within `eps`
/// of each other belong to the same cluster, and every non-core point within `eps` of a core point joins the cluster
/// of the first such core point that reaches it. All other points are [NOISE].
///
/// Clusters are numbered `0..n` in the order of their lowest point index, so the same input always yields the same
/// labels. Neighbourhood queries run in parallel, the cluster expansion is sequential.
///
/// # Examples
///
/// ```
/// # use sylva_core::nalgebra::Vector3;
/// # use sylva_algorithms::dbscan::{cluster_density, DbscanParams, Projection};
/// let points = vec![
///     Vector3::new(0.0, 0.0, 0.0),
///     Vector3::new(0.1, 0.0, 5.0),
///     Vector3::new(0.0, 0.1, 9.0),
///     Vector3::new(8.0, 8.0, 0.0),
/// ];
/// let params = DbscanParams { eps: 0.5, min_samples: 2, projection: Projection::Horizontal };
/// let labels = cluster_density(&points, &params).unwrap();
/// assert_eq!(labels.as_slice(), &[0, 0, 0, -1]);
/// ```
pub fn cluster_density(points: &[Vector3<f64>], params: &DbscanParams) -> Result<LabelAssignment> {
    params.validate()?;
    let index = SpatialIndex::build(points, params.projection);
    let neighbourhoods: Vec<Vec<usize>> = points
        .par_iter()
        .map(|p| index.within_radius(p, params.eps))
        .collect();
    // the neighbourhood of a point always contains the point itself
    let is_core: Vec<bool> = neighbourhoods
        .iter()
        .map(|n| n.len() > params.min_samples)
        .collect();

    let mut labels = vec![NOISE; points.len()];
    let mut next_cluster = 0;
    let mut seeds = Vec::new();
    for start in 0..points.len() {
        if labels[start] != NOISE || !is_core[start] {
            continue;
        }
        labels[start] = next_cluster;
        seeds.clear();
        seeds.push(start);
        while let Some(current) = seeds.pop() {
            for &neighbour in &neighbourhoods[current] {
                if labels[neighbour] != NOISE {
                    continue;
                }
                labels[neighbour] = next_cluster;
                if is_core[neighbour] {
                    seeds.push(neighbour);
                }
            }
        }
        next_cluster += 1;
    }

    let labels = LabelAssignment::new(labels);
    log::info!(
        "DBSCAN ({:?}, eps={}, min_samples={}): {} clusters, {} noise points",
        params.projection,
        params.eps,
        params.min_samples,
        labels.num_clusters(),
        labels.noise_count()
    );
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(center: Vector3<f64>, count: usize, spacing: f64) -> Vec<Vector3<f64>> {
        (0..count)
            .map(|i| center + Vector3::new((i % 5) as f64 * spacing, (i / 5) as f64 * spacing, 0.0))
            .collect()
    }

    #[test]
    fn test_two_blobs_and_noise() {
        let mut points = blob(Vector3::zeros(), 25, 0.1);
        points.extend(blob(Vector3::new(10.0, 0.0, 0.0), 25, 0.1));
        points.push(Vector3::new(5.0, 5.0, 0.0));
        let params = DbscanParams {
            eps: 0.25,
            min_samples: 4,
            projection: Projection::Full,
        };
        let labels = cluster_density(&points, &params).unwrap();
        assert_eq!(labels.num_clusters(), 2);
        assert!(labels.as_slice()[..25].iter().all(|&l| l == 0));
        assert!(labels.as_slice()[25..50].iter().all(|&l| l == 1));
        assert!(labels.is_noise(50));
    }

    #[test]
    fn test_min_samples_counts_other_points() {
        // three points within eps of each other: each has two other neighbours
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.1, 0.0, 0.0),
            Vector3::new(0.2, 0.0, 0.0),
        ];
        let mut params = DbscanParams {
            eps: 0.5,
            min_samples: 2,
            projection: Projection::Full,
        };
        assert_eq!(cluster_density(&points, &params).unwrap().num_clusters(), 1);
        params.min_samples = 3;
        assert_eq!(
            cluster_density(&points, &params).unwrap().noise_count(),
            3
        );
    }

    #[test]
    fn test_border_point_joins_cluster() {
        let mut points = blob(Vector3::zeros(), 10, 0.1);
        // within eps of the blob's last row but too sparse to be core
        points.push(Vector3::new(0.0, 0.28, 0.0));
        let params = DbscanParams {
            eps: 0.2,
            min_samples: 3,
            projection: Projection::Full,
        };
        let labels = cluster_density(&points, &params).unwrap();
        assert_eq!(labels.num_clusters(), 1);
        assert_eq!(labels.get(10), 0);
    }

    #[test]
    fn test_invalid_eps() {
        let params = DbscanParams {
            eps: 0.0,
            ..Default::default()
        };
        assert!(cluster_density(&[Vector3::zeros()], &params).is_err());
    }

    #[test]
    fn test_empty_input() {
        let labels = cluster_density(&[], &DbscanParams::default()).unwrap();
        assert!(labels.is_empty());
        assert_eq!(labels.num_clusters(), 0);
    }
}
