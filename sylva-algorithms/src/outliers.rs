use anyhow::{ensure, Result};
use rayon::prelude::*;
use sylva_core::math::mean_and_std;
use sylva_core::nalgebra::Vector3;

use crate::neighbours::{Projection, SpatialIndex};

/// Parameters of the statistical outlier removal
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutlierFilterParams {
    /// Number of neighbours (not counting the point itself) whose mean distance is tested
    pub neighbours: usize,
    /// A point is an outlier if its mean neighbour distance exceeds the dataset mean by more than this many standard
    /// deviations
    pub std_ratio: f64,
}

impl Default for OutlierFilterParams {
    fn default() -> Self {
        Self {
            neighbours: 20,
            std_ratio: 2.0,
        }
    }
}

impl OutlierFilterParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.neighbours > 0,
            "Outlier removal needs at least one neighbour"
        );
        ensure!(
            self.std_ratio.is_finite() && self.std_ratio >= 0.0,
            "std_ratio must be a non-negative number, got {}",
            self.std_ratio
        );
        Ok(())
    }
}

/// Mean distance of every point to its `k` nearest neighbours, the point itself excluded. Points without any
/// neighbour get a mean distance of zero
pub fn mean_neighbour_distances(points: &[Vector3<f64>], k: usize) -> Vec<f64> {
    let index = SpatialIndex::build(points, Projection::Full);
    points
        .par_iter()
        .enumerate()
        .map(|(own_index, p)| {
            let distances: Vec<f64> = index
                .nearest_k(p, k + 1)
                .into_iter()
                .filter(|n| n.index != own_index)
                .take(k)
                .map(|n| n.distance)
                .collect();
            if distances.is_empty() {
                0.0
            } else {
                distances.iter().sum::<f64>() / distances.len() as f64
            }
        })
        .collect()
}

/// Statistical outlier removal. Returns a mask that is `true` for every point to keep.
///
/// Computes the mean distance of each point to its `neighbours` nearest neighbours, then the mean `μ` and the sample
/// standard deviation `σ` of these values over the whole dataset. Points whose mean distance exceeds
/// `μ + std_ratio·σ` are outliers.
pub fn statistical_outlier_mask(
    points: &[Vector3<f64>],
    params: &OutlierFilterParams,
) -> Result<Vec<bool>> {
    params.validate()?;
    let mean_distances = mean_neighbour_distances(points, params.neighbours);
    let Some((mean, std)) = mean_and_std(&mean_distances) else {
        return Ok(vec![]);
    };
    let threshold = mean + params.std_ratio * std;
    let mask: Vec<bool> = mean_distances.iter().map(|&d| d <= threshold).collect();
    log::info!(
        "Statistical outlier removal (k={}, std_ratio={}): removed {} of {} points",
        params.neighbours,
        params.std_ratio,
        mask.iter().filter(|keep| !**keep).count(),
        points.len()
    );
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolated_point_is_removed() {
        let mut points: Vec<_> = (0..100)
            .map(|i| Vector3::new((i % 10) as f64 * 0.1, (i / 10) as f64 * 0.1, 0.0))
            .collect();
        points.push(Vector3::new(20.0, 20.0, 20.0));
        let mask = statistical_outlier_mask(&points, &OutlierFilterParams::default()).unwrap();
        assert!(!mask[100]);
        assert!(mask[..100].iter().all(|&keep| keep));
    }

    #[test]
    fn test_mean_distances_exclude_self() {
        let points = vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(3.0, 0.0, 0.0)];
        let distances = mean_neighbour_distances(&points, 1);
        assert_eq!(distances, vec![3.0, 3.0]);
    }

    #[test]
    fn test_invalid_parameters() {
        let params = OutlierFilterParams {
            neighbours: 0,
            ..Default::default()
        };
        assert!(statistical_outlier_mask(&[Vector3::zeros()], &params).is_err());
    }
}
