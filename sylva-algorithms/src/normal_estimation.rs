// The normal estimation algorithm is inspired by the PCL library (https://pointclouds.org/)
use anyhow::{ensure, Result};
use sylva_core::math::{centroid, covariance_matrix, principal_axes};
use sylva_core::nalgebra::Vector3;

use crate::neighbours::{Projection, SpatialIndex};

/// Default neighbourhood size for normal estimation
pub const DEFAULT_NORMAL_NEIGHBOURS: usize = 20;

/// Surface normal and curvature of one point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceNormal {
    /// Unit normal vector, or all NaN if the neighbourhood did not span a plane
    pub normal: Vector3<f64>,
    /// Surface variation `λ_min / (λ_0 + λ_1 + λ_2)`, between 0 (flat) and 1/3 (isotropic)
    pub curvature: f64,
}

impl SurfaceNormal {
    fn undefined() -> Self {
        Self {
            normal: Vector3::repeat(f64::NAN),
            curvature: f64::NAN,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.normal.iter().all(|c| c.is_finite())
    }
}

/// Normal Estimation Algorithm
/// returns one [SurfaceNormal] per position, in the same order as `positions`.
/// For every point, the `k_nn` nearest neighbours (the point itself included) are gathered with a kd-tree, and the
/// normal is the eigenvector of the smallest eigenvalue of the neighbourhood's covariance matrix.
/// Neighbourhoods with less than 3 finite positions get an undefined (NaN) normal.
///
/// # Errors
///
/// If `k_nn` is less than 3 or there are less than 3 positions
///
/// # Examples
///
/// ```
/// # use sylva_core::nalgebra::Vector3;
/// # use sylva_algorithms::normal_estimation::compute_normals;
/// let positions = vec![
///     Vector3::new(0.0, 0.0, 0.0),
///     Vector3::new(1.0, 0.0, 0.0),
///     Vector3::new(0.0, 1.0, 0.0),
///     Vector3::new(1.0, 1.0, 0.0),
/// ];
/// let normals = compute_normals(&positions, 4).unwrap();
/// assert!((normals[0].normal.z.abs() - 1.0).abs() < 1e-9);
/// ```
pub fn compute_normals(positions: &[Vector3<f64>], k_nn: usize) -> Result<Vec<SurfaceNormal>> {
    ensure!(
        positions.len() >= 3,
        "The point cloud is too small. Please use a point cloud that has 3 or more points!"
    );
    ensure!(k_nn >= 3, "The k nearest neighbours attribute is too small!");

    let index = SpatialIndex::build(positions, Projection::Full);
    let normals = positions
        .iter()
        .map(|position| {
            let neighbourhood: Vec<Vector3<f64>> = index
                .nearest_k(position, k_nn)
                .into_iter()
                .map(|neighbour| positions[neighbour.index])
                .filter(|p| p.iter().all(|c| c.is_finite()))
                .collect();
            normal_of(&neighbourhood)
        })
        .collect();
    Ok(normals)
}

/// Normal and curvature of the plane that best fits `neighbourhood`
pub fn normal_of(neighbourhood: &[Vector3<f64>]) -> SurfaceNormal {
    if neighbourhood.len() < 3 {
        return SurfaceNormal::undefined();
    }
    let Some(center) = centroid(neighbourhood) else {
        return SurfaceNormal::undefined();
    };
    let Some(axes) = principal_axes(&covariance_matrix(&center, neighbourhood)) else {
        return SurfaceNormal::undefined();
    };
    let variation: f64 = axes.values.iter().sum();
    let curvature = if variation > 0.0 {
        axes.values[2].max(0.0) / variation
    } else {
        0.0
    };
    SurfaceNormal {
        normal: axes.minor(),
        curvature,
    }
}
