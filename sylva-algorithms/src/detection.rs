use anyhow::{ensure, Result};
use sylva_core::model::Cylinder;
use sylva_core::nalgebra::Vector3;

use crate::cylinder::{fit_cylinder, CandidateEstimator, CylinderFitParams};
use crate::normal_estimation::DEFAULT_NORMAL_NEIGHBOURS;

/// Acceptance thresholds and search parameters of [detect_cylinders]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectionParams {
    /// Minimum number of inliers of an accepted cylinder. Detection also stops once fewer points remain
    pub min_points: usize,
    /// Inlier tolerance of the cylinder fit
    pub distance_threshold: f64,
    pub min_radius: f64,
    pub max_radius: f64,
    pub min_height: f64,
    /// Maximum number of fitted cylinders (accepted or rejected)
    pub max_iterations: usize,
    /// RANSAC trials per fitted cylinder
    pub ransac_iterations: usize,
    pub estimator: CandidateEstimator,
    pub normal_neighbours: usize,
    pub seed: u64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            min_points: 50,
            distance_threshold: 0.06,
            min_radius: 0.03,
            max_radius: 0.8,
            min_height: 1.0,
            max_iterations: 100,
            ransac_iterations: 500,
            estimator: CandidateEstimator::default(),
            normal_neighbours: DEFAULT_NORMAL_NEIGHBOURS,
            seed: 42,
        }
    }
}

impl DetectionParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.min_radius >= 0.0 && self.min_radius <= self.max_radius,
            "Radius range [{}, {}] is empty",
            self.min_radius,
            self.max_radius
        );
        ensure!(
            self.min_height >= 0.0,
            "Minimum height must not be negative, got {}",
            self.min_height
        );
        ensure!(
            self.min_points >= 3,
            "A cylinder needs at least 3 points, but min_points is {}",
            self.min_points
        );
        self.fit_params(0).validate()
    }

    /// Parameters for the fit of the `iteration`-th cylinder. Candidates outside of the accepted radius range are
    /// discarded during the search
    fn fit_params(&self, iteration: usize) -> CylinderFitParams {
        CylinderFitParams {
            iterations: self.ransac_iterations,
            tolerance: self.distance_threshold,
            min_points: 3,
            estimator: self.estimator,
            normal_neighbours: self.normal_neighbours,
            radius_range: Some((self.min_radius, self.max_radius)),
            fixed_axis: None,
            seed: self.seed.wrapping_add(iteration as u64),
        }
    }

    fn rejection_reason(&self, cylinder: &Cylinder) -> Option<RejectionReason> {
        if cylinder.radius < self.min_radius || cylinder.radius > self.max_radius {
            Some(RejectionReason::RadiusOutOfRange)
        } else if cylinder.height < self.min_height {
            Some(RejectionReason::TooShort)
        } else if cylinder.inlier_count < self.min_points {
            Some(RejectionReason::TooFewInliers)
        } else {
            None
        }
    }
}

/// Why a fitted cylinder was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RejectionReason {
    RadiusOutOfRange,
    TooShort,
    TooFewInliers,
}

/// A fitted cylinder with the indices of its inliers in the input point cloud
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedCylinder {
    pub cylinder: Cylinder,
    pub inliers: Vec<usize>,
}

impl DetectedCylinder {
    /// Lowest inlier elevation
    pub fn base_elevation(&self, points: &[Vector3<f64>]) -> f64 {
        self.inliers
            .iter()
            .map(|&i| points[i].z)
            .fold(f64::INFINITY, f64::min)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedCylinder {
    pub detected: DetectedCylinder,
    pub reason: RejectionReason,
}

/// Result of [detect_cylinders]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detection {
    /// Accepted cylinders in discovery order
    pub accepted: Vec<DetectedCylinder>,
    /// Fitted but rejected cylinders in discovery order. Their inliers were removed from the search all the same
    pub rejected: Vec<RejectedCylinder>,
    /// Number of points that were never claimed by any fitted cylinder
    pub remaining: usize,
}

impl Detection {
    /// Accepted cylinders, largest diameter first
    pub fn by_diameter(&self) -> Vec<&DetectedCylinder> {
        let mut sorted: Vec<_> = self.accepted.iter().collect();
        sorted.sort_by(|a, b| b.cylinder.radius.total_cmp(&a.cylinder.radius));
        sorted
    }
}

/// Finds multiple cylinders (e.g. tree stems) in an unsegmented point cloud.
///
/// Repeatedly fits one cylinder to all points that are still unclaimed. An accepted cylinder has its radius in
/// `[min_radius, max_radius]`, a height of at least `min_height` and at least `min_points` inliers. The inliers of
/// every fitted cylinder are removed from the search, whether it is accepted or not. Detection stops after
/// `max_iterations` fits, once fewer than `min_points` points remain, when a fit fails or when a fit claims no
/// point at all.
///
/// `progress` receives human readable progress messages. A no-op closure is fine.
///
/// # Errors
///
/// If the parameters are invalid (e.g. `min_radius > max_radius`). Nothing is computed in that case
pub fn detect_cylinders<F: FnMut(&str)>(
    points: &[Vector3<f64>],
    params: &DetectionParams,
    mut progress: F,
) -> Result<Detection> {
    params.validate()?;

    let mut remaining = vec![true; points.len()];
    let mut remaining_count = points.len();
    let mut detection = Detection::default();
    progress(&format!("Point cloud has {} points", points.len()));

    for iteration in 0..params.max_iterations {
        if remaining_count < params.min_points {
            log::debug!(
                "Stopping cylinder detection, only {} points remain",
                remaining_count
            );
            break;
        }

        let indices: Vec<usize> = (0..points.len()).filter(|&i| remaining[i]).collect();
        let subset: Vec<Vector3<f64>> = indices.iter().map(|&i| points[i]).collect();
        let fit = match fit_cylinder(&subset, &params.fit_params(iteration))? {
            Ok(fit) => fit,
            Err(reason) => {
                log::debug!("Stopping cylinder detection: {}", reason);
                progress(&format!("No further cylinder found ({})", reason));
                break;
            }
        };

        let inliers: Vec<usize> = fit.inliers.iter().map(|&i| indices[i]).collect();
        if inliers.is_empty() {
            log::warn!("Fitted cylinder has no inliers, stopping detection");
            break;
        }
        for &i in &inliers {
            remaining[i] = false;
        }
        remaining_count -= inliers.len();

        let detected = DetectedCylinder {
            cylinder: fit.cylinder,
            inliers,
        };
        let cylinder = &detected.cylinder;
        match params.rejection_reason(cylinder) {
            None => {
                progress(&format!(
                    "Cylinder #{}: r={:.3}m, d={:.1}cm, h={:.2}m, {} points",
                    detection.accepted.len() + 1,
                    cylinder.radius,
                    cylinder.diameter_cm(),
                    cylinder.height,
                    cylinder.inlier_count
                ));
                detection.accepted.push(detected);
            }
            Some(reason) => {
                log::debug!(
                    "Rejected cylinder r={:.3}m h={:.2}m with {} points: {:?}",
                    cylinder.radius,
                    cylinder.height,
                    cylinder.inlier_count,
                    reason
                );
                detection.rejected.push(RejectedCylinder { detected, reason });
            }
        }
    }

    detection.remaining = remaining_count;
    log::info!(
        "Detected {} cylinders ({} rejected, {} points unclaimed)",
        detection.accepted.len(),
        detection.rejected.len(),
        detection.remaining
    );
    progress(&format!(
        "Detection finished: {} cylinders",
        detection.accepted.len()
    ));
    Ok(detection)
}
