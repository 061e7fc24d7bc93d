use anyhow::{ensure, Result};
use rayon::prelude::*;
use sylva_core::labels::LabelAssignment;
use sylva_core::nalgebra::{Vector2, Vector3};
use sylva_core::tree::{ClusterSummary, TreeRecord};
use sylva_core::PointCloud;

use crate::circle::fit_circle_2d;
use crate::cylinder::{fit_cylinder, CylinderFitParams};
use crate::detection::Detection;

/// Per-cluster summaries (point count, horizontal centroid, vertical extent), ordered by label. Noise is skipped
///
/// # Errors
///
/// If `labels` does not have exactly one label per point
pub fn summarize_clusters(
    cloud: &PointCloud,
    labels: &LabelAssignment,
) -> Result<Vec<ClusterSummary>> {
    ensure!(
        labels.len() == cloud.len(),
        "Got {} labels for {} points",
        labels.len(),
        cloud.len()
    );
    Ok(labels
        .cluster_indices()
        .into_iter()
        .map(|(label, indices)| summarize(label, cloud.positions(), &indices))
        .collect())
}

fn summarize(label: i32, positions: &[Vector3<f64>], indices: &[usize]) -> ClusterSummary {
    let mut center = Vector2::zeros();
    let mut z_min = f64::INFINITY;
    let mut z_max = f64::NEG_INFINITY;
    for &index in indices {
        let p = &positions[index];
        center += p.xy();
        z_min = z_min.min(p.z);
        z_max = z_max.max(p.z);
    }
    ClusterSummary {
        label,
        point_count: indices.len(),
        center: center / indices.len().max(1) as f64,
        z_min,
        z_max,
    }
}

/// All points within `thickness / 2` of `breast_height` above the lowest point
pub fn extract_breast_height_slice(
    points: &[Vector3<f64>],
    breast_height: f64,
    thickness: f64,
) -> Vec<Vector3<f64>> {
    let z_min = points.iter().map(|p| p.z).fold(f64::INFINITY, f64::min);
    let center = z_min + breast_height;
    let half = thickness / 2.0;
    points
        .iter()
        .filter(|p| (p.z - center).abs() <= half)
        .copied()
        .collect()
}

/// How the stem diameter is measured in the breast height slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DbhMethod {
    /// Algebraic circle fit of the horizontal positions
    #[default]
    Circle,
    /// RANSAC fit of an upright cylinder to the slice
    Cylinder,
}

/// Parameters of [measure_dbh]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BreastHeightParams {
    /// Height of the measurement above the lowest point of the tree
    pub breast_height: f64,
    pub thickness: f64,
    /// Slices with fewer points are not measured
    pub min_slice_points: usize,
    /// Measured radii outside of `[min_radius, max_radius]` are discarded
    pub min_radius: f64,
    pub max_radius: f64,
    pub method: DbhMethod,
    /// Fitter parameters for [DbhMethod::Cylinder]
    pub cylinder: CylinderFitParams,
}

impl Default for BreastHeightParams {
    fn default() -> Self {
        Self {
            breast_height: 1.3,
            thickness: 0.1,
            min_slice_points: 10,
            min_radius: 0.01,
            max_radius: 1.5,
            method: DbhMethod::default(),
            cylinder: CylinderFitParams {
                iterations: 500,
                tolerance: 0.02,
                // a slice is too short to estimate the stem axis from
                fixed_axis: Some(Vector3::z()),
                ..Default::default()
            },
        }
    }
}

impl BreastHeightParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.thickness.is_finite() && self.thickness > 0.0,
            "Slice thickness must be a positive number, got {}",
            self.thickness
        );
        ensure!(
            self.min_radius >= 0.0 && self.min_radius <= self.max_radius,
            "Radius range [{}, {}] is empty",
            self.min_radius,
            self.max_radius
        );
        ensure!(
            self.min_slice_points >= 3,
            "A diameter needs at least 3 slice points, but min_slice_points is {}",
            self.min_slice_points
        );
        if self.method == DbhMethod::Cylinder {
            self.cylinder.validate()?;
        }
        Ok(())
    }
}

/// Diameter at breast height of a single tree
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DbhMeasurement {
    pub dbh_cm: f64,
    /// Horizontal stem center at breast height
    pub center: Vector2<f64>,
    pub slice_points: usize,
}

/// Measures the stem diameter of one tree in a thin horizontal slice at breast height. Returns `None` if the slice
/// has too few points, the fit fails or the radius is implausible
///
/// # Errors
///
/// If the parameters are invalid
pub fn measure_dbh(
    points: &[Vector3<f64>],
    params: &BreastHeightParams,
) -> Result<Option<DbhMeasurement>> {
    params.validate()?;
    let slice = extract_breast_height_slice(points, params.breast_height, params.thickness);
    if slice.len() < params.min_slice_points {
        log::debug!(
            "Breast height slice has only {} points, need {}",
            slice.len(),
            params.min_slice_points
        );
        return Ok(None);
    }

    let fitted = match params.method {
        DbhMethod::Circle => {
            let horizontal: Vec<Vector2<f64>> = slice.iter().map(|p| p.xy()).collect();
            fit_circle_2d(&horizontal).map(|circle| (circle.center, circle.radius))
        }
        DbhMethod::Cylinder => {
            let cylinder_params = CylinderFitParams {
                radius_range: params
                    .cylinder
                    .radius_range
                    .or(Some((params.min_radius, params.max_radius))),
                ..params.cylinder.clone()
            };
            fit_cylinder(&slice, &cylinder_params)?
                .map(|fit| (fit.cylinder.center.xy(), fit.cylinder.radius))
        }
    };
    let (center, radius) = match fitted {
        Ok(fitted) => fitted,
        Err(reason) => {
            log::debug!("No stem at breast height: {}", reason);
            return Ok(None);
        }
    };
    if radius < params.min_radius || radius > params.max_radius {
        log::debug!("Discarding implausible breast height radius {:.3}m", radius);
        return Ok(None);
    }
    Ok(Some(DbhMeasurement {
        dbh_cm: radius * 200.0,
        center,
        slice_points: slice.len(),
    }))
}

/// One tree record per cluster, with the DBH measured at breast height. Record ids follow the cluster order
pub fn records_from_clusters(
    cloud: &PointCloud,
    labels: &LabelAssignment,
    params: &BreastHeightParams,
) -> Result<Vec<TreeRecord>> {
    params.validate()?;
    ensure!(
        labels.len() == cloud.len(),
        "Got {} labels for {} points",
        labels.len(),
        cloud.len()
    );
    let clusters: Vec<(i32, Vec<usize>)> = labels.cluster_indices().into_iter().collect();
    clusters
        .par_iter()
        .enumerate()
        .map(|(id, (label, indices))| -> Result<TreeRecord> {
            let summary = summarize(*label, cloud.positions(), indices);
            let points = cloud.subset(indices);
            let dbh = measure_dbh(points.positions(), params)?;
            Ok(TreeRecord::from_summary(
                id,
                &summary,
                dbh.map(|m| m.dbh_cm),
            ))
        })
        .collect()
}

/// One tree record per accepted cylinder: position from the cylinder center, base from the lowest inlier, height
/// and diameter from the cylinder
pub fn records_from_cylinders(points: &[Vector3<f64>], detection: &Detection) -> Vec<TreeRecord> {
    detection
        .accepted
        .iter()
        .enumerate()
        .map(|(id, detected)| {
            let cylinder = &detected.cylinder;
            TreeRecord::new(
                id,
                cylinder.center.xy(),
                detected.base_elevation(points),
                detected.inliers.len(),
                cylinder.height,
                Some(cylinder.diameter_cm()),
            )
        })
        .collect()
}

/// Plausibility rules for tree records. Rules about the diameter only apply to records that have one
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecordFilter {
    pub min_dbh_cm: f64,
    pub max_dbh_cm: f64,
    pub min_points: usize,
    pub min_height: f64,
    pub max_height: f64,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            min_dbh_cm: 5.0,
            max_dbh_cm: 100.0,
            min_points: 30,
            min_height: 1.0,
            max_height: 80.0,
        }
    }
}

/// How many records each rule of a [RecordFilter] removed. A record is counted for the first rule it fails, in
/// field order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterReport {
    pub kept: usize,
    pub dbh_too_small: usize,
    pub dbh_too_large: usize,
    pub too_few_points: usize,
    pub height_out_of_range: usize,
}

impl FilterReport {
    pub fn removed(&self) -> usize {
        self.dbh_too_small + self.dbh_too_large + self.too_few_points + self.height_out_of_range
    }
}

impl RecordFilter {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.min_dbh_cm <= self.max_dbh_cm,
            "DBH range [{}, {}] is empty",
            self.min_dbh_cm,
            self.max_dbh_cm
        );
        ensure!(
            self.min_height <= self.max_height,
            "Height range [{}, {}] is empty",
            self.min_height,
            self.max_height
        );
        Ok(())
    }

    /// Keeps the records that pass all rules, in their original order
    pub fn apply(&self, records: Vec<TreeRecord>) -> Result<(Vec<TreeRecord>, FilterReport)> {
        self.validate()?;
        let mut report = FilterReport::default();
        let kept: Vec<TreeRecord> = records
            .into_iter()
            .filter(|record| {
                let counter = match record.dbh_cm {
                    Some(dbh) if dbh < self.min_dbh_cm => Some(&mut report.dbh_too_small),
                    Some(dbh) if dbh > self.max_dbh_cm => Some(&mut report.dbh_too_large),
                    _ if record.point_count < self.min_points => Some(&mut report.too_few_points),
                    _ if record.raw_height < self.min_height || record.raw_height > self.max_height => {
                        Some(&mut report.height_out_of_range)
                    }
                    _ => None,
                };
                match counter {
                    Some(counter) => {
                        *counter += 1;
                        false
                    }
                    None => true,
                }
            })
            .collect();
        report.kept = kept.len();
        log::info!(
            "Record cleaning kept {} of {} records ({:?})",
            report.kept,
            report.kept + report.removed(),
            report
        );
        Ok((kept, report))
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;

    /// Stem of radius `radius` around (x, y), 8 points per 4 cm layer from `z0` to `z0 + height`. Breast height
    /// (1.3 m above the base) falls between two layers, 2 cm from each
    fn stem(x: f64, y: f64, z0: f64, radius: f64, height: f64) -> Vec<Vector3<f64>> {
        let layers = (height / 0.04).round() as usize + 1;
        (0..layers)
            .flat_map(|layer| {
                (0..8).map(move |i| {
                    let angle = i as f64 * std::f64::consts::FRAC_PI_4 + layer as f64 * 0.3;
                    Vector3::new(
                        x + radius * angle.cos(),
                        y + radius * angle.sin(),
                        z0 + layer as f64 * 0.04,
                    )
                })
            })
            .collect()
    }

    #[test]
    fn test_summaries_skip_noise() {
        let cloud = PointCloud::from_positions(vec![
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(2.0, 0.0, 3.0),
            Vector3::new(9.0, 9.0, 9.0),
        ]);
        let labels = LabelAssignment::new(vec![0, 0, -1]);
        let summaries = summarize_clusters(&cloud, &labels).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].point_count, 2);
        assert_eq!(summaries[0].center, Vector2::new(1.0, 0.0));
        assert_eq!(summaries[0].height(), 2.0);
        assert!(summarize_clusters(&cloud, &LabelAssignment::new(vec![0])).is_err());
    }

    #[test]
    fn test_slice_is_relative_to_lowest_point() {
        let points = vec![
            Vector3::new(0.0, 0.0, 100.0),
            Vector3::new(0.0, 0.0, 101.3),
            Vector3::new(0.0, 0.0, 101.36),
        ];
        let slice = extract_breast_height_slice(&points, 1.3, 0.1);
        assert_eq!(slice, vec![points[1]]);
    }

    #[test]
    fn test_measure_dbh_with_both_methods() {
        let points = stem(3.0, -2.0, 50.0, 0.2, 3.0);
        let circle = measure_dbh(&points, &BreastHeightParams::default())
            .unwrap()
            .unwrap();
        assert_approx_eq!(circle.dbh_cm, 40.0, 1e-6);
        assert_approx_eq!(circle.center.x, 3.0, 1e-6);

        let params = BreastHeightParams {
            method: DbhMethod::Cylinder,
            ..Default::default()
        };
        let cylinder = measure_dbh(&points, &params).unwrap().unwrap();
        assert_approx_eq!(cylinder.dbh_cm, 40.0, 1e-6);
        assert_approx_eq!(cylinder.center.x, 3.0, 1e-6);
        assert_approx_eq!(cylinder.center.y, -2.0, 1e-6);
        assert_eq!(cylinder.slice_points, 16);
    }

    #[test]
    fn test_measure_dbh_rejects_sparse_and_implausible_slices() {
        let sparse = vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.1, 0.0, 1.3)];
        assert_eq!(measure_dbh(&sparse, &BreastHeightParams::default()).unwrap(), None);

        let huge = stem(0.0, 0.0, 0.0, 3.0, 2.0);
        assert_eq!(measure_dbh(&huge, &BreastHeightParams::default()).unwrap(), None);
    }

    #[test]
    fn test_records_from_clusters() {
        let mut positions = stem(0.0, 0.0, 0.0, 0.15, 5.0);
        let first = positions.len();
        positions.extend(stem(6.0, 0.0, 0.5, 0.25, 8.0));
        let labels: Vec<i32> = (0..positions.len())
            .map(|i| if i < first { 0 } else { 1 })
            .collect();
        let cloud = PointCloud::from_positions(positions);
        let records = records_from_clusters(
            &cloud,
            &LabelAssignment::new(labels),
            &BreastHeightParams::default(),
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.dbh_cm.is_some()), "{:?}", records);
        assert_approx_eq!(records[0].dbh_cm.unwrap(), 30.0, 1e-6);
        assert_approx_eq!(records[1].dbh_cm.unwrap(), 50.0, 1e-6);
        assert_approx_eq!(records[1].base_elevation, 0.5);
        assert_approx_eq!(records[1].raw_height, 8.0, 0.06);
        assert_eq!(records[1].raw_height, records[1].corrected_height);
    }

    #[test]
    fn test_record_filter_counts_first_failing_rule() {
        let record = |dbh: Option<f64>, points: usize, height: f64| {
            TreeRecord::new(0, Vector2::zeros(), 0.0, points, height, dbh)
        };
        let records = vec![
            record(Some(30.0), 100, 20.0),
            record(Some(2.0), 10, 20.0),
            record(Some(150.0), 100, 20.0),
            record(Some(30.0), 10, 20.0),
            record(Some(30.0), 100, 95.0),
            record(None, 100, 20.0),
        ];
        let (kept, report) = RecordFilter::default().apply(records).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(
            report,
            FilterReport {
                kept: 2,
                dbh_too_small: 1,
                dbh_too_large: 1,
                too_few_points: 1,
                height_out_of_range: 1,
            }
        );
        assert_eq!(report.removed(), 4);
    }
}
