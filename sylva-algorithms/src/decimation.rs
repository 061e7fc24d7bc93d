use std::collections::BTreeMap;

use anyhow::{ensure, Result};
use sylva_core::labels::LabelAssignment;
use sylva_core::nalgebra::Vector3;

/// Result of [decimate]: one representative point per occupied grid cell plus the cell of every original point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimation {
    /// Index (into the original points) of the representative of every cell. Cells are ordered by their grid
    /// coordinates (x, then y, then z), the representative is the lowest point index in the cell
    pub representatives: Vec<usize>,
    /// Cell of every original point, as an index into `representatives`
    pub inverse: Vec<usize>,
}

impl Decimation {
    pub fn cell_count(&self) -> usize {
        self.representatives.len()
    }

    pub fn representative_positions(&self, points: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        self.representatives.iter().map(|&i| points[i]).collect()
    }

    /// Maps one label per cell back to all original points
    ///
    /// # Panics
    ///
    /// If `cell_labels` does not have exactly one label per cell
    pub fn broadcast(&self, cell_labels: &LabelAssignment) -> LabelAssignment {
        assert_eq!(
            cell_labels.len(),
            self.cell_count(),
            "Decimation::broadcast: need one label per cell"
        );
        LabelAssignment::new(
            self.inverse
                .iter()
                .map(|&cell| cell_labels.get(cell))
                .collect(),
        )
    }
}

/// Down-samples `points` on a regular 3D grid with cell size `resolution`, keeping one representative per occupied
/// cell. Grid cells are `floor(p / resolution)`, anchored at the origin.
///
/// # Errors
///
/// If `resolution` is not a positive number
///
/// # Examples
///
/// ```
/// # use sylva_core::nalgebra::Vector3;
/// # use sylva_algorithms::decimation::decimate;
/// let points = vec![
///     Vector3::new(0.01, 0.01, 0.01),
///     Vector3::new(0.5, 0.5, 0.5),
///     Vector3::new(0.02, 0.03, 0.04),
/// ];
/// let decimation = decimate(&points, 0.1).unwrap();
/// assert_eq!(decimation.representatives, vec![0, 1]);
/// assert_eq!(decimation.inverse, vec![0, 1, 0]);
/// ```
pub fn decimate(points: &[Vector3<f64>], resolution: f64) -> Result<Decimation> {
    ensure!(
        resolution.is_finite() && resolution > 0.0,
        "Decimation resolution must be a positive number, got {}",
        resolution
    );

    let cell_of = |p: &Vector3<f64>| -> [i64; 3] {
        [
            (p.x / resolution).floor() as i64,
            (p.y / resolution).floor() as i64,
            (p.z / resolution).floor() as i64,
        ]
    };

    let mut first_in_cell: BTreeMap<[i64; 3], usize> = BTreeMap::new();
    for (index, point) in points.iter().enumerate() {
        first_in_cell.entry(cell_of(point)).or_insert(index);
    }

    let mut cell_ids: BTreeMap<[i64; 3], usize> = BTreeMap::new();
    let mut representatives = Vec::with_capacity(first_in_cell.len());
    for (cell_id, (key, first)) in first_in_cell.into_iter().enumerate() {
        cell_ids.insert(key, cell_id);
        representatives.push(first);
    }
    let inverse = points.iter().map(|p| cell_ids[&cell_of(p)]).collect();

    log::debug!(
        "Decimated {} points to {} cells at resolution {}",
        points.len(),
        representatives.len(),
        resolution
    );
    Ok(Decimation {
        representatives,
        inverse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_coordinates_use_floor() {
        let points = vec![
            Vector3::new(-0.05, 0.0, 0.0),
            Vector3::new(0.05, 0.0, 0.0),
            Vector3::new(-0.01, 0.09, 0.0),
        ];
        let decimation = decimate(&points, 0.1).unwrap();
        assert_eq!(decimation.cell_count(), 2);
        assert_eq!(decimation.inverse[0], decimation.inverse[2]);
        assert_ne!(decimation.inverse[0], decimation.inverse[1]);
    }

    #[test]
    fn test_broadcast() {
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(5.0, 0.0, 0.0),
            Vector3::new(0.01, 0.0, 0.0),
            Vector3::new(5.01, 0.0, 0.0),
        ];
        let decimation = decimate(&points, 1.0).unwrap();
        let labels = decimation.broadcast(&LabelAssignment::new(vec![7, 3]));
        assert_eq!(labels.as_slice(), &[7, 3, 7, 3]);
    }

    #[test]
    fn test_invalid_resolution() {
        assert!(decimate(&[Vector3::zeros()], 0.0).is_err());
        assert!(decimate(&[Vector3::zeros()], f64::NAN).is_err());
    }
}
