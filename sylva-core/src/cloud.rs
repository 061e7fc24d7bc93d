use anyhow::{ensure, Result};
use nalgebra::{Vector2, Vector3};

use crate::math::AABB;

/// An immutable point cloud with columnar storage: one `Vector3<f64>` position per point and an
/// optional RGB color per point.
///
/// The algorithms never mutate a `PointCloud`. They read positions (or subsets of positions) and
/// produce label arrays or measurements that refer back to point indices.
///
/// ```
/// # use sylva_core::PointCloud;
/// # use sylva_core::nalgebra::Vector3;
/// let cloud: PointCloud = vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 2.0)]
///     .into_iter()
///     .collect();
/// assert_eq!(cloud.len(), 2);
/// assert_eq!(cloud.bounds().unwrap().height(), 2.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointCloud {
    positions: Vec<Vector3<f64>>,
    colors: Option<Vec<Vector3<u8>>>,
}

impl PointCloud {
    pub fn from_positions(positions: Vec<Vector3<f64>>) -> Self {
        Self {
            positions,
            colors: None,
        }
    }

    /// Creates a colored point cloud. Fails if the number of colors does not match the number of positions
    pub fn with_colors(positions: Vec<Vector3<f64>>, colors: Vec<Vector3<u8>>) -> Result<Self> {
        ensure!(
            positions.len() == colors.len(),
            "Got {} colors for {} positions",
            colors.len(),
            positions.len()
        );
        Ok(Self {
            positions,
            colors: Some(colors),
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    pub fn position(&self, index: usize) -> Vector3<f64> {
        self.positions[index]
    }

    pub fn colors(&self) -> Option<&[Vector3<u8>]> {
        self.colors.as_deref()
    }

    /// Horizontal (x, y) projection of all positions
    pub fn horizontal_positions(&self) -> Vec<Vector2<f64>> {
        self.positions.iter().map(|p| p.xy()).collect()
    }

    pub fn bounds(&self) -> Option<AABB> {
        AABB::from_positions(&self.positions)
    }

    /// Copies the points at `indices` (positions and colors, if any) into a new point cloud.
    ///
    /// # Panics
    ///
    /// If any index is out of bounds
    pub fn subset(&self, indices: &[usize]) -> PointCloud {
        PointCloud {
            positions: indices.iter().map(|&idx| self.positions[idx]).collect(),
            colors: self
                .colors
                .as_ref()
                .map(|colors| indices.iter().map(|&idx| colors[idx]).collect()),
        }
    }

    /// Copies all points for which `mask` is `true` into a new point cloud, together with the
    /// original indices of the copied points
    pub fn filter_by_mask(&self, mask: &[bool]) -> (PointCloud, Vec<usize>) {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(idx, keep)| keep.then_some(idx))
            .collect();
        (self.subset(&indices), indices)
    }
}

impl FromIterator<Vector3<f64>> for PointCloud {
    fn from_iter<T: IntoIterator<Item = Vector3<f64>>>(iter: T) -> Self {
        Self::from_positions(iter.into_iter().collect())
    }
}

impl From<Vec<Vector3<f64>>> for PointCloud {
    fn from(positions: Vec<Vector3<f64>>) -> Self {
        Self::from_positions(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colored_cloud() -> PointCloud {
        PointCloud::with_colors(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 1.0),
                Vector3::new(2.0, 2.0, 2.0),
            ],
            vec![
                Vector3::new(255, 0, 0),
                Vector3::new(0, 255, 0),
                Vector3::new(0, 0, 255),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_color_count_mismatch() {
        let result = PointCloud::with_colors(vec![Vector3::zeros()], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_subset_keeps_colors() {
        let cloud = colored_cloud();
        let subset = cloud.subset(&[2, 0]);
        assert_eq!(subset.positions(), &[cloud.position(2), cloud.position(0)]);
        assert_eq!(
            subset.colors().unwrap(),
            &[Vector3::new(0, 0, 255), Vector3::new(255, 0, 0)]
        );
    }

    #[test]
    fn test_filter_by_mask() {
        let cloud = colored_cloud();
        let (filtered, indices) = cloud.filter_by_mask(&[true, false, true]);
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.position(1), Vector3::new(2.0, 2.0, 2.0));
    }
}
