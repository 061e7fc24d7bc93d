use nalgebra::{Point3, Vector3};

/// 3D axis-aligned bounding box of a point set
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AABB {
    min: Point3<f64>,
    max: Point3<f64>,
}

impl AABB {
    fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Computes the tightest AABB around the given positions. Returns `None` if `positions` is empty
    /// ```
    /// # use sylva_core::math::AABB;
    /// # use sylva_core::nalgebra::{Point3, Vector3};
    /// let positions = vec![Vector3::new(1.0, -2.0, 0.5), Vector3::new(-1.0, 2.0, 3.0)];
    /// let bounds = AABB::from_positions(&positions).unwrap();
    /// assert_eq!(*bounds.min(), Point3::new(-1.0, -2.0, 0.5));
    /// assert_eq!(*bounds.max(), Point3::new(1.0, 2.0, 3.0));
    /// ```
    pub fn from_positions(positions: &[Vector3<f64>]) -> Option<Self> {
        let (first, rest) = positions.split_first()?;
        let start = Self::new(Point3::from(*first), Point3::from(*first));
        Some(rest.iter().fold(start, |bounds, position| {
            bounds.extend_with_point(&Point3::from(*position))
        }))
    }

    /// Returns the minimum point of this AABB
    pub fn min(&self) -> &Point3<f64> {
        &self.min
    }

    /// Returns the maximum point of this AABB
    pub fn max(&self) -> &Point3<f64> {
        &self.max
    }

    /// Returns the extent of this AABB. The extent is the size between the minimum and maximum position of this AABB
    /// ```
    /// # use sylva_core::math::AABB;
    /// # use sylva_core::nalgebra::Vector3;
    /// let bounds = AABB::from_positions(&[Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 2.0, 3.0)]).unwrap();
    /// assert_eq!(bounds.extent(), Vector3::new(1.0, 2.0, 3.0));
    /// ```
    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Vertical extent (max z - min z)
    pub fn height(&self) -> f64 {
        self.max.z - self.min.z
    }

    /// Returns a copy of this AABB that is extended so that it contains the given point
    pub fn extend_with_point(&self, point: &Point3<f64>) -> AABB {
        Self {
            min: Point3::new(
                self.min.x.min(point.x),
                self.min.y.min(point.y),
                self.min.z.min(point.z),
            ),
            max: Point3::new(
                self.max.x.max(point.x),
                self.max.y.max(point.y),
                self.max.z.max(point.z),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_positions_empty() {
        assert!(AABB::from_positions(&[]).is_none());
    }

    #[test]
    fn test_height_and_extent() {
        let positions = vec![
            Vector3::new(0.0, 0.0, 2.0),
            Vector3::new(1.0, 1.0, 12.5),
            Vector3::new(0.5, -1.0, 4.0),
        ];
        let bounds = AABB::from_positions(&positions).unwrap();
        assert_eq!(bounds.height(), 10.5);
        assert_eq!(bounds.extent(), Vector3::new(1.0, 2.0, 10.5));
        assert_eq!(*bounds.min(), Point3::new(0.0, -1.0, 2.0));
    }
}
