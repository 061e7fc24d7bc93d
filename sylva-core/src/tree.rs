use nalgebra::Vector2;

/// Summary statistics of one cluster of a label assignment
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterSummary {
    pub label: i32,
    pub point_count: usize,
    /// Horizontal centroid
    pub center: Vector2<f64>,
    pub z_min: f64,
    pub z_max: f64,
}

impl ClusterSummary {
    /// Vertical extent of the cluster
    pub fn height(&self) -> f64 {
        self.z_max - self.z_min
    }
}

/// One row of the tree inventory
///
/// `raw_height` is the height as measured from the points (or the fitted cylinder). `corrected_height` starts out
/// equal to `raw_height` and is only ever rewritten by the slenderness correction, so the raw value stays available.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeRecord {
    pub id: usize,
    /// Horizontal position
    pub position: Vector2<f64>,
    pub base_elevation: f64,
    pub point_count: usize,
    pub raw_height: f64,
    pub corrected_height: f64,
    /// Diameter at breast height in centimeters, `None` if no stem could be measured
    pub dbh_cm: Option<f64>,
}

impl TreeRecord {
    pub fn new(
        id: usize,
        position: Vector2<f64>,
        base_elevation: f64,
        point_count: usize,
        raw_height: f64,
        dbh_cm: Option<f64>,
    ) -> Self {
        Self {
            id,
            position,
            base_elevation,
            point_count,
            raw_height,
            corrected_height: raw_height,
            dbh_cm,
        }
    }

    /// Builds a record from a cluster summary, using the cluster's horizontal centroid and vertical extent
    pub fn from_summary(id: usize, summary: &ClusterSummary, dbh_cm: Option<f64>) -> Self {
        Self::new(
            id,
            summary.center,
            summary.z_min,
            summary.point_count,
            summary.height(),
            dbh_cm,
        )
    }

    /// Was the height changed by the slenderness correction?
    pub fn is_height_corrected(&self) -> bool {
        self.corrected_height != self.raw_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_summary() {
        let summary = ClusterSummary {
            label: 4,
            point_count: 120,
            center: Vector2::new(3.0, -2.0),
            z_min: 101.5,
            z_max: 119.0,
        };
        let record = TreeRecord::from_summary(1, &summary, Some(25.0));
        assert_eq!(record.raw_height, 17.5);
        assert_eq!(record.corrected_height, 17.5);
        assert_eq!(record.base_elevation, 101.5);
        assert!(!record.is_height_corrected());
    }
}
