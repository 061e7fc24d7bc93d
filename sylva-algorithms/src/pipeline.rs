use anyhow::Result;
use sylva_core::labels::LabelAssignment;
use sylva_core::tree::TreeRecord;
use sylva_core::PointCloud;

use crate::height::{apply_height_correction, SlendernessParams};
use crate::records::{records_from_clusters, BreastHeightParams, FilterReport, RecordFilter};
use crate::segmenter::SegmenterConfig;

/// Parameters of [run_inventory]
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InventoryParams {
    pub segmenter: SegmenterConfig,
    pub breast_height: BreastHeightParams,
    /// Plausibility filter applied before the height correction. `None` keeps all records
    pub filter: Option<RecordFilter>,
    pub slenderness: SlendernessParams,
}

impl InventoryParams {
    pub fn validate(&self) -> Result<()> {
        self.segmenter.validate()?;
        self.breast_height.validate()?;
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        self.slenderness.validate()
    }
}

/// Result of [run_inventory]
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    /// Segmentation of the input points
    pub labels: LabelAssignment,
    /// Final tree records. Ids are the cluster order of the segmentation and stay stable through the filtering
    pub records: Vec<TreeRecord>,
    pub filter_report: Option<FilterReport>,
    /// Number of records whose height was replaced by the slenderness correction
    pub corrected_heights: usize,
}

/// Runs the whole tree inventory on a point cloud: segmentation into trees, one record per tree with the DBH
/// measured at breast height, record cleaning and finally the slenderness height correction.
///
/// All parameters are validated before anything is computed
pub fn run_inventory(cloud: &PointCloud, params: &InventoryParams) -> Result<Inventory> {
    params.validate()?;
    let segmenter = params.segmenter.build();
    log::info!(
        "Running tree inventory on {} points with segmenter '{}'",
        cloud.len(),
        segmenter.name()
    );
    if let Some(bounds) = cloud.bounds() {
        let extent = bounds.extent();
        log::debug!(
            "Plot extent {:.1} x {:.1} m, {:.1} m tall",
            extent.x,
            extent.y,
            bounds.height()
        );
    }
    let labels = segmenter.segment(cloud.positions())?;
    let records = records_from_clusters(cloud, &labels, &params.breast_height)?;

    let (mut records, filter_report) = match &params.filter {
        Some(filter) => {
            let (kept, report) = filter.apply(records)?;
            (kept, Some(report))
        }
        None => (records, None),
    };
    let corrected_heights = apply_height_correction(&mut records, &params.slenderness)?;

    log::info!(
        "Inventory finished with {} trees, {} with a measured DBH",
        records.len(),
        records.iter().filter(|r| r.dbh_cm.is_some()).count()
    );
    Ok(Inventory {
        labels,
        records,
        filter_report,
        corrected_heights,
    })
}
