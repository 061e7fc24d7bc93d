use common::{jitter, plot_scene_with, PLOT_STEMS};
use sylva_algorithms::circle::fit_circle_2d;
use sylva_algorithms::dbscan::DbscanParams;
use sylva_algorithms::detection::{detect_cylinders, DetectionParams};
use sylva_algorithms::height::{apply_height_correction, correct_height, SlendernessParams};
use sylva_algorithms::matching::match_trees;
use sylva_algorithms::pipeline::{run_inventory, InventoryParams};
use sylva_algorithms::records::{records_from_cylinders, BreastHeightParams, RecordFilter};
use sylva_algorithms::segmenter::SegmenterConfig;
use sylva_core::nalgebra::{Vector2, Vector3};
use sylva_core::PointCloud;

mod common;

#[test]
fn breast_height_circle_gives_dbh_within_one_centimeter() {
    let mut slice: Vec<Vector3<f64>> = (0..50)
        .map(|i| {
            let angle = i as f64 * std::f64::consts::TAU / 50.0;
            Vector3::new(0.15 * angle.cos(), 0.15 * angle.sin(), 1.3)
        })
        .collect();
    jitter(&mut slice, 0.004, 0.01, 31);
    let horizontal: Vec<Vector2<f64>> = slice.iter().map(|p| p.xy()).collect();
    let circle = fit_circle_2d(&horizontal).unwrap();
    assert!((circle.diameter_cm() - 30.0).abs() <= 1.0);
}

#[test]
fn height_correction_is_exact() {
    let params = SlendernessParams::default();
    for dbh_cm in [8.0, 15.0, 32.5, 60.0] {
        for raw_height in [2.0, 9.5, 18.0, 35.0, 70.0] {
            let corrected = correct_height(
                raw_height,
                dbh_cm,
                params.max_slenderness,
                params.target_slenderness,
            );
            if 100.0 * raw_height / dbh_cm <= params.max_slenderness {
                assert_eq!(corrected, raw_height);
            } else {
                assert_eq!(corrected, params.target_slenderness * dbh_cm / 100.0);
            }
        }
    }
}

/// Dense enough for a few dozen points in the breast height slice of the tallest stem
const DENSE_POINTS_PER_STEM: usize = 1000;

fn density_inventory_params() -> InventoryParams {
    InventoryParams {
        segmenter: SegmenterConfig::DensityClustering(DbscanParams::default()),
        breast_height: BreastHeightParams {
            thickness: 0.4,
            ..Default::default()
        },
        filter: Some(RecordFilter::default()),
        ..Default::default()
    }
}

#[test]
fn plot_inventory_from_density_clusters() {
    let (mut points, _) = plot_scene_with(DENSE_POINTS_PER_STEM, 37);
    jitter(&mut points, 0.002, 0.005, 41);
    let params = density_inventory_params();
    let inventory = run_inventory(&PointCloud::from_positions(points), &params).unwrap();

    assert_eq!(inventory.records.len(), 3);
    for (record, stem) in inventory.records.iter().zip(PLOT_STEMS.iter()) {
        assert!((record.position - Vector2::new(stem.x, stem.y)).norm() < 0.1);
        assert!(record.raw_height >= stem.height * 0.95);
        let dbh = record.dbh_cm.expect("every plot stem has a breast height slice");
        assert!((dbh - stem.radius * 200.0).abs() < 2.0, "DBH {}", dbh);
        assert!(record.corrected_height <= record.raw_height);
    }
}

#[test]
fn cylinder_and_cluster_inventories_agree() {
    let (points, _) = plot_scene_with(DENSE_POINTS_PER_STEM, 43);
    let detection = detect_cylinders(&points, &DetectionParams::default(), |_| {}).unwrap();
    let mut from_cylinders = records_from_cylinders(&points, &detection);
    apply_height_correction(&mut from_cylinders, &SlendernessParams::default()).unwrap();

    let inventory =
        run_inventory(&PointCloud::from_positions(points), &density_inventory_params()).unwrap();

    let matching = match_trees(&inventory.records, &from_cylinders, 1.0).unwrap();
    assert_eq!(matching.pairs.len(), 3);
    let stats = matching.dbh_stats.expect("all matched trees have a DBH");
    assert!(stats.mean_absolute < 2.0, "{:?}", stats);
}
