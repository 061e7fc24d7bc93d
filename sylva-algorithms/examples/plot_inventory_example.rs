use anyhow::Result;
use log::info;
use rand::{distributions::Uniform, rngs::SmallRng, Rng, SeedableRng};
use sylva_algorithms::detection::{detect_cylinders, DetectionParams};
use sylva_algorithms::graphcut::GraphCutParams;
use sylva_algorithms::height::{apply_height_correction, SlendernessParams};
use sylva_algorithms::matching::match_trees;
use sylva_algorithms::pipeline::{run_inventory, InventoryParams};
use sylva_algorithms::records::{records_from_cylinders, BreastHeightParams, RecordFilter};
use sylva_algorithms::segmenter::SegmenterConfig;
use sylva_core::nalgebra::Vector3;
use sylva_core::tree::TreeRecord;
use sylva_core::PointCloud;

/// (x, y, stem radius, height) of the synthetic trees
const TREES: [(f64, f64, f64, f64); 5] = [
    (0.0, 0.0, 0.15, 14.0),
    (6.0, 1.0, 0.22, 18.0),
    (12.0, -1.0, 0.1, 16.0),
    (3.0, 7.0, 0.3, 22.0),
    (10.0, 8.0, 0.18, 12.0),
];

/// Stem points up to 60% of the height and a crown of scattered points above
fn synthetic_plot(seed: u64) -> PointCloud {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut positions = vec![];
    for &(x, y, radius, height) in &TREES {
        let stem_height = 0.6 * height;
        for _ in 0..(stem_height * 150.0) as usize {
            let angle = rng.sample(Uniform::new(0.0, std::f64::consts::TAU));
            let r = radius + rng.sample(Uniform::new(-0.005, 0.005));
            positions.push(Vector3::new(
                x + r * angle.cos(),
                y + r * angle.sin(),
                rng.sample(Uniform::new(0.0, stem_height)),
            ));
        }
        let crown_radius = 0.15 * height;
        for _ in 0..1500 {
            let angle = rng.sample(Uniform::new(0.0, std::f64::consts::TAU));
            let r = crown_radius * rng.sample(Uniform::new(0.0f64, 1.0)).sqrt();
            positions.push(Vector3::new(
                x + r * angle.cos(),
                y + r * angle.sin(),
                rng.sample(Uniform::new(stem_height, height)),
            ));
        }
    }
    PointCloud::from_positions(positions)
}

fn print_records(title: &str, records: &[TreeRecord]) {
    println!("{}", title);
    println!("  id       x       y   dbh[cm]   raw h[m]   h[m]   points");
    for record in records {
        println!(
            "{:>4} {:>7.2} {:>7.2} {:>9} {:>10.2} {:>6.2} {:>8}",
            record.id,
            record.position.x,
            record.position.y,
            record
                .dbh_cm
                .map_or_else(|| "-".to_string(), |dbh| format!("{:.1}", dbh)),
            record.raw_height,
            record.corrected_height,
            record.point_count
        );
    }
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let cloud = synthetic_plot(2024);
    info!("Generated synthetic plot with {} points", cloud.len());

    let mut params = InventoryParams {
        breast_height: BreastHeightParams {
            thickness: 0.2,
            ..Default::default()
        },
        filter: Some(RecordFilter::default()),
        ..Default::default()
    };
    let density = run_inventory(&cloud, &params)?;
    print_records("Density clustering", &density.records);

    params.segmenter = SegmenterConfig::GraphCut(GraphCutParams::tls());
    let graphcut = run_inventory(&cloud, &params)?;
    print_records("Graph-cut segmentation", &graphcut.records);

    let detection = detect_cylinders(cloud.positions(), &DetectionParams::default(), |message| {
        println!("  {}", message)
    })?;
    let mut cylinders = records_from_cylinders(cloud.positions(), &detection);
    apply_height_correction(&mut cylinders, &SlendernessParams::default())?;
    print_records("Cylinder detection", &cylinders);

    let matching = match_trees(&density.records, &cylinders, 1.0)?;
    println!(
        "Matched {} trees between density clustering and cylinder detection",
        matching.pairs.len()
    );
    if let Some(stats) = matching.dbh_stats {
        println!(
            "DBH difference: mean {:.2} cm, MAE {:.2} cm, RMSE {:.2} cm",
            stats.mean, stats.mean_absolute, stats.root_mean_square
        );
    }
    Ok(())
}
