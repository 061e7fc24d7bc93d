#![allow(dead_code)]

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use sylva_core::nalgebra::Vector3;

/// Ground truth of a synthetic stem
#[derive(Debug, Clone, Copy)]
pub struct Stem {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub height: f64,
}

/// The three stems of the synthetic plot: 5 m apart, heights 5/10/20 m, radii 0.1/0.2/0.4 m
pub const PLOT_STEMS: [Stem; 3] = [
    Stem {
        x: 0.0,
        y: 0.0,
        radius: 0.1,
        height: 5.0,
    },
    Stem {
        x: 5.0,
        y: 0.0,
        radius: 0.2,
        height: 10.0,
    },
    Stem {
        x: 10.0,
        y: 0.0,
        radius: 0.4,
        height: 20.0,
    },
];

pub const POINTS_PER_STEM: usize = 200;
pub const NOISE_POINTS: usize = 50;

/// `count` points on the surface of a vertical stem, on a golden-angle spiral from the ground to the top
pub fn stem_points(stem: &Stem, count: usize) -> Vec<Vector3<f64>> {
    (0..count)
        .map(|i| {
            let angle = i as f64 * 2.399963;
            Vector3::new(
                stem.x + stem.radius * angle.cos(),
                stem.y + stem.radius * angle.sin(),
                stem.height * i as f64 / (count - 1) as f64,
            )
        })
        .collect()
}

/// Uniform random points in the box `[min, max]`
pub fn uniform_points(
    count: usize,
    min: Vector3<f64>,
    max: Vector3<f64>,
    seed: u64,
) -> Vec<Vector3<f64>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            Vector3::new(
                rng.gen_range(min.x..max.x),
                rng.gen_range(min.y..max.y),
                rng.gen_range(min.z..max.z),
            )
        })
        .collect()
}

/// The synthetic plot: [PLOT_STEMS] with [POINTS_PER_STEM] points each, followed by [NOISE_POINTS] uniform noise
/// points in `[-5, 15] x [-5, 5] x [0, 20]`. Returns the points and the stem of every point (`None` for noise)
pub fn plot_scene(seed: u64) -> (Vec<Vector3<f64>>, Vec<Option<usize>>) {
    plot_scene_with(POINTS_PER_STEM, seed)
}

/// Like [plot_scene], with a different number of points per stem
pub fn plot_scene_with(points_per_stem: usize, seed: u64) -> (Vec<Vector3<f64>>, Vec<Option<usize>>) {
    let mut points = vec![];
    let mut truth = vec![];
    for (id, stem) in PLOT_STEMS.iter().enumerate() {
        points.extend(stem_points(stem, points_per_stem));
        truth.extend(std::iter::repeat(Some(id)).take(points_per_stem));
    }
    points.extend(uniform_points(
        NOISE_POINTS,
        Vector3::new(-5.0, -5.0, 0.0),
        Vector3::new(15.0, 5.0, 20.0),
        seed,
    ));
    truth.extend(std::iter::repeat(None).take(NOISE_POINTS));
    (points, truth)
}

/// Gaussian jitter with standard deviation `sigma`, clamped to `max_abs` per coordinate
pub fn jitter(points: &mut [Vector3<f64>], sigma: f64, max_abs: f64, seed: u64) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sigma).expect("valid standard deviation");
    for point in points.iter_mut() {
        for coordinate in point.iter_mut() {
            *coordinate += normal.sample(&mut rng).clamp(-max_abs, max_abs);
        }
    }
}

/// A deterministic permutation of `0..count`
pub fn permutation(count: usize, seed: u64) -> Vec<usize> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..count).collect();
    order.shuffle(&mut rng);
    order
}
