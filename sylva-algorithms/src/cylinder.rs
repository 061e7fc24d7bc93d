use std::cmp::Ordering;

use anyhow::{ensure, Result};
use rand::{rngs::SmallRng, seq::index::sample, SeedableRng};
use rayon::prelude::*;
use sylva_core::math::{centroid, covariance_matrix, median, principal_axes};
use sylva_core::model::{axis_distance, Cylinder, NoModel};
use sylva_core::nalgebra::{Matrix5, Vector2, Vector3, Vector5};

use crate::circle::{circumcircle, fit_circle_2d};
use crate::normal_estimation::{compute_normals, SurfaceNormal, DEFAULT_NORMAL_NEIGHBOURS};

/// How a RANSAC trial turns its three sampled points into a candidate cylinder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CandidateEstimator {
    /// Axis is the first principal component of the three samples, center is their centroid and the radius is the
    /// median axis distance of all points that lie closer than the tolerance to that axis. Cheap, but only finds
    /// stems that are thin compared to the tolerance
    SamplePrincipalAxis,
    /// Axis is the cross product of the surface normals of two samples, center and radius come from the circle
    /// through all three samples in the plane orthogonal to the axis. The radius is then replaced by the median axis
    /// distance of all points within tolerance of that circle
    #[default]
    NormalPair,
}

/// Parameters of the RANSAC cylinder fitter
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CylinderFitParams {
    /// Number of RANSAC trials
    pub iterations: usize,
    /// Maximum distance of an inlier to the cylinder surface
    pub tolerance: f64,
    /// Minimum number of points to attempt a fit, and minimum number of inliers of the final model
    pub min_points: usize,
    pub estimator: CandidateEstimator,
    /// Neighbourhood size for the surface normals used by [CandidateEstimator::NormalPair]
    pub normal_neighbours: usize,
    /// Trials whose candidate radius lies outside of `[min, max]` are discarded. `None` accepts any radius
    pub radius_range: Option<(f64, f64)>,
    /// Only fit cylinders around this direction (e.g. `Vector3::z()` for upright stems). The estimator is not used
    /// then, every candidate is the circle through the three samples in the plane orthogonal to this axis
    pub fixed_axis: Option<Vector3<f64>>,
    pub seed: u64,
}

impl Default for CylinderFitParams {
    fn default() -> Self {
        Self {
            iterations: 1000,
            tolerance: 0.05,
            min_points: 3,
            estimator: CandidateEstimator::default(),
            normal_neighbours: DEFAULT_NORMAL_NEIGHBOURS,
            radius_range: None,
            fixed_axis: None,
            seed: 42,
        }
    }
}

impl CylinderFitParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.iterations > 0, "RANSAC needs at least one iteration");
        ensure!(
            self.tolerance.is_finite() && self.tolerance > 0.0,
            "Inlier tolerance must be a positive number, got {}",
            self.tolerance
        );
        ensure!(
            self.min_points >= 3,
            "A cylinder fit needs at least 3 points, but min_points is {}",
            self.min_points
        );
        ensure!(
            self.normal_neighbours >= 3,
            "Normal estimation needs at least 3 neighbours, but normal_neighbours is {}",
            self.normal_neighbours
        );
        if let Some((min, max)) = self.radius_range {
            ensure!(
                min >= 0.0 && min <= max,
                "Candidate radius range [{}, {}] is empty",
                min,
                max
            );
        }
        if let Some(axis) = self.fixed_axis {
            ensure!(
                axis.iter().all(|c| c.is_finite()) && axis.norm() > 0.0,
                "Fixed cylinder axis must be a finite non-zero vector, got {:?}",
                axis
            );
        }
        Ok(())
    }

    fn accepts_radius(&self, radius: f64) -> bool {
        self.radius_range
            .map_or(true, |(min, max)| radius >= min && radius <= max)
    }
}

/// A fitted cylinder together with the indices of its inliers (indices into the fitted points)
#[derive(Debug, Clone, PartialEq)]
pub struct CylinderFit {
    pub cylinder: Cylinder,
    pub inliers: Vec<usize>,
}

/// Axis, center and radius of a cylinder hypothesis. Height is only known after the final inlier classification
#[derive(Debug, Clone, Copy)]
struct Candidate {
    axis: Vector3<f64>,
    center: Vector3<f64>,
    radius: f64,
}

impl Candidate {
    fn surface_distance(&self, point: &Vector3<f64>) -> f64 {
        (axis_distance(&self.axis, &self.center, point) - self.radius).abs()
    }

    fn inlier_count(&self, points: &[Vector3<f64>], tolerance: f64) -> usize {
        points
            .iter()
            .filter(|p| self.surface_distance(p) < tolerance)
            .count()
    }

    fn inliers(&self, points: &[Vector3<f64>], tolerance: f64) -> Vec<usize> {
        points
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| (self.surface_distance(p) < tolerance).then_some(idx))
            .collect()
    }
}

/// The best candidate of one RANSAC trial
struct Trial {
    index: usize,
    ranking: usize,
    candidate: Candidate,
}

/// More inliers win, on equal inlier count the earlier trial wins. This makes the serial and the parallel search
/// agree on the result
fn compare_trials(a: &Trial, b: &Trial) -> Ordering {
    a.ranking
        .cmp(&b.ranking)
        .then_with(|| b.index.cmp(&a.index))
}

/// Everything a single trial needs. Shared read-only between threads in the parallel fitter
struct TrialContext<'a> {
    points: &'a [Vector3<f64>],
    normals: Option<Vec<SurfaceNormal>>,
    params: &'a CylinderFitParams,
}

impl<'a> TrialContext<'a> {
    fn new(points: &'a [Vector3<f64>], params: &'a CylinderFitParams) -> Result<Self> {
        let normals = match (params.fixed_axis, params.estimator) {
            (None, CandidateEstimator::NormalPair) => Some(compute_normals(
                points,
                params.normal_neighbours.min(points.len()),
            )?),
            _ => None,
        };
        Ok(Self {
            points,
            normals,
            params,
        })
    }

    /// Runs one trial with its own generator, seeded from the fit seed and the trial index. Returns `None` if the
    /// sampled points did not define a cylinder
    fn run(&self, trial: usize) -> Option<Trial> {
        let mut rng = SmallRng::seed_from_u64(trial_seed(self.params.seed, trial));
        let samples = sample(&mut rng, self.points.len(), 3).into_vec();
        let candidate = match (self.params.fixed_axis, &self.normals) {
            (Some(axis), _) => self.circle_candidate(&samples, &axis.normalize()),
            (None, Some(normals)) => self.normal_pair_candidate(&samples, normals),
            (None, None) => self.principal_axis_candidate(&samples),
        }?;
        if !self.params.accepts_radius(candidate.radius) {
            return None;
        }
        Some(Trial {
            index: trial,
            ranking: candidate.inlier_count(self.points, self.params.tolerance),
            candidate,
        })
    }

    fn principal_axis_candidate(&self, samples: &[usize]) -> Option<Candidate> {
        let sample_points: Vec<Vector3<f64>> = samples.iter().map(|&i| self.points[i]).collect();
        let center = centroid(&sample_points)?;
        let axes = principal_axes(&covariance_matrix(&center, &sample_points))?;
        if axes.values[0] <= f64::EPSILON {
            return None;
        }
        let axis = axes.major();
        let mut close: Vec<f64> = self
            .points
            .iter()
            .map(|p| axis_distance(&axis, &center, p))
            .filter(|&d| d < self.params.tolerance)
            .collect();
        let radius = median(&mut close)?;
        Some(Candidate {
            axis,
            center,
            radius,
        })
    }

    fn normal_pair_candidate(
        &self,
        samples: &[usize],
        normals: &[SurfaceNormal],
    ) -> Option<Candidate> {
        let (first, second) = (&normals[samples[0]], &normals[samples[1]]);
        if !first.is_defined() || !second.is_defined() {
            return None;
        }
        let axis = first.normal.cross(&second.normal);
        if axis.norm() < 1e-3 {
            return None;
        }
        self.circle_candidate(samples, &axis.normalize())
    }

    /// Candidate around `axis` through the circle of the three samples in the plane orthogonal to `axis`
    fn circle_candidate(&self, samples: &[usize], axis: &Vector3<f64>) -> Option<Candidate> {
        let origin = self.points[samples[0]];
        let (u, v) = plane_basis(axis);
        let to_plane = |p: &Vector3<f64>| {
            let offset = p - origin;
            Vector2::new(offset.dot(&u), offset.dot(&v))
        };
        let circle = circumcircle(
            &to_plane(&self.points[samples[0]]),
            &to_plane(&self.points[samples[1]]),
            &to_plane(&self.points[samples[2]]),
        )?;
        if !self.params.accepts_radius(circle.radius) {
            return None;
        }
        let center = origin + u * circle.center.x + v * circle.center.y;

        let mut supporting: Vec<f64> = self
            .points
            .iter()
            .map(|p| axis_distance(axis, &center, p))
            .filter(|&d| (d - circle.radius).abs() < self.params.tolerance)
            .collect();
        let radius = median(&mut supporting)?;
        Some(Candidate {
            axis: *axis,
            center,
            radius,
        })
    }
}

fn trial_seed(seed: u64, trial: usize) -> u64 {
    seed ^ (trial as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Two unit vectors that together with `axis` form an orthonormal basis
pub(crate) fn plane_basis(axis: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let helper = if axis.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = axis.cross(&helper).normalize();
    let v = axis.cross(&u);
    (u, v)
}

/// Fits a cylinder through the inliers of the best candidate: axis is the principal axis of the inliers that is most
/// parallel to the candidate axis (or the candidate axis itself if `axis_fixed`), the center comes from a circle fit
/// of the inliers in the plane orthogonal to that axis (or is the inlier centroid if that fit is degenerate) and the
/// radius is the median axis distance
fn refit(points: &[Vector3<f64>], inliers: &[usize], guess: &Candidate, axis_fixed: bool) -> Candidate {
    let inlier_points: Vec<Vector3<f64>> = inliers.iter().map(|&i| points[i]).collect();
    let Some(center) = centroid(&inlier_points) else {
        return *guess;
    };
    let axis = if axis_fixed {
        guess.axis
    } else {
        principal_axes(&covariance_matrix(&center, &inlier_points))
            .and_then(|axes| {
                axes.axes
                    .into_iter()
                    .max_by(|a, b| a.dot(&guess.axis).abs().total_cmp(&b.dot(&guess.axis).abs()))
            })
            .unwrap_or(guess.axis)
    };

    let (u, v) = plane_basis(&axis);
    let projected: Vec<Vector2<f64>> = inlier_points
        .iter()
        .map(|p| {
            let offset = p - center;
            Vector2::new(offset.dot(&u), offset.dot(&v))
        })
        .collect();
    let center = match fit_circle_2d(&projected) {
        Ok(circle) => center + u * circle.center.x + v * circle.center.y,
        Err(reason) => {
            log::debug!("Cylinder refit falls back to the inlier centroid: {}", reason);
            center
        }
    };

    let mut distances: Vec<f64> = inlier_points
        .iter()
        .map(|p| axis_distance(&axis, &center, p))
        .collect();
    let radius = median(&mut distances).unwrap_or(guess.radius);
    Candidate {
        axis,
        center,
        radius,
    }
}

/// Upper bound on the refine-and-reclassify rounds of [finish]
const MAX_REFIT_ROUNDS: usize = 10;
const MAX_REFINE_STEPS: usize = 50;

/// Levenberg-Marquardt minimization of `Σ (axis_distance(p) - radius)²` over the inliers, starting at `start`.
///
/// The parameters are two tilts of the axis, two shifts of the center orthogonal to the axis and the radius. After
/// every step the center is moved along the axis to the foot of the inlier centroid, so tilts pivot around the middle
/// of the inliers. With `axis_fixed` only center and radius change. The radius of the result is the median axis
/// distance of the inliers
fn refine(points: &[Vector3<f64>], inliers: &[usize], start: &Candidate, axis_fixed: bool) -> Candidate {
    let inlier_points: Vec<Vector3<f64>> = inliers.iter().map(|&i| points[i]).collect();
    let Some(mean) = centroid(&inlier_points) else {
        return *start;
    };
    let anchored = |model: Candidate| Candidate {
        center: model.center + model.axis * (mean - model.center).dot(&model.axis),
        ..model
    };
    let cost = |model: &Candidate| -> f64 {
        inlier_points
            .iter()
            .map(|p| {
                let residual = axis_distance(&model.axis, &model.center, p) - model.radius;
                residual * residual
            })
            .sum()
    };

    let mut model = anchored(*start);
    let mut current_cost = cost(&model);
    let mut damping = 1e-3;
    for _ in 0..MAX_REFINE_STEPS {
        let (u, v) = plane_basis(&model.axis);
        let mut normal_matrix = Matrix5::<f64>::zeros();
        let mut gradient = Vector5::<f64>::zeros();
        for p in &inlier_points {
            let offset = p - model.center;
            let along = offset.dot(&model.axis);
            let radial = offset - model.axis * along;
            let distance = radial.norm();
            let direction = if distance > 0.0 {
                radial / distance
            } else {
                Vector3::zeros()
            };
            let (du, dv) = (direction.dot(&u), direction.dot(&v));
            let jacobian = Vector5::new(-du, -dv, -along * du, -along * dv, -1.0);
            normal_matrix += jacobian * jacobian.transpose();
            gradient += jacobian * (distance - model.radius);
        }
        if axis_fixed {
            for k in 2..4 {
                normal_matrix.row_mut(k).fill(0.0);
                normal_matrix.column_mut(k).fill(0.0);
                normal_matrix[(k, k)] = 1.0;
                gradient[k] = 0.0;
            }
        }

        let mut damped = normal_matrix;
        for k in 0..5 {
            damped[(k, k)] += damping * normal_matrix[(k, k)].max(f64::EPSILON);
        }
        let Some(step) = damped.lu().solve(&(-gradient)) else {
            break;
        };
        let trial = anchored(Candidate {
            axis: (model.axis + u * step[2] + v * step[3]).normalize(),
            center: model.center + u * step[0] + v * step[1],
            radius: model.radius + step[4],
        });
        let trial_cost = if trial.radius > 0.0 {
            cost(&trial)
        } else {
            f64::INFINITY
        };
        if trial_cost < current_cost {
            let converged = current_cost - trial_cost <= 1e-12 * current_cost || step.norm() < 1e-12;
            model = trial;
            current_cost = trial_cost;
            damping = (damping / 10.0).max(1e-12);
            if converged {
                break;
            }
        } else {
            damping *= 10.0;
            if damping > 1e9 {
                break;
            }
        }
    }

    let mut distances: Vec<f64> = inlier_points
        .iter()
        .map(|p| axis_distance(&model.axis, &model.center, p))
        .collect();
    if let Some(radius) = median(&mut distances) {
        model.radius = radius;
    }
    model
}

/// Refits the winning candidate on its inliers and classifies all points against the refit model. Refitting and
/// reclassifying alternate until the inlier set stops growing
fn finish(
    points: &[Vector3<f64>],
    best: Option<Trial>,
    params: &CylinderFitParams,
) -> Result<CylinderFit, NoModel> {
    let best = best.ok_or(NoModel::Degenerate)?;
    let candidate_inliers = best.candidate.inliers(points, params.tolerance);
    if candidate_inliers.len() < params.min_points {
        return Err(NoModel::InsufficientData {
            available: candidate_inliers.len(),
            required: params.min_points,
        });
    }

    let axis_fixed = params.fixed_axis.is_some();
    let algebraic = refit(points, &candidate_inliers, &best.candidate, axis_fixed);
    let start = if algebraic.inlier_count(points, params.tolerance) >= candidate_inliers.len() {
        algebraic
    } else {
        best.candidate
    };
    let mut model = refine(points, &candidate_inliers, &start, axis_fixed);
    let mut inliers = model.inliers(points, params.tolerance);
    let mut fitted_on = candidate_inliers.len();
    for _ in 1..MAX_REFIT_ROUNDS {
        if inliers.len() <= fitted_on {
            break;
        }
        let next = refine(points, &inliers, &model, axis_fixed);
        let next_inliers = next.inliers(points, params.tolerance);
        fitted_on = inliers.len();
        if next_inliers.len() < inliers.len() {
            break;
        }
        model = next;
        inliers = next_inliers;
    }
    if inliers.len() < params.min_points {
        return Err(NoModel::InsufficientData {
            available: inliers.len(),
            required: params.min_points,
        });
    }

    let (low, high) = inliers
        .iter()
        .map(|&i| (points[i] - model.center).dot(&model.axis))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), t| {
            (low.min(t), high.max(t))
        });
    let cylinder = Cylinder::new(
        model.axis,
        model.center,
        model.radius,
        high - low,
        inliers.len(),
    );
    log::debug!(
        "Fitted cylinder with radius {:.3} and height {:.2} ({} of {} points are inliers, best trial {})",
        cylinder.radius,
        cylinder.height,
        inliers.len(),
        points.len(),
        best.index
    );
    Ok(CylinderFit { cylinder, inliers })
}

fn check_input(points: &[Vector3<f64>], params: &CylinderFitParams) -> Option<NoModel> {
    let required = params.min_points.max(3);
    (points.len() < required).then_some(NoModel::InsufficientData {
        available: points.len(),
        required,
    })
}

/// Ransac Cylinder Fitting in serial (for maximum speed use fit_cylinder_par).
///
/// Runs `params.iterations` trials. Each trial samples three distinct points, derives a candidate cylinder with
/// `params.estimator` (or around `params.fixed_axis`) and counts the points within `params.tolerance` of the
/// candidate surface. Trials whose samples do not define a cylinder, or whose radius is outside of
/// `params.radius_range`, are discarded. The candidate with the most inliers is refit on all of its inliers and all
/// points are classified again, repeatedly until the inlier set stops growing. The height is the axial span of the
/// final inliers.
///
/// The outer `Result` fails only for invalid parameters. The inner `Result` is [NoModel::InsufficientData] if fewer
/// than `params.min_points` points are given or support the final model, and [NoModel::Degenerate] if no trial
/// produced a candidate.
///
/// # Examples
///
/// ```
/// # use sylva_core::nalgebra::Vector3;
/// # use sylva_algorithms::cylinder::{fit_cylinder, CylinderFitParams};
/// let points: Vec<_> = (0..400)
///     .map(|i| {
///         let angle = i as f64 * 2.399963;
///         Vector3::new(0.3 * angle.cos(), 0.3 * angle.sin(), i as f64 * 0.01)
///     })
///     .collect();
/// let fit = fit_cylinder(&points, &CylinderFitParams::default()).unwrap().unwrap();
/// assert!((fit.cylinder.radius - 0.3).abs() < 0.003);
/// ```
pub fn fit_cylinder(
    points: &[Vector3<f64>],
    params: &CylinderFitParams,
) -> Result<Result<CylinderFit, NoModel>> {
    params.validate()?;
    if let Some(reason) = check_input(points, params) {
        return Ok(Err(reason));
    }
    let context = TrialContext::new(points, params)?;
    let best = (0..params.iterations)
        .filter_map(|trial| context.run(trial))
        .max_by(compare_trials);
    Ok(finish(points, best, params))
}

/// Ransac Cylinder Fitting in parallel. Produces the same model as [fit_cylinder] for the same parameters, because
/// every trial draws from its own generator seeded with `params.seed` and the trial index. Only the trials run in
/// parallel, the final refit is sequential
pub fn fit_cylinder_par(
    points: &[Vector3<f64>],
    params: &CylinderFitParams,
) -> Result<Result<CylinderFit, NoModel>> {
    params.validate()?;
    if let Some(reason) = check_input(points, params) {
        return Ok(Err(reason));
    }
    let context = TrialContext::new(points, params)?;
    let best = (0..params.iterations)
        .into_par_iter()
        .filter_map(|trial| context.run(trial))
        .max_by(compare_trials);
    Ok(finish(points, best, params))
}
