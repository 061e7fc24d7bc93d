use sylva_core::model::{Circle, NoModel};
use sylva_core::nalgebra::{Matrix3, Vector2, Vector3};

/// Ratio between the smallest and the largest eigenvalue of the normal equations below which a circle fit is
/// considered degenerate (collinear or coincident points)
const CONDITION_LIMIT: f64 = 1e-12;

/// Algebraic least-squares circle fit (Kåsa fit).
///
/// Solves `x² + y² = a·x + b·y + c` for all points in the least-squares sense, which gives the center `(a/2, b/2)`
/// and `r² = c + (a/2)² + (b/2)²`. The points are centered before solving.
///
/// Returns [NoModel::InsufficientData] for less than 3 points and [NoModel::Degenerate] if the points are
/// (nearly) collinear or the fit yields a non-positive squared radius.
///
/// ```
/// # use sylva_core::nalgebra::Vector2;
/// # use sylva_algorithms::circle::fit_circle_2d;
/// let points: Vec<_> = (0..12)
///     .map(|i| {
///         let angle = i as f64 * std::f64::consts::PI / 6.0;
///         Vector2::new(2.0 + 0.5 * angle.cos(), -1.0 + 0.5 * angle.sin())
///     })
///     .collect();
/// let circle = fit_circle_2d(&points).unwrap();
/// assert!((circle.radius - 0.5).abs() < 1e-9);
/// ```
pub fn fit_circle_2d(points: &[Vector2<f64>]) -> Result<Circle, NoModel> {
    if points.len() < 3 {
        return Err(NoModel::InsufficientData {
            available: points.len(),
            required: 3,
        });
    }
    let mean: Vector2<f64> = points.iter().sum::<Vector2<f64>>() / points.len() as f64;

    let mut normal_matrix = Matrix3::<f64>::zeros();
    let mut rhs = Vector3::<f64>::zeros();
    for point in points {
        let p = point - mean;
        let row = Vector3::new(p.x, p.y, 1.0);
        normal_matrix += row * row.transpose();
        rhs += row * p.norm_squared();
    }

    let eigenvalues = normal_matrix.symmetric_eigenvalues();
    let largest = eigenvalues.max();
    let smallest = eigenvalues.min();
    if largest <= 0.0 || smallest / largest < CONDITION_LIMIT {
        return Err(NoModel::Degenerate);
    }

    let solution = normal_matrix.lu().solve(&rhs).ok_or(NoModel::Degenerate)?;
    let center = Vector2::new(solution.x / 2.0, solution.y / 2.0);
    let radius_squared = solution.z + center.norm_squared();
    if !radius_squared.is_finite() || radius_squared <= 0.0 {
        return Err(NoModel::Degenerate);
    }
    Ok(Circle {
        center: center + mean,
        radius: radius_squared.sqrt(),
    })
}

/// The circle through three points, or `None` if the points are collinear
pub fn circumcircle(a: &Vector2<f64>, b: &Vector2<f64>, c: &Vector2<f64>) -> Option<Circle> {
    let ab = b - a;
    let ac = c - a;
    let d = 2.0 * (ab.x * ac.y - ab.y * ac.x);
    let scale = ab.norm_squared().max(ac.norm_squared());
    if scale == 0.0 || (d / scale).abs() < 1e-9 {
        return None;
    }
    let ab2 = ab.norm_squared();
    let ac2 = ac.norm_squared();
    let offset = Vector2::new(
        (ac.y * ab2 - ab.y * ac2) / d,
        (ab.x * ac2 - ac.x * ab2) / d,
    );
    Some(Circle {
        center: a + offset,
        radius: offset.norm(),
    })
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;

    #[test]
    fn test_fit_exact_circle() {
        let points: Vec<_> = (0..7)
            .map(|i| {
                let angle = i as f64 * 0.4;
                Vector2::new(10.0 + 3.0 * angle.cos(), 20.0 + 3.0 * angle.sin())
            })
            .collect();
        let circle = fit_circle_2d(&points).unwrap();
        assert_approx_eq!(circle.center.x, 10.0, 1e-8);
        assert_approx_eq!(circle.center.y, 20.0, 1e-8);
        assert_approx_eq!(circle.radius, 3.0, 1e-8);
    }

    #[test]
    fn test_fit_too_few_points() {
        let result = fit_circle_2d(&[Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0)]);
        assert_eq!(
            result,
            Err(NoModel::InsufficientData {
                available: 2,
                required: 3
            })
        );
    }

    #[test]
    fn test_fit_collinear_is_degenerate() {
        let points: Vec<_> = (0..10)
            .map(|i| Vector2::new(i as f64, 2.0 * i as f64))
            .collect();
        assert_eq!(fit_circle_2d(&points), Err(NoModel::Degenerate));
    }

    #[test]
    fn test_circumcircle() {
        let circle = circumcircle(
            &Vector2::new(1.0, 0.0),
            &Vector2::new(-1.0, 0.0),
            &Vector2::new(0.0, 1.0),
        )
        .unwrap();
        assert_approx_eq!(circle.center.x, 0.0);
        assert_approx_eq!(circle.center.y, 0.0);
        assert_approx_eq!(circle.radius, 1.0);

        assert!(circumcircle(
            &Vector2::new(0.0, 0.0),
            &Vector2::new(1.0, 1.0),
            &Vector2::new(2.0, 2.0)
        )
        .is_none());
    }
}
