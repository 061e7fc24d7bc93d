use float_ord::FloatOrd;
use nalgebra::{Matrix3, Vector3};

/// Arithmetic mean of the given positions. Returns `None` for an empty slice
pub fn centroid(positions: &[Vector3<f64>]) -> Option<Vector3<f64>> {
    if positions.is_empty() {
        return None;
    }
    let sum: Vector3<f64> = positions.iter().sum();
    Some(sum / positions.len() as f64)
}

/// Covariance matrix (normalized by the number of positions) of `positions` around `centroid`
pub fn covariance_matrix(centroid: &Vector3<f64>, positions: &[Vector3<f64>]) -> Matrix3<f64> {
    if positions.is_empty() {
        return Matrix3::zeros();
    }
    let unweighted: Matrix3<f64> = positions
        .iter()
        .map(|v| {
            let diff: Vector3<f64> = v - centroid;
            diff * diff.transpose()
        })
        .sum();
    unweighted / positions.len() as f64
}

/// Eigen decomposition of a 3x3 covariance matrix, sorted so that `values[0]` is the largest eigenvalue
/// and `axes[0]` the matching unit-length eigenvector (the first principal component)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrincipalAxes {
    pub values: [f64; 3],
    pub axes: [Vector3<f64>; 3],
}

impl PrincipalAxes {
    /// Direction of largest spread
    pub fn major(&self) -> Vector3<f64> {
        self.axes[0]
    }

    /// Direction of smallest spread. For a local surface patch this is the surface normal
    pub fn minor(&self) -> Vector3<f64> {
        self.axes[2]
    }
}

/// Computes the principal axes of the given covariance matrix. Returns `None` if the decomposition
/// produces non-finite values
pub fn principal_axes(covariance: &Matrix3<f64>) -> Option<PrincipalAxes> {
    let eigen = covariance.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by_key(|&idx| std::cmp::Reverse(FloatOrd(eigen.eigenvalues[idx])));

    let values = order.map(|idx| eigen.eigenvalues[idx]);
    let axes = order.map(|idx| eigen.eigenvectors.column(idx).into_owned());
    if values.iter().any(|v| !v.is_finite()) || axes.iter().any(|a| a.norm() == 0.0) {
        return None;
    }
    Some(PrincipalAxes {
        values,
        axes: axes.map(|a| a.normalize()),
    })
}

/// Median of `values`, reordering the slice in the process. The median of an even number of values
/// is the mean of the two middle values. Returns `None` for an empty slice
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let len = values.len();
    let (lower, upper_median, _) = values.select_nth_unstable_by_key(len / 2, |v| FloatOrd(*v));
    let upper_median = *upper_median;
    if len % 2 == 1 {
        return Some(upper_median);
    }
    let lower_median = lower
        .iter()
        .copied()
        .max_by_key(|v| FloatOrd(*v))
        .unwrap_or(upper_median);
    Some((lower_median + upper_median) / 2.0)
}

/// Mean and sample standard deviation of `values`. The standard deviation of a single value is zero
pub fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() == 1 {
        return Some((mean, 0.0));
    }
    let squared_sum: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    Some((mean, (squared_sum / (n - 1.0)).sqrt()))
}
