use std::fmt::{Display, Formatter};

use nalgebra::{Vector2, Vector3};

/// A finite cylinder, e.g. a tree stem segment
///
/// `axis` is always unit length and `center` is a point on the axis (the fitters use the inlier centroid projected
/// onto the axis). `radius` and `height` are never negative.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cylinder {
    pub axis: Vector3<f64>,
    pub center: Vector3<f64>,
    pub radius: f64,
    pub height: f64,
    pub inlier_count: usize,
}

impl Cylinder {
    /// Creates a new cylinder. The axis gets normalized, negative radius and height are clamped to zero
    ///
    /// # Panics
    ///
    /// If `axis` is the zero vector
    pub fn new(
        axis: Vector3<f64>,
        center: Vector3<f64>,
        radius: f64,
        height: f64,
        inlier_count: usize,
    ) -> Self {
        let norm = axis.norm();
        if norm == 0.0 {
            panic!("Cylinder::new: axis must not be the zero vector");
        }
        Self {
            axis: axis / norm,
            center,
            radius: radius.max(0.0),
            height: height.max(0.0),
            inlier_count,
        }
    }

    /// Perpendicular distance of `point` to the (infinite) axis line of this cylinder
    pub fn axis_distance(&self, point: &Vector3<f64>) -> f64 {
        axis_distance(&self.axis, &self.center, point)
    }

    /// Distance of `point` to the (infinite) cylinder surface
    pub fn surface_distance(&self, point: &Vector3<f64>) -> f64 {
        (self.axis_distance(point) - self.radius).abs()
    }

    pub fn diameter_cm(&self) -> f64 {
        self.radius * 200.0
    }
}

/// Perpendicular distance of `point` to the line through `origin` with unit direction `axis`
pub fn axis_distance(axis: &Vector3<f64>, origin: &Vector3<f64>, point: &Vector3<f64>) -> f64 {
    let offset = point - origin;
    (offset - axis * offset.dot(axis)).norm()
}

/// A circle in the horizontal plane, e.g. a breast-height stem cross-section
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Circle {
    pub center: Vector2<f64>,
    pub radius: f64,
}

impl Circle {
    pub fn diameter_cm(&self) -> f64 {
        self.radius * 200.0
    }

    pub fn distance(&self, point: &Vector2<f64>) -> f64 {
        ((point - self.center).norm() - self.radius).abs()
    }
}

/// Reason why a fitter produced no model. These are routine outcomes of a statistical search, not errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NoModel {
    /// Fewer points than the fit requires were supplied or ended up supporting the best model
    InsufficientData { available: usize, required: usize },
    /// The points do not define a model (e.g. collinear samples, singular least-squares system)
    Degenerate,
}

impl Display for NoModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NoModel::InsufficientData {
                available,
                required,
            } => write!(
                f,
                "insufficient data: {} points available, {} required",
                available, required
            ),
            NoModel::Degenerate => write!(f, "degenerate point configuration"),
        }
    }
}

impl std::error::Error for NoModel {}
