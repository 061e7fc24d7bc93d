#![warn(clippy::all)]

//! Core data structures for individual tree isolation in forest LiDAR point clouds
//!
//! Sylva works on plain in-memory point clouds (see [PointCloud](crate::cloud::PointCloud)). The algorithms
//! in `sylva-algorithms` never mutate a point cloud. They produce [label assignments](crate::labels::LabelAssignment),
//! fitted [models](crate::model) and [tree records](crate::tree::TreeRecord) that refer back to it.

pub extern crate nalgebra;

/// Immutable point cloud storage
pub mod cloud;
/// Per-point cluster labels with a reserved noise sentinel
pub mod labels;
/// Useful mathematical tools when working with point cloud data
pub mod math;
/// Geometric primitives (cylinders, circles) produced by the fitters
pub mod model;
/// Per-tree output records
pub mod tree;

pub use self::cloud::PointCloud;
pub use self::labels::{LabelAssignment, NOISE};
