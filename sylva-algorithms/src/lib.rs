#![warn(clippy::all)]
//! Algorithms for individual tree isolation and stem measurement in forest LiDAR point clouds.
//!
//! Sylva separates an unsegmented point cloud into trees (density clustering or a graph-cut segmentation), measures
//! stem diameters with circle and cylinder fits and turns the result into a table of tree records.

// kd-tree backed k-nearest-neighbour and fixed-radius queries, in 3D or on the horizontal projection.
pub mod neighbours;
// Surface normals and curvature from the covariance of the k nearest neighbours.
pub mod normal_estimation;
// Algebraic least-squares circle fit and the circle through three points.
pub mod circle;
// Ransac cylinder fitting in serial and parallel that can be used to get the best cylinder model and the
// corresponding inlier indices.
pub mod cylinder;
// Iterative extraction of multiple cylinders (stems) from an unsegmented point cloud.
pub mod detection;
// Density based clustering (DBSCAN) on 3D positions or on the horizontal projection.
pub mod dbscan;
// Grid down-sampling with one representative point per occupied cell.
pub mod decimation;
// Statistical outlier removal based on the mean distance to the nearest neighbours.
pub mod outliers;
// Maximum flow / minimum cut on networks with real-valued capacities.
pub mod maxflow;
// L0 cut pursuit, the graph partitioning behind the graph-cut segmentation.
pub mod cut_pursuit;
// Three-stage graph-cut tree segmentation with decimation and optional outlier removal.
pub mod graphcut;
// Slenderness based correction of implausible tree heights.
pub mod height;
// Cluster summaries, diameter at breast height and tree records, plus their plausibility filter.
pub mod records;
// Pairing of tree records from two inventories by position.
pub mod matching;
// Common interface of the segmentation algorithms, selected by name.
pub mod segmenter;
// The complete inventory: segmentation, records, cleaning and height correction.
pub mod pipeline;
