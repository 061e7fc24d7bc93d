use std::collections::BTreeMap;

use anyhow::{ensure, Result};
use float_ord::FloatOrd;
use rayon::prelude::*;
use sylva_core::labels::{LabelAssignment, NOISE};
use sylva_core::math::centroid;
use sylva_core::nalgebra::{Vector2, Vector3};

use crate::cut_pursuit::{cut_pursuit, CutPursuitParams, WeightedGraph};
use crate::decimation::decimate;
use crate::neighbours::{Projection, SpatialIndex};
use crate::outliers::{statistical_outlier_mask, OutlierFilterParams};

/// One stage of the graph-cut segmentation. Stages run in the order given in [GraphCutParams::stages]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SegmentationStage {
    /// Cut pursuit on the 3D positions over a k-nearest-neighbour graph with unit weights
    Initial3d,
    /// Cut pursuit on the horizontal positions, with edges weighted by the distance between the segments of the
    /// previous stage. Merges fragments of the same stem
    Intermediate2d,
    /// Attaches segments that do not reach down to the stem layer to the closest rooted segment
    FinalMerge,
}

/// Parameters of [segment_graphcut]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphCutParams {
    /// Grid resolution of the down-sampling
    pub decimate_res: f64,
    /// Regularization strength of the 3D stage
    pub reg_strength1: f64,
    /// Neighbours per point in the 3D stage graph
    pub min_nn1: usize,
    /// Regularization strength of the 2D stage
    pub reg_strength2: f64,
    /// Neighbours per point (and per segment) in the 2D stage graph
    pub min_nn2: usize,
    /// Points of two segments are only connected in the 2D stage if the segments are closer than this
    pub max_edge_distance: f64,
    pub stages: Vec<SegmentationStage>,
    /// Statistical outlier removal before the segmentation. Removed points are labeled as noise
    pub outlier_filter: Option<OutlierFilterParams>,
    /// A segment is rooted if its lowest point is at most this far above the lowest point of all segments
    pub max_base_gap: f64,
    /// Unrooted segments are merged into a rooted segment whose horizontal centroid is at most this far away
    pub max_merge_distance: f64,
}

impl GraphCutParams {
    /// Parameters for dense terrestrial scans
    pub fn tls() -> Self {
        Self {
            decimate_res: 0.05,
            reg_strength1: 1.0,
            min_nn1: 5,
            reg_strength2: 20.0,
            min_nn2: 20,
            max_edge_distance: 2.0,
            stages: vec![
                SegmentationStage::Initial3d,
                SegmentationStage::Intermediate2d,
                SegmentationStage::FinalMerge,
            ],
            outlier_filter: None,
            max_base_gap: 1.5,
            max_merge_distance: 1.0,
        }
    }

    /// Parameters for sparse aerial (UAV) scans: stronger regularization, coarser decimation, outlier removal and no
    /// final merge
    pub fn aerial() -> Self {
        Self {
            decimate_res: 0.1,
            reg_strength1: 5.0,
            min_nn1: 10,
            reg_strength2: 100.0,
            min_nn2: 50,
            stages: vec![
                SegmentationStage::Initial3d,
                SegmentationStage::Intermediate2d,
            ],
            outlier_filter: Some(OutlierFilterParams {
                neighbours: 30,
                std_ratio: 1.5,
            }),
            ..Self::tls()
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.decimate_res.is_finite() && self.decimate_res > 0.0,
            "decimate_res must be a positive number, got {}",
            self.decimate_res
        );
        for (name, strength) in [
            ("reg_strength1", self.reg_strength1),
            ("reg_strength2", self.reg_strength2),
        ] {
            ensure!(
                strength.is_finite() && strength >= 0.0,
                "{} must be non-negative, got {}",
                name,
                strength
            );
        }
        ensure!(
            self.min_nn1 > 0 && self.min_nn2 > 0,
            "min_nn1 and min_nn2 must be at least 1"
        );
        ensure!(
            self.max_edge_distance > 0.0,
            "max_edge_distance must be positive, got {}",
            self.max_edge_distance
        );
        ensure!(
            self.max_base_gap >= 0.0 && self.max_merge_distance >= 0.0,
            "max_base_gap and max_merge_distance must be non-negative"
        );
        ensure!(
            self.stages.first() == Some(&SegmentationStage::Initial3d),
            "The first segmentation stage must be Initial3d, got {:?}",
            self.stages
        );
        ensure!(
            self.stages.windows(2).all(|pair| pair[0] < pair[1]),
            "Segmentation stages must be unique and in pipeline order, got {:?}",
            self.stages
        );
        if let Some(filter) = &self.outlier_filter {
            filter.validate()?;
        }
        Ok(())
    }
}

impl Default for GraphCutParams {
    fn default() -> Self {
        Self::aerial()
    }
}

/// Statistics of one stage of [segment_graphcut]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StageStats {
    pub stage: SegmentationStage,
    /// Number of segments after the stage
    pub segment_count: usize,
    /// Segments without any point that the stage had to skip
    pub empty_segments_skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphCutOutput {
    /// One label per input point. Points removed by the outlier filter are noise
    pub labels: LabelAssignment,
    pub stage_stats: Vec<StageStats>,
    pub removed_outliers: usize,
    /// Number of points after the down-sampling
    pub decimated_points: usize,
}

/// Hierarchical graph-cut segmentation of a point cloud into trees.
///
/// The points are optionally cleaned with a statistical outlier filter, centered and down-sampled to one point per
/// grid cell of size `decimate_res`. The configured [stages](SegmentationStage) then run on the down-sampled points
/// and the final segment of every grid cell is broadcast back to all points of that cell. Labels are numbered in
/// order of first occurrence.
///
/// Higher regularization strengths give fewer, larger segments.
pub fn segment_graphcut(points: &[Vector3<f64>], params: &GraphCutParams) -> Result<GraphCutOutput> {
    params.validate()?;
    if points.is_empty() {
        return Ok(GraphCutOutput {
            labels: LabelAssignment::new(vec![]),
            stage_stats: vec![],
            removed_outliers: 0,
            decimated_points: 0,
        });
    }

    let kept: Vec<usize> = match &params.outlier_filter {
        Some(filter) => {
            let mask = statistical_outlier_mask(points, filter)?;
            (0..points.len()).filter(|&i| mask[i]).collect()
        }
        None => (0..points.len()).collect(),
    };
    let kept_positions: Vec<Vector3<f64>> = kept.iter().map(|&i| points[i]).collect();
    let center = centroid(&kept_positions).unwrap_or_else(Vector3::zeros);
    let centered: Vec<Vector3<f64>> = kept_positions.iter().map(|p| p - center).collect();

    let decimation = decimate(&centered, params.decimate_res)?;
    let cells = decimation.representative_positions(&centered);
    log::info!(
        "Graph-cut segmentation of {} points ({} outliers removed, {} after decimation)",
        kept.len(),
        points.len() - kept.len(),
        cells.len()
    );

    let mut segments = vec![0; cells.len()];
    let mut stage_stats = Vec::with_capacity(params.stages.len());
    for &stage in &params.stages {
        let empty_segments_skipped = match stage {
            SegmentationStage::Initial3d => {
                segments = initial_segmentation(&cells, params)?;
                0
            }
            SegmentationStage::Intermediate2d => {
                let (next, skipped) = intermediate_segmentation(&cells, &segments, params)?;
                segments = next;
                skipped
            }
            SegmentationStage::FinalMerge => {
                segments = final_merge(&cells, &segments, params);
                0
            }
        };
        let segment_count = compact(&mut segments);
        log::info!("{:?}: {} segments", stage, segment_count);
        stage_stats.push(StageStats {
            stage,
            segment_count,
            empty_segments_skipped,
        });
    }

    let cell_labels = LabelAssignment::new(segments.iter().map(|&s| s as i32).collect());
    let kept_labels = decimation.broadcast(&cell_labels);
    let mut labels = vec![NOISE; points.len()];
    for (kept_index, &original) in kept.iter().enumerate() {
        labels[original] = kept_labels.get(kept_index);
    }

    Ok(GraphCutOutput {
        labels: LabelAssignment::new(labels).relabeled(),
        stage_stats,
        removed_outliers: points.len() - kept.len(),
        decimated_points: cells.len(),
    })
}

/// The `k` nearest neighbours of every point, the point itself excluded
fn knn_lists(points: &[Vector3<f64>], k: usize) -> Vec<Vec<usize>> {
    let index = SpatialIndex::build(points, Projection::Full);
    points
        .par_iter()
        .enumerate()
        .map(|(own_index, p)| {
            index
                .nearest_k(p, k + 1)
                .into_iter()
                .map(|n| n.index)
                .filter(|&n| n != own_index)
                .take(k)
                .collect()
        })
        .collect()
}

fn initial_segmentation(cells: &[Vector3<f64>], params: &GraphCutParams) -> Result<Vec<usize>> {
    let mut graph = WeightedGraph::new(cells.len());
    for (node, neighbours) in knn_lists(cells, params.min_nn1).into_iter().enumerate() {
        for neighbour in neighbours {
            graph.add_edge(node, neighbour, 1.0)?;
        }
    }
    let solution = cut_pursuit(
        &graph,
        cells,
        &CutPursuitParams::with_lambda(params.reg_strength1),
    )?;
    Ok(solution.segments)
}

/// Returns the new segments and the number of empty input segments that were skipped
fn intermediate_segmentation(
    cells: &[Vector3<f64>],
    segments: &[usize],
    params: &GraphCutParams,
) -> Result<(Vec<usize>, usize)> {
    let segment_count = segments.iter().max().map_or(0, |&max| max + 1);
    let mut members = vec![vec![]; segment_count];
    for (cell, &segment) in segments.iter().enumerate() {
        members[segment].push(cell);
    }
    let occupied: Vec<usize> = (0..segment_count)
        .filter(|&s| !members[s].is_empty())
        .collect();
    let empty_segments = segment_count - occupied.len();
    if empty_segments > 0 {
        log::warn!("Skipping {} empty segments", empty_segments);
    }

    let segment_distances = segment_distances(cells, &members, &occupied, params.min_nn2);

    let mut graph = WeightedGraph::new(cells.len());
    for (node, neighbours) in knn_lists(cells, params.min_nn2).into_iter().enumerate() {
        for neighbour in neighbours {
            let (a, b) = (segments[node], segments[neighbour]);
            let distance = if a == b {
                Some(0.0)
            } else {
                segment_distances.get(&(a.min(b), a.max(b))).copied()
            };
            match distance {
                Some(d) if d < params.max_edge_distance => {
                    graph.add_edge(node, neighbour, 0.1 / (d + 0.01))?
                }
                _ => {}
            }
        }
    }

    let observations: Vec<Vector2<f64>> = cells.iter().map(|p| p.xy()).collect();
    let solution = cut_pursuit(
        &graph,
        &observations,
        &CutPursuitParams::with_lambda(params.reg_strength2),
    )?;
    Ok((solution.segments, empty_segments))
}

/// Smallest point-to-point distance between every segment and its `k` nearest segments (by centroid). Keys are
/// ordered segment pairs
fn segment_distances(
    cells: &[Vector3<f64>],
    members: &[Vec<usize>],
    occupied: &[usize],
    k: usize,
) -> BTreeMap<(usize, usize), f64> {
    let positions_of = |segment: usize| -> Vec<Vector3<f64>> {
        members[segment].iter().map(|&cell| cells[cell]).collect()
    };
    let centroids: Vec<Vector3<f64>> = occupied
        .iter()
        .map(|&s| centroid(&positions_of(s)).unwrap_or_else(Vector3::zeros))
        .collect();
    let centroid_index = SpatialIndex::build(&centroids, Projection::Full);

    occupied
        .par_iter()
        .enumerate()
        .flat_map_iter(|(slot, &segment)| {
            let own_index = SpatialIndex::build(&positions_of(segment), Projection::Full);
            centroid_index
                .nearest_k(&centroids[slot], k + 1)
                .into_iter()
                .filter(|n| n.index != slot)
                .map(|n| {
                    let other = occupied[n.index];
                    let distance = members[other]
                        .iter()
                        .filter_map(|&cell| own_index.nearest_k(&cells[cell], 1).first().copied())
                        .map(|nearest| nearest.distance)
                        .fold(f64::INFINITY, f64::min);
                    ((segment.min(other), segment.max(other)), distance)
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Merges segments that start too high above the lowest segment base into the horizontally closest rooted segment
fn final_merge(cells: &[Vector3<f64>], segments: &[usize], params: &GraphCutParams) -> Vec<usize> {
    let segment_count = segments.iter().max().map_or(0, |&max| max + 1);
    let mut base = vec![f64::INFINITY; segment_count];
    let mut sums = vec![Vector2::zeros(); segment_count];
    let mut counts = vec![0usize; segment_count];
    for (cell, &segment) in segments.iter().enumerate() {
        base[segment] = base[segment].min(cells[cell].z);
        sums[segment] += cells[cell].xy();
        counts[segment] += 1;
    }
    let lowest = base.iter().copied().fold(f64::INFINITY, f64::min);
    let center = |s: usize| sums[s] / counts[s] as f64;
    let is_rooted = |s: usize| counts[s] > 0 && base[s] <= lowest + params.max_base_gap;

    let rooted: Vec<usize> = (0..segment_count).filter(|&s| is_rooted(s)).collect();
    let target: Vec<usize> = (0..segment_count)
        .map(|s| {
            if counts[s] == 0 || is_rooted(s) {
                return s;
            }
            rooted
                .iter()
                .copied()
                .map(|r| (r, (center(r) - center(s)).norm()))
                .min_by_key(|&(_, distance)| FloatOrd(distance))
                .filter(|&(_, distance)| distance <= params.max_merge_distance)
                .map_or(s, |(r, _)| r)
        })
        .collect();
    log::debug!(
        "Final merge: {} of {} segments attached to a rooted segment",
        target.iter().enumerate().filter(|(s, t)| s != *t).count(),
        segment_count
    );
    segments.iter().map(|&s| target[s]).collect()
}

/// Renumbers segment ids to `0..n` in order of first occurrence and returns `n`
fn compact(segments: &mut [usize]) -> usize {
    let mut mapping = BTreeMap::new();
    for segment in segments.iter_mut() {
        let next = mapping.len();
        *segment = *mapping.entry(*segment).or_insert(next);
    }
    mapping.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Vertical stem of points spaced `spacing` apart, starting at `base`
    fn stem(base: Vector3<f64>, height: f64, spacing: f64) -> Vec<Vector3<f64>> {
        let count = (height / spacing) as usize;
        (0..count)
            .flat_map(|i| {
                let z = i as f64 * spacing;
                (0..4).map(move |j| {
                    let angle = j as f64 * std::f64::consts::FRAC_PI_2;
                    base + Vector3::new(0.1 * angle.cos(), 0.1 * angle.sin(), z)
                })
            })
            .collect()
    }

    fn params_without_filter() -> GraphCutParams {
        GraphCutParams {
            outlier_filter: None,
            ..GraphCutParams::tls()
        }
    }

    #[test]
    fn test_presets_are_valid() {
        GraphCutParams::tls().validate().unwrap();
        GraphCutParams::aerial().validate().unwrap();
        assert_eq!(GraphCutParams::default(), GraphCutParams::aerial());
        assert!(!GraphCutParams::aerial()
            .stages
            .contains(&SegmentationStage::FinalMerge));
    }

    #[test]
    fn test_invalid_stage_lists() {
        let mut params = GraphCutParams::tls();
        params.stages = vec![SegmentationStage::Intermediate2d];
        assert!(params.validate().is_err());
        params.stages = vec![
            SegmentationStage::Initial3d,
            SegmentationStage::Initial3d,
        ];
        assert!(params.validate().is_err());
        params.stages = vec![];
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_two_separate_stems() {
        let mut points = stem(Vector3::zeros(), 4.0, 0.1);
        let first_count = points.len();
        points.extend(stem(Vector3::new(6.0, 0.0, 0.0), 4.0, 0.1));
        let output = segment_graphcut(&points, &params_without_filter()).unwrap();
        assert_eq!(output.labels.len(), points.len());
        assert_eq!(output.labels.noise_count(), 0);
        // no segment spans both stems
        let first: Vec<i32> = output.labels.as_slice()[..first_count].to_vec();
        assert!(output.labels.as_slice()[first_count..]
            .iter()
            .all(|label| !first.contains(label)));
        assert_eq!(output.stage_stats.len(), 3);
        assert_eq!(output.stage_stats[1].empty_segments_skipped, 0);
    }

    #[test]
    fn test_points_in_one_cell_share_a_label() {
        let mut points = stem(Vector3::zeros(), 2.0, 0.1);
        points.push(points[0] + Vector3::new(-0.01, 0.0, 0.01));
        let output = segment_graphcut(&points, &params_without_filter()).unwrap();
        assert_eq!(
            output.labels.get(0),
            output.labels.get(points.len() - 1)
        );
        assert!(output.decimated_points < points.len());
    }

    #[test]
    fn test_removed_outliers_are_noise() {
        let mut points = stem(Vector3::zeros(), 4.0, 0.05);
        points.push(Vector3::new(30.0, 30.0, 30.0));
        let params = GraphCutParams {
            outlier_filter: Some(OutlierFilterParams::default()),
            ..GraphCutParams::tls()
        };
        let output = segment_graphcut(&points, &params).unwrap();
        assert!(output.removed_outliers >= 1);
        assert!(output.labels.is_noise(points.len() - 1));
    }

    #[test]
    fn test_final_merge_attaches_floating_segment() {
        // cells 0, 1 form a rooted segment, cell 2 floats above it and cell 3 floats far away
        let cells = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.2, 0.0, 5.0),
            Vector3::new(9.0, 0.0, 5.0),
        ];
        let merged = final_merge(&cells, &[0, 0, 1, 2], &GraphCutParams::tls());
        assert_eq!(merged, vec![0, 0, 0, 2]);
    }

    #[test]
    fn test_compact() {
        let mut segments = vec![5, 5, 2, 9, 2];
        assert_eq!(compact(&mut segments), 3);
        assert_eq!(segments, vec![0, 0, 1, 2, 1]);
    }

    #[test]
    fn test_empty_input() {
        let output = segment_graphcut(&[], &GraphCutParams::default()).unwrap();
        assert!(output.labels.is_empty());
    }
}
