use anyhow::{ensure, Result};
use float_ord::FloatOrd;
use sylva_core::nalgebra::Vector3;
use sylva_core::tree::TreeRecord;

use crate::neighbours::{Projection, SpatialIndex};

/// A reference tree and the candidate tree it was matched with. Indices refer to the input slices
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchedPair {
    pub reference: usize,
    pub candidate: usize,
    /// Horizontal distance between the two trees
    pub distance: f64,
    /// Candidate DBH minus reference DBH, if both trees have one
    pub dbh_difference_cm: Option<f64>,
}

/// Statistics of the DBH differences of all matched pairs with two diameters
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DifferenceStats {
    pub count: usize,
    pub mean: f64,
    pub mean_absolute: f64,
    pub root_mean_square: f64,
}

impl DifferenceStats {
    fn from_differences(differences: &[f64]) -> Option<Self> {
        if differences.is_empty() {
            return None;
        }
        let n = differences.len() as f64;
        Some(Self {
            count: differences.len(),
            mean: differences.iter().sum::<f64>() / n,
            mean_absolute: differences.iter().map(|d| d.abs()).sum::<f64>() / n,
            root_mean_square: (differences.iter().map(|d| d * d).sum::<f64>() / n).sqrt(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeMatching {
    /// Matched pairs, ordered by reference index
    pub pairs: Vec<MatchedPair>,
    pub unmatched_reference: Vec<usize>,
    pub unmatched_candidates: Vec<usize>,
    pub dbh_stats: Option<DifferenceStats>,
}

/// Pairs the trees of two inventories (e.g. from two segmentation methods) by horizontal position.
///
/// Every tree is matched at most once. All pairs closer than `max_distance` are considered, closest first, so a
/// candidate goes to the reference tree it is nearest to. Ties are broken by the lower reference index.
///
/// # Errors
///
/// If `max_distance` is not a positive number
pub fn match_trees(
    reference: &[TreeRecord],
    candidates: &[TreeRecord],
    max_distance: f64,
) -> Result<TreeMatching> {
    ensure!(
        max_distance.is_finite() && max_distance > 0.0,
        "max_distance must be a positive number, got {}",
        max_distance
    );
    let to_point = |record: &TreeRecord| Vector3::new(record.position.x, record.position.y, 0.0);
    let candidate_points: Vec<Vector3<f64>> = candidates.iter().map(to_point).collect();
    let index = SpatialIndex::build(&candidate_points, Projection::Horizontal);

    let mut possible: Vec<(FloatOrd<f64>, usize, usize)> = reference
        .iter()
        .enumerate()
        .flat_map(|(r, record)| {
            let query = to_point(record);
            index
                .within_radius(&query, max_distance)
                .into_iter()
                .map(move |c| (r, c))
        })
        .map(|(r, c)| {
            let distance = (reference[r].position - candidates[c].position).norm();
            (FloatOrd(distance), r, c)
        })
        .collect();
    possible.sort_unstable();

    let mut reference_taken = vec![false; reference.len()];
    let mut candidate_taken = vec![false; candidates.len()];
    let mut pairs = vec![];
    for (FloatOrd(distance), r, c) in possible {
        if reference_taken[r] || candidate_taken[c] {
            continue;
        }
        reference_taken[r] = true;
        candidate_taken[c] = true;
        let dbh_difference_cm = match (reference[r].dbh_cm, candidates[c].dbh_cm) {
            (Some(expected), Some(measured)) => Some(measured - expected),
            _ => None,
        };
        pairs.push(MatchedPair {
            reference: r,
            candidate: c,
            distance,
            dbh_difference_cm,
        });
    }
    pairs.sort_by_key(|pair| pair.reference);

    let differences: Vec<f64> = pairs.iter().filter_map(|p| p.dbh_difference_cm).collect();
    let matching = TreeMatching {
        dbh_stats: DifferenceStats::from_differences(&differences),
        unmatched_reference: (0..reference.len())
            .filter(|&r| !reference_taken[r])
            .collect(),
        unmatched_candidates: (0..candidates.len())
            .filter(|&c| !candidate_taken[c])
            .collect(),
        pairs,
    };
    log::info!(
        "Matched {} of {} reference trees ({} candidates)",
        matching.pairs.len(),
        reference.len(),
        candidates.len()
    );
    Ok(matching)
}
