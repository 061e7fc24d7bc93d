use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;

/// Label value for points that belong to no cluster
pub const NOISE: i32 = -1;

/// Assignment of one integer cluster label to every point of a point cloud.
///
/// Label values carry no meaning apart from grouping points: two assignments that group the same points together
/// describe the same partition even if their label ids differ (see [same_partition](LabelAssignment::same_partition)).
/// The value [NOISE] marks points that belong to no cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelAssignment {
    labels: Vec<i32>,
}

impl LabelAssignment {
    pub fn new(labels: Vec<i32>) -> Self {
        Self { labels }
    }

    /// Creates an assignment of `count` points that are all labeled as noise
    pub fn all_noise(count: usize) -> Self {
        Self {
            labels: vec![NOISE; count],
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, point_index: usize) -> i32 {
        self.labels[point_index]
    }

    pub fn set(&mut self, point_index: usize, label: i32) {
        self.labels[point_index] = label;
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.labels
    }

    pub fn into_inner(self) -> Vec<i32> {
        self.labels
    }

    pub fn is_noise(&self, point_index: usize) -> bool {
        self.labels[point_index] == NOISE
    }

    /// Distinct non-noise labels in ascending order
    pub fn cluster_ids(&self) -> Vec<i32> {
        self.labels
            .iter()
            .copied()
            .filter(|&label| label != NOISE)
            .sorted()
            .dedup()
            .collect()
    }

    /// Number of distinct non-noise labels
    pub fn num_clusters(&self) -> usize {
        self.cluster_ids().len()
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|&&label| label == NOISE).count()
    }

    /// Point indices of every non-noise cluster, keyed by label. Indices of each cluster are in ascending order
    pub fn cluster_indices(&self) -> BTreeMap<i32, Vec<usize>> {
        let mut clusters: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (index, &label) in self.labels.iter().enumerate() {
            if label != NOISE {
                clusters.entry(label).or_default().push(index);
            }
        }
        clusters
    }

    /// Renames the labels to `0..num_clusters()` in order of first occurrence. Noise stays noise
    pub fn relabeled(&self) -> Self {
        let mut mapping: HashMap<i32, i32> = HashMap::new();
        let labels = self
            .labels
            .iter()
            .map(|&label| {
                if label == NOISE {
                    return NOISE;
                }
                let next = mapping.len() as i32;
                *mapping.entry(label).or_insert(next)
            })
            .collect();
        Self { labels }
    }

    /// Returns true if both assignments group the points in the same way, regardless of the actual label ids.
    /// Noise has to match exactly
    ///
    /// ```
    /// # use sylva_core::labels::{LabelAssignment, NOISE};
    /// let a = LabelAssignment::new(vec![0, 0, 1, NOISE]);
    /// let b = LabelAssignment::new(vec![7, 7, 3, NOISE]);
    /// assert!(a.same_partition(&b));
    /// ```
    pub fn same_partition(&self, other: &LabelAssignment) -> bool {
        self.len() == other.len() && self.relabeled() == other.relabeled()
    }
}

impl From<Vec<i32>> for LabelAssignment {
    fn from(labels: Vec<i32>) -> Self {
        Self::new(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_counts() {
        let labels = LabelAssignment::new(vec![3, NOISE, 3, 0, NOISE, 5]);
        assert_eq!(labels.cluster_ids(), vec![0, 3, 5]);
        assert_eq!(labels.num_clusters(), 3);
        assert_eq!(labels.noise_count(), 2);
        assert_eq!(labels.cluster_indices()[&3], vec![0, 2]);
    }

    #[test]
    fn test_relabeled_uses_first_occurrence() {
        let labels = LabelAssignment::new(vec![9, 4, NOISE, 9, 2]);
        assert_eq!(labels.relabeled().as_slice(), &[0, 1, NOISE, 0, 2]);
    }

    #[test]
    fn test_same_partition() {
        let a = LabelAssignment::new(vec![1, 1, 2, 2]);
        assert!(a.same_partition(&LabelAssignment::new(vec![5, 5, 0, 0])));
        assert!(!a.same_partition(&LabelAssignment::new(vec![5, 0, 0, 0])));
        assert!(!a.same_partition(&LabelAssignment::new(vec![1, 1, 2, NOISE])));
        assert!(!a.same_partition(&LabelAssignment::new(vec![1, 1, 2])));
    }
}
