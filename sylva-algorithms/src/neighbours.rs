use std::marker::PhantomData;

use float_ord::FloatOrd;
use kd_tree::{KdPoint, KdTree};
use sylva_core::nalgebra::Vector3;
use typenum::{Unsigned, U2, U3};

/// Which coordinates take part in distance computations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Projection {
    /// Only x and y, i.e. the points are projected onto the horizontal plane
    #[default]
    Horizontal,
    /// All three coordinates
    Full,
}

/// A position together with its index in the point cloud it came from. `D` is the number of coordinates that the
/// kd-tree looks at (`U2` for the horizontal projection, `U3` for full 3D)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedPoint<D> {
    coords: [f64; 3],
    index: usize,
    _dim: PhantomData<D>,
}

impl<D> IndexedPoint<D> {
    pub fn new(position: &Vector3<f64>, index: usize) -> Self {
        Self {
            coords: [position.x, position.y, position.z],
            index,
            _dim: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl<D: Unsigned> KdPoint for IndexedPoint<D> {
    type Scalar = f64;
    type Dim = D;
    fn at(&self, k: usize) -> f64 {
        self.coords[k]
    }
}

/// A neighbour found by a [SpatialIndex] query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    pub index: usize,
    pub distance: f64,
}

enum IndexTree {
    Horizontal(KdTree<IndexedPoint<U2>>),
    Full(KdTree<IndexedPoint<U3>>),
}

/// kd-tree over a set of positions that answers k-nearest-neighbour and fixed-radius queries in either the
/// horizontal projection or full 3D. All results refer to indices into the positions that the index was built from
pub struct SpatialIndex {
    tree: IndexTree,
    positions: Vec<Vector3<f64>>,
}

impl SpatialIndex {
    pub fn build(positions: &[Vector3<f64>], projection: Projection) -> Self {
        let tree = match projection {
            Projection::Horizontal => IndexTree::Horizontal(KdTree::build_by_ordered_float(
                indexed_points(positions),
            )),
            Projection::Full => {
                IndexTree::Full(KdTree::build_by_ordered_float(indexed_points(positions)))
            }
        };
        Self {
            tree,
            positions: positions.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn projection(&self) -> Projection {
        match self.tree {
            IndexTree::Horizontal(_) => Projection::Horizontal,
            IndexTree::Full(_) => Projection::Full,
        }
    }

    /// The `min(k, len)` nearest neighbours of `query`, closest first. If `query` is one of the indexed positions, it
    /// is part of the result (at distance zero)
    pub fn nearest_k(&self, query: &Vector3<f64>, k: usize) -> Vec<Neighbour> {
        if k == 0 || self.is_empty() {
            return vec![];
        }
        // the kd-tree may return fewer than k items when k covers the whole tree
        if k >= self.len() {
            return self.all_by_distance(query);
        }
        match &self.tree {
            IndexTree::Horizontal(tree) => tree
                .nearests(&IndexedPoint::<U2>::new(query, usize::MAX), k)
                .into_iter()
                .map(|found| Neighbour {
                    index: found.item.index,
                    distance: found.squared_distance.sqrt(),
                })
                .collect(),
            IndexTree::Full(tree) => tree
                .nearests(&IndexedPoint::<U3>::new(query, usize::MAX), k)
                .into_iter()
                .map(|found| Neighbour {
                    index: found.item.index,
                    distance: found.squared_distance.sqrt(),
                })
                .collect(),
        }
    }

    /// Every indexed position as a neighbour of `query`, closest first (ties by index)
    fn all_by_distance(&self, query: &Vector3<f64>) -> Vec<Neighbour> {
        let projection = self.projection();
        let mut all: Vec<Neighbour> = self
            .positions
            .iter()
            .enumerate()
            .map(|(index, p)| {
                let offset = p - query;
                let distance = match projection {
                    Projection::Horizontal => offset.xy().norm(),
                    Projection::Full => offset.norm(),
                };
                Neighbour { index, distance }
            })
            .collect();
        all.sort_by_key(|n| (FloatOrd(n.distance), n.index));
        all
    }

    /// Indices of all positions within `radius` of `query` (boundary included), in no particular order
    pub fn within_radius(&self, query: &Vector3<f64>, radius: f64) -> Vec<usize> {
        match &self.tree {
            IndexTree::Horizontal(tree) => tree
                .within_radius(&IndexedPoint::<U2>::new(query, usize::MAX), radius)
                .into_iter()
                .map(|found| found.index)
                .collect(),
            IndexTree::Full(tree) => tree
                .within_radius(&IndexedPoint::<U3>::new(query, usize::MAX), radius)
                .into_iter()
                .map(|found| found.index)
                .collect(),
        }
    }
}

fn indexed_points<D>(positions: &[Vector3<f64>]) -> Vec<IndexedPoint<D>> {
    positions
        .iter()
        .enumerate()
        .map(|(index, position)| IndexedPoint::new(position, index))
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;

    fn stacked_positions() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 10.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(5.0, 5.0, 0.0),
        ]
    }

    #[test]
    fn test_horizontal_ignores_z() {
        let positions = stacked_positions();
        let index = SpatialIndex::build(&positions, Projection::Horizontal);
        let mut found = index.within_radius(&positions[0], 0.5);
        found.sort_unstable();
        assert_eq!(found, vec![0, 1]);
    }

    #[test]
    fn test_full_uses_z() {
        let positions = stacked_positions();
        let index = SpatialIndex::build(&positions, Projection::Full);
        let nearest = index.nearest_k(&positions[0], 2);
        assert_eq!(nearest[0].index, 0);
        assert_eq!(nearest[1].index, 2);
        assert_approx_eq!(nearest[1].distance, 1.0);
        assert_eq!(index.within_radius(&positions[0], 0.5), vec![0]);
    }

    #[test]
    fn test_nearest_k_covering_the_whole_index() {
        let positions = vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(3.0, 0.0, 0.0)];
        let index = SpatialIndex::build(&positions, Projection::Full);
        for query in &positions {
            assert_eq!(index.nearest_k(query, 2).len(), 2);
            assert_eq!(index.nearest_k(query, 5).len(), 2);
        }
        let from_second = index.nearest_k(&positions[1], 2);
        assert_eq!(from_second[0].index, 1);
        assert_eq!(from_second[1].index, 0);
        assert_approx_eq!(from_second[1].distance, 3.0);

        let stacked = SpatialIndex::build(&stacked_positions(), Projection::Horizontal);
        let all = stacked.nearest_k(&Vector3::new(0.0, 0.0, 50.0), 4);
        let order: Vec<usize> = all.iter().map(|n| n.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_approx_eq!(all[1].distance, 0.0);
    }

    #[test]
    fn test_empty_index() {
        let index = SpatialIndex::build(&[], Projection::Full);
        assert!(index.is_empty());
        assert!(index.nearest_k(&Vector3::zeros(), 3).is_empty());
    }
}
