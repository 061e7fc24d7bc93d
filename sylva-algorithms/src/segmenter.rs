use std::fmt::Display;
use std::str::FromStr;

use anyhow::{bail, Result};
use sylva_core::labels::LabelAssignment;
use sylva_core::nalgebra::Vector3;

use crate::dbscan::{cluster_density, DbscanParams};
use crate::graphcut::{segment_graphcut, GraphCutParams};

/// Splits a point cloud into trees. Returns one label per point, [NOISE](sylva_core::labels::NOISE) for points
/// that belong to no tree
pub trait Segmenter {
    fn name(&self) -> &'static str;
    fn segment(&self, points: &[Vector3<f64>]) -> Result<LabelAssignment>;
}

/// [Segmenter] based on [cluster_density]
#[derive(Debug, Clone, Default)]
pub struct DensityClustering {
    pub params: DbscanParams,
}

impl Segmenter for DensityClustering {
    fn name(&self) -> &'static str {
        "dbscan"
    }

    fn segment(&self, points: &[Vector3<f64>]) -> Result<LabelAssignment> {
        cluster_density(points, &self.params)
    }
}

/// [Segmenter] based on [segment_graphcut]
#[derive(Debug, Clone, Default)]
pub struct GraphCut {
    pub params: GraphCutParams,
}

impl Segmenter for GraphCut {
    fn name(&self) -> &'static str {
        "graphcut"
    }

    fn segment(&self, points: &[Vector3<f64>]) -> Result<LabelAssignment> {
        Ok(segment_graphcut(points, &self.params)?.labels)
    }
}

/// Names of the available segmenters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SegmenterKind {
    DensityClustering,
    GraphCut,
}

impl FromStr for SegmenterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dbscan" => Ok(Self::DensityClustering),
            "graphcut" => Ok(Self::GraphCut),
            other => bail!(
                "Unknown segmenter '{}', expected 'dbscan' or 'graphcut'",
                other
            ),
        }
    }
}

impl Display for SegmenterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DensityClustering => write!(f, "dbscan"),
            Self::GraphCut => write!(f, "graphcut"),
        }
    }
}

/// A segmenter together with its parameters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SegmenterConfig {
    DensityClustering(DbscanParams),
    GraphCut(GraphCutParams),
}

impl SegmenterConfig {
    /// Default parameters of the given segmenter
    pub fn with_defaults(kind: SegmenterKind) -> Self {
        match kind {
            SegmenterKind::DensityClustering => Self::DensityClustering(DbscanParams::default()),
            SegmenterKind::GraphCut => Self::GraphCut(GraphCutParams::default()),
        }
    }

    pub fn kind(&self) -> SegmenterKind {
        match self {
            Self::DensityClustering(_) => SegmenterKind::DensityClustering,
            Self::GraphCut(_) => SegmenterKind::GraphCut,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::DensityClustering(params) => params.validate(),
            Self::GraphCut(params) => params.validate(),
        }
    }

    pub fn build(&self) -> Box<dyn Segmenter + Send + Sync> {
        match self {
            Self::DensityClustering(params) => Box::new(DensityClustering { params: *params }),
            Self::GraphCut(params) => Box::new(GraphCut {
                params: params.clone(),
            }),
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::with_defaults(SegmenterKind::DensityClustering)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_by_name() {
        for name in ["dbscan", "graphcut"] {
            let kind: SegmenterKind = name.parse().unwrap();
            assert_eq!(kind.to_string(), name);
            let segmenter = SegmenterConfig::with_defaults(kind).build();
            assert_eq!(segmenter.name(), name);
        }
        assert!("kmeans".parse::<SegmenterKind>().is_err());
    }

    #[test]
    fn test_density_segmenter() {
        let points: Vec<_> = (0..20)
            .map(|i| Vector3::new(0.0, 0.0, i as f64 * 0.1))
            .collect();
        let segmenter = DensityClustering {
            params: DbscanParams {
                min_samples: 5,
                ..Default::default()
            },
        };
        let labels = segmenter.segment(&points).unwrap();
        assert_eq!(labels.num_clusters(), 1);
    }
}
