//! Static anchor layout shared read-only by the pipeline

use crate::core::constants::MIN_ANCHORS;
use crate::core::types::{Anchor, AnchorId};
use crate::utils::config::ConfigError;
use nalgebra::Vector3;
use std::collections::HashMap;

/// Ordered, validated set of anchors.
///
/// The insertion order is the canonical order used for every emitted
/// measurement set. The topology never changes after construction.
#[derive(Debug, Clone)]
pub struct AnchorTopology {
    anchors: Vec<Anchor>,
    index: HashMap<AnchorId, usize>,
}

impl AnchorTopology {
    pub fn new(anchors: Vec<Anchor>) -> Result<Self, ConfigError> {
        if anchors.len() < MIN_ANCHORS {
            return Err(ConfigError::InsufficientAnchors {
                available: anchors.len(),
                required: MIN_ANCHORS,
            });
        }

        let mut index = HashMap::with_capacity(anchors.len());
        for (idx, anchor) in anchors.iter().enumerate() {
            if !anchor.position.is_finite() {
                return Err(ConfigError::InvalidParameter {
                    parameter: format!("anchors[{}].position", anchor.id),
                    value: format!("{:?}", anchor.position),
                    reason: "anchor coordinates must be finite".to_string(),
                });
            }
            if index.insert(anchor.id.clone(), idx).is_some() {
                return Err(ConfigError::DuplicateAnchor {
                    anchor_id: anchor.id.clone(),
                });
            }
        }

        Ok(Self { anchors, index })
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    /// Anchor ids in canonical order
    pub fn ids(&self) -> Vec<AnchorId> {
        self.anchors.iter().map(|a| a.id.clone()).collect()
    }

    /// Anchor positions in canonical order
    pub fn positions(&self) -> Vec<Vector3<f64>> {
        self.anchors.iter().map(|a| a.position.to_vector3()).collect()
    }

    pub fn contains(&self, anchor_id: &str) -> bool {
        self.index.contains_key(anchor_id)
    }

    pub fn index_of(&self, anchor_id: &str) -> Option<usize> {
        self.index.get(anchor_id).copied()
    }

    pub fn position_of(&self, anchor_id: &str) -> Option<Vector3<f64>> {
        self.index_of(anchor_id)
            .map(|idx| self.anchors[idx].position.to_vector3())
    }

    /// Positions for an arbitrary list of ids, `None` if any id is unknown
    pub fn positions_for(&self, anchor_ids: &[AnchorId]) -> Option<Vec<Vector3<f64>>> {
        anchor_ids.iter().map(|id| self.position_of(id)).collect()
    }
}
