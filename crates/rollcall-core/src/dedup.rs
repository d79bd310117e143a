//! Unknown-face deduplication by distance to first-sighting representatives.

use crate::types::{DistanceMetric, Embedding};

/// One unidentified person, represented by the vector of its first sighting.
///
/// The representative is never re-centred, so a cluster can drift away from
/// later sightings of the same person under different pose or lighting.
#[derive(Debug, Clone)]
pub struct UnknownCluster {
    pub representative: Embedding,
}

/// Append-only set of unknown clusters for one session.
#[derive(Debug, Clone)]
pub struct UnknownDeduplicator {
    merge_threshold: f32,
    metric: DistanceMetric,
    clusters: Vec<UnknownCluster>,
}

impl UnknownDeduplicator {
    pub fn new(merge_threshold: f32, metric: DistanceMetric) -> Self {
        Self {
            merge_threshold,
            metric,
            clusters: Vec::new(),
        }
    }

    /// Register an unknown sighting. Returns `true` if it started a new cluster.
    ///
    /// A vector within `merge_threshold` (inclusive) of any representative is
    /// merged and changes nothing.
    pub fn register_unknown(&mut self, vector: Embedding) -> bool {
        let merged = self
            .clusters
            .iter()
            .any(|c| self.metric.distance(&vector, &c.representative) <= self.merge_threshold);
        if merged {
            return false;
        }
        self.clusters.push(UnknownCluster {
            representative: vector,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn clear(&mut self) {
        self.clusters.clear();
    }
}
