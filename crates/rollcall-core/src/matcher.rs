//! Nearest-neighbour identity decision against the gallery.

use crate::gallery::{Gallery, IdentityId};
use crate::types::{DistanceMetric, Embedding};

/// Outcome for one detected face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Known(IdentityId),
    Unknown,
}

/// Decision plus the distance to the nearest reference (if any).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub decision: Decision,
    pub distance: Option<f32>,
}

/// Strategy for deciding a probe embedding against a gallery.
pub trait Matcher {
    fn decide(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult;
}

/// Picks the closest reference; `Known` iff its distance is `<= threshold`.
///
/// Every reference is compared. Ties keep the earliest reference in gallery
/// order.
#[derive(Debug, Clone, Copy)]
pub struct NearestMatcher {
    pub threshold: f32,
    pub metric: DistanceMetric,
}

impl NearestMatcher {
    pub fn new(threshold: f32, metric: DistanceMetric) -> Self {
        Self { threshold, metric }
    }
}

impl Matcher for NearestMatcher {
    fn decide(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult {
        let mut best: Option<(f32, IdentityId)> = None;

        for reference in gallery.references() {
            let distance = self.metric.distance(probe, &reference.embedding);
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, reference.identity));
            }
        }

        match best {
            Some((distance, id)) if distance <= self.threshold => MatchResult {
                decision: Decision::Known(id),
                distance: Some(distance),
            },
            _ => MatchResult {
                decision: Decision::Unknown,
                distance: best.map(|(d, _)| d),
            },
        }
    }
}
