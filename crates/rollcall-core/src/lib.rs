//! rollcall-core — Recognition decisions for continuous attendance capture.
//!
//! Gallery matching, frame throttling, per-identity debounce, unknown-face
//! deduplication and the append-only attendance ledger, plus an ONNX
//! embedder (SCRFD detection, ArcFace recognition) for CPU inference.

pub mod alignment;
pub mod cooldown;
pub mod dedup;
pub mod detector;
pub mod embedder;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod recognizer;
pub mod throttle;
pub mod types;

pub use cooldown::{CooldownKey, CooldownTracker};
pub use dedup::{UnknownCluster, UnknownDeduplicator};
pub use embedder::{EmbeddingError, FaceEmbedder, OnnxEmbedder};
pub use gallery::{Gallery, GalleryError, Identity, IdentityId, IdentityMeta};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, LedgerScope};
pub use matcher::{Decision, MatchResult, Matcher, NearestMatcher};
pub use throttle::FrameThrottle;
pub use types::{BoundingBox, DistanceMetric, Embedding};

/// Default directory holding the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    data_dir().join("models")
}

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
pub fn data_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
