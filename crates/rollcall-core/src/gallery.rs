//! Enrolled identities and their reference embeddings.
//!
//! Loaded once at startup from a JSON manifest; read-only afterwards.

use crate::embedder::FaceEmbedder;
use crate::types::Embedding;
use rollcall_hw::Frame;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("identity name must not be empty")]
    EmptyName,
    #[error("identity name {0:?} contains control characters")]
    InvalidName(String),
    #[error("duplicate identity name: {0}")]
    DuplicateName(String),
    #[error("identity {0} has no reference embeddings")]
    NoEmbeddings(String),
}

/// Optional roster metadata carried alongside an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Index of an identity within its [`Gallery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityId(usize);

#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub name: String,
    pub meta: IdentityMeta,
}

#[derive(Debug, Clone)]
pub struct Reference {
    pub identity: IdentityId,
    pub embedding: Embedding,
}

/// One manifest entry: `{"name": "ANA", "images": ["ana/1.jpg"], "course": "..."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    #[serde(default)]
    pub images: Vec<PathBuf>,
    #[serde(flatten)]
    pub meta: IdentityMeta,
}

/// The enrolled set, in manifest order. Reference order decides match ties.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
    references: Vec<Reference>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll an identity with one or more reference embeddings.
    ///
    /// Names are unique case-insensitively.
    pub fn add_identity(
        &mut self,
        name: &str,
        meta: IdentityMeta,
        embeddings: Vec<Embedding>,
    ) -> Result<IdentityId, GalleryError> {
        let name = validate_name(name)?;
        if self.find(name).is_some() {
            return Err(GalleryError::DuplicateName(name.to_string()));
        }
        if embeddings.is_empty() {
            return Err(GalleryError::NoEmbeddings(name.to_string()));
        }

        let id = IdentityId(self.identities.len());
        self.identities.push(Identity {
            name: name.to_string(),
            meta,
        });
        self.references.extend(
            embeddings
                .into_iter()
                .map(|embedding| Reference { identity: id, embedding }),
        );
        Ok(id)
    }

    /// Number of enrolled identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identity(&self, id: IdentityId) -> &Identity {
        &self.identities[id.0]
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn find(&self, name: &str) -> Option<IdentityId> {
        self.identities
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(name.trim()))
            .map(IdentityId)
    }

    /// Load a manifest and derive reference embeddings through `embedder`.
    ///
    /// Image paths are relative to the manifest's directory. Unreadable
    /// images and images without a face are skipped; an identity left with
    /// no embeddings is dropped.
    pub fn load(manifest_path: &Path, embedder: &mut dyn FaceEmbedder) -> Result<Self, GalleryError> {
        let entries = read_manifest(manifest_path)?;
        let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));

        let mut gallery = Gallery::new();
        for entry in entries {
            let embeddings: Vec<Embedding> = entry
                .images
                .iter()
                .filter_map(|image| reference_embedding(&base.join(image), embedder))
                .collect();

            if embeddings.is_empty() {
                tracing::warn!(name = %entry.name, "no usable face in any image; identity skipped");
                continue;
            }
            let count = embeddings.len();
            gallery.add_identity(&entry.name, entry.meta, embeddings)?;
            tracing::debug!(name = %entry.name, embeddings = count, "identity enrolled");
        }

        tracing::info!(
            identities = gallery.len(),
            references = gallery.references.len(),
            manifest = %manifest_path.display(),
            "gallery loaded"
        );
        Ok(gallery)
    }
}

/// Parse a manifest and validate its names without touching any image.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>, GalleryError> {
    let raw = std::fs::read_to_string(path).map_err(|source| GalleryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(&raw).map_err(|source| GalleryError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;

    let mut seen: Vec<String> = Vec::with_capacity(entries.len());
    for entry in &entries {
        let key = validate_name(&entry.name)?.to_lowercase();
        if seen.contains(&key) {
            return Err(GalleryError::DuplicateName(entry.name.trim().to_string()));
        }
        seen.push(key);
    }
    Ok(entries)
}

/// Trimmed, non-empty and free of control characters (ledger rows are one line each).
fn validate_name(name: &str) -> Result<&str, GalleryError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GalleryError::EmptyName);
    }
    if name.chars().any(char::is_control) {
        return Err(GalleryError::InvalidName(name.to_string()));
    }
    Ok(name)
}

/// Embedding of the most confident face in one enrollment image.
fn reference_embedding(path: &Path, embedder: &mut dyn FaceEmbedder) -> Option<Embedding> {
    let gray = match image::open(path) {
        Ok(img) => img.to_luma8(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot decode enrollment image");
            return None;
        }
    };
    let (width, height) = gray.dimensions();
    let frame = Frame::from_gray(gray.into_raw(), width, height, chrono::Local::now(), 0).ok()?;

    let faces = match embedder.locate_faces(&frame) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "face detection failed");
            return None;
        }
    };
    let Some(face) = faces.into_iter().next() else {
        tracing::warn!(path = %path.display(), "no face found in enrollment image");
        return None;
    };

    match embedder.encode(&frame, std::slice::from_ref(&face)).pop()? {
        Ok(embedding) => Some(embedding),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot encode enrollment face");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingError;
    use crate::types::{BoundingBox, DistanceMetric};
    use std::io::Write;

    /// Encodes a face as the frame's mean brightness; no face in dark frames.
    struct BrightnessEmbedder;

    impl FaceEmbedder for BrightnessEmbedder {
        fn locate_faces(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, EmbeddingError> {
            if frame.is_dark {
                return Ok(vec![]);
            }
            Ok(vec![BoundingBox {
                x: 0.0,
                y: 0.0,
                width: frame.width as f32,
                height: frame.height as f32,
                confidence: 1.0,
                landmarks: None,
            }])
        }

        fn encode(
            &mut self,
            frame: &Frame,
            regions: &[BoundingBox],
        ) -> Vec<Result<Embedding, EmbeddingError>> {
            regions
                .iter()
                .map(|_| Ok(Embedding::new(vec![frame.avg_brightness()])))
                .collect()
        }

        fn metric(&self) -> DistanceMetric {
            DistanceMetric::Euclidean
        }
    }

    fn write_png(dir: &Path, name: &str, value: u8) {
        image::GrayImage::from_pixel(8, 8, image::Luma([value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_add_identity_rejects_duplicates_case_insensitive() {
        let mut gallery = Gallery::new();
        gallery
            .add_identity("ANA", IdentityMeta::default(), vec![Embedding::new(vec![1.0])])
            .unwrap();
        let err = gallery
            .add_identity("ana", IdentityMeta::default(), vec![Embedding::new(vec![2.0])])
            .unwrap_err();
        assert!(matches!(err, GalleryError::DuplicateName(_)));
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_add_identity_requires_name_and_embeddings() {
        let mut gallery = Gallery::new();
        assert!(matches!(
            gallery.add_identity("  ", IdentityMeta::default(), vec![Embedding::new(vec![1.0])]),
            Err(GalleryError::EmptyName)
        ));
        assert!(matches!(
            gallery.add_identity("BEN", IdentityMeta::default(), vec![]),
            Err(GalleryError::NoEmbeddings(_))
        ));
    }

    #[test]
    fn test_references_keep_enrollment_order() {
        let mut gallery = Gallery::new();
        let ana = gallery
            .add_identity(
                "ANA",
                IdentityMeta::default(),
                vec![Embedding::new(vec![1.0]), Embedding::new(vec![2.0])],
            )
            .unwrap();
        let ben = gallery
            .add_identity("BEN", IdentityMeta::default(), vec![Embedding::new(vec![3.0])])
            .unwrap();
        let owners: Vec<IdentityId> = gallery.references().iter().map(|r| r.identity).collect();
        assert_eq!(owners, vec![ana, ana, ben]);
        assert_eq!(gallery.find("ben"), Some(ben));
    }

    #[test]
    fn test_load_manifest_skips_faceless_images() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "ana1.png", 100);
        write_png(dir.path(), "ana2.png", 0); // dark → no face
        write_png(dir.path(), "ben.png", 0);
        let manifest = dir.path().join("gallery.json");
        let mut f = std::fs::File::create(&manifest).unwrap();
        write!(
            f,
            r#"[
                {{"name": "ANA", "images": ["ana1.png", "ana2.png", "missing.png"], "course": "BSCS", "year": "3"}},
                {{"name": "BEN", "images": ["ben.png"]}}
            ]"#
        )
        .unwrap();

        let gallery = Gallery::load(&manifest, &mut BrightnessEmbedder).unwrap();
        assert_eq!(gallery.len(), 1);
        let ana = gallery.identity(gallery.find("ANA").unwrap());
        assert_eq!(ana.meta.course.as_deref(), Some("BSCS"));
        assert_eq!(ana.meta.year.as_deref(), Some("3"));
        assert_eq!(gallery.references().len(), 1);
        assert!((gallery.references()[0].embedding.values[0] - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_read_manifest_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("gallery.json");
        std::fs::write(&manifest, r#"[{"name": "ANA"}, {"name": " ana "}]"#).unwrap();
        assert!(matches!(read_manifest(&manifest), Err(GalleryError::DuplicateName(_))));
    }

    #[test]
    fn test_names_with_line_breaks_are_rejected() {
        let mut gallery = Gallery::new();
        assert!(matches!(
            gallery.add_identity("DELA\nCRUZ", IdentityMeta::default(), vec![Embedding::new(vec![1.0])]),
            Err(GalleryError::InvalidName(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("gallery.json");
        std::fs::write(&manifest, r#"[{"name": "DELA\r\nCRUZ"}]"#).unwrap();
        assert!(matches!(read_manifest(&manifest), Err(GalleryError::InvalidName(_))));
    }

    #[test]
    fn test_read_manifest_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("gallery.json");
        std::fs::write(&manifest, "{not json").unwrap();
        assert!(matches!(read_manifest(&manifest), Err(GalleryError::Manifest { .. })));
    }
}
