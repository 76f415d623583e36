//! Gallery of known identities and its construction from reference images.
//!
//! A [`Gallery`] is built once at startup and only read afterwards. Identity
//! order is the manifest (insertion) order; the matcher's tie-break relies on it.

use crate::capability::FaceEmbedder;
use crate::frame::Frame;
use crate::normalizer;
use crate::types::{Embedding, Identity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to read manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("duplicate identity label: {0}")]
    DuplicateLabel(String),
    #[error("identity {label} has a {actual}-dim centroid, gallery uses {expected}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },
    #[error("no usable identities: all {attempted} reference sets ended up empty")]
    NoUsableIdentities { attempted: usize },
}

/// Immutable mapping from identity label to centroid, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Identity>", into = "Vec<Identity>")]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    /// Build a gallery from pre-computed identities.
    ///
    /// Labels must be unique and all centroids must share one dimension.
    pub fn from_identities(identities: Vec<Identity>) -> Result<Self, GalleryError> {
        let mut seen = HashSet::new();
        let dim = identities.first().map(|i| i.centroid.dim());

        for identity in &identities {
            if !seen.insert(identity.label.as_str()) {
                return Err(GalleryError::DuplicateLabel(identity.label.clone()));
            }
            if let Some(expected) = dim {
                if identity.centroid.dim() != expected {
                    return Err(GalleryError::DimensionMismatch {
                        label: identity.label.clone(),
                        expected,
                        actual: identity.centroid.dim(),
                    });
                }
            }
        }

        Ok(Self { identities })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }

    pub fn get(&self, label: &str) -> Option<&Embedding> {
        self.identities
            .iter()
            .find(|i| i.label == label)
            .map(|i| &i.centroid)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.identities.iter().map(|i| i.label.as_str()).collect()
    }
}

impl TryFrom<Vec<Identity>> for Gallery {
    type Error = GalleryError;

    fn try_from(identities: Vec<Identity>) -> Result<Self, Self::Error> {
        Gallery::from_identities(identities)
    }
}

impl From<Gallery> for Vec<Identity> {
    fn from(gallery: Gallery) -> Self {
        gallery.identities
    }
}

/// Reference images for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSet {
    pub label: String,
    #[serde(default)]
    pub images: Vec<PathBuf>,
}

/// TOML gallery manifest: an ordered list of `[[identity]]` tables.
///
/// ```toml
/// [[identity]]
/// label = "Fatou"
/// images = ["refs/fatou-1.jpg", "refs/fatou-2.jpg"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GalleryManifest {
    #[serde(rename = "identity", default)]
    pub identities: Vec<ReferenceSet>,
}

impl GalleryManifest {
    /// Load a manifest, resolving relative image paths against its directory.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let text = std::fs::read_to_string(path).map_err(|source| GalleryError::ManifestRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest: GalleryManifest =
            toml::from_str(&text).map_err(|source| GalleryError::ManifestParse {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for set in &mut manifest.identities {
            for image in &mut set.images {
                if image.is_relative() {
                    *image = base.join(&*image);
                }
            }
        }

        Ok(manifest)
    }

    /// Reference images that do not exist on disk, as `(label, path)`.
    pub fn missing_images(&self) -> Vec<(&str, &Path)> {
        self.identities
            .iter()
            .flat_map(|set| {
                set.images
                    .iter()
                    .filter(|p| !p.is_file())
                    .map(move |p| (set.label.as_str(), p.as_path()))
            })
            .collect()
    }
}

/// A reference image that could not contribute an embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedReference {
    pub label: String,
    pub path: PathBuf,
    pub reason: String,
}

/// Per-identity outcome of a gallery build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    /// Number of reference embeddings that went into centroids.
    pub embedded: usize,
    pub skipped: Vec<SkippedReference>,
    /// Identities excluded because no reference image was usable.
    pub dropped: Vec<String>,
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct GalleryBuild {
    pub gallery: Gallery,
    pub report: BuildReport,
}

/// Builds a [`Gallery`] by embedding every reference image once.
pub struct GalleryBuilder<'a, E: FaceEmbedder + ?Sized> {
    embedder: &'a mut E,
}

impl<'a, E: FaceEmbedder + ?Sized> GalleryBuilder<'a, E> {
    pub fn new(embedder: &'a mut E) -> Self {
        Self { embedder }
    }

    /// Load, normalise and embed each reference image, then average per identity.
    ///
    /// Unloadable or unembeddable images are skipped and reported. Identities
    /// left with no embeddings are dropped. Fails only when no identity survives.
    pub fn build(&mut self, sets: &[ReferenceSet]) -> Result<GalleryBuild, GalleryError> {
        let sets = merge_duplicate_labels(sets);
        let mut report = BuildReport::default();
        let mut identities = Vec::with_capacity(sets.len());
        let mut gallery_dim: Option<usize> = None;

        for set in &sets {
            let mut embeddings = Vec::with_capacity(set.images.len());

            for path in &set.images {
                match self.embed_reference(path) {
                    Ok(embedding) => {
                        let expected = *gallery_dim.get_or_insert(embedding.dim());
                        if embedding.dim() != expected {
                            report.skip(set, path, format!(
                                "embedding has {} dims, gallery uses {expected}",
                                embedding.dim()
                            ));
                            continue;
                        }
                        embeddings.push(embedding);
                    }
                    Err(reason) => report.skip(set, path, reason),
                }
            }

            match centroid(&embeddings) {
                Some(centroid) => {
                    tracing::info!(label = %set.label, references = embeddings.len(), "identity enrolled");
                    report.embedded += embeddings.len();
                    identities.push(Identity {
                        label: set.label.clone(),
                        centroid,
                    });
                }
                None => {
                    tracing::warn!(label = %set.label, "no usable reference images; identity dropped");
                    report.dropped.push(set.label.clone());
                }
            }
        }

        if identities.is_empty() {
            return Err(GalleryError::NoUsableIdentities { attempted: sets.len() });
        }

        Ok(GalleryBuild {
            gallery: Gallery::from_identities(identities)?,
            report,
        })
    }

    fn embed_reference(&mut self, path: &Path) -> Result<Embedding, String> {
        let image = image::open(path).map_err(|e| format!("load failed: {e}"))?;
        let frame = Frame::from_rgb_image(image.to_rgb8());
        let input = normalizer::normalize(&frame);
        self.embedder
            .embed(&input)
            .map_err(|e| format!("embedding failed: {e}"))
    }
}

impl BuildReport {
    fn skip(&mut self, set: &ReferenceSet, path: &Path, reason: String) {
        tracing::warn!(label = %set.label, path = %path.display(), %reason, "skipping reference image");
        self.skipped.push(SkippedReference {
            label: set.label.clone(),
            path: path.to_path_buf(),
            reason,
        });
    }
}

/// Concatenate image lists of repeated labels, keeping first-seen order.
fn merge_duplicate_labels(sets: &[ReferenceSet]) -> Vec<ReferenceSet> {
    let mut merged: Vec<ReferenceSet> = Vec::with_capacity(sets.len());
    for set in sets {
        match merged.iter_mut().find(|m| m.label == set.label) {
            Some(existing) => existing.images.extend(set.images.iter().cloned()),
            None => merged.push(set.clone()),
        }
    }
    merged
}

/// Element-wise mean of equally sized embeddings; `None` for an empty slice.
pub fn centroid(embeddings: &[Embedding]) -> Option<Embedding> {
    let first = embeddings.first()?;
    let mut sums = vec![0.0f64; first.dim()];
    for embedding in embeddings {
        for (sum, v) in sums.iter_mut().zip(&embedding.values) {
            *sum += *v as f64;
        }
    }
    let n = embeddings.len() as f64;
    Some(Embedding::new(sums.into_iter().map(|s| (s / n) as f32).collect()))
}
