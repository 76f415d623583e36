//! facewatch-core: face identification engine.
//!
//! Detects faces with a YOLO model, embeds them with FaceNet (both via ONNX
//! Runtime) and identifies each against a gallery of known people by
//! nearest-centroid Euclidean distance.

pub mod annotate;
pub mod cache;
pub mod capability;
pub mod detector;
pub mod embedder;
pub mod frame;
pub mod gallery;
pub mod matcher;
pub mod normalizer;
pub mod processor;
pub mod session;
pub mod types;

pub use capability::{DetectorError, EmbedderError, FaceDetector, FaceEmbedder};
pub use detector::YoloFaceDetector;
pub use embedder::FaceNetEmbedder;
pub use frame::{ChannelOrder, Frame, FrameError};
pub use gallery::{Gallery, GalleryBuild, GalleryBuilder, GalleryError, GalleryManifest, ReferenceSet};
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_THRESHOLD};
pub use processor::{FrameProcessor, ProcessError, MIN_FACE_SIZE};
pub use session::{Backend, ModelOptions};
pub use types::{BoundingBox, Embedding, FaceReport, Identification, Identity, MatchResult, UNKNOWN_LABEL};

/// Default directory holding the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("facewatch/models")
}
