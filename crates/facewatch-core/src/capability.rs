//! Detector and embedder capability interfaces.
//!
//! The engine only talks to these traits. The ONNX-backed implementations
//! live in [`crate::detector`] and [`crate::embedder`]; tests use fakes.
//!
//! Both take `&mut self`: a capability is never assumed safe for concurrent
//! invocation, so whoever owns it serialises calls to it.

use crate::frame::Frame;
use crate::types::{BoundingBox, Embedding};
use ndarray::Array4;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; export a YOLO face model to ONNX and place it in models/")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}; export InceptionResnetV1 to ONNX and place it in models/")]
    ModelNotFound(String),
    #[error("failed to read model {path}: {source}")]
    ModelRead {
        path: String,
        source: std::io::Error,
    },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates faces in a full frame.
pub trait FaceDetector {
    /// Return zero or more boxes with `x1 < x2` and `y1 < y2`, in detection order.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Maps a normalised face tensor to a fixed-length embedding.
pub trait FaceEmbedder {
    /// Must be deterministic for identical input.
    fn embed(&mut self, input: &Array4<f32>) -> Result<Embedding, EmbedderError>;

    /// Identifier of the model producing the embeddings, used in cache keys.
    fn model_id(&self) -> &str;
}

impl<T: FaceDetector + ?Sized> FaceDetector for Box<T> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        (**self).detect(frame)
    }
}

impl<T: FaceEmbedder + ?Sized> FaceEmbedder for Box<T> {
    fn embed(&mut self, input: &Array4<f32>) -> Result<Embedding, EmbedderError> {
        (**self).embed(input)
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Scripted capabilities for engine tests.

    use super::*;
    use std::collections::VecDeque;

    /// Returns a fixed box list per call, or fails when `fail` is set.
    pub struct FakeDetector {
        pub boxes: Vec<BoundingBox>,
        pub fail: bool,
        pub calls: usize,
    }

    impl FakeDetector {
        pub fn new(boxes: Vec<BoundingBox>) -> Self {
            Self { boxes, fail: false, calls: 0 }
        }
    }

    impl FaceDetector for FakeDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
            self.calls += 1;
            if self.fail {
                return Err(DetectorError::InferenceFailed("malformed frame".into()));
            }
            Ok(self.boxes.clone())
        }
    }

    /// Pops embeddings from a script in call order.
    pub struct ScriptedEmbedder {
        pub script: VecDeque<Result<Vec<f32>, String>>,
        pub calls: usize,
    }

    impl ScriptedEmbedder {
        pub fn new(script: Vec<Vec<f32>>) -> Self {
            Self {
                script: script.into_iter().map(Ok).collect(),
                calls: 0,
            }
        }

        pub fn with_failures(script: Vec<Result<Vec<f32>, String>>) -> Self {
            Self {
                script: script.into_iter().collect(),
                calls: 0,
            }
        }
    }

    impl FaceEmbedder for ScriptedEmbedder {
        fn embed(&mut self, _input: &Array4<f32>) -> Result<Embedding, EmbedderError> {
            self.calls += 1;
            match self.script.pop_front() {
                Some(Ok(values)) => Ok(Embedding::new(values)),
                Some(Err(reason)) => Err(EmbedderError::InferenceFailed(reason)),
                None => Err(EmbedderError::InferenceFailed("script exhausted".into())),
            }
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }

    /// Deterministic embedder: per-channel means of the input tensor.
    pub struct MeanEmbedder;

    impl FaceEmbedder for MeanEmbedder {
        fn embed(&mut self, input: &Array4<f32>) -> Result<Embedding, EmbedderError> {
            let values = (0..3)
                .map(|c| {
                    let plane = input.slice(ndarray::s![0, c, .., ..]);
                    plane.sum() / plane.len() as f32
                })
                .collect();
            Ok(Embedding::new(values))
        }

        fn model_id(&self) -> &str {
            "channel-mean"
        }
    }
}
