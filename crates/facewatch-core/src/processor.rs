//! Per-frame detection → embedding → identification pipeline.

use crate::capability::{DetectorError, EmbedderError, FaceDetector, FaceEmbedder};
use crate::frame::Frame;
use crate::gallery::Gallery;
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::normalizer;
use crate::types::MatchResult;
use std::sync::Arc;
use thiserror::Error;

/// Crops narrower or shorter than this (in pixels) are skipped.
pub const MIN_FACE_SIZE: u32 = 10;

/// A capability failed; the whole frame is dropped.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
}

/// Identifies faces frame by frame against a shared, read-only gallery.
///
/// Holds no state across frames besides the gallery. The detector and
/// embedder are owned exclusively, so calls to them never overlap.
pub struct FrameProcessor<D, E, M = EuclideanMatcher> {
    detector: D,
    embedder: E,
    matcher: M,
    gallery: Arc<Gallery>,
}

impl<D: FaceDetector, E: FaceEmbedder> FrameProcessor<D, E, EuclideanMatcher> {
    pub fn new(detector: D, embedder: E, gallery: Arc<Gallery>, threshold: f32) -> Self {
        Self::with_matcher(detector, embedder, EuclideanMatcher::new(threshold), gallery)
    }
}

impl<D: FaceDetector, E: FaceEmbedder, M: Matcher> FrameProcessor<D, E, M> {
    pub fn with_matcher(detector: D, embedder: E, matcher: M, gallery: Arc<Gallery>) -> Self {
        Self {
            detector,
            embedder,
            matcher,
            gallery,
        }
    }

    pub fn gallery(&self) -> &Arc<Gallery> {
        &self.gallery
    }

    /// Detect, embed and identify every usable face in `frame`.
    ///
    /// Results follow detection order; degenerate crops are left out.
    pub fn process(&mut self, frame: &Frame) -> Result<Vec<MatchResult>, ProcessError> {
        let detections = self.detector.detect(frame)?;
        let mut results = Vec::with_capacity(detections.len());

        for bbox in detections {
            let crop = frame.crop(&bbox);
            if crop.width() < MIN_FACE_SIZE || crop.height() < MIN_FACE_SIZE {
                tracing::debug!(
                    ?bbox,
                    width = crop.width(),
                    height = crop.height(),
                    "skipping degenerate detection"
                );
                continue;
            }

            let input = normalizer::normalize(&crop);
            let query = self.embedder.embed(&input)?;
            let identification = self.matcher.identify(&query, &self.gallery);

            tracing::trace!(
                label = identification.display_label(),
                distance = identification.distance,
                "face identified"
            );
            results.push(MatchResult {
                bbox,
                identification,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fakes::{FakeDetector, MeanEmbedder, ScriptedEmbedder};
    use crate::frame::ChannelOrder;
    use crate::gallery::{GalleryBuilder, ReferenceSet};
    use crate::types::{BoundingBox, Embedding, Identity};
    use image::RgbImage;

    fn frame() -> Frame {
        let mut data = Vec::new();
        for y in 0..120u32 {
            for x in 0..160u32 {
                data.extend_from_slice(&[(x + y) as u8, (x * 2) as u8, (y * 2) as u8]);
            }
        }
        Frame::new(data, 160, 120, ChannelOrder::Bgr).unwrap()
    }

    fn gallery(entries: &[(&str, Vec<f32>)]) -> Arc<Gallery> {
        let identities = entries
            .iter()
            .map(|(label, values)| Identity {
                label: label.to_string(),
                centroid: Embedding::new(values.clone()),
            })
            .collect();
        Arc::new(Gallery::from_identities(identities).unwrap())
    }

    #[test]
    fn test_skips_degenerate_crops_and_keeps_order() {
        let detector = FakeDetector::new(vec![
            BoundingBox::new(10, 10, 60, 70),
            BoundingBox::new(100, 20, 105, 25), // 5x5
            BoundingBox::new(80, 40, 130, 100),
        ]);
        let embedder = ScriptedEmbedder::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let g = gallery(&[("alice", vec![1.0, 0.0]), ("bob", vec![0.0, 1.0])]);

        let mut processor = FrameProcessor::new(detector, embedder, g, 0.8);
        let results = processor.process(&frame()).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].bbox, BoundingBox::new(10, 10, 60, 70));
        assert_eq!(results[0].label(), "alice");
        assert_eq!(results[1].bbox, BoundingBox::new(80, 40, 130, 100));
        assert_eq!(results[1].label(), "bob");
        assert_eq!(processor.embedder.calls, 2);
    }

    #[test]
    fn test_crop_clamped_below_minimum_is_skipped() {
        // Box is 50 wide but only 6 px of it lie inside the frame.
        let detector = FakeDetector::new(vec![BoundingBox::new(154, 10, 204, 60)]);
        let embedder = ScriptedEmbedder::new(vec![]);
        let mut processor = FrameProcessor::new(detector, embedder, gallery(&[]), 0.8);
        assert!(processor.process(&frame()).unwrap().is_empty());
        assert_eq!(processor.embedder.calls, 0);
    }

    #[test]
    fn test_exactly_minimum_size_is_kept() {
        let detector = FakeDetector::new(vec![BoundingBox::new(0, 0, 10, 10)]);
        let embedder = ScriptedEmbedder::new(vec![vec![3.0]]);
        let mut processor = FrameProcessor::new(detector, embedder, gallery(&[]), 0.8);
        let results = processor.process(&frame()).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_empty_gallery_reports_unknown_at_infinity() {
        let detector = FakeDetector::new(vec![BoundingBox::new(0, 0, 40, 40)]);
        let mut processor = FrameProcessor::new(detector, MeanEmbedder, gallery(&[]), 0.8);
        let results = processor.process(&frame()).unwrap();
        assert_eq!(results[0].label(), "Unknown");
        assert!(results[0].distance().is_infinite());
    }

    #[test]
    fn test_detector_failure_drops_frame_only() {
        let mut detector = FakeDetector::new(vec![BoundingBox::new(0, 0, 40, 40)]);
        detector.fail = true;
        let embedder = ScriptedEmbedder::new(vec![vec![1.0], vec![1.0]]);
        let g = gallery(&[("alice", vec![1.0])]);
        let mut processor = FrameProcessor::new(detector, embedder, g.clone(), 0.8);

        assert!(matches!(
            processor.process(&frame()),
            Err(ProcessError::Detector(_))
        ));

        processor.detector.fail = false;
        let results = processor.process(&frame()).unwrap();
        assert_eq!(results[0].label(), "alice");
        assert_eq!(*processor.gallery().as_ref(), *g);
    }

    #[test]
    fn test_embedder_failure_is_reported() {
        let detector = FakeDetector::new(vec![BoundingBox::new(0, 0, 40, 40)]);
        let embedder = ScriptedEmbedder::with_failures(vec![Err("bad tensor".into())]);
        let mut processor = FrameProcessor::new(detector, embedder, gallery(&[]), 0.8);
        assert!(matches!(
            processor.process(&frame()),
            Err(ProcessError::Embedder(_))
        ));
    }

    #[test]
    fn test_deterministic_across_calls() {
        let detector = FakeDetector::new(vec![BoundingBox::new(5, 5, 75, 95), BoundingBox::new(60, 10, 150, 110)]);
        let g = gallery(&[("alice", vec![0.1, 0.0, -0.1])]);
        let mut processor = FrameProcessor::new(detector, MeanEmbedder, g, 0.8);
        let f = frame();
        assert_eq!(processor.process(&f).unwrap(), processor.process(&f).unwrap());
    }

    #[test]
    fn test_build_then_identify_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let refs: Vec<_> = ["alice-1.png", "alice-2.png"]
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                RgbImage::from_pixel(32, 32, image::Rgb([120, 80, 60])).save(&path).unwrap();
                path
            })
            .collect();

        // Alice's two references average to A = [0.5, 0.5, 0.0, 0.0].
        let mut embedder = ScriptedEmbedder::new(vec![vec![0.4, 0.6, 0.0, 0.0], vec![0.6, 0.4, 0.0, 0.0]]);
        let build = GalleryBuilder::new(&mut embedder)
            .build(&[
                ReferenceSet { label: "Alice".into(), images: refs },
                ReferenceSet { label: "Bob".into(), images: vec![] },
            ])
            .unwrap();
        assert_eq!(build.gallery.labels(), vec!["Alice"]);
        assert_eq!(build.report.dropped, vec!["Bob".to_string()]);

        // Queries: 0.3 from A, then 1.5 from A.
        let embedder = ScriptedEmbedder::new(vec![vec![0.5, 0.5, 0.3, 0.0], vec![0.5, 0.5, 0.0, 1.5]]);
        let detector = FakeDetector::new(vec![BoundingBox::new(0, 0, 50, 50), BoundingBox::new(60, 0, 120, 60)]);
        let mut processor = FrameProcessor::new(detector, embedder, Arc::new(build.gallery), 0.8);

        let results = processor.process(&frame()).unwrap();
        assert_eq!(results[0].label(), "Alice");
        assert!((results[0].distance() - 0.3).abs() < 1e-5);
        assert_eq!(results[1].label(), "Unknown");
        assert!((results[1].distance() - 1.5).abs() < 1e-5);
    }
}
