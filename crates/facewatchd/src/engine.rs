use crate::config::Config;
use facewatch_core::cache;
use facewatch_core::{
    FaceDetector, FaceEmbedder, FaceNetEmbedder, Frame, FrameProcessor, Gallery, GalleryBuilder,
    GalleryManifest, MatchResult, ProcessError, ReferenceSet, YoloFaceDetector,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] facewatch_core::DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] facewatch_core::EmbedderError),
    #[error("gallery error: {0}")]
    Gallery(#[from] facewatch_core::GalleryError),
    #[error("frame dropped: {0}")]
    Process(#[from] ProcessError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Running totals reported over D-Bus.
#[derive(Debug, Default)]
pub struct EngineStats {
    frames: AtomicU64,
    faces: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub faces: u64,
    pub dropped: u64,
}

impl EngineStats {
    fn record(&self, result: &Result<Vec<MatchResult>, ProcessError>) {
        match result {
            Ok(faces) => {
                self.frames.fetch_add(1, Ordering::Relaxed);
                self.faces.fetch_add(faces.len() as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            faces: self.faces.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Messages sent from the watch loop and D-Bus handlers to the engine thread.
enum EngineRequest {
    Process {
        frame: Frame,
        reply: oneshot::Sender<Result<Vec<MatchResult>, ProcessError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    gallery: Arc<Gallery>,
    stats: Arc<EngineStats>,
}

impl EngineHandle {
    /// Identify every face in `frame`, from async context.
    pub async fn process_frame(&self, frame: Frame) -> Result<Vec<MatchResult>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Process { frame, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Identify every face in `frame`, from a plain OS thread.
    ///
    /// Must not be called from inside the tokio runtime.
    pub fn process_frame_blocking(&self, frame: Frame) -> Result<Vec<MatchResult>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .blocking_send(EngineRequest::Process { frame, reply: reply_tx })
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.blocking_recv().map_err(|_| EngineError::ChannelClosed)??)
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Load both models, prepare the gallery and start the engine thread.
///
/// Fails fast if a model is missing or no identity has a usable reference.
pub fn start(config: &Config) -> Result<EngineHandle, EngineError> {
    let options = config.model_options();

    let detector_path = config.detector_model_path();
    let detector = YoloFaceDetector::load(&detector_path, &options, config.detector_confidence)?;
    tracing::info!(path = %detector_path.display(), "YOLO detector loaded");

    let embedder_path = config.embedder_model_path();
    let mut embedder = FaceNetEmbedder::load(&embedder_path, &options)?;
    tracing::info!(path = %embedder_path.display(), model = embedder.model_id(), "FaceNet embedder loaded");

    let manifest = GalleryManifest::load(&config.gallery_manifest)?;
    let gallery = prepare_gallery(&manifest.identities, config.gallery_cache.as_deref(), &mut embedder)?;
    tracing::info!(identities = gallery.len(), labels = ?gallery.labels(), "gallery ready");

    let processor = FrameProcessor::new(detector, embedder, Arc::new(gallery), config.match_threshold);
    spawn(processor)
}

/// Reuse a cached gallery when its key still matches, otherwise build and cache one.
pub fn prepare_gallery<E: FaceEmbedder + ?Sized>(
    sets: &[ReferenceSet],
    cache_path: Option<&Path>,
    embedder: &mut E,
) -> Result<Gallery, EngineError> {
    let key = cache_path.map(|_| cache::cache_key(embedder.model_id(), sets));

    if let (Some(path), Some(key)) = (cache_path, key.as_deref()) {
        if let Some(gallery) = cache::load(path, key) {
            return Ok(gallery);
        }
    }

    let build = GalleryBuilder::new(embedder).build(sets)?;
    tracing::info!(
        embedded = build.report.embedded,
        skipped = build.report.skipped.len(),
        dropped = ?build.report.dropped,
        "gallery built"
    );

    if let (Some(path), Some(key)) = (cache_path, key.as_deref()) {
        if let Err(e) = cache::store(path, key, &build.gallery) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write gallery cache");
        }
    }

    Ok(build.gallery)
}

/// Move `processor` onto a dedicated OS thread and return a handle to it.
///
/// The thread owns both capabilities, so frames are processed one at a time
/// in arrival order.
pub fn spawn<D, E>(mut processor: FrameProcessor<D, E>) -> Result<EngineHandle, EngineError>
where
    D: FaceDetector + Send + 'static,
    E: FaceEmbedder + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let gallery = Arc::clone(processor.gallery());
    let stats = Arc::new(EngineStats::default());
    let thread_stats = Arc::clone(&stats);

    std::thread::Builder::new()
        .name("facewatch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Process { frame, reply } => {
                        let result = processor.process(&frame);
                        if let Err(e) = &result {
                            tracing::warn!(error = %e, "frame dropped");
                        }
                        thread_stats.record(&result);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, gallery, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facewatch_core::{BoundingBox, ChannelOrder, DetectorError, Embedding, EmbedderError, Identity};
    use ndarray::Array4;

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
            // A 1x1 frame stands in for a corrupt capture.
            if frame.width() == 1 {
                return Err(DetectorError::InferenceFailed("corrupt frame".into()));
            }
            Ok(self.0.clone())
        }
    }

    /// Embeds each crop as its per-channel mean.
    struct MeanEmbedder {
        calls: usize,
    }

    impl FaceEmbedder for MeanEmbedder {
        fn embed(&mut self, input: &Array4<f32>) -> Result<Embedding, EmbedderError> {
            self.calls += 1;
            let values = (0..3)
                .map(|c| input.slice(ndarray::s![0, c, .., ..]).mean().unwrap_or(0.0))
                .collect();
            Ok(Embedding::new(values))
        }

        fn model_id(&self) -> &str {
            "channel-mean"
        }
    }

    fn gallery() -> Arc<Gallery> {
        Arc::new(
            Gallery::from_identities(vec![Identity {
                label: "alice".into(),
                centroid: Embedding::new(vec![0.0, 0.0, 0.0]),
            }])
            .unwrap(),
        )
    }

    fn engine(boxes: Vec<BoundingBox>) -> EngineHandle {
        let processor = FrameProcessor::new(FixedDetector(boxes), MeanEmbedder { calls: 0 }, gallery(), 0.8);
        spawn(processor).unwrap()
    }

    fn write_png(dir: &Path, name: &str, rgb: [u8; 3]) -> std::path::PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(12, 12, image::Rgb(rgb)).save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn test_process_frame_roundtrip() {
        let handle = engine(vec![BoundingBox::new(0, 0, 20, 20), BoundingBox::new(0, 0, 4, 4)]);
        let frame = Frame::filled(32, 32, ChannelOrder::Bgr, [90, 90, 90]);

        let results = handle.process_frame(frame).await.unwrap();

        // The 4x4 detection is skipped; the uniform crop prewhitens to zeros.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label(), "alice");
        assert_eq!(handle.stats(), StatsSnapshot { frames: 1, faces: 1, dropped: 0 });
        assert_eq!(handle.gallery().labels(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_capability_failure_drops_only_that_frame() {
        let handle = engine(vec![BoundingBox::new(0, 0, 20, 20)]);

        let err = handle
            .process_frame(Frame::filled(1, 1, ChannelOrder::Bgr, [0, 0, 0]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Process(ProcessError::Detector(_))));

        let results = handle
            .process_frame(Frame::filled(32, 32, ChannelOrder::Bgr, [10, 20, 30]))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(handle.stats(), StatsSnapshot { frames: 1, faces: 1, dropped: 1 });
    }

    #[test]
    fn test_process_frame_blocking_from_plain_thread() {
        let handle = engine(vec![]);
        let results = handle
            .process_frame_blocking(Frame::filled(16, 16, ChannelOrder::Rgb, [0, 0, 0]))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_prepare_gallery_uses_cache_on_second_start() {
        let dir = tempfile::tempdir().unwrap();
        let sets = vec![ReferenceSet {
            label: "alice".into(),
            images: vec![write_png(dir.path(), "a.png", [200, 10, 10])],
        }];
        let cache_path = dir.path().join("cache.json");

        let mut first = MeanEmbedder { calls: 0 };
        let built = prepare_gallery(&sets, Some(&cache_path), &mut first).unwrap();
        assert_eq!(first.calls, 1);
        assert!(cache_path.exists());

        let mut second = MeanEmbedder { calls: 0 };
        let cached = prepare_gallery(&sets, Some(&cache_path), &mut second).unwrap();
        assert_eq!(second.calls, 0);
        assert_eq!(cached.labels(), built.labels());
    }

    #[test]
    fn test_prepare_gallery_refuses_when_every_identity_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sets = vec![ReferenceSet {
            label: "ghost".into(),
            images: vec![dir.path().join("missing.png")],
        }];

        let err = prepare_gallery(&sets, None, &mut MeanEmbedder { calls: 0 }).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Gallery(facewatch_core::GalleryError::NoUsableIdentities { attempted: 1 })
        ));
    }

    /// Tracks whether any capability call is in progress; a second entry
    /// while one is running counts as an overlap.
    #[derive(Clone, Default)]
    struct Occupancy {
        busy: Arc<std::sync::atomic::AtomicBool>,
        overlaps: Arc<AtomicU64>,
    }

    impl Occupancy {
        fn enter(&self) {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        fn exit(&self) {
            self.busy.store(false, Ordering::SeqCst);
        }
    }

    /// Reports one box covering the whole frame, so a reply names its frame.
    struct WholeFrameDetector(Occupancy);

    impl FaceDetector for WholeFrameDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
            self.0.enter();
            let boxes = vec![BoundingBox::new(0, 0, frame.width() as i32, frame.height() as i32)];
            self.0.exit();
            Ok(boxes)
        }
    }

    struct TrackedEmbedder(Occupancy);

    impl FaceEmbedder for TrackedEmbedder {
        fn embed(&mut self, _input: &Array4<f32>) -> Result<Embedding, EmbedderError> {
            self.0.enter();
            self.0.exit();
            Ok(Embedding::new(vec![0.0, 0.0, 0.0]))
        }

        fn model_id(&self) -> &str {
            "tracked"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_are_serialised_and_answered_per_frame() {
        let occupancy = Occupancy::default();
        let processor = FrameProcessor::new(
            WholeFrameDetector(occupancy.clone()),
            TrackedEmbedder(occupancy.clone()),
            gallery(),
            0.8,
        );
        let handle = spawn(processor).unwrap();

        let mut tasks = Vec::new();
        for task in 0..8u32 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..5u32 {
                    let (width, height) = (20 + task * 7 + i, 30 + i * 3 + task);
                    let frame = Frame::filled(width, height, ChannelOrder::Bgr, [50, 60, 70]);
                    let results = handle.process_frame(frame).await.unwrap();
                    assert_eq!(results.len(), 1);
                    let bbox = &results[0].bbox;
                    assert_eq!((bbox.x2, bbox.y2), (width as i32, height as i32));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(occupancy.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(handle.stats(), StatsSnapshot { frames: 40, faces: 40, dropped: 0 });
    }
}
