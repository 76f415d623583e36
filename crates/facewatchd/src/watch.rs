//! Live camera loop: capture, identify, log who is in view.

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use facewatch_core::MatchResult;
use facewatch_hw::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Consecutive capture failures tolerated before the loop gives up.
const MAX_CAPTURE_FAILURES: usize = 10;

/// Tracks the labels in view so only changes are logged.
#[derive(Debug, Default)]
pub struct SceneTracker {
    last: Option<Vec<String>>,
}

impl SceneTracker {
    /// Record the labels of `results`; returns them when they differ from the previous frame.
    pub fn update(&mut self, results: &[MatchResult]) -> Option<&[String]> {
        let labels: Vec<String> = results.iter().map(|r| r.label().to_string()).collect();
        if self.last.as_ref() == Some(&labels) {
            return None;
        }
        self.last = Some(labels);
        self.last.as_deref()
    }
}

/// Start the capture loop on its own thread. It runs until `running` is cleared,
/// the camera keeps failing, or the engine goes away.
pub fn spawn(config: &Config, engine: EngineHandle, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
    let device = config.camera_device.clone();
    let (width, height) = (config.camera_width, config.camera_height);
    let warmup = config.warmup_frames;

    std::thread::Builder::new().name("facewatch-watch".into()).spawn(move || {
        let camera = match Camera::open(&device, width, height) {
            Ok(camera) => camera,
            Err(e) => {
                tracing::error!(device = %device, error = %e, "camera unavailable; live watch disabled");
                return;
            }
        };
        run(&camera, warmup, &engine, &running);
        tracing::info!("watch loop stopped");
    })
}

fn run(camera: &Camera, warmup: usize, engine: &EngineHandle, running: &AtomicBool) {
    let mut stream = match camera.stream() {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "failed to start capture stream");
            return;
        }
    };

    if warmup > 0 {
        let dark = stream.warm_up(warmup);
        tracing::info!(count = warmup, dark, "discarded warmup frames");
    }

    let mut scene = SceneTracker::default();
    let mut failures = 0;

    while running.load(Ordering::Relaxed) {
        let frame = match stream.next_frame() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(error = %e, failures, "capture failed");
                if failures >= MAX_CAPTURE_FAILURES {
                    tracing::error!("too many consecutive capture failures");
                    return;
                }
                continue;
            }
        };

        match engine.process_frame_blocking(frame) {
            Ok(results) => {
                if let Some(labels) = scene.update(&results) {
                    tracing::info!(faces = labels.len(), ?labels, "scene changed");
                }
            }
            Err(EngineError::ChannelClosed) => return,
            // Already logged by the engine; the next frame starts fresh.
            Err(_) => {}
        }
    }
}
