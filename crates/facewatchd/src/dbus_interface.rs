use crate::engine::{EngineError, EngineHandle};
use facewatch_core::{Frame, MatchResult};
use std::time::Instant;
use zbus::interface;

pub const BUS_NAME: &str = "org.facewatch.Identify1";
pub const OBJECT_PATH: &str = "/org/facewatch/Identify1";

/// D-Bus relay for the identification engine.
///
/// Bus name: org.facewatch.Identify1
/// Object path: /org/facewatch/Identify1
pub struct IdentifyService {
    pub engine: EngineHandle,
    pub started: Instant,
    pub watching: bool,
}

#[interface(name = "org.facewatch.Identify1")]
impl IdentifyService {
    /// Identify faces in an encoded image (PNG, JPEG, ...).
    ///
    /// Returns `{"faces": [{x1, y1, x2, y2, label, distance}, ...]}` in detection order.
    async fn process_frame(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        let frame = decode_frame(&image)?;
        tracing::debug!(width = frame.width(), height = frame.height(), "process_frame requested");

        let results = self.engine.process_frame(frame).await.map_err(|e| match e {
            EngineError::ChannelClosed => zbus::fdo::Error::Failed("engine unavailable".into()),
            other => zbus::fdo::Error::Failed(other.to_string()),
        })?;

        Ok(faces_json(&results))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let stats = self.engine.stats();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "identities": self.engine.gallery().len(),
            "watching": self.watching,
            "uptime_secs": self.started.elapsed().as_secs(),
            "frames_processed": stats.frames,
            "faces_identified": stats.faces,
            "frames_dropped": stats.dropped,
        })
        .to_string())
    }

    /// Gallery labels in match order.
    async fn list_identities(&self) -> Vec<String> {
        self.engine
            .gallery()
            .labels()
            .into_iter()
            .map(String::from)
            .collect()
    }
}

fn decode_frame(bytes: &[u8]) -> zbus::fdo::Result<Frame> {
    if bytes.is_empty() {
        return Err(zbus::fdo::Error::InvalidArgs("empty image".into()));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("undecodable image: {e}")))?;
    Ok(Frame::from_rgb_image(image.to_rgb8()))
}

fn faces_json(results: &[MatchResult]) -> String {
    let faces: Vec<_> = results.iter().map(MatchResult::report).collect();
    serde_json::json!({ "faces": faces }).to_string()
}
