use facewatch_core::{Backend, ModelOptions};
use std::path::PathBuf;

/// Which D-Bus bus the relay service registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture size; the driver may negotiate another.
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub embedder_model: String,
    /// TOML manifest listing reference images per identity.
    pub gallery_manifest: PathBuf,
    /// Gallery cache file; `None` disables caching.
    pub gallery_cache: Option<PathBuf>,
    /// Maximum Euclidean distance for a known-identity match.
    pub match_threshold: f32,
    /// Minimum detector score for a face box.
    pub detector_confidence: f32,
    pub backend: Backend,
    pub intra_threads: usize,
    /// Run the live camera loop in addition to the D-Bus relay.
    pub watch: bool,
    /// Number of warmup frames to discard before identifying.
    pub warmup_frames: usize,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `FACEWATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());

        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&home).join(".local/share"))
            .join("facewatch");
        let config_dir = lookup("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&home).join(".config"))
            .join("facewatch");

        let gallery_cache = match lookup("FACEWATCH_GALLERY_CACHE") {
            Some(v) if v.is_empty() || v == "off" => None,
            Some(v) => Some(PathBuf::from(v)),
            None => Some(data_dir.join("gallery-cache.json")),
        };

        let backend = match lookup("FACEWATCH_BACKEND") {
            Some(v) => Backend::parse(&v).unwrap_or_else(|| {
                tracing::warn!(value = %v, "unknown FACEWATCH_BACKEND; using cpu");
                Backend::Cpu
            }),
            None => Backend::Cpu,
        };

        let bus = match lookup("FACEWATCH_BUS").as_deref() {
            Some("system") => BusKind::System,
            _ => BusKind::Session,
        };

        Self {
            camera_device: lookup("FACEWATCH_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            camera_width: parse_or(&lookup, "FACEWATCH_CAMERA_WIDTH", 640),
            camera_height: parse_or(&lookup, "FACEWATCH_CAMERA_HEIGHT", 480),
            model_dir: lookup("FACEWATCH_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("models")),
            detector_model: lookup("FACEWATCH_DETECTOR_MODEL").unwrap_or_else(|| "yolov8n-face.onnx".to_string()),
            embedder_model: lookup("FACEWATCH_EMBEDDER_MODEL")
                .unwrap_or_else(|| "facenet-vggface2.onnx".to_string()),
            gallery_manifest: lookup("FACEWATCH_GALLERY_MANIFEST")
                .map(PathBuf::from)
                .unwrap_or_else(|| config_dir.join("gallery.toml")),
            gallery_cache,
            match_threshold: parse_or(&lookup, "FACEWATCH_MATCH_THRESHOLD", facewatch_core::DEFAULT_THRESHOLD),
            detector_confidence: parse_or(
                &lookup,
                "FACEWATCH_DETECTOR_CONFIDENCE",
                facewatch_core::detector::DEFAULT_CONFIDENCE,
            ),
            backend,
            intra_threads: parse_or(&lookup, "FACEWATCH_INTRA_THREADS", 2),
            watch: lookup("FACEWATCH_WATCH").map(|v| v != "0").unwrap_or(true),
            warmup_frames: parse_or(&lookup, "FACEWATCH_WARMUP_FRAMES", 4),
            bus,
        }
    }

    /// Path to the YOLO detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    /// Path to the FaceNet embedding model.
    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedder_model)
    }

    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            backend: self.backend,
            intra_threads: self.intra_threads,
        }
    }
}

fn parse_or<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
