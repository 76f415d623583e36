use serde::{Deserialize, Serialize};

/// Label reported for a face that matched no gallery identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Bounding box for a detected face in integer frame pixel coordinates.
///
/// `(x1, y1)` is the top-left corner, `(x2, y2)` the exclusive bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2, confidence: 1.0 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Face embedding vector (512-dimensional for FaceNet / InceptionResnetV1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance between two raw embeddings, in single precision.
    ///
    /// No normalisation is applied to either side.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A known person: label plus the centroid of their reference embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub label: String,
    pub centroid: Embedding,
}

/// Outcome of comparing one query embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    /// Matched identity label, `None` when the face is unknown.
    pub label: Option<String>,
    /// Distance to the nearest centroid (`+inf` for an empty gallery).
    pub distance: f32,
}

impl Identification {
    pub fn unknown(distance: f32) -> Self {
        Self { label: None, distance }
    }

    pub fn is_known(&self) -> bool {
        self.label.is_some()
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// One detected face in a frame paired with its identification.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub bbox: BoundingBox,
    pub identification: Identification,
}

impl MatchResult {
    pub fn label(&self) -> &str {
        self.identification.display_label()
    }

    pub fn distance(&self) -> f32 {
        self.identification.distance
    }

    pub fn is_known(&self) -> bool {
        self.identification.is_known()
    }

    /// Flat `(box, label, distance)` projection used on the wire.
    pub fn report(&self) -> FaceReport {
        FaceReport {
            x1: self.bbox.x1,
            y1: self.bbox.y1,
            x2: self.bbox.x2,
            y2: self.bbox.y2,
            label: self.label().to_string(),
            distance: self.distance(),
        }
    }
}

/// Serialisable per-face record exchanged with transport layers.
///
/// An infinite distance (empty gallery) serialises as JSON `null` and
/// reads back as `+inf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceReport {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub label: String,
    #[serde(deserialize_with = "distance_or_infinity")]
    pub distance: f32,
}

fn distance_or_infinity<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::INFINITY))
}
