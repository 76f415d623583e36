//! Face crop normalisation for the FaceNet embedder.
//!
//! Resize to 160x160, reorder channels to RGB, then per-image standardisation
//! ("prewhitening") into a NCHW float tensor with a batch dimension of 1.

use crate::frame::{ChannelOrder, Frame};
use image::imageops::{self, FilterType};
use ndarray::Array4;

/// Spatial input size expected by the embedder.
pub const EMBEDDER_INPUT_SIZE: usize = 160;

/// Normalise an arbitrary-size colour patch into the embedder's input tensor.
///
/// The caller is responsible for rejecting degenerate (tiny) crops.
pub fn normalize(patch: &Frame) -> Array4<f32> {
    let size = EMBEDDER_INPUT_SIZE as u32;
    // Resizing is channel-agnostic, so the buffer can be carried as-is and
    // reordered afterwards.
    let raw = image::RgbImage::from_raw(patch.width(), patch.height(), patch.data().to_vec())
        .unwrap_or_else(|| image::RgbImage::new(patch.width(), patch.height()));
    // Triangle widens its kernel when shrinking, so large crops come out
    // smoother than an OpenCV INTER_LINEAR resize; values are not bit-identical.
    let resized = imageops::resize(&raw, size, size, FilterType::Triangle);

    let (r_idx, g_idx, b_idx) = match patch.order() {
        ChannelOrder::Rgb => (0, 1, 2),
        ChannelOrder::Bgr => (2, 1, 0),
    };

    let count = (EMBEDDER_INPUT_SIZE * EMBEDDER_INPUT_SIZE * 3) as f64;
    let (sum, sum_sq) = resized.as_raw().iter().fold((0.0f64, 0.0f64), |(s, sq), &v| {
        let v = v as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / count;
    let variance = (sum_sq / count - mean * mean).max(0.0);
    let std_adj = variance.sqrt().max(1.0 / count.sqrt());

    let mut tensor = Array4::<f32>::zeros((1, 3, EMBEDDER_INPUT_SIZE, EMBEDDER_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for (channel, idx) in [r_idx, g_idx, b_idx].into_iter().enumerate() {
            tensor[[0, channel, y, x]] = ((pixel.0[idx] as f64 - mean) / std_adj) as f32;
        }
    }

    tensor
}
