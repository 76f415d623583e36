//! Raw capture buffer → colour frame conversion.

use facewatch_core::{ChannelOrder, Frame};

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("MJPEG decode failed: {0}")]
    Mjpeg(#[from] image::ImageError),
}

/// Convert packed YUYV (4:2:2) to an RGB frame using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Frame, ConvertError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(ConvertError::InvalidLength {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in yuyv[..expected].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }

    packed(rgb, width, height, ChannelOrder::Rgb, "YUYV")
}

/// Wrap an already packed 24-bit buffer (RGB3 / BGR3).
pub fn packed_to_frame(
    buf: &[u8],
    width: u32,
    height: u32,
    order: ChannelOrder,
) -> Result<Frame, ConvertError> {
    let expected = width as usize * height as usize * 3;
    let format = match order {
        ChannelOrder::Rgb => "RGB3",
        ChannelOrder::Bgr => "BGR3",
    };
    if buf.len() < expected {
        return Err(ConvertError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    packed(buf[..expected].to_vec(), width, height, order, format)
}

/// Decode one MJPEG buffer.
pub fn mjpeg_to_rgb(buf: &[u8]) -> Result<Frame, ConvertError> {
    let image = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)?;
    Ok(Frame::from_rgb_image(image.to_rgb8()))
}

fn packed(
    data: Vec<u8>,
    width: u32,
    height: u32,
    order: ChannelOrder,
    format: &'static str,
) -> Result<Frame, ConvertError> {
    let actual = data.len();
    Frame::new(data, width, height, order).map_err(|_| ConvertError::InvalidLength {
        format,
        expected: width as usize * height as usize * 3,
        actual,
    })
}

/// Check if a frame is dark: more than `threshold_pct` of pixels have
/// luma below 32. Cameras emit such frames while exposure settles.
pub fn is_dark_frame(frame: &Frame, threshold_pct: f32) -> bool {
    let data = frame.data();
    if data.is_empty() {
        return true;
    }
    let dark = data
        .chunks_exact(3)
        .filter(|p| (p[0] as u32 + p[1] as u32 + p[2] as u32) / 3 < 32)
        .count();
    (dark as f32 / (data.len() / 3) as f32) > threshold_pct
}
