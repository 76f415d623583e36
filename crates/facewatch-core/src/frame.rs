//! Packed 3-channel frame type shared by capture, detection and embedding.

use crate::types::BoundingBox;
use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

/// Byte order of the three colour channels of each pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Bgr,
    Rgb,
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// A colour frame, 3 bytes per pixel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    order: ChannelOrder,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, order: ChannelOrder) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height, order })
    }

    /// A frame filled with a single colour, given in the frame's channel order.
    pub fn filled(width: u32, height: u32, order: ChannelOrder, pixel: [u8; 3]) -> Self {
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self { data, width, height, order }
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            order: ChannelOrder::Rgb,
        }
    }

    /// Convert to an RGB `image` buffer, swapping channels if needed.
    pub fn to_rgb_image(&self) -> RgbImage {
        let data = match self.order {
            ChannelOrder::Rgb => self.data.clone(),
            ChannelOrder::Bgr => swap_red_blue(&self.data),
        };
        // Length is validated at construction.
        RgbImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Borrow the buffer as an image whose channels stay in the frame's order.
    pub(crate) fn image_mut(&mut self) -> Option<ImageBuffer<Rgb<u8>, &mut [u8]>> {
        ImageBuffer::from_raw(self.width, self.height, self.data.as_mut_slice())
    }

    /// Crop to a bounding box with slice semantics.
    ///
    /// Coordinates are clamped to the frame, so the crop can be smaller than
    /// the box or empty when the box lies outside the frame.
    pub fn crop(&self, bbox: &BoundingBox) -> Frame {
        let clamp_x = |v: i32| v.clamp(0, self.width as i32) as u32;
        let clamp_y = |v: i32| v.clamp(0, self.height as i32) as u32;
        let (x1, x2) = (clamp_x(bbox.x1), clamp_x(bbox.x2));
        let (y1, y2) = (clamp_y(bbox.y1), clamp_y(bbox.y2));
        let w = x2.saturating_sub(x1);
        let h = y2.saturating_sub(y1);

        let row_stride = self.width as usize * 3;
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for y in y1..y1 + h {
            let start = y as usize * row_stride + x1 as usize * 3;
            data.extend_from_slice(&self.data[start..start + w as usize * 3]);
        }

        Frame {
            data,
            width: w,
            height: h,
            order: self.order,
        }
    }
}

fn swap_red_blue(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0]]).collect()
}
