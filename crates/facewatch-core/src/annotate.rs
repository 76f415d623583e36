//! Draws identification results onto a frame.

use crate::frame::{ChannelOrder, Frame};
use crate::types::{BoundingBox, MatchResult};
use ab_glyph::{FontRef, PxScale};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

static LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

const KNOWN_RGB: [u8; 3] = [0, 255, 0];
const UNKNOWN_RGB: [u8; 3] = [255, 0, 0];
const LINE_WIDTH: i32 = 2;
const LABEL_SCALE: f32 = 16.0;
/// Gap between the bottom of a label and the top of its box.
const LABEL_GAP: i32 = 10;

/// Outline every result's box and write its label above it: green for known
/// faces, red for unknown ones.
///
/// Anything falling outside the frame is clipped; labels that would leave the
/// frame are pushed back inside.
pub fn annotate(frame: &mut Frame, results: &[MatchResult]) {
    let font = match FontRef::try_from_slice(LABEL_FONT) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "label font unusable; drawing boxes only");
            None
        }
    };
    let scale = PxScale::from(LABEL_SCALE);
    let (width, height) = (frame.width() as i32, frame.height() as i32);
    let order = frame.order();
    let Some(mut image) = frame.image_mut() else {
        return;
    };

    for result in results {
        let rgb = if result.is_known() { KNOWN_RGB } else { UNKNOWN_RGB };
        let color = image::Rgb(match order {
            ChannelOrder::Rgb => rgb,
            ChannelOrder::Bgr => [rgb[2], rgb[1], rgb[0]],
        });

        let Some((x1, y1, x2, y2)) = clip(&result.bbox, width, height) else {
            continue;
        };

        for inset in 0..LINE_WIDTH {
            let (w, h) = (x2 - x1 - 2 * inset, y2 - y1 - 2 * inset);
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut image, rect, color);
        }

        if let Some(font) = &font {
            let label = result.label();
            let (text_w, text_h) = text_size(scale, font, label);
            let (text_w, text_h) = (text_w as i32, text_h as i32);
            let x = x1.clamp(0, (width - text_w).max(0));
            let y = (y1 - LABEL_GAP - text_h).clamp(0, (height - text_h).max(0));
            draw_text_mut(&mut image, color, x, y, scale, font, label);
        }
    }
}

/// Clamp a box to one outline width beyond the frame on every side.
///
/// Edges pushed off-frame stay invisible. `None` when nothing is left.
fn clip(bbox: &BoundingBox, width: i32, height: i32) -> Option<(i32, i32, i32, i32)> {
    let cx = |v: i32| v.clamp(-LINE_WIDTH, width + LINE_WIDTH);
    let cy = |v: i32| v.clamp(-LINE_WIDTH, height + LINE_WIDTH);
    let (x1, y1, x2, y2) = (cx(bbox.x1), cy(bbox.y1), cx(bbox.x2), cy(bbox.y2));
    (x1 < x2 && y1 < y2).then_some((x1, y1, x2, y2))
}
