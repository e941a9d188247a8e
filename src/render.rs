//! Overlay rendering.
//!
//! Rendering is a pure function of a frame and a detection snapshot. It copies
//! the pixels into RGB order, outlines every violation in red with its label
//! in a chip above the box, and paints a status banner along the top edge
//! (red while a violation is active, green otherwise). The full status text is
//! carried separately in `StatusLine` for presenters that can print it.

use std::fmt;
use std::time::Duration;

use anyhow::Result;

use crate::detect::BoundingBox;
use crate::frame::{encode_rgb_jpeg, Frame};
use crate::glyphs::{self, GLYPH_ADVANCE, GLYPH_HEIGHT};
use crate::state::DetectionSnapshot;

pub type Rgb = (u8, u8, u8);

pub const VIOLATION_COLOR: Rgb = (255, 0, 0);
pub const CLEAR_COLOR: Rgb = (0, 255, 0);
pub const BOX_THICKNESS: u32 = 3;
pub const BANNER_HEIGHT: u32 = 8;
pub const LABEL_TEXT_COLOR: Rgb = (255, 255, 255);
/// Padding around label text inside its chip.
const LABEL_PADDING: u32 = 1;
const LABEL_CHIP_HEIGHT: u32 = GLYPH_HEIGHT + 2 * LABEL_PADDING;

/// One outlined violation.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub bbox: BoundingBox,
    pub label: String,
}

/// What to draw on top of a frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub annotations: Vec<Annotation>,
    pub violation_active: bool,
}

impl Overlay {
    pub fn from_snapshot(snapshot: &DetectionSnapshot) -> Self {
        Self {
            annotations: snapshot
                .result()
                .violations()
                .iter()
                .map(|v| Annotation {
                    bbox: v.bbox,
                    label: v.label.trim().to_string(),
                })
                .collect(),
            violation_active: snapshot.violation_active(),
        }
    }
}

/// Annotated copy of a frame, always packed RGB.
pub struct RenderedFrame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
}

impl RenderedFrame {
    pub fn pixel(&self, x: u32, y: u32) -> Rgb {
        let idx = self.offset(x, y);
        (self.rgb[idx], self.rgb[idx + 1], self.rgb[idx + 2])
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        encode_rgb_jpeg(&self.rgb, self.width, self.height, quality)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 3
    }

    fn put(&mut self, x: u32, y: u32, color: Rgb) {
        let idx = self.offset(x, y);
        self.rgb[idx] = color.0;
        self.rgb[idx + 1] = color.1;
        self.rgb[idx + 2] = color.2;
    }
}

pub fn render(frame: &Frame, overlay: &Overlay) -> RenderedFrame {
    let mut rendered = RenderedFrame {
        rgb: frame.to_rgb(),
        width: frame.width,
        height: frame.height,
        sequence: frame.sequence,
    };
    for annotation in &overlay.annotations {
        draw_box(&mut rendered, &annotation.bbox, VIOLATION_COLOR);
    }
    // Chips go on after every outline so a neighbouring box cannot cut text.
    for annotation in &overlay.annotations {
        draw_label(&mut rendered, &annotation.bbox, &annotation.label);
    }
    let banner = if overlay.violation_active {
        VIOLATION_COLOR
    } else {
        CLEAR_COLOR
    };
    let width = rendered.width;
    let bottom = BANNER_HEIGHT.min(rendered.height);
    fill_rect(&mut rendered, 0, 0, width, bottom, banner);
    rendered
}

fn draw_box(image: &mut RenderedFrame, bbox: &BoundingBox, color: Rgb) {
    let max_x = image.width.saturating_sub(1);
    let max_y = image.height.saturating_sub(1);
    let x1 = (bbox.xmin.max(0.0) as u32).min(max_x);
    let y1 = (bbox.ymin.max(0.0) as u32).min(max_y);
    let x2 = (bbox.xmax.max(0.0) as u32).min(max_x);
    let y2 = (bbox.ymax.max(0.0) as u32).min(max_y);
    if x1 >= x2 || y1 >= y2 {
        return;
    }
    let t = BOX_THICKNESS;
    fill_rect(image, x1, y1, x2 + 1, (y1 + t).min(y2 + 1), color);
    fill_rect(image, x1, (y2 + 1).saturating_sub(t).max(y1), x2 + 1, y2 + 1, color);
    fill_rect(image, x1, y1, (x1 + t).min(x2 + 1), y2 + 1, color);
    fill_rect(image, (x2 + 1).saturating_sub(t).max(x1), y1, x2 + 1, y2 + 1, color);
}

/// Red chip with the label in white, above the box when it fits below the
/// banner, otherwise just inside the top edge.
fn draw_label(image: &mut RenderedFrame, bbox: &BoundingBox, label: &str) {
    if label.is_empty() || image.width == 0 || image.height < LABEL_CHIP_HEIGHT {
        return;
    }
    let x1 = (bbox.xmin.max(0.0) as u32).min(image.width - 1);
    let y1 = (bbox.ymin.max(0.0) as u32).min(image.height - 1);
    let top = if y1 >= BANNER_HEIGHT + LABEL_CHIP_HEIGHT {
        y1 - LABEL_CHIP_HEIGHT
    } else {
        y1.min(image.height - LABEL_CHIP_HEIGHT)
    };
    let text_width = glyphs::text_width(label);
    let right = x1 + text_width + 2 * LABEL_PADDING;
    fill_rect(image, x1, top, right, top + LABEL_CHIP_HEIGHT, VIOLATION_COLOR);
    draw_text(
        image,
        x1 + LABEL_PADDING,
        top + LABEL_PADDING,
        label,
        LABEL_TEXT_COLOR,
    );
}

/// Draw `text` with its top-left corner at (`x`, `y`), clipped to the image.
fn draw_text(image: &mut RenderedFrame, x: u32, y: u32, text: &str, color: Rgb) {
    let mut pen_x = x;
    for ch in text.chars() {
        if pen_x >= image.width {
            break;
        }
        let rows = glyphs::glyph(ch);
        for (row, bits) in rows.iter().enumerate() {
            let py = y + row as u32;
            if py >= image.height {
                break;
            }
            for col in 0..glyphs::GLYPH_WIDTH {
                let px = pen_x + col;
                if px >= image.width {
                    break;
                }
                if bits & (1 << (glyphs::GLYPH_WIDTH - 1 - col)) != 0 {
                    image.put(px, py, color);
                }
            }
        }
        pen_x += GLYPH_ADVANCE;
    }
}

/// Fill the half-open rectangle `[left, right) x [top, bottom)`.
fn fill_rect(image: &mut RenderedFrame, left: u32, top: u32, right: u32, bottom: u32, color: Rgb) {
    let right = right.min(image.width);
    let bottom = bottom.min(image.height);
    for y in top..bottom {
        for x in left..right {
            image.put(x, y, color);
        }
    }
}

/// Text status shown next to the live view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusLine {
    pub violation_active: bool,
    pub labels: Vec<String>,
    pub next_scan: Duration,
    pub frame_sequence: u64,
}

impl StatusLine {
    pub fn new(snapshot: &DetectionSnapshot, next_scan: Duration, frame_sequence: u64) -> Self {
        Self {
            violation_active: snapshot.violation_active(),
            labels: snapshot.result().labels(),
            next_scan,
            frame_sequence,
        }
    }

    pub fn headline(&self) -> &'static str {
        if self.violation_active {
            "VIOLATION DETECTED"
        } else {
            "MONITORING..."
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.headline())?;
        if self.violation_active {
            write!(f, ": {}", self.labels.join(", "))?;
        }
        write!(f, " | next scan: {}s", self.next_scan.as_secs())
    }
}
