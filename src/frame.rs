//! Captured frames.
//!
//! A `Frame` is immutable once produced by a capture source. The monitor loop
//! shares it by `Arc` with at most one in-flight analysis task and with the
//! renderer, so nothing downstream may mutate the pixels in place. Rendering
//! always works on a copy (`RenderedFrame`).

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::time::Instant;
use zeroize::Zeroize;

/// Default JPEG quality for evidence and backend uploads.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Byte order of the three colour channels in a pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// One captured image from the monitored feed.
///
/// Pixel data is private; callers read it through `pixels()` or convert with
/// `to_rgb()`. Not `Clone`; frames travel as `Arc<Frame>`.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
    /// Monotonic per-source sequence number, starting at 1.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Build a frame from a packed 8-bit, 3-channel buffer.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        order: ChannelOrder,
        sequence: u64,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected_len = packed_len(width, height)?;
        if data.len() != expected_len {
            return Err(anyhow!(
                "expected {} bytes for {}x{} frame, received {}",
                expected_len,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            order,
            sequence,
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Packed RGB copy of the pixels regardless of source channel order.
    pub fn to_rgb(&self) -> Vec<u8> {
        match self.order {
            ChannelOrder::Rgb => self.data.clone(),
            ChannelOrder::Bgr => swap_red_blue(&self.data),
        }
    }

    /// Encode the frame as a baseline JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        encode_rgb_jpeg(&self.to_rgb(), self.width, self.height, quality)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("order", &self.order)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

pub(crate) fn packed_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

pub(crate) fn swap_red_blue(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
    }
    output
}

pub(crate) fn encode_rgb_jpeg(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(rgb.len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder
        .encode(rgb, width, height, ExtendedColorType::Rgb8)
        .context("jpeg encode failed")?;
    Ok(out)
}
