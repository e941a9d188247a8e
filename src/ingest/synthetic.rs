//! Synthetic frame source (`stub://`).
//!
//! Produces a shifting gradient with a bright block sweeping across it, in BGR
//! order like most webcam drivers. No devices or network are touched.
//!
//! `stub://name?frames=N` ends the stream after `N` frames.

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{CaptureError, CaptureSettings, FrameSource};
use crate::frame::{ChannelOrder, Frame};

const BLOCK_SIZE: usize = 48;

pub struct SyntheticSource {
    settings: CaptureSettings,
    frame_count: u64,
    frame_limit: Option<u64>,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            frame_count: 0,
            frame_limit: None,
            connected: false,
        }
    }

    /// Build from the options carried in `settings.url`.
    pub fn from_url(settings: CaptureSettings) -> Result<Self> {
        let url = Url::parse(settings.url.trim()).context("parse capture url")?;
        let mut frame_limit = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => {
                    let limit = value
                        .parse::<u64>()
                        .ok()
                        .filter(|limit| *limit > 0)
                        .ok_or_else(|| {
                            anyhow!("capture url frames must be a positive integer, got '{}'", value)
                        })?;
                    frame_limit = Some(limit);
                }
                other => return Err(anyhow!("unknown stub capture option '{}'", other)),
            }
        }
        let source = Self::new(settings);
        Ok(match frame_limit {
            Some(limit) => source.with_frame_limit(limit),
            None => source,
        })
    }

    /// End the stream after `limit` frames.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    pub fn connect(&mut self) {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.settings.url,
            self.settings.width,
            self.settings.height
        );
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.settings.width as usize;
        let height = self.settings.height as usize;
        let mut pixels = vec![0u8; width * height * 3];
        let block_x = ((self.frame_count * 4) % width.max(1) as u64) as usize;
        let block_y = height / 3;
        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) * 3;
                let in_block = x >= block_x
                    && x < block_x + BLOCK_SIZE
                    && y >= block_y
                    && y < block_y + BLOCK_SIZE;
                if in_block {
                    pixels[idx..idx + 3].copy_from_slice(&[230, 230, 230]);
                } else {
                    let shade = (((x + y) as u64 + self.frame_count) % 256) as u8;
                    pixels[idx] = shade / 2;
                    pixels[idx + 1] = shade / 3;
                    pixels[idx + 2] = shade / 4;
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.settings.url)
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.connected {
            return Err(CaptureError::NotConnected);
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Err(CaptureError::EndOfStream);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(
            pixels,
            self.settings.width,
            self.settings.height,
            ChannelOrder::Bgr,
            self.frame_count,
        )
        .map_err(|e| CaptureError::Device(e.to_string()))
    }

    fn release(&mut self) {
        if self.connected {
            self.connected = false;
            log::info!(
                "SyntheticSource: released {} after {} frames",
                self.settings.url,
                self.frame_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            url: "stub://test".to_string(),
            target_fps: 10,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn produces_sequenced_frames() {
        let mut source = SyntheticSource::new(settings());
        source.connect();
        let f1 = source.next_frame().unwrap();
        let f2 = source.next_frame().unwrap();
        assert_eq!((f1.sequence, f2.sequence), (1, 2));
        assert_eq!(f1.order, ChannelOrder::Bgr);
        assert_ne!(f1.pixels(), f2.pixels());
        assert_eq!(source.frames_captured(), 2);
    }

    #[test]
    fn requires_connect() {
        let mut source = SyntheticSource::new(settings());
        assert!(matches!(source.next_frame(), Err(CaptureError::NotConnected)));
    }

    #[test]
    fn frame_limit_ends_stream() {
        let mut source = SyntheticSource::new(settings()).with_frame_limit(1);
        source.connect();
        assert!(source.next_frame().is_ok());
        assert!(matches!(source.next_frame(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn url_frames_option_sets_limit() {
        let mut source = SyntheticSource::from_url(CaptureSettings {
            url: "stub://test?frames=2".to_string(),
            ..settings()
        })
        .unwrap();
        source.connect();
        assert!(source.next_frame().is_ok());
        assert!(source.next_frame().is_ok());
        assert!(matches!(source.next_frame(), Err(CaptureError::EndOfStream)));
        assert_eq!(source.describe(), "stub://test?frames=2 (synthetic)");
    }

    #[test]
    fn url_without_options_is_unlimited() {
        let source = SyntheticSource::from_url(settings()).unwrap();
        assert_eq!(source.frame_limit, None);
    }

    #[test]
    fn rejects_bad_url_options() {
        for url in ["stub://test?frames=0", "stub://test?frames=ten", "stub://test?fps=3"] {
            let result = SyntheticSource::from_url(CaptureSettings {
                url: url.to_string(),
                ..settings()
            });
            assert!(result.is_err(), "{}", url);
        }
    }

    #[test]
    fn released_source_stops_producing() {
        let mut source = SyntheticSource::new(settings());
        source.connect();
        source.release();
        assert!(matches!(source.next_frame(), Err(CaptureError::NotConnected)));
    }
}
