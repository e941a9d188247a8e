//! Frame capture sources.
//!
//! - `stub://name[?frames=N]`: synthetic moving scene (tests, demos, dry runs)
//! - `http(s)://...`: MJPEG stream or JPEG snapshot endpoint (webcam bridges,
//!   IP cameras)
//!
//! A source is owned by the monitor loop alone. It is opened when the session
//! starts and released exactly once when the loop stops. A capture error ends
//! the session.

pub mod mjpeg;
pub mod synthetic;

pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;

use anyhow::{anyhow, Result};
use thiserror::Error;

use crate::frame::Frame;

/// Failure to produce the next frame. Always fatal for the session.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture source reached end of stream")]
    EndOfStream,
    #[error("capture device error: {0}")]
    Device(String),
    #[error("capture source is not connected")]
    NotConnected,
}

pub trait FrameSource {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Capture the next frame. May block briefly on device I/O.
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Release the underlying device or connection.
    fn release(&mut self) {}
}

/// Capture configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Source URL; the scheme selects the implementation.
    pub url: String,
    /// Frames per second the monitor loop paces to. Sources decimate to it.
    pub target_fps: u32,
    /// Frame size for synthetic sources.
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            url: "stub://webcam".to_string(),
            target_fps: 15,
            width: 640,
            height: 480,
        }
    }
}

/// Open the source named by `settings.url`.
pub fn open_source(settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.starts_with("stub://") {
        let mut source = SyntheticSource::from_url(settings.clone())?;
        source.connect();
        return Ok(Box::new(source));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        let mut source = MjpegSource::new(settings.clone())?;
        source.connect()?;
        return Ok(Box::new(source));
    }
    Err(anyhow!(
        "unsupported capture url '{}'; expected stub:// or http(s)://",
        settings.url
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_synthetic_source_by_scheme() {
        let settings = CaptureSettings {
            url: "stub://desk".to_string(),
            width: 32,
            height: 24,
            ..CaptureSettings::default()
        };
        let mut source = open_source(&settings).unwrap();
        assert_eq!(source.describe(), "stub://desk (synthetic)");
        let frame = source.next_frame().unwrap();
        assert_eq!((frame.width, frame.height), (32, 24));
    }

    #[test]
    fn stub_frames_option_ends_stream() {
        let settings = CaptureSettings {
            url: "stub://desk?frames=3".to_string(),
            width: 16,
            height: 16,
            ..CaptureSettings::default()
        };
        let mut source = open_source(&settings).unwrap();
        for sequence in 1..=3 {
            assert_eq!(source.next_frame().unwrap().sequence, sequence);
        }
        assert!(matches!(source.next_frame(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn rejects_unknown_scheme() {
        let settings = CaptureSettings {
            url: "rtsp://camera".to_string(),
            ..CaptureSettings::default()
        };
        let err = open_source(&settings).err().unwrap();
        assert!(err.to_string().contains("unsupported capture url"));
    }
}
