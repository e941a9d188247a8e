//! HTTP MJPEG / JPEG snapshot source.
//!
//! Connects to a `multipart/x-mixed-replace` MJPEG stream when the server
//! offers one (most webcam bridges and IP cameras), and otherwise polls the
//! URL for single JPEG snapshots. Frames are decoded in memory. A stream is
//! decimated to the configured frame rate by dropping early frames; snapshot
//! polling waits out the frame interval before each request instead.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

use image::GenericImageView;
use url::Url;

use super::{CaptureError, CaptureSettings, FrameSource};
use crate::frame::{ChannelOrder, Frame};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MjpegSource {
    settings: CaptureSettings,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl MjpegSource {
    pub fn new(settings: CaptureSettings) -> Result<Self> {
        let url = Url::parse(&settings.url).context("parse capture url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported mjpeg scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Ok(Self {
            settings,
            agent,
            stream: None,
            last_frame_at: None,
            frame_count: 0,
        })
    }

    pub fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.settings.url)
            .call()
            .with_context(|| format!("connect to {}", self.settings.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
            log::info!("MjpegSource: streaming from {}", self.settings.url);
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
            log::info!("MjpegSource: polling snapshots from {}", self.settings.url);
        }
        Ok(())
    }

    fn fetch_single_jpeg(&self) -> Result<Vec<u8>, CaptureError> {
        let response = self
            .agent
            .get(&self.settings.url)
            .call()
            .map_err(|e| CaptureError::Device(format!("fetch jpeg snapshot: {}", e)))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| CaptureError::Device(format!("read jpeg snapshot: {}", e)))?;
        if bytes.is_empty() {
            return Err(CaptureError::Device("empty jpeg snapshot".to_string()));
        }
        Ok(bytes)
    }
}

impl FrameSource for MjpegSource {
    fn describe(&self) -> String {
        self.settings.url.clone()
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let min_interval = frame_interval(self.settings.target_fps);
        let last_frame_at = self.last_frame_at;
        let jpeg_bytes = match self.stream.as_mut() {
            None => return Err(CaptureError::NotConnected),
            // The multipart body must be drained either way, so early frames are dropped.
            Some(HttpStream::Mjpeg(stream)) => loop {
                let bytes = stream.read_next_jpeg()?;
                match last_frame_at {
                    Some(last) if last.elapsed() < min_interval => continue,
                    _ => break bytes,
                }
            },
            Some(HttpStream::SingleJpeg) => {
                if let Some(last) = last_frame_at {
                    let wait = min_interval.saturating_sub(last.elapsed());
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }
                }
                self.fetch_single_jpeg()?
            }
        };

        self.last_frame_at = Some(Instant::now());
        let (pixels, width, height) =
            decode_jpeg(&jpeg_bytes).map_err(|e| CaptureError::Device(e.to_string()))?;
        self.frame_count += 1;
        Frame::new(pixels, width, height, ChannelOrder::Rgb, self.frame_count)
            .map_err(|e| CaptureError::Device(e.to_string()))
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            log::info!(
                "MjpegSource: released {} after {} frames",
                self.settings.url,
                self.frame_count
            );
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>, CaptureError> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| CaptureError::Device(format!("read mjpeg chunk: {}", e)))?;
            if read == 0 {
                return Err(CaptureError::EndOfStream);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok((rgb.into_raw(), width, height))
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(u64::from((1000 / target_fps).max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};

    fn tiny_jpeg() -> Vec<u8> {
        let frame = Frame::new(vec![200u8; 8 * 8 * 3], 8, 8, ChannelOrder::Rgb, 1).unwrap();
        frame.encode_jpeg(90).unwrap()
    }

    fn read_request_head(stream: &mut TcpStream) {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            match stream.read(&mut byte) {
                Ok(1) => head.push(byte[0]),
                _ => break,
            }
        }
    }

    /// Serve `body` as a JPEG snapshot on every request, recording when each
    /// request arrived.
    fn serve_snapshots(body: Vec<u8>) -> (String, Arc<Mutex<Vec<Instant>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/snapshot.jpg", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                seen.lock().unwrap().push(Instant::now());
                read_request_head(&mut stream);
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        (url, requests)
    }

    #[test]
    fn snapshot_polling_issues_one_request_per_frame() {
        let (url, requests) = serve_snapshots(tiny_jpeg());
        let mut source = MjpegSource::new(CaptureSettings {
            url,
            target_fps: 20,
            ..CaptureSettings::default()
        })
        .unwrap();
        source.connect().unwrap();

        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!((second.width, second.height), (8, 8));

        let requests = requests.lock().unwrap().clone();
        // connect, then one GET per delivered frame
        assert_eq!(requests.len(), 3);
        assert!(requests[2].duration_since(requests[1]) >= Duration::from_millis(50));
    }

    #[test]
    fn finds_jpeg_bounds_in_multipart_noise() {
        let buffer = [b'-', b'-', 0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9, b'\r', b'\n'];
        assert_eq!(find_jpeg_bounds(&buffer), Some((2, 9)));
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD8, 1, 2]), None);
        assert_eq!(find_jpeg_bounds(&[1, 2, 3]), None);
    }

    #[test]
    fn mjpeg_stream_yields_frames_then_end_of_stream() {
        let jpeg = tiny_jpeg();
        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&jpeg);
            body.extend_from_slice(b"\r\n");
        }
        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));

        let first = stream.read_next_jpeg().unwrap();
        let (pixels, width, height) = decode_jpeg(&first).unwrap();
        assert_eq!((width, height), (8, 8));
        assert_eq!(pixels.len(), 8 * 8 * 3);
        assert!(stream.read_next_jpeg().is_ok());
        assert!(matches!(stream.read_next_jpeg(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn rejects_non_http_urls() {
        let settings = CaptureSettings {
            url: "ftp://camera/stream".to_string(),
            ..CaptureSettings::default()
        };
        assert!(MjpegSource::new(settings).is_err());
    }

    #[test]
    fn unconnected_source_reports_not_connected() {
        let settings = CaptureSettings {
            url: "http://127.0.0.1:9/stream".to_string(),
            ..CaptureSettings::default()
        };
        let mut source = MjpegSource::new(settings).unwrap();
        assert!(matches!(source.next_frame(), Err(CaptureError::NotConnected)));
    }

    #[test]
    fn frame_interval_handles_zero_fps() {
        assert_eq!(frame_interval(0), Duration::ZERO);
        assert_eq!(frame_interval(10), Duration::from_millis(100));
    }
}
