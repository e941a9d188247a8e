//! Live exam proctoring monitor
//!
//! Watches a camera feed, periodically sends a frame to a visual-analysis
//! backend to detect proctoring violations (prohibited objects or persons),
//! renders live feedback and emits a rate-limited alert with evidence when a
//! violation is confirmed.
//!
//! # Architecture
//!
//! The monitor keeps three guarantees by construction:
//!
//! 1. **Responsive capture**: the loop never waits on the backend. At most one
//!    analysis runs in the background; due ticks that find it busy are skipped.
//! 2. **Consistent state**: the latest detection result and the violation flag
//!    are replaced together under one lock and read as one snapshot.
//! 3. **Bounded alerting**: at most one dispatch attempt per cooldown window,
//!    decided by an atomic check-and-set.
//!
//! # Module Structure
//!
//! - `frame`: captured pixel buffers and JPEG encoding
//! - `ingest`: frame sources (synthetic, HTTP MJPEG/JPEG)
//! - `detect`: detection backends and normalized result conversion
//! - `state`: `DetectionStateStore`
//! - `alert`: `AlertThrottler` and dispatchers (log, SMTP)
//! - `scheduler`: `AnalysisScheduler`
//! - `render` / `glyphs` / `ui`: overlay rendering, label glyphs and presenters
//! - `monitor`: `MonitorLoop` lifecycle
//! - `config` / `session`: configuration loading and wiring

pub mod alert;
pub mod config;
pub mod detect;
pub mod frame;
pub mod glyphs;
pub mod ingest;
pub mod monitor;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod ui;

pub use alert::{AlertDispatcher, AlertOutcome, AlertThrottler, DispatchError, LogDispatcher};
pub use config::{AlertKind, BackendKind, MonitorConfig, Secret};
pub use detect::{
    AnalysisError, BoundingBox, DetectionBackend, DetectionResult, RawDetection, StubBackend,
    Violation, ViolationClass,
};
pub use frame::{ChannelOrder, Frame};
pub use ingest::{open_source, CaptureError, CaptureSettings, FrameSource};
pub use monitor::{
    ExitReason, LoopSettings, MonitorLoop, MonitorPhase, MonitorReport, StopSignal, TickOutcome,
};
pub use render::{render, Annotation, Overlay, RenderedFrame, StatusLine};
pub use scheduler::{AnalysisScheduler, ScheduleDecision};
pub use state::{DetectionSnapshot, DetectionStateStore};
pub use ui::{PreviewPresenter, Presenter, TerminalPresenter, Ui, UiMode};
