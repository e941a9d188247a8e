//! The live monitoring loop.
//!
//! One thread drives capture, scheduling, rendering and presentation. Analysis
//! and alerting happen on the scheduler's background thread and only reach
//! the loop through the detection store.
//!
//! Lifecycle: `Running` until the stop signal fires, the frame limit is hit
//! or capture fails; then `Stopping` while the source is released and the
//! in-flight analysis gets its grace period; then `Stopped`.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ingest::{CaptureError, FrameSource};
use crate::render::{render, Overlay, StatusLine};
use crate::scheduler::{AnalysisScheduler, ScheduleDecision};
use crate::state::DetectionStateStore;
use crate::ui::Presenter;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorPhase {
    Running,
    Stopping,
    Stopped,
}

/// Cooperative stop request shared with signal handlers.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Trigger on Ctrl+C. Can only be installed once per process.
    pub fn install_ctrlc_handler(&self) -> Result<()> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            log::info!("stop requested (Ctrl-C)");
            signal.trigger();
        })
        .context("install Ctrl-C handler")
    }
}

#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Pace the loop to this rate; 0 runs as fast as the source delivers.
    pub target_fps: u32,
    /// How long shutdown waits for an in-flight analysis.
    pub shutdown_grace: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_frames: None,
            target_fps: 0,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitReason {
    StopSignal,
    FrameLimit,
    CaptureFailed(String),
}

/// Result of a single loop iteration.
#[derive(Clone, Debug)]
pub struct TickOutcome {
    pub frame_sequence: u64,
    pub decision: ScheduleDecision,
    pub status: StatusLine,
    /// Set when the loop should stop after this tick.
    pub stop: Option<ExitReason>,
}

#[derive(Clone, Debug)]
pub struct MonitorReport {
    pub frames: u64,
    pub analyses_completed: u64,
    pub analyses_failed: u64,
    pub exit: ExitReason,
    /// An analysis was still running when the grace period ran out.
    pub analysis_abandoned: bool,
}

pub struct MonitorLoop {
    source: Option<Box<dyn FrameSource>>,
    source_name: String,
    scheduler: AnalysisScheduler,
    store: Arc<DetectionStateStore>,
    presenters: Vec<Box<dyn Presenter>>,
    stop: StopSignal,
    settings: LoopSettings,
    phase: MonitorPhase,
    frames: u64,
}

impl MonitorLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        scheduler: AnalysisScheduler,
        store: Arc<DetectionStateStore>,
        presenters: Vec<Box<dyn Presenter>>,
        stop: StopSignal,
        settings: LoopSettings,
    ) -> Self {
        let source_name = source.describe();
        Self {
            source: Some(source),
            source_name,
            scheduler,
            store,
            presenters,
            stop,
            settings,
            phase: MonitorPhase::Running,
            frames: 0,
        }
    }

    pub fn phase(&self) -> MonitorPhase {
        self.phase
    }

    pub fn store(&self) -> &Arc<DetectionStateStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &AnalysisScheduler {
        &self.scheduler
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Capture, schedule, render and present one frame observed at `now`.
    pub fn tick(&mut self, now: Instant) -> Result<TickOutcome, CaptureError> {
        let source = self.source.as_mut().ok_or(CaptureError::NotConnected)?;
        let frame = Arc::new(source.next_frame()?);
        self.frames += 1;

        let decision = self.scheduler.maybe_analyze(&frame, now);
        let snapshot = self.store.snapshot();
        let rendered = render(&frame, &Overlay::from_snapshot(&snapshot));
        let status = StatusLine::new(
            &snapshot,
            self.scheduler.time_until_next(now),
            frame.sequence,
        );
        for presenter in self.presenters.iter_mut() {
            if let Err(e) = presenter.present(&rendered, &status) {
                log::warn!("{} presenter failed: {:#}", presenter.name(), e);
            }
        }

        let stop = if self.stop.is_triggered() {
            Some(ExitReason::StopSignal)
        } else if self.settings.max_frames.is_some_and(|max| self.frames >= max) {
            Some(ExitReason::FrameLimit)
        } else {
            None
        };
        Ok(TickOutcome {
            frame_sequence: frame.sequence,
            decision,
            status,
            stop,
        })
    }

    /// Run until stopped, then shut down.
    pub fn run(&mut self) -> Result<MonitorReport> {
        if self.phase != MonitorPhase::Running {
            return Err(anyhow!("monitor loop already stopped"));
        }
        log::info!(
            "monitoring {} (analysis every {}s)",
            self.source_name,
            self.scheduler.interval().as_secs()
        );

        let frame_period = match self.settings.target_fps {
            0 => Duration::ZERO,
            fps => Duration::from_secs(1) / fps,
        };
        let mut last_health_log = Instant::now();

        let exit = loop {
            if self.stop.is_triggered() {
                break ExitReason::StopSignal;
            }
            let started = Instant::now();
            match self.tick(started) {
                Ok(outcome) => {
                    if let Some(reason) = outcome.stop {
                        break reason;
                    }
                }
                Err(e) => {
                    log::error!("capture from {} failed, stopping: {}", self.source_name, e);
                    break ExitReason::CaptureFailed(e.to_string());
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "health: frames={} analyses={} failed={} violation_active={}",
                    self.frames,
                    self.scheduler.passes_completed(),
                    self.scheduler.passes_failed(),
                    self.store.snapshot().violation_active()
                );
                last_health_log = Instant::now();
            }

            if let Some(remaining) = frame_period.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        };

        let analysis_abandoned = !self.shutdown();
        let report = MonitorReport {
            frames: self.frames,
            analyses_completed: self.scheduler.passes_completed(),
            analyses_failed: self.scheduler.passes_failed(),
            exit,
            analysis_abandoned,
        };
        log::info!(
            "monitor stopped: {:?} after {} frames ({} analyses, {} failed)",
            report.exit,
            report.frames,
            report.analyses_completed,
            report.analyses_failed
        );
        Ok(report)
    }

    /// Release the source, settle the scheduler and finish presenters.
    ///
    /// Returns false if an in-flight analysis had to be abandoned. Calling it
    /// again after `Stopped` is a no-op.
    pub fn shutdown(&mut self) -> bool {
        if self.phase == MonitorPhase::Stopped {
            return true;
        }
        self.phase = MonitorPhase::Stopping;
        if let Some(mut source) = self.source.take() {
            source.release();
        }
        let finished = self.scheduler.shutdown(self.settings.shutdown_grace);
        for presenter in self.presenters.iter_mut() {
            presenter.finish();
        }
        self.phase = MonitorPhase::Stopped;
        finished
    }
}

impl Drop for MonitorLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertThrottler, LogDispatcher};
    use crate::detect::StubBackend;
    use crate::frame::{ChannelOrder, Frame};
    use crate::ingest::{CaptureSettings, SyntheticSource};
    use crate::render::RenderedFrame;
    use std::sync::atomic::AtomicUsize;

    struct TrackedSource {
        remaining: u64,
        sequence: u64,
        releases: Arc<AtomicUsize>,
    }

    impl FrameSource for TrackedSource {
        fn describe(&self) -> String {
            "tracked".to_string()
        }

        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            if self.remaining == 0 {
                return Err(CaptureError::Device("camera unplugged".to_string()));
            }
            self.remaining -= 1;
            self.sequence += 1;
            Frame::new(vec![0u8; 8 * 8 * 3], 8, 8, ChannelOrder::Bgr, self.sequence)
                .map_err(|e| CaptureError::Device(e.to_string()))
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingPresenter(Arc<AtomicUsize>);

    impl Presenter for FailingPresenter {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn present(&mut self, _frame: &RenderedFrame, _status: &StatusLine) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("display gone"))
        }
    }

    fn scheduler(store: &Arc<DetectionStateStore>) -> AnalysisScheduler {
        let throttler = Arc::new(AlertThrottler::new(
            Duration::from_secs(300),
            Box::new(LogDispatcher::default()),
        ));
        AnalysisScheduler::new(
            Duration::from_secs(5),
            Box::new(StubBackend::scripted(Vec::new())),
            store.clone(),
            throttler,
        )
    }

    fn monitor(
        source: Box<dyn FrameSource>,
        presenters: Vec<Box<dyn Presenter>>,
        stop: StopSignal,
        max_frames: Option<u64>,
    ) -> MonitorLoop {
        let store = Arc::new(DetectionStateStore::new());
        let settings = LoopSettings {
            max_frames,
            ..LoopSettings::default()
        };
        MonitorLoop::new(source, scheduler(&store), store, presenters, stop, settings)
    }

    fn tracked(frames: u64, releases: &Arc<AtomicUsize>) -> Box<dyn FrameSource> {
        Box::new(TrackedSource {
            remaining: frames,
            sequence: 0,
            releases: releases.clone(),
        })
    }

    #[test]
    fn capture_failure_stops_and_releases_source_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut monitor = monitor(tracked(3, &releases), Vec::new(), StopSignal::new(), None);

        let report = monitor.run().unwrap();
        assert_eq!(report.frames, 3);
        assert_eq!(
            report.exit,
            ExitReason::CaptureFailed("capture device error: camera unplugged".to_string())
        );
        assert_eq!(monitor.phase(), MonitorPhase::Stopped);

        drop(monitor);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frame_limit_ends_run() {
        let mut settings = CaptureSettings::default();
        settings.width = 16;
        settings.height = 16;
        let mut source = SyntheticSource::new(settings);
        source.connect();
        let mut monitor = monitor(Box::new(source), Vec::new(), StopSignal::new(), Some(4));

        let report = monitor.run().unwrap();
        assert_eq!(report.exit, ExitReason::FrameLimit);
        assert_eq!(report.frames, 4);
        assert!(!report.analysis_abandoned);
        assert!(monitor.run().is_err());
    }

    #[test]
    fn stop_signal_before_run_captures_nothing() {
        let releases = Arc::new(AtomicUsize::new(0));
        let stop = StopSignal::new();
        stop.trigger();
        let mut monitor = monitor(tracked(10, &releases), Vec::new(), stop, None);

        let report = monitor.run().unwrap();
        assert_eq!(report.exit, ExitReason::StopSignal);
        assert_eq!(report.frames, 0);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tick_reports_stop_after_signal() {
        let releases = Arc::new(AtomicUsize::new(0));
        let stop = StopSignal::new();
        let mut monitor = monitor(tracked(10, &releases), Vec::new(), stop.clone(), None);
        let t0 = Instant::now();

        let first = monitor.tick(t0).unwrap();
        assert_eq!(first.decision, ScheduleDecision::Launched);
        assert_eq!(first.stop, None);

        stop.trigger();
        let second = monitor.tick(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(second.decision, ScheduleDecision::NotDue);
        assert_eq!(second.stop, Some(ExitReason::StopSignal));
        assert_eq!(second.status.next_scan, Duration::from_secs(4));
    }

    #[test]
    fn presenter_errors_do_not_stop_the_loop() {
        let releases = Arc::new(AtomicUsize::new(0));
        let presented = Arc::new(AtomicUsize::new(0));
        let mut monitor = monitor(
            tracked(10, &releases),
            vec![Box::new(FailingPresenter(presented.clone()))],
            StopSignal::new(),
            Some(3),
        );

        let report = monitor.run().unwrap();
        assert_eq!(report.exit, ExitReason::FrameLimit);
        assert_eq!(presented.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn tick_after_shutdown_is_a_capture_error() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut monitor = monitor(tracked(10, &releases), Vec::new(), StopSignal::new(), None);
        assert!(monitor.shutdown());
        assert!(matches!(
            monitor.tick(Instant::now()),
            Err(CaptureError::NotConnected)
        ));
        assert!(monitor.shutdown());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
