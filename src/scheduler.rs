//! Analysis cadence and background dispatch.
//!
//! `maybe_analyze` is called once per captured frame and never blocks: when a
//! pass is due it hands the frame to a freshly spawned thread and returns. At
//! most one pass is in flight; a due tick that finds the slot occupied is
//! skipped and still counts as the tick for the interval, so slow backends
//! reduce the analysis rate instead of building a backlog.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alert::AlertThrottler;
use crate::detect::{DetectionBackend, DetectionResult};
use crate::frame::Frame;
use crate::state::DetectionStateStore;

const IDLE_POLL: Duration = Duration::from_millis(5);

/// What `maybe_analyze` did with a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// A background pass was started for this frame.
    Launched,
    /// The analysis interval has not elapsed yet.
    NotDue,
    /// A pass was due but the previous one is still running.
    Busy,
    /// The worker thread could not be spawned.
    SpawnFailed,
    /// The scheduler has been shut down.
    Closed,
}

/// Counters shared with background passes.
#[derive(Default)]
struct PassCounters {
    completed: AtomicU64,
    failed: AtomicU64,
}

pub struct AnalysisScheduler {
    interval: Duration,
    last_analysis_at: Option<Instant>,
    backend: Arc<Mutex<Box<dyn DetectionBackend>>>,
    store: Arc<DetectionStateStore>,
    throttler: Arc<AlertThrottler>,
    in_flight: Arc<AtomicBool>,
    counters: Arc<PassCounters>,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl AnalysisScheduler {
    pub fn new(
        interval: Duration,
        backend: Box<dyn DetectionBackend>,
        store: Arc<DetectionStateStore>,
        throttler: Arc<AlertThrottler>,
    ) -> Self {
        Self {
            interval,
            last_analysis_at: None,
            backend: Arc::new(Mutex::new(backend)),
            store,
            throttler,
            in_flight: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(PassCounters::default()),
            worker: None,
            closed: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_analysis_at(&self) -> Option<Instant> {
        self.last_analysis_at
    }

    /// Start a background pass for `frame` if one is due. Never blocks.
    pub fn maybe_analyze(&mut self, frame: &Arc<Frame>, now: Instant) -> ScheduleDecision {
        if self.closed {
            return ScheduleDecision::Closed;
        }
        if !self.is_due(now) {
            return ScheduleDecision::NotDue;
        }
        self.last_analysis_at = Some(now);

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!(
                "analysis still in flight, skipping tick for frame #{}",
                frame.sequence
            );
            return ScheduleDecision::Busy;
        }

        // Reap the previous worker; its slot is already free so this is instant.
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }

        let task = AnalysisTask {
            frame: frame.clone(),
            scheduled_at: now,
            backend: self.backend.clone(),
            store: self.store.clone(),
            throttler: self.throttler.clone(),
            counters: self.counters.clone(),
        };
        let slot = InFlightSlot(self.in_flight.clone());
        let spawned = std::thread::Builder::new()
            .name("analysis".to_string())
            .spawn(move || {
                let _slot = slot;
                task.run();
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                ScheduleDecision::Launched
            }
            Err(e) => {
                log::error!("failed to spawn analysis thread: {}", e);
                ScheduleDecision::SpawnFailed
            }
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        match self.last_analysis_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Countdown until the next pass becomes due.
    pub fn time_until_next(&self, now: Instant) -> Duration {
        match self.last_analysis_at {
            None => Duration::ZERO,
            Some(last) => self
                .interval
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the in-flight pass to finish.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(IDLE_POLL);
        }
        true
    }

    pub fn passes_completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Acquire)
    }

    pub fn passes_failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Acquire)
    }

    /// Stop scheduling and discard any result that lands from now on.
    ///
    /// Waits up to `grace` for an in-flight pass and returns whether it
    /// finished. A pass that outlives the grace period is abandoned; its
    /// thread runs to the backend timeout and then exits without effect.
    pub fn shutdown(&mut self, grace: Duration) -> bool {
        self.closed = true;
        self.store.close();
        self.throttler.close();

        let finished = self.wait_idle(grace);
        if finished {
            if let Some(handle) = self.worker.take() {
                let _ = handle.join();
            }
        } else {
            log::warn!(
                "abandoning in-flight analysis after {}ms grace period",
                grace.as_millis()
            );
            self.worker.take();
        }
        finished
    }
}

/// Releases the in-flight slot when the worker exits, including by panic.
struct InFlightSlot(Arc<AtomicBool>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct AnalysisTask {
    frame: Arc<Frame>,
    scheduled_at: Instant,
    backend: Arc<Mutex<Box<dyn DetectionBackend>>>,
    store: Arc<DetectionStateStore>,
    throttler: Arc<AlertThrottler>,
    counters: Arc<PassCounters>,
}

impl AnalysisTask {
    fn run(self) {
        let started = Instant::now();
        let (backend_name, outcome) = {
            let mut backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
            (backend.name(), backend.analyze(&self.frame))
        };

        let raw = match outcome {
            Ok(raw) => raw,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::AcqRel);
                self.counters.completed.fetch_add(1, Ordering::AcqRel);
                log::warn!(
                    "analysis of frame #{} via {} failed: {}",
                    self.frame.sequence,
                    backend_name,
                    e
                );
                return;
            }
        };

        let result = DetectionResult::from_raw(
            &raw,
            self.frame.width,
            self.frame.height,
            self.scheduled_at,
        );
        log::debug!(
            "analysis of frame #{} via {} took {}ms: {} violation(s)",
            self.frame.sequence,
            backend_name,
            started.elapsed().as_millis(),
            result.len()
        );

        let applied = self.store.replace(result.clone());
        self.counters.completed.fetch_add(1, Ordering::AcqRel);
        if !applied {
            log::debug!(
                "monitor stopped, discarding analysis of frame #{}",
                self.frame.sequence
            );
            return;
        }

        if !result.is_empty() {
            log::warn!("violation detected: {}", result.labels().join(", "));
            self.throttler
                .try_alert(self.scheduled_at, &self.frame, &result);
        }
    }
}
