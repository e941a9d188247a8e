//! Alerting: cooldown gate and dispatchers.
//!
//! `AlertThrottler` enforces at most one dispatch attempt per cooldown window.
//! The window is consumed when the attempt starts, so a dispatcher failure is
//! not retried until the cooldown has elapsed again.

#[cfg(feature = "alert-smtp")]
pub mod smtp;

#[cfg(feature = "alert-smtp")]
pub use smtp::{SmtpDispatcher, SmtpSettings};

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::detect::DetectionResult;
use crate::frame::Frame;

/// Failure to deliver an alert. Logged by the throttler, never propagated.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("alert transport error: {0}")]
    Transport(String),
    #[error("failed to compose alert: {0}")]
    Compose(String),
    #[error("failed to encode evidence image: {0}")]
    Encode(String),
}

/// Notification channel for confirmed violations.
pub trait AlertDispatcher: Send {
    fn name(&self) -> &'static str;

    /// Send one alert carrying `frame` as evidence.
    fn send(&mut self, frame: &Frame, labels: &[String]) -> Result<(), DispatchError>;
}

pub fn alert_subject(violation_count: usize) -> String {
    format!(
        "LIVE ALERT: Malpractice Detected ({} objects)",
        violation_count
    )
}

pub fn alert_body(labels: &[String]) -> String {
    format!("Violations: {}\n\nCheck attached image.", labels.join(", "))
}

/// Dispatcher that only writes the alert to the log.
#[derive(Default)]
pub struct LogDispatcher {
    sent: u64,
}

impl LogDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl AlertDispatcher for LogDispatcher {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&mut self, frame: &Frame, labels: &[String]) -> Result<(), DispatchError> {
        self.sent += 1;
        log::warn!(
            "{} | frame #{} {}x{} | {}",
            alert_subject(labels.len()),
            frame.sequence,
            frame.width,
            frame.height,
            labels.join(", ")
        );
        Ok(())
    }
}

/// Result of asking the throttler to alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertOutcome {
    Dispatched,
    DispatchFailed,
    CoolingDown { remaining: Duration },
    Closed,
}

struct ThrottleState {
    last_alert_at: Option<Instant>,
    closed: bool,
}

/// Cooldown-gated alert trigger.
pub struct AlertThrottler {
    cooldown: Duration,
    state: Mutex<ThrottleState>,
    dispatcher: Mutex<Box<dyn AlertDispatcher>>,
}

impl AlertThrottler {
    pub fn new(cooldown: Duration, dispatcher: Box<dyn AlertDispatcher>) -> Self {
        Self {
            cooldown,
            state: Mutex::new(ThrottleState {
                last_alert_at: None,
                closed: false,
            }),
            dispatcher: Mutex::new(dispatcher),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_alert_at(&self) -> Option<Instant> {
        self.lock_state().last_alert_at
    }

    /// Dispatch an alert for `result` unless the cooldown is still running.
    ///
    /// The cooldown check and the `last_alert_at` update happen under one lock.
    pub fn try_alert(&self, now: Instant, frame: &Frame, result: &DetectionResult) -> AlertOutcome {
        {
            let mut state = self.lock_state();
            if state.closed {
                return AlertOutcome::Closed;
            }
            if let Some(last) = state.last_alert_at {
                let elapsed = now.saturating_duration_since(last);
                if elapsed <= self.cooldown {
                    let remaining = self.cooldown - elapsed;
                    log::info!("alert cooldown active, {}s remaining", remaining.as_secs());
                    return AlertOutcome::CoolingDown { remaining };
                }
            }
            state.last_alert_at = Some(now);
        }

        let labels = result.labels();
        let mut dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match dispatcher.send(frame, &labels) {
            Ok(()) => {
                log::warn!(
                    "alert sent via {}: {}",
                    dispatcher.name(),
                    labels.join(", ")
                );
                AlertOutcome::Dispatched
            }
            Err(e) => {
                log::error!("alert via {} failed: {}", dispatcher.name(), e);
                AlertOutcome::DispatchFailed
            }
        }
    }

    /// No dispatch starts after this returns.
    pub fn close(&self) {
        self.lock_state().closed = true;
    }

    fn lock_state(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
