//! Wiring from a validated `MonitorConfig` to a ready `MonitorLoop`.

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::alert::{AlertDispatcher, AlertThrottler, LogDispatcher};
use crate::config::{AlertKind, BackendKind, MonitorConfig};
use crate::detect::{DetectionBackend, GeminiBackend, GeminiSettings, StubBackend};
use crate::ingest::FrameSource;
use crate::monitor::{LoopSettings, MonitorLoop, StopSignal};
use crate::scheduler::AnalysisScheduler;
use crate::state::DetectionStateStore;
use crate::ui::Presenter;

pub fn build_backend(cfg: &MonitorConfig) -> Result<Box<dyn DetectionBackend>> {
    match cfg.backend.kind {
        BackendKind::Stub => Ok(Box::new(StubBackend::new())),
        BackendKind::Gemini => {
            let api_key = cfg
                .backend
                .api_key
                .clone()
                .ok_or_else(|| anyhow!("GOOGLE_API_KEY must be set for the gemini backend"))?;
            Ok(Box::new(GeminiBackend::new(GeminiSettings {
                api_key,
                model: cfg.backend.model.clone(),
                endpoint: cfg.backend.endpoint.clone(),
                timeout: cfg.backend.timeout,
                jpeg_quality: cfg.jpeg_quality,
            })))
        }
    }
}

pub fn build_dispatcher(cfg: &MonitorConfig) -> Result<Box<dyn AlertDispatcher>> {
    match cfg.alert.kind {
        AlertKind::Log => Ok(Box::new(LogDispatcher::new())),
        AlertKind::Smtp => build_smtp_dispatcher(cfg),
    }
}

#[cfg(feature = "alert-smtp")]
fn build_smtp_dispatcher(cfg: &MonitorConfig) -> Result<Box<dyn AlertDispatcher>> {
    use crate::alert::{SmtpDispatcher, SmtpSettings};

    let alert = &cfg.alert;
    let (Some(sender), Some(receiver), Some(password)) =
        (&alert.sender, &alert.receiver, &alert.password)
    else {
        return Err(anyhow!(
            "smtp alerts need EMAIL_SENDER, EMAIL_RECEIVER and EMAIL_PASSWORD"
        ));
    };
    let dispatcher = SmtpDispatcher::new(SmtpSettings {
        server: alert.smtp_server.clone(),
        port: alert.smtp_port,
        sender: sender.clone(),
        receiver: receiver.clone(),
        password: password.clone(),
        jpeg_quality: cfg.jpeg_quality,
    })?;
    Ok(Box::new(dispatcher))
}

#[cfg(not(feature = "alert-smtp"))]
fn build_smtp_dispatcher(_cfg: &MonitorConfig) -> Result<Box<dyn AlertDispatcher>> {
    Err(anyhow!(
        "smtp alerts require the alert-smtp feature; rebuild with it or use alert kind 'log'"
    ))
}

/// Assemble the store, throttler, scheduler and loop around `source`.
pub fn build_monitor(
    cfg: &MonitorConfig,
    source: Box<dyn FrameSource>,
    backend: Box<dyn DetectionBackend>,
    dispatcher: Box<dyn AlertDispatcher>,
    presenters: Vec<Box<dyn Presenter>>,
    stop: StopSignal,
    max_frames: Option<u64>,
) -> MonitorLoop {
    let store = Arc::new(DetectionStateStore::new());
    let throttler = Arc::new(AlertThrottler::new(cfg.alert_cooldown, dispatcher));
    let scheduler = AnalysisScheduler::new(
        cfg.analysis_interval,
        backend,
        store.clone(),
        throttler,
    );
    let settings = LoopSettings {
        max_frames,
        target_fps: cfg.capture.target_fps,
        shutdown_grace: cfg.shutdown_grace,
    };
    MonitorLoop::new(source, scheduler, store, presenters, stop, settings)
}
