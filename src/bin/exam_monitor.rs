//! exam_monitor - live exam proctoring monitor
//!
//! This binary:
//! 1. Loads configuration (JSON file, environment, flags)
//! 2. Opens the camera source and the detection backend
//! 3. Runs the monitor loop until Ctrl-C, a frame limit or a capture failure
//! 4. Sends rate-limited alerts with evidence while violations are detected

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use proctor_monitor::config::{BackendKind, MonitorConfig};
use proctor_monitor::session::{build_backend, build_dispatcher, build_monitor};
use proctor_monitor::{
    open_source, ExitReason, PreviewPresenter, Presenter, StopSignal, Ui,
};

const PREVIEW_MIN_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(author, version, about = "Live exam proctoring monitor")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "PROCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Capture source (stub://name or http(s):// MJPEG/JPEG endpoint).
    #[arg(long)]
    capture_url: Option<String>,

    /// Detection backend: gemini or stub.
    #[arg(long)]
    backend: Option<String>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Keep the latest annotated frame at this path.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// UI mode: auto, plain or pretty.
    #[arg(long, default_value = "auto")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = MonitorConfig::layered(args.config.as_deref())?;
    if let Some(url) = args.capture_url {
        cfg.capture.url = url;
    }
    if let Some(kind) = args.backend.as_deref() {
        cfg.backend.kind = BackendKind::parse(kind)?;
    }
    cfg.validate()?;
    log::info!(
        "analysis every {}s, alert cooldown {}s, backend {:?}, alerts {:?}",
        cfg.analysis_interval.as_secs(),
        cfg.alert_cooldown.as_secs(),
        cfg.backend.kind,
        cfg.alert.kind
    );

    let backend = {
        let _stage = ui.stage("Prepare detection backend");
        let mut backend = build_backend(&cfg)?;
        backend.warm_up().map_err(|e| anyhow!("backend warm-up failed: {}", e))?;
        backend
    };
    let dispatcher = {
        let _stage = ui.stage("Prepare alert dispatcher");
        build_dispatcher(&cfg)?
    };
    let source = {
        let _stage = ui.stage("Open camera");
        open_source(&cfg.capture)?
    };

    let mut presenters: Vec<Box<dyn Presenter>> = vec![Box::new(ui.terminal_presenter())];
    if let Some(path) = args.preview {
        log::info!("writing live preview to {}", path.display());
        presenters.push(Box::new(PreviewPresenter::new(
            path,
            PREVIEW_MIN_INTERVAL,
            cfg.jpeg_quality,
        )));
    }

    let stop = StopSignal::new();
    stop.install_ctrlc_handler()?;

    let mut monitor = build_monitor(
        &cfg,
        source,
        backend,
        dispatcher,
        presenters,
        stop,
        args.max_frames,
    );
    log::info!("exam_monitor running. press Ctrl-C to stop");
    let report = monitor.run()?;

    if report.analysis_abandoned {
        log::warn!("an analysis was still running at shutdown and was abandoned");
    }
    match report.exit {
        ExitReason::CaptureFailed(reason) => Err(anyhow!("camera capture failed: {}", reason)),
        ExitReason::StopSignal | ExitReason::FrameLimit => Ok(()),
    }
}
