//! Presentation of the live view.
//!
//! The monitor loop hands every rendered frame and its status line to a set
//! of presenters. The terminal presenter keeps a spinner with the status text
//! when stderr is a TTY and prints changes otherwise; the preview presenter
//! keeps an annotated JPEG on disk for an external viewer.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::render::{RenderedFrame, StatusLine};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

pub trait Presenter {
    fn name(&self) -> &'static str;

    fn present(&mut self, frame: &RenderedFrame, status: &StatusLine) -> Result<()>;

    /// Called once when the monitor stops.
    fn finish(&mut self) {}
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        Self::new(UiMode::parse(ui_flag), is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    /// Report a startup step; finishes with its duration when dropped.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = new_spinner();
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    pub fn terminal_presenter(&self) -> TerminalPresenter {
        let spinner = self.use_pretty().then(new_spinner);
        TerminalPresenter {
            spinner,
            last_printed: None,
        }
    }
}

fn new_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Live status on stderr.
pub struct TerminalPresenter {
    spinner: Option<ProgressBar>,
    last_printed: Option<(bool, Vec<String>)>,
}

impl TerminalPresenter {
    /// Plain presenter regardless of TTY.
    pub fn plain() -> Self {
        Self {
            spinner: None,
            last_printed: None,
        }
    }
}

impl Presenter for TerminalPresenter {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn present(&mut self, frame: &RenderedFrame, status: &StatusLine) -> Result<()> {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!("frame #{} {}", frame.sequence, status));
            return Ok(());
        }
        // Plain output only on state changes; the countdown would flood logs.
        let key = (status.violation_active, status.labels.clone());
        if self.last_printed.as_ref() != Some(&key) {
            eprintln!("[frame #{}] {}", frame.sequence, status);
            self.last_printed = Some(key);
        }
        Ok(())
    }

    fn finish(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_with_message("monitor stopped");
        }
    }
}

/// Writes the latest annotated frame to a JPEG file.
pub struct PreviewPresenter {
    path: PathBuf,
    min_interval: Duration,
    jpeg_quality: u8,
    last_written: Option<Instant>,
}

impl PreviewPresenter {
    pub fn new(path: impl Into<PathBuf>, min_interval: Duration, jpeg_quality: u8) -> Self {
        Self {
            path: path.into(),
            min_interval,
            jpeg_quality,
            last_written: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Presenter for PreviewPresenter {
    fn name(&self) -> &'static str {
        "preview"
    }

    fn present(&mut self, frame: &RenderedFrame, _status: &StatusLine) -> Result<()> {
        let now = Instant::now();
        if self
            .last_written
            .is_some_and(|last| now.duration_since(last) < self.min_interval)
        {
            return Ok(());
        }
        let jpeg = frame.encode_jpeg(self.jpeg_quality)?;
        // Write then rename so viewers never see a torn file.
        let tmp = self.path.with_extension("jpg.tmp");
        std::fs::write(&tmp, &jpeg).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename preview to {}", self.path.display()))?;
        self.last_written = Some(now);
        Ok(())
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
