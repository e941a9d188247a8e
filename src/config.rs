use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::detect::backends::gemini::{DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL};
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::ingest::CaptureSettings;

const DEFAULT_ANALYSIS_INTERVAL_SECS: u64 = 5;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 300;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 2;
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 587;
/// Largest accepted capture width or height.
pub const MAX_FRAME_DIMENSION: u32 = 8192;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    analysis_interval_secs: Option<u64>,
    alert_cooldown_secs: Option<u64>,
    shutdown_grace_secs: Option<u64>,
    jpeg_quality: Option<u8>,
    capture: Option<CaptureConfigFile>,
    backend: Option<BackendConfigFile>,
    alert: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    kind: Option<String>,
    model: Option<String>,
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    kind: Option<String>,
    smtp_server: Option<String>,
    smtp_port: Option<u16>,
    sender: Option<String>,
    receiver: Option<String>,
}

/// Credential read from the environment. Redacted in `Debug`, wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Gemini,
    Stub,
}

impl BackendKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "gemini" => Ok(BackendKind::Gemini),
            "stub" => Ok(BackendKind::Stub),
            other => Err(anyhow!("unknown backend kind '{}'; expected gemini or stub", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertKind {
    Smtp,
    Log,
}

impl AlertKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "smtp" => Ok(AlertKind::Smtp),
            "log" => Ok(AlertKind::Log),
            other => Err(anyhow!("unknown alert kind '{}'; expected smtp or log", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub api_key: Option<Secret>,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub kind: AlertKind,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender: Option<String>,
    pub receiver: Option<String>,
    pub password: Option<Secret>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub analysis_interval: Duration,
    pub alert_cooldown: Duration,
    pub shutdown_grace: Duration,
    pub jpeg_quality: u8,
    pub capture: CaptureSettings,
    pub backend: BackendSettings,
    pub alert: AlertSettings,
}

impl MonitorConfig {
    /// Defaults, then the JSON file named by `PROCTOR_CONFIG`, then
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PROCTOR_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let cfg = Self::layered(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// File and environment layers without validation, for callers that
    /// apply further overrides first.
    pub fn layered(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let defaults = CaptureSettings::default();
        let capture = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            url: capture.url.unwrap_or(defaults.url),
            target_fps: capture.target_fps.unwrap_or(defaults.target_fps),
            width: capture.width.unwrap_or(defaults.width),
            height: capture.height.unwrap_or(defaults.height),
        };

        let backend = file.backend.unwrap_or_default();
        let backend = BackendSettings {
            kind: match backend.kind.as_deref() {
                Some(kind) => BackendKind::parse(kind)?,
                None => BackendKind::Gemini,
            },
            model: backend
                .model
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            endpoint: backend
                .endpoint
                .unwrap_or_else(|| DEFAULT_GEMINI_ENDPOINT.to_string()),
            timeout: Duration::from_secs(
                backend.timeout_secs.unwrap_or(DEFAULT_BACKEND_TIMEOUT_SECS),
            ),
            api_key: None,
        };

        let alert = file.alert.unwrap_or_default();
        let alert = AlertSettings {
            kind: match alert.kind.as_deref() {
                Some(kind) => AlertKind::parse(kind)?,
                None => AlertKind::Log,
            },
            smtp_server: alert
                .smtp_server
                .unwrap_or_else(|| DEFAULT_SMTP_SERVER.to_string()),
            smtp_port: alert.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
            sender: alert.sender,
            receiver: alert.receiver,
            password: None,
        };

        Ok(Self {
            analysis_interval: Duration::from_secs(
                file.analysis_interval_secs
                    .unwrap_or(DEFAULT_ANALYSIS_INTERVAL_SECS),
            ),
            alert_cooldown: Duration::from_secs(
                file.alert_cooldown_secs
                    .unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
            ),
            shutdown_grace: Duration::from_secs(
                file.shutdown_grace_secs
                    .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
            ),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            capture,
            backend,
            alert,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(secs) = env_secs("PROCTOR_ANALYSIS_INTERVAL_SECS")? {
            self.analysis_interval = secs;
        }
        if let Some(secs) = env_secs("PROCTOR_ALERT_COOLDOWN_SECS")? {
            self.alert_cooldown = secs;
        }
        if let Some(url) = env_nonempty("PROCTOR_CAPTURE_URL") {
            self.capture.url = url;
        }
        if let Some(kind) = env_nonempty("PROCTOR_BACKEND") {
            self.backend.kind = BackendKind::parse(&kind)?;
        }
        if let Some(kind) = env_nonempty("PROCTOR_ALERT_KIND") {
            self.alert.kind = AlertKind::parse(&kind)?;
        }
        if let Some(key) = env_nonempty("GOOGLE_API_KEY") {
            self.backend.api_key = Some(Secret::new(key));
        }
        if let Some(sender) = env_nonempty("EMAIL_SENDER") {
            self.alert.sender = Some(sender);
        }
        if let Some(receiver) = env_nonempty("EMAIL_RECEIVER") {
            self.alert.receiver = Some(receiver);
        }
        if let Some(password) = env_nonempty("EMAIL_PASSWORD") {
            self.alert.password = Some(Secret::new(password));
        }
        if let Some(server) = env_nonempty("SMTP_SERVER") {
            self.alert.smtp_server = server;
        }
        if let Some(port) = env_nonempty("SMTP_PORT") {
            self.alert.smtp_port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("SMTP_PORT must be a port number"))?;
        }
        Ok(())
    }

    /// Check invariants. Also run after CLI overrides are applied.
    pub fn validate(&self) -> Result<()> {
        if self.analysis_interval.is_zero() {
            return Err(anyhow!("analysis interval must be greater than zero"));
        }
        if self.alert_cooldown.is_zero() {
            return Err(anyhow!("alert cooldown must be greater than zero"));
        }
        if self.capture.target_fps == 0 {
            return Err(anyhow!("capture target_fps must be greater than zero"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.capture.width.max(self.capture.height) > MAX_FRAME_DIMENSION {
            return Err(anyhow!(
                "capture width and height must be at most {}",
                MAX_FRAME_DIMENSION
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if self.backend.kind == BackendKind::Gemini {
            if self.backend.api_key.is_none() {
                return Err(anyhow!("GOOGLE_API_KEY must be set for the gemini backend"));
            }
            if self.backend.timeout.is_zero() {
                return Err(anyhow!("backend timeout must be greater than zero"));
            }
        }
        if self.alert.kind == AlertKind::Smtp {
            if self.alert.sender.is_none() || self.alert.receiver.is_none() {
                return Err(anyhow!(
                    "EMAIL_SENDER and EMAIL_RECEIVER must be set for smtp alerts"
                ));
            }
            if self.alert.password.is_none() {
                return Err(anyhow!("EMAIL_PASSWORD must be set for smtp alerts"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_secs(key: &str) -> Result<Option<Duration>> {
    match env_nonempty(key) {
        Some(value) => {
            let seconds: u64 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be an integer number of seconds", key))?;
            Ok(Some(Duration::from_secs(seconds)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(<redacted>)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn kinds_parse_case_insensitively() {
        assert_eq!(BackendKind::parse(" Gemini ").unwrap(), BackendKind::Gemini);
        assert_eq!(BackendKind::parse("stub").unwrap(), BackendKind::Stub);
        assert!(BackendKind::parse("yolo").is_err());
        assert_eq!(AlertKind::parse("SMTP").unwrap(), AlertKind::Smtp);
        assert!(AlertKind::parse("pager").is_err());
    }

    #[test]
    fn file_defaults_match_documented_values() {
        let cfg = MonitorConfig::from_file(MonitorConfigFile::default()).unwrap();
        assert_eq!(cfg.analysis_interval, Duration::from_secs(5));
        assert_eq!(cfg.alert_cooldown, Duration::from_secs(300));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(2));
        assert_eq!(cfg.capture, CaptureSettings::default());
        assert_eq!(cfg.backend.kind, BackendKind::Gemini);
        assert_eq!(cfg.backend.timeout, Duration::from_secs(30));
        assert_eq!(cfg.alert.kind, AlertKind::Log);
        assert_eq!(cfg.alert.smtp_port, 587);
    }

    #[test]
    fn validate_rejects_zero_interval_and_missing_secrets() {
        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default()).unwrap();
        assert!(cfg.validate().is_err(), "gemini without api key");

        cfg.backend.kind = BackendKind::Stub;
        cfg.validate().unwrap();

        cfg.analysis_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());
        cfg.analysis_interval = Duration::from_secs(5);

        cfg.alert.kind = AlertKind::Smtp;
        cfg.alert.sender = Some("proctor@example.com".to_string());
        cfg.alert.receiver = Some("admin@example.com".to_string());
        assert!(cfg.validate().is_err(), "smtp without password");
        cfg.alert.password = Some(Secret::new("app-password"));
        cfg.validate().unwrap();
    }
}
