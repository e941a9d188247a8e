use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use proctor_monitor::config::{AlertKind, BackendKind, MonitorConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PROCTOR_CONFIG",
        "PROCTOR_ANALYSIS_INTERVAL_SECS",
        "PROCTOR_ALERT_COOLDOWN_SECS",
        "PROCTOR_CAPTURE_URL",
        "PROCTOR_BACKEND",
        "PROCTOR_ALERT_KIND",
        "GOOGLE_API_KEY",
        "EMAIL_SENDER",
        "EMAIL_RECEIVER",
        "EMAIL_PASSWORD",
        "SMTP_SERVER",
        "SMTP_PORT",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("GOOGLE_API_KEY", "test-key");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.analysis_interval, Duration::from_secs(5));
    assert_eq!(cfg.alert_cooldown, Duration::from_secs(300));
    assert_eq!(cfg.capture.url, "stub://webcam");
    assert_eq!(cfg.capture.target_fps, 15);
    assert_eq!(cfg.backend.kind, BackendKind::Gemini);
    assert_eq!(cfg.backend.model, "gemini-1.5-flash");
    assert_eq!(cfg.backend.api_key.as_ref().unwrap().expose(), "test-key");
    assert_eq!(cfg.alert.kind, AlertKind::Log);

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "analysis_interval_secs": 10,
            "alert_cooldown_secs": 600,
            "shutdown_grace_secs": 1,
            "capture": {
                "url": "http://192.168.1.20:8080/video",
                "target_fps": 12,
                "width": 800,
                "height": 600
            },
            "backend": {
                "kind": "stub",
                "timeout_secs": 20
            },
            "alert": {
                "kind": "smtp",
                "smtp_server": "mail.example.com",
                "sender": "proctor@example.com",
                "receiver": "invigilator@example.com"
            }
        }"#,
    );

    std::env::set_var("PROCTOR_CONFIG", file.path());
    std::env::set_var("PROCTOR_ALERT_COOLDOWN_SECS", "120");
    std::env::set_var("EMAIL_PASSWORD", "app-password");
    std::env::set_var("SMTP_PORT", "2525");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.analysis_interval, Duration::from_secs(10));
    assert_eq!(cfg.alert_cooldown, Duration::from_secs(120));
    assert_eq!(cfg.shutdown_grace, Duration::from_secs(1));
    assert_eq!(cfg.capture.url, "http://192.168.1.20:8080/video");
    assert_eq!(cfg.capture.target_fps, 12);
    assert_eq!((cfg.capture.width, cfg.capture.height), (800, 600));
    assert_eq!(cfg.backend.kind, BackendKind::Stub);
    assert_eq!(cfg.backend.timeout, Duration::from_secs(20));
    assert_eq!(cfg.alert.kind, AlertKind::Smtp);
    assert_eq!(cfg.alert.smtp_server, "mail.example.com");
    assert_eq!(cfg.alert.smtp_port, 2525);
    assert_eq!(cfg.alert.receiver.as_deref(), Some("invigilator@example.com"));
    assert!(!format!("{:?}", cfg).contains("app-password"));

    clear_env();
}

#[test]
fn rejects_zero_interval_and_cooldown() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("PROCTOR_BACKEND", "stub");

    std::env::set_var("PROCTOR_ANALYSIS_INTERVAL_SECS", "0");
    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("analysis interval"));

    std::env::set_var("PROCTOR_ANALYSIS_INTERVAL_SECS", "5");
    let file = write_config(r#"{ "alert_cooldown_secs": 0 }"#);
    std::env::set_var("PROCTOR_CONFIG", file.path());
    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("alert cooldown"));

    clear_env();
}

#[test]
fn rejects_oversized_capture_frames() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("PROCTOR_BACKEND", "stub");

    let file = write_config(r#"{ "capture": { "width": 100000, "height": 480 } }"#);
    std::env::set_var("PROCTOR_CONFIG", file.path());
    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("at most 8192"), "{}", err);

    let file = write_config(r#"{ "capture": { "width": 8192, "height": 8192 } }"#);
    std::env::set_var("PROCTOR_CONFIG", file.path());
    let cfg = MonitorConfig::load().expect("largest frame accepted");
    assert_eq!(cfg.capture.width, 8192);

    clear_env();
}

#[test]
fn rejects_malformed_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PROCTOR_ANALYSIS_INTERVAL_SECS", "five");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    let file = write_config("{ not json");
    std::env::set_var("PROCTOR_CONFIG", file.path());
    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));
    clear_env();

    std::env::set_var("PROCTOR_BACKEND", "yolo");
    assert!(MonitorConfig::load().is_err());

    clear_env();
}

#[test]
fn gemini_backend_requires_api_key() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("GOOGLE_API_KEY"));

    let cfg = MonitorConfig::layered(None).expect("layered config");
    assert!(cfg.backend.api_key.is_none());

    clear_env();
}
