//! SMTP alert dispatcher (feature: alert-smtp).
//!
//! Sends one multipart message per alert over a STARTTLS relay: a plain-text
//! body listing the violations and the frame attached as `evidence.jpg`.

use std::time::Duration;

use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use super::{alert_body, alert_subject, AlertDispatcher, DispatchError};
use crate::config::Secret;
use crate::frame::Frame;

const EVIDENCE_FILENAME: &str = "evidence.jpg";
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub sender: String,
    pub receiver: String,
    pub password: Secret,
    pub jpeg_quality: u8,
}

pub struct SmtpDispatcher {
    transport: SmtpTransport,
    sender: Mailbox,
    receiver: Mailbox,
    jpeg_quality: u8,
}

impl SmtpDispatcher {
    pub fn new(settings: SmtpSettings) -> Result<Self> {
        let sender: Mailbox = settings
            .sender
            .parse()
            .with_context(|| format!("invalid sender address '{}'", settings.sender))?;
        let receiver: Mailbox = settings
            .receiver
            .parse()
            .with_context(|| format!("invalid receiver address '{}'", settings.receiver))?;
        let transport = SmtpTransport::starttls_relay(&settings.server)
            .with_context(|| format!("configure smtp relay {}", settings.server))?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.sender.clone(),
                settings.password.expose().to_string(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        log::info!(
            "smtp alerts via {}:{} to {}",
            settings.server,
            settings.port,
            settings.receiver
        );
        Ok(Self {
            transport,
            sender,
            receiver,
            jpeg_quality: settings.jpeg_quality,
        })
    }
}

impl AlertDispatcher for SmtpDispatcher {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn send(&mut self, frame: &Frame, labels: &[String]) -> Result<(), DispatchError> {
        let jpeg = frame
            .encode_jpeg(self.jpeg_quality)
            .map_err(|e| DispatchError::Encode(e.to_string()))?;
        let message = compose_message(self.sender.clone(), self.receiver.clone(), labels, jpeg)?;
        self.transport
            .send(&message)
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(())
    }
}

fn compose_message(
    sender: Mailbox,
    receiver: Mailbox,
    labels: &[String],
    jpeg: Vec<u8>,
) -> Result<Message, DispatchError> {
    let content_type =
        ContentType::parse("image/jpeg").map_err(|e| DispatchError::Compose(e.to_string()))?;
    let attachment = Attachment::new(EVIDENCE_FILENAME.to_string()).body(jpeg, content_type);
    Message::builder()
        .from(sender)
        .to(receiver)
        .subject(alert_subject(labels.len()))
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(alert_body(labels)))
                .singlepart(attachment),
        )
        .map_err(|e| DispatchError::Compose(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_alert_with_evidence_attachment() {
        let message = compose_message(
            "proctor@example.com".parse().unwrap(),
            "invigilator@example.com".parse().unwrap(),
            &["Mobile Phone".to_string(), "Another Person".to_string()],
            vec![0xFF, 0xD8, 0xFF, 0xD9],
        )
        .unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();
        assert!(raw.contains("Subject: LIVE ALERT: Malpractice Detected (2 objects)"));
        assert!(raw.contains("Violations: Mobile Phone, Another Person"));
        assert!(raw.contains("evidence.jpg"));
        assert!(raw.contains("image/jpeg"));
    }
}
