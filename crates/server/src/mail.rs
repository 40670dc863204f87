//! Outbound email over SMTP.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::info;

use taller_core::config::MailConfig;
use taller_core::delivery::{DeliveryError, EmailMessage, Mailer};

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, DeliveryError> {
        let from = format!("{} <{}>", config.from_name, config.from_email)
            .parse::<Mailbox>()
            .map_err(|e| DeliveryError::InvalidAddress(format!("{}: {e}", config.from_email)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?
            .port(config.smtp_port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_owned(),
            ));
        }

        Ok(Self { transport: builder.build(), from })
    }

    fn build(&self, message: EmailMessage) -> Result<Message, DeliveryError> {
        build_message(self.from.clone(), message)
    }
}

fn build_message(from: Mailbox, message: EmailMessage) -> Result<Message, DeliveryError> {
    let to = message
        .to
        .parse::<Mailbox>()
        .map_err(|e| DeliveryError::InvalidAddress(format!("{}: {e}", message.to)))?;

    let content = match message.body_html {
        Some(html) => MultiPart::alternative_plain_html(message.body_text, html),
        None => MultiPart::mixed().singlepart(SinglePart::plain(message.body_text)),
    };
    let body = match message.attachment {
        Some(attachment) => {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|e| DeliveryError::Message(format!("{}: {e}", attachment.content_type)))?;
            MultiPart::mixed()
                .multipart(content)
                .singlepart(Attachment::new(attachment.filename).body(attachment.bytes, content_type))
        }
        None => content,
    };

    Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject)
        .multipart(body)
        .map_err(|e| DeliveryError::Message(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), DeliveryError> {
        let recipient = message.to.clone();
        let email = self.build(message)?;
        self.transport.send(email).await.map_err(|e| DeliveryError::Transport(e.to_string()))?;
        info!(event_name = "mail.sent", to = %recipient, "email handed to smtp relay");
        Ok(())
    }
}

/// Stand-in used while mail is disabled: logs what would have been sent.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), DeliveryError> {
        info!(
            event_name = "mail.skipped",
            to = %message.to,
            subject = %message.subject,
            attachment = message.attachment.as_ref().map(|a| a.filename.as_str()),
            "mail disabled; message not sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lettre::message::Mailbox;
    use taller_core::delivery::{Attachment, DeliveryError, EmailMessage};

    use super::build_message;

    fn from() -> Mailbox {
        "Taller <taller@example.com>".parse().expect("mailbox")
    }

    fn message(to: &str) -> EmailMessage {
        EmailMessage {
            to: to.to_owned(),
            subject: "Presupuesto PRE25-00001".to_owned(),
            body_text: "Hola".to_owned(),
            body_html: None,
            attachment: Some(Attachment {
                filename: "SRV25-00001.pdf".to_owned(),
                content_type: "application/pdf".to_owned(),
                bytes: b"%PDF-1.4".to_vec(),
            }),
        }
    }

    #[test]
    fn attachment_is_carried_in_a_mixed_message() {
        let email = build_message(from(), message("cliente@example.com")).expect("message");
        let raw = String::from_utf8(email.formatted()).expect("utf8");

        assert!(raw.contains("Subject: Presupuesto PRE25-00001"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("SRV25-00001.pdf"));
    }

    #[test]
    fn malformed_recipient_is_rejected() {
        let error = build_message(from(), message("no-es-correo")).expect_err("bad address");

        assert!(matches!(error, DeliveryError::InvalidAddress(_)));
    }
}
