//! Outbound documents: email and the printable service receipt.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::service::Service;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub attachment: Option<Attachment>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("message could not be built: {0}")]
    Message(String),
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("rendering failed: {0}")]
    Render(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), DeliveryError>;
}

/// Data printed on the intake receipt handed to the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReceipt {
    pub number: String,
    pub client_id: i64,
    pub equipment_id: i64,
    pub intake_type: String,
    pub problem_description: String,
    pub is_warranty: bool,
    pub original_service_id: Option<i64>,
    pub visit_fee: Option<Decimal>,
    pub visit_fee_paid: bool,
    pub received_on: NaiveDate,
    pub expected_return_on: Option<NaiveDate>,
    pub intake_signature: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl ServiceReceipt {
    pub fn from_service(service: &Service, issued_at: DateTime<Utc>) -> Self {
        Self {
            number: service.number.clone(),
            client_id: service.client_id,
            equipment_id: service.equipment_id,
            intake_type: service.intake_type.as_str().to_owned(),
            problem_description: service.problem_description.clone().unwrap_or_default(),
            is_warranty: service.is_warranty,
            original_service_id: service.original_service_id.map(|id| id.0),
            visit_fee: service.visit_fee,
            visit_fee_paid: service.visit_fee_paid,
            received_on: service.received_on,
            expected_return_on: service.expected_return_on,
            intake_signature: service.intake_signature.clone(),
            issued_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedDocument {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl From<RenderedDocument> for Attachment {
    fn from(value: RenderedDocument) -> Self {
        Self { filename: value.filename, content_type: value.content_type, bytes: value.bytes }
    }
}

#[async_trait]
pub trait ReceiptRenderer: Send + Sync {
    async fn render_service_receipt(
        &self,
        receipt: &ServiceReceipt,
    ) -> Result<RenderedDocument, DeliveryError>;
}

/// Keeps every message instead of sending it. Used by tests and dry runs.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<EmailMessage>>>,
    fail_with: Option<String>,
}

impl RecordingMailer {
    pub fn failing(reason: impl Into<String>) -> Self {
        Self { sent: Arc::default(), fail_with: Some(reason.into()) }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), DeliveryError> {
        if let Some(reason) = &self.fail_with {
            return Err(DeliveryError::Transport(reason.clone()));
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
        Ok(())
    }
}

/// Plain-text receipt; the server swaps in the HTML/PDF renderer.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextReceiptRenderer;

#[async_trait]
impl ReceiptRenderer for PlainTextReceiptRenderer {
    async fn render_service_receipt(
        &self,
        receipt: &ServiceReceipt,
    ) -> Result<RenderedDocument, DeliveryError> {
        let mut text = format!(
            "Comprobante de servicio {}\nRecibido: {}\nTipo de ingreso: {}\nProblema: {}\n",
            receipt.number, receipt.received_on, receipt.intake_type, receipt.problem_description
        );
        if let Some(expected) = receipt.expected_return_on {
            text.push_str(&format!("Devolucion estimada: {expected}\n"));
        }
        if let Some(fee) = receipt.visit_fee {
            let paid = if receipt.visit_fee_paid { "abonada" } else { "pendiente" };
            text.push_str(&format!("Visita: {fee} ({paid})\n"));
        }
        if receipt.is_warranty {
            text.push_str("Ingreso por garantia\n");
        }
        Ok(RenderedDocument {
            filename: format!("{}.txt", receipt.number),
            content_type: "text/plain; charset=utf-8".to_owned(),
            bytes: text.into_bytes(),
        })
    }
}
