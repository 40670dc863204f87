use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::service::ServiceId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteLineId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuoteStatus {
    #[serde(rename = "PENDIENTE")]
    Pending,
    #[serde(rename = "EN_CURSO")]
    InProgress,
    #[serde(rename = "LISTO")]
    Ready,
    #[serde(rename = "ENVIADO")]
    Sent,
    #[serde(rename = "APROBADO")]
    Approved,
    #[serde(rename = "RECHAZADO")]
    Rejected,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDIENTE",
            Self::InProgress => "EN_CURSO",
            Self::Ready => "LISTO",
            Self::Sent => "ENVIADO",
            Self::Approved => "APROBADO",
            Self::Rejected => "RECHAZADO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDIENTE" => Some(Self::Pending),
            "EN_CURSO" => Some(Self::InProgress),
            "LISTO" => Some(Self::Ready),
            "ENVIADO" => Some(Self::Sent),
            "APROBADO" => Some(Self::Approved),
            "RECHAZADO" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Line items and labor can still change.
    pub fn is_editable(&self) -> bool {
        !matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn is_decided(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

/// Which of the two price columns the client accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceVariant {
    #[serde(rename = "ORIGINAL")]
    Original,
    #[serde(rename = "ALTERNATIVO")]
    Alternative,
}

impl PriceVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "ORIGINAL",
            Self::Alternative => "ALTERNATIVO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ORIGINAL" => Some(Self::Original),
            "ALTERNATIVO" => Some(Self::Alternative),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationChannel {
    #[serde(rename = "EMAIL")]
    Email,
    #[serde(rename = "TELEFONO")]
    Phone,
    #[serde(rename = "PRESENCIAL")]
    InPerson,
    #[serde(rename = "WHATSAPP")]
    WhatsApp,
}

impl ConfirmationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Phone => "TELEFONO",
            Self::InPerson => "PRESENCIAL",
            Self::WhatsApp => "WHATSAPP",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EMAIL" => Some(Self::Email),
            "TELEFONO" => Some(Self::Phone),
            "PRESENCIAL" => Some(Self::InPerson),
            "WHATSAPP" => Some(Self::WhatsApp),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub id: QuoteLineId,
    pub quote_id: QuoteId,
    pub description: String,
    pub quantity: u32,
    pub original_price: Decimal,
    pub alternative_price: Option<Decimal>,
}

impl QuoteLine {
    pub fn has_alternative(&self) -> bool {
        self.alternative_price.is_some_and(|price| price > Decimal::ZERO)
    }

    pub fn subtotal_original(&self) -> Decimal {
        self.original_price * Decimal::from(self.quantity)
    }

    pub fn subtotal_alternative(&self) -> Decimal {
        match self.alternative_price {
            Some(price) if price > Decimal::ZERO => price * Decimal::from(self.quantity),
            _ => Decimal::ZERO,
        }
    }
}

/// Line item fields as supplied by staff, checked before anything touches storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDraft {
    pub description: String,
    pub quantity: u32,
    pub original_price: Decimal,
    pub alternative_price: Option<Decimal>,
}

impl LineDraft {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.description.trim().is_empty() {
            return Err(DomainError::Validation("line description is required".to_string()));
        }
        if self.quantity == 0 {
            return Err(DomainError::Validation("line quantity must be at least 1".to_string()));
        }
        if self.original_price <= Decimal::ZERO {
            return Err(DomainError::Validation(
                "line original price must be greater than zero".to_string(),
            ));
        }
        if self.alternative_price.is_some_and(|price| price <= Decimal::ZERO) {
            return Err(DomainError::Validation(
                "line alternative price must be greater than zero when present".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub number: String,
    pub service_id: ServiceId,
    pub employee_id: i64,
    pub diagnosis: Option<String>,
    pub lines: Vec<QuoteLine>,
    pub parts_original: Decimal,
    pub parts_alternative: Option<Decimal>,
    pub labor: Decimal,
    pub total_original: Decimal,
    pub total_alternative: Option<Decimal>,
    pub show_original: bool,
    pub show_alternative: bool,
    pub confirmed_variant: Option<PriceVariant>,
    pub confirmation_channel: Option<ConfirmationChannel>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub status: QuoteStatus,
    pub created_at: DateTime<Utc>,
    pub requested_on: Option<NaiveDate>,
    pub agreed_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
}

impl Quote {
    pub fn has_alternative(&self) -> bool {
        self.total_alternative.is_some()
    }

    /// Variants the client is shown, and therefore may accept.
    pub fn offered_variants(&self) -> Vec<PriceVariant> {
        let mut variants = Vec::with_capacity(2);
        if self.show_original {
            variants.push(PriceVariant::Original);
        }
        if self.show_alternative && self.has_alternative() {
            variants.push(PriceVariant::Alternative);
        }
        variants
    }

    /// Settles which variant an approval refers to.
    ///
    /// When both prices exist the caller has to say which one was accepted; a quote
    /// without alternative pricing can only be accepted at its original price.
    pub fn resolve_variant(
        &self,
        requested: Option<PriceVariant>,
    ) -> Result<PriceVariant, DomainError> {
        match (requested, self.has_alternative()) {
            (Some(PriceVariant::Alternative), false) => Err(DomainError::Validation(format!(
                "quote {} has no alternative pricing",
                self.number
            ))),
            (Some(variant), _) => Ok(variant),
            (None, false) => Ok(PriceVariant::Original),
            (None, true) => Err(DomainError::Validation(format!(
                "quote {} has original and alternative pricing; the accepted variant is required",
                self.number
            ))),
        }
    }

    pub fn confirmed_amount(&self) -> Option<Decimal> {
        match self.confirmed_variant? {
            PriceVariant::Original => Some(self.total_original),
            PriceVariant::Alternative => self.total_alternative,
        }
    }

    pub fn summary(&self) -> QuoteSummary {
        QuoteSummary {
            id: self.id,
            number: self.number.clone(),
            service_id: self.service_id,
            status: self.status,
            total_original: self.total_original,
            total_alternative: self.total_alternative,
            confirmed_variant: self.confirmed_variant,
            expires_on: self.expires_on,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSummary {
    pub id: QuoteId,
    pub number: String,
    pub service_id: ServiceId,
    pub status: QuoteStatus,
    pub total_original: Decimal,
    pub total_alternative: Option<Decimal>,
    pub confirmed_variant: Option<PriceVariant>,
    pub expires_on: Option<NaiveDate>,
}
