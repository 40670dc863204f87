//! Single-use approval links handed to clients.
//!
//! A token binds one quote to one decision (and, for approvals, to one price
//! variant). It is valid until the end of the quote's expiration day and can be
//! spent exactly once.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::quote::{PriceVariant, Quote, QuoteId};
use crate::errors::DomainError;

/// Random bytes behind every token value.
pub const TOKEN_BYTES: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalTokenId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenAction {
    #[serde(rename = "APROBAR")]
    Approve,
    #[serde(rename = "RECHAZAR")]
    Reject,
}

impl TokenAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APROBAR",
            Self::Reject => "RECHAZAR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "APROBAR" => Some(Self::Approve),
            "RECHAZAR" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Why a token cannot be used. Public callers only ever see that it is invalid.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenRejection {
    #[error("approval token not found")]
    NotFound,
    #[error("approval token already used")]
    AlreadyUsed,
    #[error("approval token expired")]
    Expired,
}

impl TokenRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyUsed => "already_used",
            Self::Expired => "expired",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalToken {
    pub id: ApprovalTokenId,
    pub token: String,
    pub quote_id: QuoteId,
    pub action: TokenAction,
    pub variant: Option<PriceVariant>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalToken {
    /// Used beats expired: a spent link reports as used even after its deadline.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), TokenRejection> {
        if self.used {
            return Err(TokenRejection::AlreadyUsed);
        }
        if self.expires_at < now {
            return Err(TokenRejection::Expired);
        }
        Ok(())
    }
}

/// A token that has not been stored yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub quote_id: QuoteId,
    pub action: TokenAction,
    pub variant: Option<PriceVariant>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TokenGrant {
    /// Builds a grant for `quote`, bounded by the quote's own expiration day.
    pub fn for_quote(
        quote: &Quote,
        action: TokenAction,
        variant: Option<PriceVariant>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let expires_on = quote.expires_on.ok_or_else(|| {
            DomainError::Validation(format!(
                "quote {} has no expiration date; approval links cannot be open-ended",
                quote.number
            ))
        })?;
        let expires_at = end_of_day(expires_on);
        if expires_at < now {
            return Err(DomainError::Validation(format!(
                "quote {} expired on {expires_on}",
                quote.number
            )));
        }

        let variant = match action {
            TokenAction::Approve => variant,
            TokenAction::Reject => None,
        };

        Ok(Self {
            token: generate_token_value(),
            quote_id: quote.id,
            action,
            variant,
            expires_at,
            created_at: now,
        })
    }
}

/// Last instant of `day`, in UTC.
pub fn end_of_day(day: NaiveDate) -> DateTime<Utc> {
    let last = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN);
    day.and_time(last).and_utc()
}

pub fn generate_token_value() -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::{
        end_of_day, generate_token_value, ApprovalToken, ApprovalTokenId, TokenAction, TokenGrant,
        TokenRejection,
    };
    use crate::domain::quote::{PriceVariant, Quote, QuoteId, QuoteStatus};
    use crate::domain::service::ServiceId;

    fn quote(expires_on: Option<NaiveDate>) -> Quote {
        Quote {
            id: QuoteId(9),
            number: "PRE25-00009".to_string(),
            service_id: ServiceId(1),
            employee_id: 1,
            diagnosis: None,
            lines: Vec::new(),
            parts_original: Decimal::new(100, 0),
            parts_alternative: None,
            labor: Decimal::ZERO,
            total_original: Decimal::new(100, 0),
            total_alternative: None,
            show_original: true,
            show_alternative: false,
            confirmed_variant: None,
            confirmation_channel: None,
            confirmed_at: None,
            status: QuoteStatus::Ready,
            created_at: Utc::now(),
            requested_on: None,
            agreed_on: None,
            expires_on,
        }
    }

    #[test]
    fn token_values_are_long_and_distinct() {
        let first = generate_token_value();
        let second = generate_token_value();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[test]
    fn grant_expiry_never_outlives_quote_expiration() {
        let expires_on = (Utc::now() + Duration::days(10)).date_naive();
        let grant = TokenGrant::for_quote(
            &quote(Some(expires_on)),
            TokenAction::Approve,
            Some(PriceVariant::Original),
            Utc::now(),
        )
        .expect("grant");

        assert_eq!(grant.expires_at, end_of_day(expires_on));
        assert_eq!(grant.expires_at.date_naive(), expires_on);
        assert!(grant.expires_at < end_of_day(expires_on) + Duration::microseconds(1));
    }

    #[test]
    fn grant_requires_quote_expiration() {
        let error =
            TokenGrant::for_quote(&quote(None), TokenAction::Approve, None, Utc::now())
                .expect_err("open-ended links are refused");
        assert!(error.to_string().contains("no expiration date"));
    }

    #[test]
    fn rejection_grants_drop_the_variant() {
        let expires_on = (Utc::now() + Duration::days(1)).date_naive();
        let grant = TokenGrant::for_quote(
            &quote(Some(expires_on)),
            TokenAction::Reject,
            Some(PriceVariant::Alternative),
            Utc::now(),
        )
        .expect("grant");
        assert_eq!(grant.variant, None);
    }

    #[test]
    fn check_reports_used_before_expired() {
        let now = Utc::now();
        let mut token = ApprovalToken {
            id: ApprovalTokenId(1),
            token: generate_token_value(),
            quote_id: QuoteId(9),
            action: TokenAction::Approve,
            variant: None,
            expires_at: now - Duration::seconds(1),
            used: false,
            used_at: None,
            used_ip: None,
            created_at: now - Duration::days(2),
        };
        assert_eq!(token.check(now), Err(TokenRejection::Expired));

        token.used = true;
        assert_eq!(token.check(now), Err(TokenRejection::AlreadyUsed));

        token.used = false;
        token.expires_at = now + Duration::hours(1);
        assert_eq!(token.check(now), Ok(()));
    }
}
