//! Client-facing approval through emailed links.
//!
//! A confirmation runs in a single transaction: the token is validated, the decision
//! is applied through [`apply_decision`], the token is consumed, and only then is the
//! transaction committed. Any failure leaves the token unused and the quote untouched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use taller_core::domain::quote::{ConfirmationChannel, PriceVariant, QuoteStatus};
use taller_core::domain::token::TokenAction;
use taller_core::errors::ApplicationError;
use taller_db::repositories::quote as quote_store;

use crate::notify::Outbox;
use crate::quotes::{apply_decision, Decision};
use crate::{commit, tokens, Workshop};

/// Outcome shown to the client after following a link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicDecision {
    pub quote_number: String,
    pub action: TokenAction,
    pub variant: Option<PriceVariant>,
    pub status: QuoteStatus,
    pub amount: Option<Decimal>,
}

/// What the client sees before confirming. Only displayed prices are included.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotePreview {
    pub quote_number: String,
    pub action: TokenAction,
    pub variant: Option<PriceVariant>,
    pub expires_at: DateTime<Utc>,
    pub diagnosis: Option<String>,
    pub labor: Decimal,
    pub total_original: Option<Decimal>,
    pub total_alternative: Option<Decimal>,
}

fn token_hint(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

impl Workshop {
    /// Applies the decision a token stands for and spends the token.
    pub async fn confirm_with_token(
        &self,
        token: &str,
        ip: Option<&str>,
    ) -> Result<PublicDecision, ApplicationError> {
        let result = self.confirm_in_transaction(token, ip).await;
        if let Err(error) = &result {
            tracing::warn!(
                event_name = "public_approval.rejected",
                token = token_hint(token),
                ip = ip.unwrap_or("-"),
                kind = ?error.kind(),
                reason = %error,
                "approval link refused"
            );
        }
        result
    }

    async fn confirm_in_transaction(
        &self,
        token: &str,
        ip: Option<&str>,
    ) -> Result<PublicDecision, ApplicationError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let granted = tokens::validate(&mut tx, token, now).await?;
        let decision = match granted.action {
            TokenAction::Approve => Decision::Approve(granted.variant),
            TokenAction::Reject => Decision::Reject,
        };
        let mut outbox = Outbox::default();
        let quote = apply_decision(
            &mut tx,
            granted.quote_id,
            decision,
            ConfirmationChannel::Email,
            now,
            &mut outbox,
        )
        .await?;
        tokens::consume(&mut tx, token, ip, now).await?;
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::info!(
            event_name = "public_approval.confirmed",
            quote = %quote.number,
            action = granted.action.as_str(),
            variant = granted.variant.map(|v| v.as_str()),
            ip = ip.unwrap_or("-"),
            "client decision recorded from approval link"
        );
        Ok(PublicDecision {
            quote_number: quote.number.clone(),
            action: granted.action,
            variant: quote.confirmed_variant,
            status: quote.status,
            amount: quote.confirmed_amount(),
        })
    }

    /// Shows the quote behind a valid token without spending it.
    pub async fn preview_token(&self, token: &str) -> Result<QuotePreview, ApplicationError> {
        let mut conn = self.read().await?;
        let granted = match tokens::validate(&mut conn, token, Utc::now()).await {
            Ok(granted) => granted,
            Err(error) => {
                tracing::debug!(
                    event_name = "public_approval.preview_refused",
                    token = token_hint(token),
                    reason = %error,
                    "approval link preview refused"
                );
                return Err(error);
            }
        };
        let quote = quote_store::find(&mut conn, granted.quote_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("quote", granted.quote_id.0))?;

        let offered = quote.offered_variants();
        Ok(QuotePreview {
            quote_number: quote.number,
            action: granted.action,
            variant: granted.variant,
            expires_at: granted.expires_at,
            diagnosis: quote.diagnosis,
            labor: quote.labor,
            total_original: offered
                .contains(&PriceVariant::Original)
                .then_some(quote.total_original),
            total_alternative: if offered.contains(&PriceVariant::Alternative) {
                quote.total_alternative
            } else {
                None
            },
        })
    }
}
