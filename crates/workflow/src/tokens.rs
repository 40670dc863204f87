//! Approval token manager: issue, validate, consume and purge single-use links.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use taller_core::domain::quote::{PriceVariant, Quote, QuoteId};
use taller_core::domain::token::{ApprovalToken, TokenAction, TokenGrant, TokenRejection};
use taller_core::errors::ApplicationError;
use taller_db::repositories::token as token_store;

use crate::Workshop;

/// Stores a new token for `quote`. Fails when the quote has no expiration day or it is over.
pub async fn issue(
    conn: &mut SqliteConnection,
    quote: &Quote,
    action: TokenAction,
    variant: Option<PriceVariant>,
    now: DateTime<Utc>,
) -> Result<ApprovalToken, ApplicationError> {
    let grant = TokenGrant::for_quote(quote, action, variant, now)?;
    Ok(token_store::insert(conn, &grant).await?)
}

/// Looks a token up without spending it.
pub async fn validate(
    conn: &mut SqliteConnection,
    value: &str,
    now: DateTime<Utc>,
) -> Result<ApprovalToken, ApplicationError> {
    let token = token_store::find_by_value(conn, value)
        .await?
        .ok_or(TokenRejection::NotFound)?;
    token.check(now)?;
    Ok(token)
}

/// Marks the token used. Losing the race to a concurrent consumer reads as already used.
pub async fn consume(
    conn: &mut SqliteConnection,
    value: &str,
    ip: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), ApplicationError> {
    if token_store::consume(conn, value, now, ip).await? {
        Ok(())
    } else {
        Err(TokenRejection::AlreadyUsed.into())
    }
}

/// Deletes every unused token of the quote. Used tokens stay as proof of the decision.
pub async fn invalidate_prior(
    conn: &mut SqliteConnection,
    quote_id: QuoteId,
) -> Result<u64, ApplicationError> {
    Ok(token_store::delete_unused_for_quote(conn, quote_id).await?)
}

/// Replaces the outstanding links of `quote`: one approval per displayed variant and one
/// rejection.
pub async fn issue_decision_set(
    conn: &mut SqliteConnection,
    quote: &Quote,
    now: DateTime<Utc>,
) -> Result<Vec<ApprovalToken>, ApplicationError> {
    let variants = quote.offered_variants();
    if variants.is_empty() {
        return Err(ApplicationError::validation(format!(
            "quote {} does not display any price",
            quote.number
        )));
    }

    let invalidated = invalidate_prior(conn, quote.id).await?;
    if invalidated > 0 {
        tracing::debug!(
            event_name = "tokens.invalidated",
            quote_id = quote.id.0,
            invalidated,
            "outstanding approval links replaced"
        );
    }

    let mut issued = Vec::with_capacity(variants.len() + 1);
    for variant in variants {
        issued.push(issue(conn, quote, TokenAction::Approve, Some(variant), now).await?);
    }
    issued.push(issue(conn, quote, TokenAction::Reject, None, now).await?);
    Ok(issued)
}

impl Workshop {
    pub async fn validate_token(&self, value: &str) -> Result<ApprovalToken, ApplicationError> {
        let mut conn = self.read().await?;
        validate(&mut conn, value, Utc::now()).await
    }

    pub async fn tokens_for_quote(
        &self,
        quote_id: QuoteId,
    ) -> Result<Vec<ApprovalToken>, ApplicationError> {
        let mut conn = self.read().await?;
        Ok(token_store::for_quote(&mut conn, quote_id).await?)
    }

    /// Deletes unused tokens whose deadline has passed.
    pub async fn purge_expired_tokens(&self) -> Result<u64, ApplicationError> {
        let mut conn = self.read().await?;
        let purged = token_store::purge_expired(&mut conn, Utc::now()).await?;
        tracing::info!(event_name = "tokens.purged", purged, "expired approval links purged");
        Ok(purged)
    }
}
