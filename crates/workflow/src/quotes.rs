//! Quote authoring, sending and the decision entry point shared by staff and clients.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use taller_core::auth::Principal;
use taller_core::delivery::EmailMessage;
use taller_core::domain::quote::{
    ConfirmationChannel, LineDraft, PriceVariant, Quote, QuoteId, QuoteLineId, QuoteStatus,
};
use taller_core::domain::service::{ServiceId, ServiceStatus};
use taller_core::domain::token::{ApprovalToken, TokenAction};
use taller_core::errors::{ApplicationError, DomainError};
use taller_core::flows::{
    Lifecycle, QuoteEvent, QuoteStatusMachine, ServiceEvent, ServiceStatusMachine,
};
use taller_core::notify::EventKind;
use taller_core::numbering::{current_year, DocumentKind};
use taller_core::pricing;
use taller_db::repositories::quote::{self as quote_store, DecisionRecord};
use taller_db::repositories::{sequence, service as service_store};

use crate::notify::Outbox;
use crate::services::ensure_active;
use crate::{commit, integration, tokens, Workshop};

/// Header fields for a new quote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDraft {
    pub diagnosis: Option<String>,
    pub labor: Decimal,
    pub requested_on: Option<NaiveDate>,
    /// Last day the client may answer. Approval links expire with it.
    pub expires_on: Option<NaiveDate>,
    pub show_original: bool,
    pub show_alternative: bool,
}

impl QuoteDraft {
    fn validate(&self) -> Result<(), DomainError> {
        check_labor(self.labor)?;
        check_display(self.show_original, self.show_alternative)?;
        check_expiration(self.requested_on, self.expires_on)
    }
}

/// What the client or staff decided about a sent quote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approve(Option<PriceVariant>),
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLink {
    pub action: TokenAction,
    pub variant: Option<PriceVariant>,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentQuote {
    pub quote: Quote,
    pub links: Vec<ApprovalLink>,
}

fn check_labor(labor: Decimal) -> Result<(), DomainError> {
    if labor < Decimal::ZERO {
        return Err(DomainError::Validation("labor cannot be negative".to_string()));
    }
    Ok(())
}

fn check_display(show_original: bool, show_alternative: bool) -> Result<(), DomainError> {
    if !show_original && !show_alternative {
        return Err(DomainError::Validation(
            "a quote must display at least one price".to_string(),
        ));
    }
    Ok(())
}

fn check_expiration(
    requested_on: Option<NaiveDate>,
    expires_on: Option<NaiveDate>,
) -> Result<(), DomainError> {
    match (requested_on, expires_on) {
        (Some(requested), Some(expires)) if expires < requested => {
            Err(DomainError::Validation(format!(
                "quote cannot expire on {expires}, before it was requested on {requested}"
            )))
        }
        _ => Ok(()),
    }
}

async fn load_quote(conn: &mut SqliteConnection, id: QuoteId) -> Result<Quote, ApplicationError> {
    quote_store::find(conn, id).await?.ok_or_else(|| ApplicationError::not_found("quote", id.0))
}

async fn load_editable(
    conn: &mut SqliteConnection,
    id: QuoteId,
) -> Result<Quote, ApplicationError> {
    let quote = load_quote(conn, id).await?;
    if !quote.status.is_editable() {
        return Err(ApplicationError::invalid_state(format!(
            "quote {} is {} and can no longer be edited",
            quote.number,
            quote.status.as_str()
        )));
    }
    Ok(quote)
}

/// Persists recalculated amounts. Editing a sent quote takes it back to ready and voids
/// the links the client holds.
async fn save_revision(
    conn: &mut SqliteConnection,
    mut quote: Quote,
    outbox: &mut Outbox,
) -> Result<Quote, ApplicationError> {
    pricing::recalculate(&mut quote);
    quote_store::save_content(conn, &quote).await?;

    if quote.status == QuoteStatus::Sent {
        let outcome = QuoteStatusMachine
            .transition(&quote.status, &QuoteEvent::Revise)
            .map_err(DomainError::from)?;
        quote_store::transition(conn, quote.id, outcome.from, outcome.to).await?;
        let voided = tokens::invalidate_prior(conn, quote.id).await?;
        quote.status = outcome.to;
        outbox.quote_status(&quote, outcome.from.as_str());
        tracing::info!(
            event_name = "quotes.revised",
            quote = %quote.number,
            voided,
            "sent quote edited; approval links voided"
        );
    } else {
        outbox.quote(EventKind::Updated, &quote);
    }
    Ok(quote)
}

/// Records `decision` on a sent quote and carries it over to the owning service.
///
/// Staff confirmations and client token confirmations both go through here, inside the
/// caller's transaction. Nothing is published; events land in `outbox`.
pub async fn apply_decision(
    conn: &mut SqliteConnection,
    quote_id: QuoteId,
    decision: Decision,
    channel: ConfirmationChannel,
    now: DateTime<Utc>,
    outbox: &mut Outbox,
) -> Result<Quote, ApplicationError> {
    let mut quote = load_quote(conn, quote_id).await?;
    let mut service = service_store::find(conn, quote.service_id)
        .await?
        .ok_or_else(|| ApplicationError::not_found("service", quote.service_id.0))?;
    ensure_active(&service)?;
    let (event, variant) = match decision {
        Decision::Approve(requested) => {
            let variant = quote.resolve_variant(requested)?;
            if !quote.offered_variants().contains(&variant) {
                return Err(ApplicationError::validation(format!(
                    "quote {} does not offer the {} price",
                    quote.number,
                    variant.as_str()
                )));
            }
            (QuoteEvent::Approve, Some(variant))
        }
        Decision::Reject => (QuoteEvent::Reject, None),
    };
    let outcome = QuoteStatusMachine
        .transition(&quote.status, &event)
        .map_err(DomainError::from)?;

    let record = DecisionRecord {
        to: outcome.to,
        variant,
        channel,
        confirmed_at: now,
        agreed_on: now.date_naive(),
    };
    quote_store::record_decision(conn, quote.id, outcome.from, &record).await?;
    quote.status = outcome.to;
    quote.confirmed_variant = variant;
    quote.confirmation_channel = Some(channel);
    quote.confirmed_at = Some(now);
    quote.agreed_on = Some(record.agreed_on);
    outbox.quote_status(&quote, outcome.from.as_str());

    let service_event = match decision {
        Decision::Approve(_) => Some(ServiceEvent::QuoteApproved),
        Decision::Reject => {
            let open = quote_store::count_open_for_service(conn, service.id, quote.id).await?;
            (open == 0 && service.status == ServiceStatus::Quoted)
                .then_some(ServiceEvent::QuoteRejected)
        }
    };
    if let Some(service_event) = service_event {
        let moved = ServiceStatusMachine
            .transition(&service.status, &service_event)
            .map_err(DomainError::from)?;
        service_store::transition(conn, service.id, moved.from, moved.to, now).await?;
        service.enter(moved.to, now);
        outbox.service_status(&service, moved.from.as_str());
    }

    tracing::info!(
        event_name = "quotes.decided",
        quote = %quote.number,
        status = quote.status.as_str(),
        variant = variant.map(|v| v.as_str()),
        channel = channel.as_str(),
        service_status = service.status.as_str(),
        "quote decision recorded"
    );
    Ok(quote)
}

fn quote_email(quote: &Quote, links: &[ApprovalLink], to: &str) -> EmailMessage {
    let mut body = format!("Presupuesto {}\n\n", quote.number);
    if let Some(diagnosis) = &quote.diagnosis {
        body.push_str(&format!("Diagnóstico: {diagnosis}\n\n"));
    }
    for line in &quote.lines {
        body.push_str(&format!(
            "- {} x{}: {}",
            line.description, line.quantity, line.original_price
        ));
        if let Some(alternative) = line.alternative_price {
            body.push_str(&format!(" (alternativo {alternative})"));
        }
        body.push('\n');
    }
    body.push_str(&format!("\nMano de obra: {}\n", quote.labor));
    if quote.show_original {
        body.push_str(&format!("Total original: {}\n", quote.total_original));
    }
    if let (true, Some(total)) = (quote.show_alternative, quote.total_alternative) {
        body.push_str(&format!("Total alternativo: {total}\n"));
    }
    body.push('\n');
    for link in links {
        let label = match (link.action, link.variant) {
            (TokenAction::Approve, Some(PriceVariant::Alternative)) => "Aprobar precio alternativo",
            (TokenAction::Approve, _) => "Aprobar precio original",
            (TokenAction::Reject, _) => "Rechazar presupuesto",
        };
        body.push_str(&format!("{label}: {}\n", link.url));
    }
    if let Some(expires_on) = quote.expires_on {
        body.push_str(&format!("\nLos enlaces vencen el {expires_on}.\n"));
    }

    EmailMessage {
        to: to.to_owned(),
        subject: format!("Presupuesto {}", quote.number),
        body_text: body,
        body_html: None,
        attachment: None,
    }
}

impl Workshop {
    /// Opens a quote on an active service that is still waiting for a quote decision.
    pub async fn create_quote(
        &self,
        actor: &Principal,
        service_id: ServiceId,
        draft: QuoteDraft,
    ) -> Result<Quote, ApplicationError> {
        draft.validate()?;
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let mut service = service_store::find(&mut tx, service_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("service", service_id.0))?;
        ensure_active(&service)?;
        let moved = ServiceStatusMachine
            .transition(&service.status, &ServiceEvent::QuoteCreated)
            .map_err(DomainError::from)?;

        let number = sequence::next_number(&mut tx, DocumentKind::Quote, current_year(now)).await?;
        let mut quote = Quote {
            id: QuoteId(0),
            number,
            service_id,
            employee_id: actor.employee_id,
            diagnosis: draft.diagnosis,
            lines: Vec::new(),
            parts_original: Decimal::ZERO,
            parts_alternative: None,
            labor: draft.labor,
            total_original: Decimal::ZERO,
            total_alternative: None,
            show_original: draft.show_original,
            show_alternative: draft.show_alternative,
            confirmed_variant: None,
            confirmation_channel: None,
            confirmed_at: None,
            status: QuoteStatus::Pending,
            created_at: now,
            requested_on: draft.requested_on,
            agreed_on: None,
            expires_on: draft.expires_on,
        };
        pricing::recalculate(&mut quote);
        quote.id = quote_store::insert(&mut tx, &quote).await?;

        let mut outbox = Outbox::default();
        outbox.quote(EventKind::Created, &quote);
        if moved.changed() {
            service_store::transition(&mut tx, service.id, moved.from, moved.to, now).await?;
            service.enter(moved.to, now);
            outbox.service_status(&service, moved.from.as_str());
        }
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::info!(
            event_name = "quotes.created",
            quote = %quote.number,
            service = %service.number,
            "quote created"
        );
        Ok(quote)
    }

    pub async fn get_quote(&self, id: QuoteId) -> Result<Quote, ApplicationError> {
        let mut conn = self.read().await?;
        load_quote(&mut conn, id).await
    }

    /// Every quote of a service, oldest first, lines included.
    pub async fn quotes_for_service(
        &self,
        service_id: ServiceId,
    ) -> Result<Vec<Quote>, ApplicationError> {
        let mut conn = self.read().await?;
        Ok(quote_store::for_service(&mut conn, service_id).await?)
    }

    pub async fn add_quote_line(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        line: LineDraft,
    ) -> Result<Quote, ApplicationError> {
        line.validate()?;
        let mut tx = self.begin().await?;
        load_editable(&mut tx, quote_id).await?;
        quote_store::insert_line(&mut tx, quote_id, &line).await?;
        let quote = load_quote(&mut tx, quote_id).await?;

        let mut outbox = Outbox::default();
        let quote = save_revision(&mut tx, quote, &mut outbox).await?;
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::debug!(
            event_name = "quotes.line_added",
            quote = %quote.number,
            user = %actor.username,
            lines = quote.lines.len(),
            "quote line added"
        );
        Ok(quote)
    }

    pub async fn update_quote_line(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        line_id: QuoteLineId,
        line: LineDraft,
    ) -> Result<Quote, ApplicationError> {
        line.validate()?;
        let mut tx = self.begin().await?;
        load_editable(&mut tx, quote_id).await?;
        if !quote_store::update_line(&mut tx, quote_id, line_id, &line).await? {
            return Err(ApplicationError::not_found("quote_line", line_id.0));
        }
        let quote = load_quote(&mut tx, quote_id).await?;

        let mut outbox = Outbox::default();
        let quote = save_revision(&mut tx, quote, &mut outbox).await?;
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::debug!(
            event_name = "quotes.line_updated",
            quote = %quote.number,
            user = %actor.username,
            line_id = line_id.0,
            "quote line updated"
        );
        Ok(quote)
    }

    pub async fn remove_quote_line(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        line_id: QuoteLineId,
    ) -> Result<Quote, ApplicationError> {
        let mut tx = self.begin().await?;
        load_editable(&mut tx, quote_id).await?;
        if !quote_store::delete_line(&mut tx, quote_id, line_id).await? {
            return Err(ApplicationError::not_found("quote_line", line_id.0));
        }
        let quote = load_quote(&mut tx, quote_id).await?;

        let mut outbox = Outbox::default();
        let quote = save_revision(&mut tx, quote, &mut outbox).await?;
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::debug!(
            event_name = "quotes.line_removed",
            quote = %quote.number,
            user = %actor.username,
            line_id = line_id.0,
            "quote line removed"
        );
        Ok(quote)
    }

    pub async fn set_labor(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        labor: Decimal,
    ) -> Result<Quote, ApplicationError> {
        check_labor(labor)?;
        self.revise(actor, quote_id, |quote| {
            quote.labor = labor;
            Ok(())
        })
        .await
    }

    pub async fn set_display_flags(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        show_original: bool,
        show_alternative: bool,
    ) -> Result<Quote, ApplicationError> {
        check_display(show_original, show_alternative)?;
        self.revise(actor, quote_id, |quote| {
            quote.show_original = show_original;
            quote.show_alternative = show_alternative;
            Ok(())
        })
        .await
    }

    pub async fn set_expiration(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        expires_on: NaiveDate,
    ) -> Result<Quote, ApplicationError> {
        self.revise(actor, quote_id, |quote| {
            check_expiration(quote.requested_on, Some(expires_on))?;
            quote.expires_on = Some(expires_on);
            Ok(())
        })
        .await
    }

    async fn revise<F>(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        edit: F,
    ) -> Result<Quote, ApplicationError>
    where
        F: FnOnce(&mut Quote) -> Result<(), DomainError>,
    {
        let mut tx = self.begin().await?;
        let mut quote = load_editable(&mut tx, quote_id).await?;
        edit(&mut quote)?;

        let mut outbox = Outbox::default();
        let quote = save_revision(&mut tx, quote, &mut outbox).await?;
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::debug!(
            event_name = "quotes.revised_header",
            quote = %quote.number,
            user = %actor.username,
            "quote header updated"
        );
        Ok(quote)
    }

    /// Technician starts working on the diagnosis.
    pub async fn start_quote(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
    ) -> Result<Quote, ApplicationError> {
        self.advance(actor, quote_id, QuoteEvent::Start).await
    }

    pub async fn mark_quote_ready(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
    ) -> Result<Quote, ApplicationError> {
        self.advance(actor, quote_id, QuoteEvent::MarkReady).await
    }

    async fn advance(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        event: QuoteEvent,
    ) -> Result<Quote, ApplicationError> {
        let mut tx = self.begin().await?;
        let mut quote = load_quote(&mut tx, quote_id).await?;
        let outcome = QuoteStatusMachine
            .transition(&quote.status, &event)
            .map_err(DomainError::from)?;
        if event == QuoteEvent::MarkReady && quote.lines.is_empty() {
            return Err(ApplicationError::validation(format!(
                "quote {} has no lines",
                quote.number
            )));
        }
        quote_store::transition(&mut tx, quote.id, outcome.from, outcome.to).await?;
        quote.status = outcome.to;

        let mut outbox = Outbox::default();
        outbox.quote_status(&quote, outcome.from.as_str());
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::info!(
            event_name = "quotes.advanced",
            quote = %quote.number,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            user = %actor.username,
            "quote status changed"
        );
        Ok(quote)
    }

    /// Emails the quote with fresh approval links. Resending a sent quote replaces the
    /// links it carried before. If the email cannot be delivered nothing is kept.
    pub async fn send_quote(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        to: &str,
    ) -> Result<SentQuote, ApplicationError> {
        if !to.contains('@') {
            return Err(ApplicationError::validation(format!("`{to}` is not an email address")));
        }
        let now = Utc::now();
        let mut tx = self.begin().await?;
        let mut quote = load_quote(&mut tx, quote_id).await?;
        let outcome = QuoteStatusMachine
            .transition(&quote.status, &QuoteEvent::Send)
            .map_err(DomainError::from)?;
        if quote.lines.is_empty() {
            return Err(ApplicationError::validation(format!(
                "quote {} has no lines",
                quote.number
            )));
        }

        let issued = tokens::issue_decision_set(&mut tx, &quote, now).await?;
        let mut outbox = Outbox::default();
        if outcome.changed() {
            quote_store::transition(&mut tx, quote.id, outcome.from, outcome.to).await?;
            quote.status = outcome.to;
            outbox.quote_status(&quote, outcome.from.as_str());
        } else {
            outbox.quote(EventKind::Updated, &quote);
        }

        let links: Vec<ApprovalLink> = issued.iter().map(|token| self.link(token)).collect();
        if let Err(error) = self.mailer.send(quote_email(&quote, &links, to)).await {
            tracing::warn!(
                event_name = "quotes.send_failed",
                quote = %quote.number,
                error = %error,
                "quote email failed; nothing was changed"
            );
            return Err(integration(error));
        }
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::info!(
            event_name = "quotes.sent",
            quote = %quote.number,
            links = links.len(),
            resend = !outcome.changed(),
            user = %actor.username,
            "quote sent to client"
        );
        Ok(SentQuote { quote, links })
    }

    fn link(&self, token: &ApprovalToken) -> ApprovalLink {
        ApprovalLink {
            action: token.action,
            variant: token.variant,
            url: self.settings.approval_link(&token.token),
            expires_at: token.expires_at,
        }
    }

    /// Records a client approval taken by staff (phone, in person, messaging).
    pub async fn approve_quote(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        variant: Option<PriceVariant>,
        channel: ConfirmationChannel,
    ) -> Result<Quote, ApplicationError> {
        self.decide(actor, quote_id, Decision::Approve(variant), channel).await
    }

    pub async fn reject_quote(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        channel: ConfirmationChannel,
    ) -> Result<Quote, ApplicationError> {
        self.decide(actor, quote_id, Decision::Reject, channel).await
    }

    async fn decide(
        &self,
        actor: &Principal,
        quote_id: QuoteId,
        decision: Decision,
        channel: ConfirmationChannel,
    ) -> Result<Quote, ApplicationError> {
        let mut tx = self.begin().await?;
        let mut outbox = Outbox::default();
        let quote =
            apply_decision(&mut tx, quote_id, decision, channel, Utc::now(), &mut outbox).await?;
        commit(tx).await?;
        self.notifier.flush(outbox);

        tracing::debug!(
            event_name = "quotes.staff_decision",
            quote = %quote.number,
            user = %actor.username,
            "decision entered by staff"
        );
        Ok(quote)
    }
}
