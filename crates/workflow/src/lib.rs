//! Transactional orchestration of the service, quote and work-order lifecycle.
//!
//! Every mutating operation runs in one sqlite transaction: it loads the entities it
//! touches, checks the transition against the lifecycle machines, writes with
//! compare-and-set updates, commits, and only then publishes change notifications.

use std::sync::Arc;

use chrono::Utc;
use sqlx::{Sqlite, Transaction};

use taller_core::auth::{Principal, SessionClaims, SessionRevocations};
use taller_core::delivery::{DeliveryError, Mailer, ReceiptRenderer};
use taller_core::errors::ApplicationError;
use taller_core::notify::NotificationSink;
use taller_db::{DbPool, RepositoryError};

pub mod notify;
pub mod public_approval;
pub mod purge;
pub mod quotes;
pub mod services;
pub mod tokens;
pub mod work_orders;

pub use notify::Notifier;
pub use public_approval::{PublicDecision, QuotePreview};
pub use purge::{PurgeReport, TokenPurger};
pub use quotes::{ApprovalLink, Decision, QuoteDraft, SentQuote};
pub use services::{ServiceDetailsUpdate, ServiceIntake, WarrantyDecision, WarrantyOutcome};

#[derive(Clone, Debug)]
pub struct WorkshopSettings {
    /// Base URL of the public approval pages, without a trailing slash.
    pub public_base_url: String,
}

impl WorkshopSettings {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        let mut public_base_url = public_base_url.into();
        while public_base_url.ends_with('/') {
            public_base_url.pop();
        }
        Self { public_base_url }
    }

    pub fn approval_link(&self, token: &str) -> String {
        format!("{}/publico/presupuestos/{token}", self.public_base_url)
    }
}

pub struct Workshop {
    pool: DbPool,
    notifier: Notifier,
    mailer: Arc<dyn Mailer>,
    receipts: Arc<dyn ReceiptRenderer>,
    sessions: Arc<SessionRevocations>,
    settings: WorkshopSettings,
}

impl Workshop {
    pub fn new(
        pool: DbPool,
        sink: Arc<dyn NotificationSink>,
        mailer: Arc<dyn Mailer>,
        receipts: Arc<dyn ReceiptRenderer>,
        settings: WorkshopSettings,
    ) -> Self {
        Self {
            pool,
            notifier: Notifier::new(sink),
            mailer,
            receipts,
            sessions: Arc::new(SessionRevocations::default()),
            settings,
        }
    }

    pub fn with_session_revocations(mut self, sessions: Arc<SessionRevocations>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn settings(&self) -> &WorkshopSettings {
        &self.settings
    }

    /// Resolves the caller of a staff operation from a verified session.
    pub fn authenticate(&self, claims: &SessionClaims) -> Result<Principal, ApplicationError> {
        self.sessions.authenticate(claims, Utc::now())
    }

    /// Logs a session out before its natural expiry.
    pub fn revoke_session(&self, claims: &SessionClaims) {
        self.sessions.revoke(&claims.session_id, claims.expires_at, Utc::now());
        tracing::info!(
            event_name = "auth.session_revoked",
            username = %claims.principal.username,
            "session revoked"
        );
    }

    pub(crate) fn sessions(&self) -> &SessionRevocations {
        &self.sessions
    }

    /// Takes the write lock up front; competing writers queue on the busy timeout.
    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Sqlite>, ApplicationError> {
        self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(persistence)
    }

    pub(crate) async fn read(
        &self,
    ) -> Result<sqlx::pool::PoolConnection<Sqlite>, ApplicationError> {
        self.pool.acquire().await.map_err(persistence)
    }
}

pub(crate) fn persistence(error: sqlx::Error) -> ApplicationError {
    ApplicationError::from(RepositoryError::from(error))
}

pub(crate) async fn commit(tx: Transaction<'static, Sqlite>) -> Result<(), ApplicationError> {
    tx.commit().await.map_err(persistence)
}

pub(crate) fn integration(error: DeliveryError) -> ApplicationError {
    ApplicationError::Integration(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::WorkshopSettings;

    #[test]
    fn approval_links_hang_off_the_public_base_url() {
        let settings = WorkshopSettings::new("https://taller.example.com//");

        assert_eq!(settings.public_base_url, "https://taller.example.com");
        assert_eq!(
            settings.approval_link("abc123"),
            "https://taller.example.com/publico/presupuestos/abc123"
        );
    }
}
