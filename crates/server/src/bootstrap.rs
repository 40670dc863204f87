use std::sync::Arc;

use taller_core::config::{AppConfig, ConfigError, LoadOptions};
use taller_core::delivery::{DeliveryError, Mailer, ReceiptRenderer};
use taller_db::{connect_with_config, migrations, DbPool};
use taller_workflow::{Workshop, WorkshopSettings};
use thiserror::Error;
use tracing::{info, warn};

use crate::events::EventHub;
use crate::health::MailDelivery;
use crate::mail::{LogMailer, SmtpMailer};
use crate::receipt::HtmlReceiptRenderer;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub workshop: Arc<Workshop>,
    pub events: EventHub,
    pub mail_delivery: MailDelivery,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("mail transport could not be configured: {0}")]
    Mail(#[source] DeliveryError),
    #[error("receipt templates could not be loaded: {0}")]
    Receipts(#[source] DeliveryError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let (mailer, mail_delivery): (Arc<dyn Mailer>, MailDelivery) = if config.mail.enabled {
        let smtp = SmtpMailer::new(&config.mail).map_err(BootstrapError::Mail)?;
        (Arc::new(smtp), MailDelivery::Smtp)
    } else {
        warn!(
            event_name = "system.bootstrap.mail_disabled",
            "mail.enabled is false, outgoing email is only logged"
        );
        (Arc::new(LogMailer), MailDelivery::LogOnly)
    };

    let renderer = receipt_renderer(&config)?;
    info!(
        event_name = "system.bootstrap.receipts_ready",
        pdf = renderer.produces_pdf(),
        "service receipt renderer ready"
    );
    let receipts: Arc<dyn ReceiptRenderer> = Arc::new(renderer);

    let events = EventHub::new(config.notifications.channel_capacity);
    let workshop = Workshop::new(
        db_pool.clone(),
        Arc::new(events.clone()),
        mailer,
        receipts,
        WorkshopSettings::new(config.server.public_base_url.clone()),
    );

    Ok(Application { config, db_pool, workshop: Arc::new(workshop), events, mail_delivery })
}

fn receipt_renderer(config: &AppConfig) -> Result<HtmlReceiptRenderer, BootstrapError> {
    let template_dir = config.receipts.template_dir.join("receipts");
    match HtmlReceiptRenderer::new(&template_dir, config.receipts.pdf_enabled) {
        Ok(renderer) => Ok(renderer),
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.receipt_templates_fallback",
                template_dir = %template_dir.display(),
                error = %error,
                "receipt templates not found on disk, using embedded template"
            );
            HtmlReceiptRenderer::with_embedded_template(config.receipts.pdf_enabled)
                .map_err(BootstrapError::Receipts)
        }
    }
}
