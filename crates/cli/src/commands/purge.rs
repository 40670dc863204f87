use std::sync::Arc;

use taller_core::config::{AppConfig, LoadOptions};
use taller_core::delivery::{PlainTextReceiptRenderer, RecordingMailer};
use taller_core::notify::InMemoryNotificationSink;
use taller_workflow::{TokenPurger, Workshop, WorkshopSettings};

use crate::commands::{open_pool, runtime, CommandResult, StepError};

/// One purge pass, the same work the server's scheduled purger does each interval.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "purge-tokens",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let result = runtime().and_then(|runtime| {
        runtime.block_on(async {
            let pool = open_pool(&config).await?;
            // Purging sends no mail and publishes nothing.
            let workshop = Arc::new(Workshop::new(
                pool.clone(),
                Arc::new(InMemoryNotificationSink::default()),
                Arc::new(RecordingMailer::default()),
                Arc::new(PlainTextReceiptRenderer),
                WorkshopSettings::new(config.server.public_base_url.clone()),
            ));
            let report: Result<_, StepError> = TokenPurger::new(workshop)
                .run_once()
                .await
                .map_err(|error| ("purge", error.to_string(), 6u8));
            pool.close().await;
            report
        })
    });

    match result {
        Ok(report) => CommandResult::success_with_data(
            "purge-tokens",
            format!("purged {} expired approval tokens", report.tokens),
            &report,
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("purge-tokens", error_class, message, exit_code)
        }
    }
}
