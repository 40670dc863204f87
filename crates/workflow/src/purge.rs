//! Scheduled cleanup of expired approval links and stale session revocations.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use taller_core::errors::ApplicationError;

use crate::Workshop;

pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub tokens: u64,
    pub sessions: usize,
}

pub struct TokenPurger {
    workshop: Arc<Workshop>,
    interval: Duration,
}

impl TokenPurger {
    pub fn new(workshop: Arc<Workshop>) -> Self {
        Self { workshop, interval: DEFAULT_PURGE_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs until the returned handle is aborted. The first pass runs immediately.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                match self.run_once().await {
                    Ok(report) => {
                        info!(
                            event_name = "purge.completed",
                            tokens = report.tokens,
                            sessions = report.sessions,
                            "purge pass completed"
                        );
                    }
                    Err(error) => {
                        warn!(event_name = "purge.failed", error = %error, "purge pass failed");
                    }
                }
            }
        })
    }

    pub async fn run_once(&self) -> Result<PurgeReport, ApplicationError> {
        let tokens = self.workshop.purge_expired_tokens().await?;
        let sessions = self.workshop.sessions().prune(Utc::now());
        Ok(PurgeReport { tokens, sessions })
    }
}
