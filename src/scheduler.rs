/// Periodic weather refresh for every configured user.
use crate::dialog::DialogController;
use crate::error::{BotError, Result};
use crate::models::UserId;
use crate::store::SettingsStore;
use crate::transport::TransportError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

const SECONDS_PER_HOUR: i64 = 3600;

/// Result of one bulk refresh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Refreshed,
    Skipped,
    Removed,
    Failed,
}

pub struct Scheduler {
    controller: Arc<DialogController>,
    store: Arc<dyn SettingsStore>,
    interval_hours: u32,
}

/// First UTC instant after `now` that is a multiple of `interval_hours`
/// counted from midnight.
pub fn next_run(now: DateTime<Utc>, interval_hours: u32) -> DateTime<Utc> {
    let step = i64::from(interval_hours.max(1)) * SECONDS_PER_HOUR;
    let next = (now.timestamp().div_euclid(step) + 1) * step;
    DateTime::from_timestamp(next, 0).unwrap_or(now + chrono::Duration::seconds(step))
}

impl Scheduler {
    pub fn new(
        controller: Arc<DialogController>,
        store: Arc<dyn SettingsStore>,
        interval_hours: u32,
    ) -> Self {
        Self {
            controller,
            store,
            interval_hours,
        }
    }

    /// Sleep until each aligned boundary and refresh everyone. Never returns.
    pub async fn run(self) {
        loop {
            let now = Utc::now();
            let next = next_run(now, self.interval_hours);
            info!("Next weather refresh at {}", next.format("%Y-%m-%d %H:%M UTC"));
            tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

            match self.refresh_all().await {
                Ok(report) => info!(
                    "Weather refresh finished: {} refreshed, {} removed, {} failed",
                    report.refreshed, report.removed, report.failed
                ),
                Err(e) => error!("Weather refresh aborted: {}", e),
            }
        }
    }

    /// Refresh configured users one by one.
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let sessions = self.store.configured_sessions().await?;
        info!("Refreshing weather for {} users", sessions.len());

        let mut report = RefreshReport::default();
        for session in sessions {
            match self.refresh_one(session.user_id).await {
                Outcome::Refreshed => report.refreshed += 1,
                Outcome::Removed => report.removed += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Skipped => {}
            }
        }
        Ok(report)
    }

    async fn refresh_one(&self, user: UserId) -> Outcome {
        let result = match self.controller.refresh_user(user).await {
            Err(BotError::Transport(TransportError::RetryAfter(delay))) => {
                warn!("Flood control for user {}, retrying in {:?}", user, delay);
                tokio::time::sleep(delay).await;
                self.controller.refresh_user(user).await
            }
            other => other,
        };

        match result {
            Ok(true) => Outcome::Refreshed,
            Ok(false) => Outcome::Skipped,
            Err(BotError::Transport(TransportError::Blocked)) => {
                info!("User {} blocked the bot or was deactivated, removing", user);
                match self.controller.forget_user(user).await {
                    Ok(()) => Outcome::Removed,
                    Err(e) => {
                        error!("Failed to remove user {}: {}", user, e);
                        Outcome::Failed
                    }
                }
            }
            Err(e) => {
                error!("Failed to refresh weather for user {}: {}", user, e);
                Outcome::Failed
            }
        }
    }
}
