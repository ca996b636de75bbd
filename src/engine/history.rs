//! History retention: terminal jobs are archived, then purged after a window.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::Orchestrator;

impl Orchestrator {
    /// Delete history entries older than the retention window. Returns the
    /// number of jobs removed.
    pub fn sweep_history(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.history_retention())
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.sweep_history_before(cutoff)
    }

    /// Delete history entries whose `finished_at` (or `submitted_at`, if the
    /// job never finished) precedes `cutoff`.
    pub fn sweep_history_before(&self, cutoff: DateTime<Utc>) -> usize {
        let removed = self.book().purge_before(cutoff);
        if removed > 0 {
            info!(removed, %cutoff, "purged job history");
        } else {
            debug!(%cutoff, "history sweep found nothing to purge");
        }
        removed
    }

    /// Run the periodic history sweep until [`Orchestrator::shutdown`].
    pub async fn run_maintenance(&self) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        info!(
            interval_secs = self.config.sweep_interval_secs,
            retention_secs = self.config.history_retention_secs,
            "history maintenance started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("history maintenance shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep_history();
                }
            }
        }
    }
}
