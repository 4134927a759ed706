//! Background service that starts new billing cycles.
//!
//! Each run sweeps users whose last billing date is a full cycle old,
//! zeroes their monthly counters and refills the plan allowance.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use amp_firestore::{LedgerStore, ResetSummary};

use crate::metrics;

/// Monthly reset scheduler.
pub struct MonthlyResetScheduler {
    ledger: Arc<dyn LedgerStore>,
    interval: Duration,
    enabled: bool,
}

impl MonthlyResetScheduler {
    /// Create a scheduler. `ENABLE_MONTHLY_RESET=false` disables it.
    pub fn new(ledger: Arc<dyn LedgerStore>, interval: Duration) -> Self {
        let enabled = std::env::var("ENABLE_MONTHLY_RESET")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        Self {
            ledger,
            interval,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start the background loop.
    ///
    /// This function runs indefinitely and should be spawned as a background task.
    pub async fn run(&self) {
        if !self.enabled {
            info!("Monthly reset scheduler is disabled");
            return;
        }

        info!("Starting monthly reset scheduler (interval: {:?})", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = self.run_once().await {
                error!("Monthly reset error: {:#}", e);
            }
        }
    }

    /// Run a single sweep.
    pub async fn run_once(&self) -> anyhow::Result<ResetSummary> {
        let summary = self.ledger.reset_monthly_usage(Utc::now()).await?;
        metrics::record_monthly_reset(summary.reset);

        if summary.failed > 0 {
            warn!(
                scanned = summary.scanned,
                reset = summary.reset,
                failed = summary.failed,
                "Monthly reset finished with failures"
            );
        } else if summary.reset > 0 {
            info!(
                scanned = summary.scanned,
                reset = summary.reset,
                "Monthly reset completed"
            );
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::MockLedger;
    use amp_firestore::LedgerError;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn test_run_once_returns_summary() {
        std::env::remove_var("ENABLE_MONTHLY_RESET");
        let mut ledger = MockLedger::new();
        ledger.expect_reset_monthly_usage().times(1).returning(|_| {
            Ok(ResetSummary {
                scanned: 3,
                reset: 2,
                failed: 1,
            })
        });

        let scheduler = MonthlyResetScheduler::new(Arc::new(ledger), Duration::from_secs(60));
        assert!(scheduler.is_enabled());
        let summary = scheduler.run_once().await.unwrap();
        assert_eq!(summary.reset, 2);
    }

    #[tokio::test]
    #[serial]
    async fn test_run_once_propagates_store_errors() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_reset_monthly_usage()
            .returning(|_| Err(LedgerError::Unauthenticated));

        let scheduler = MonthlyResetScheduler::new(Arc::new(ledger), Duration::from_secs(60));
        assert!(scheduler.run_once().await.is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_disabled_scheduler_returns_immediately() {
        std::env::set_var("ENABLE_MONTHLY_RESET", "false");
        let mut ledger = MockLedger::new();
        ledger.expect_reset_monthly_usage().never();

        let scheduler = MonthlyResetScheduler::new(Arc::new(ledger), Duration::from_millis(1));
        assert!(!scheduler.is_enabled());
        tokio::time::timeout(Duration::from_secs(1), scheduler.run())
            .await
            .unwrap();
        std::env::remove_var("ENABLE_MONTHLY_RESET");
    }
}
