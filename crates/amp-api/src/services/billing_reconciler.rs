//! Background service that replays generations the ledger could not charge.
//!
//! A pending charge holds the full image or video record. Replaying it runs
//! the same ledger operation as the pipeline. The ledger skips records that
//! already exist, so a charge that landed before its response was lost is
//! settled without a second debit.
//!
//! A failed replay is pushed back before it is due again, so charges that keep
//! failing never hold the batch window. After `MAX_REPLAY_ATTEMPTS` the charge
//! is parked and left for manual review.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use amp_firestore::LedgerStore;
use amp_models::PendingStatus;

use super::pipeline::apply_charge;
use crate::metrics;

/// Pending charges replayed per run.
const BATCH_SIZE: u32 = 50;

/// Counts from one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub settled: u32,
    pub failed: u32,
    /// Failures that used up their last attempt.
    pub parked: u32,
}

/// Billing reconciler service.
pub struct BillingReconciler {
    ledger: Arc<dyn LedgerStore>,
    interval: Duration,
    enabled: bool,
}

impl BillingReconciler {
    /// Create a reconciler. `ENABLE_BILLING_RECONCILER=false` disables it.
    pub fn new(ledger: Arc<dyn LedgerStore>, interval: Duration) -> Self {
        let enabled = std::env::var("ENABLE_BILLING_RECONCILER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        Self {
            ledger,
            interval,
            enabled,
        }
    }

    /// Start the background loop.
    ///
    /// This function runs indefinitely and should be spawned as a background task.
    pub async fn run(&self) {
        if !self.enabled {
            info!("Billing reconciler is disabled");
            return;
        }

        info!("Starting billing reconciler (interval: {:?})", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = self.run_once().await {
                error!("Billing reconciliation error: {:#}", e);
            }
        }
    }

    /// Replay one batch of pending charges.
    pub async fn run_once(&self) -> anyhow::Result<ReconcileSummary> {
        let pending = self.ledger.pending_charges(Utc::now(), BATCH_SIZE).await?;
        let mut summary = ReconcileSummary::default();

        for mut charge in pending {
            match apply_charge(self.ledger.as_ref(), &charge.user_id, charge.request.clone()).await
            {
                Ok(receipt) => {
                    summary.settled += 1;
                    metrics::record_reconciled_charge("settled");
                    info!(
                        charge_id = %charge.id,
                        user_id = %charge.user_id,
                        remaining_credits = receipt.remaining_credits,
                        "Pending charge settled"
                    );
                    if let Err(e) = self.ledger.resolve_pending_charge(&charge.id).await {
                        error!(charge_id = %charge.id, "Failed to remove settled charge: {}", e);
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    charge.record_failure(e.to_string(), Utc::now());
                    if charge.status == PendingStatus::Parked {
                        summary.parked += 1;
                        metrics::record_reconciled_charge("parked");
                        error!(
                            charge_id = %charge.id,
                            user_id = %charge.user_id,
                            attempts = charge.attempts,
                            "Pending charge parked: {}", e
                        );
                    } else {
                        metrics::record_reconciled_charge("failed");
                        warn!(
                            charge_id = %charge.id,
                            user_id = %charge.user_id,
                            attempts = charge.attempts,
                            next_attempt_at = %charge.next_attempt_at,
                            "Pending charge still failing: {}", e
                        );
                    }
                    if let Err(e) = self.ledger.save_pending_charge(&charge).await {
                        error!(charge_id = %charge.id, "Failed to update pending charge: {}", e);
                    }
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::MockLedger;
    use amp_firestore::{ChargeReceipt, LedgerError};
    use amp_models::{
        ChargeRequest, LedgerRuleError, NewImage, PendingCharge, MAX_REPLAY_ATTEMPTS,
    };
    use std::sync::Mutex;

    fn pending_image(id: &str, user: &str) -> PendingCharge {
        let image = NewImage {
            id: id.to_string(),
            image_id: "file-1".into(),
            image_url: "https://cdn.test/a.png".into(),
            file_name: "generated_a_1.png".into(),
            file_size: 10,
            product_name: "Cola".into(),
            style: "Vibrant".into(),
            description: String::new(),
            video_prompt: "p".into(),
            generation_error: None,
            model: "deepai/text2img".into(),
            processing_time_ms: None,
            generated_at: Utc::now(),
        };
        PendingCharge::new(user, ChargeRequest::Image(image), "store down", Utc::now())
    }

    #[tokio::test]
    async fn test_settled_charge_is_removed() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_pending_charges()
            .returning(|_, _| Ok(vec![pending_image("img-1", "u1")]));
        ledger
            .expect_create_image()
            .times(1)
            .withf(|uid, image| uid == "u1" && image.id == "img-1")
            .returning(|_, image| {
                Ok(ChargeReceipt {
                    record_id: Some(image.id),
                    remaining_credits: 4,
                })
            });
        ledger
            .expect_resolve_pending_charge()
            .times(1)
            .withf(|id| id == "img-1")
            .returning(|_| Ok(()));
        ledger.expect_save_pending_charge().never();

        let reconciler = BillingReconciler::new(Arc::new(ledger), Duration::from_secs(60));
        let summary = reconciler.run_once().await.unwrap();
        assert_eq!(
            summary,
            ReconcileSummary {
                settled: 1,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_failing_charge_is_kept_with_attempts() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_pending_charges()
            .returning(|_, _| Ok(vec![pending_image("img-2", "u2")]));
        ledger.expect_create_image().returning(|_, _| {
            Err(LedgerError::Rule(LedgerRuleError::InsufficientCredits {
                required: 1,
                available: 0,
            }))
        });
        ledger.expect_resolve_pending_charge().never();
        ledger
            .expect_save_pending_charge()
            .times(1)
            .withf(|charge| {
                charge.attempts == 2
                    && charge.next_attempt_at > Utc::now()
                    && charge
                        .last_error
                        .as_deref()
                        .is_some_and(|e| e.contains("Insufficient credits"))
            })
            .returning(|_| Ok(()));

        let reconciler = BillingReconciler::new(Arc::new(ledger), Duration::from_secs(60));
        let summary = reconciler.run_once().await.unwrap();
        assert_eq!(
            summary,
            ReconcileSummary {
                failed: 1,
                ..Default::default()
            }
        );
    }

    /// Queue shared by the mock's closures. Answers like the Firestore query:
    /// due and unparked charges, earliest `next_attempt_at` first.
    type Queue = Arc<Mutex<Vec<PendingCharge>>>;

    fn queue_ledger(queue: &Queue, failing_user: &'static str) -> MockLedger {
        let mut ledger = MockLedger::new();

        let q = queue.clone();
        ledger.expect_pending_charges().returning(move |now, limit| {
            let mut due: Vec<PendingCharge> = q
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.is_due(now))
                .cloned()
                .collect();
            due.sort_by_key(|c| c.next_attempt_at);
            due.truncate(limit as usize);
            Ok(due)
        });

        ledger.expect_create_image().returning(move |uid, image| {
            if uid == failing_user {
                return Err(LedgerError::UserNotFound(uid.to_string()));
            }
            Ok(ChargeReceipt {
                record_id: Some(image.id),
                remaining_credits: 9,
            })
        });

        let q = queue.clone();
        ledger.expect_save_pending_charge().returning(move |charge| {
            let mut queue = q.lock().unwrap();
            queue.retain(|c| c.id != charge.id);
            queue.push(charge.clone());
            Ok(())
        });

        let q = queue.clone();
        ledger.expect_resolve_pending_charge().returning(move |id| {
            q.lock().unwrap().retain(|c| c.id != id);
            Ok(())
        });

        ledger
    }

    #[tokio::test]
    async fn test_failing_charges_do_not_starve_newer_ones() {
        let created = Utc::now() - chrono::Duration::hours(1);
        let mut charges: Vec<PendingCharge> = (0..BATCH_SIZE)
            .map(|i| {
                let mut charge = pending_image(&format!("dead-{i}"), "ghost");
                charge.next_attempt_at = created;
                charge
            })
            .collect();
        let mut newest = pending_image("live-1", "u1");
        newest.next_attempt_at = created + chrono::Duration::minutes(1);
        charges.push(newest);

        let queue: Queue = Arc::new(Mutex::new(charges));
        let ledger = queue_ledger(&queue, "ghost");
        let reconciler = BillingReconciler::new(Arc::new(ledger), Duration::from_secs(60));

        let first = reconciler.run_once().await.unwrap();
        assert_eq!(first.failed, BATCH_SIZE);
        assert_eq!(first.settled, 0);

        let second = reconciler.run_once().await.unwrap();
        assert_eq!(second.settled, 1);
        assert_eq!(second.failed, 0);

        let queue = queue.lock().unwrap();
        assert_eq!(queue.len(), BATCH_SIZE as usize);
        assert!(queue.iter().all(|c| c.user_id == "ghost" && c.attempts == 2));
    }

    #[tokio::test]
    async fn test_charge_on_last_attempt_is_parked() {
        let mut charge = pending_image("img-9", "ghost");
        charge.attempts = MAX_REPLAY_ATTEMPTS - 1;
        let queue: Queue = Arc::new(Mutex::new(vec![charge]));
        let ledger = queue_ledger(&queue, "ghost");
        let reconciler = BillingReconciler::new(Arc::new(ledger), Duration::from_secs(60));

        let summary = reconciler.run_once().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.parked, 1);
        assert_eq!(queue.lock().unwrap()[0].status, PendingStatus::Parked);

        let again = reconciler.run_once().await.unwrap();
        assert_eq!(again, ReconcileSummary::default());
    }

    #[tokio::test]
    async fn test_queue_read_failure_is_an_error() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_pending_charges()
            .returning(|_, _| Err(LedgerError::Unauthenticated));
        let reconciler = BillingReconciler::new(Arc::new(ledger), Duration::from_secs(60));
        assert!(reconciler.run_once().await.is_err());
    }
}
