//! Firestore-backed ledger store.
//!
//! Mutations read the user document, apply a pure rule from `amp_models`,
//! then commit the user update together with any inserted rows. The user
//! write carries an `updateTime` precondition, so a concurrent writer makes
//! the commit fail and the mutation is re-read and retried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use amp_models::{
    CreditPurchase, GenerationStat, GenerationType, ImageRecord, NewImage, NewVideo,
    PendingCharge, PendingStatus, PlanTier, SubscriptionHistory, UserRecord, VideoRecord,
};

use crate::client::FirestoreClient;
use crate::codec::{from_document, timestamp, to_fields};
use crate::error::FirestoreError;
use crate::ledger::{
    require_identity, ChargeReceipt, LedgerError, LedgerResult, LedgerStore, ResetSummary,
    UserIdentity,
};
use crate::metrics::{record_conflict, record_mutation};
use crate::types::{Document, Filter, StructuredQuery, Value, Write};

// =============================================================================
// Constants
// =============================================================================

/// Collection names.
pub mod collections {
    pub const USERS: &str = "users";
    pub const IMAGES: &str = "images";
    pub const VIDEOS: &str = "videos";
    pub const GENERATION_STATS: &str = "generation_stats";
    pub const SUBSCRIPTION_HISTORY: &str = "subscription_history";
    pub const CREDIT_PURCHASES: &str = "credit_purchases";
    pub const PENDING_CHARGES: &str = "pending_charges";
}

use collections::*;

/// Maximum attempts for a mutation that keeps losing the precondition race.
const MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Linear backoff step between attempts.
const RETRY_BASE_DELAY_MS: u64 = 50;

/// Users examined per monthly reset query.
const RESET_PAGE_SIZE: u32 = 300;

/// `last_active_at` is refreshed at most this often.
const ACTIVITY_REFRESH: chrono::Duration = chrono::Duration::hours(1);

/// Model label recorded for direct debits.
const DIRECT_DEBIT_MODEL: &str = "direct-debit";

/// Result of one read-check-commit cycle.
enum Mutation<T> {
    Applied { output: T, user: UserRecord },
    Unchanged { user: UserRecord },
}

// =============================================================================
// Repository
// =============================================================================

/// Ledger store on top of the Firestore REST API.
#[derive(Clone)]
pub struct FirestoreLedger {
    client: FirestoreClient,
}

impl FirestoreLedger {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &FirestoreClient {
        &self.client
    }

    /// Read a user document with its update time.
    async fn read_user(&self, uid: &str) -> LedgerResult<Option<(UserRecord, Option<String>)>> {
        let doc = self
            .client
            .with_retry("get_user", || self.client.get_document(USERS, uid))
            .await?;
        match doc {
            Some(doc) => {
                let user = from_document(&doc)?;
                Ok(Some((user, doc.update_time)))
            }
            None => Ok(None),
        }
    }

    async fn exists(&self, collection: &str, id: &str) -> LedgerResult<bool> {
        let doc = self
            .client
            .with_retry("exists", || self.client.get_document(collection, id))
            .await?;
        Ok(doc.is_some())
    }

    fn insert<T: Serialize>(&self, collection: &str, id: &str, record: &T) -> LedgerResult<Write> {
        let name = self.client.full_document_name(collection, id);
        Ok(Write::insert(Document::named(name, to_fields(record)?)))
    }

    fn user_write(&self, user: &UserRecord, update_time: Option<String>) -> LedgerResult<Write> {
        let fields = to_fields(user)?;
        let mut mask: Vec<String> = fields.keys().cloned().collect();
        mask.sort();
        let name = self.client.full_document_name(USERS, &user.uid);
        Ok(Write::update_if_unchanged(
            Document::named(name, fields),
            mask,
            update_time,
        ))
    }

    /// Read the user, apply `apply`, and commit the result atomically.
    ///
    /// `apply` returns `None` when nothing needs to change. When `guard`
    /// names a document that already exists, the mutation is skipped.
    async fn mutate_user<T, F>(
        &self,
        uid: &str,
        operation: &'static str,
        guard: Option<(&str, &str)>,
        mut apply: F,
    ) -> LedgerResult<Mutation<T>>
    where
        T: Send,
        F: FnMut(&mut UserRecord, DateTime<Utc>) -> LedgerResult<Option<(T, Vec<Write>)>> + Send,
    {
        require_identity(uid)?;

        for attempt in 0..MAX_COMMIT_ATTEMPTS {
            let (mut user, update_time) = self
                .read_user(uid)
                .await?
                .ok_or_else(|| LedgerError::UserNotFound(uid.to_string()))?;

            if let Some((collection, id)) = guard {
                if self.exists(collection, id).await? {
                    debug!(user_id = %uid, collection, id, "Record already committed, skipping");
                    return Ok(Mutation::Unchanged { user });
                }
            }

            let now = Utc::now();
            let (output, mut rows) = match apply(&mut user, now) {
                Ok(Some(planned)) => planned,
                Ok(None) => return Ok(Mutation::Unchanged { user }),
                Err(e) => {
                    record_mutation(operation, "rejected");
                    return Err(e);
                }
            };

            let mut writes = vec![self.user_write(&user, update_time)?];
            writes.append(&mut rows);

            match self.client.commit(writes).await {
                Ok(_) => {
                    record_mutation(operation, "applied");
                    return Ok(Mutation::Applied { output, user });
                }
                Err(e) if e.is_conflict() => {
                    record_conflict(operation);
                    debug!(
                        user_id = %uid,
                        operation,
                        attempt = attempt + 1,
                        "Ledger commit lost precondition race, retrying"
                    );
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS * (attempt as u64 + 1));
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    record_mutation(operation, "error");
                    return Err(e.into());
                }
            }
        }

        record_mutation(operation, "conflict");
        warn!(user_id = %uid, operation, "Ledger mutation exhausted retries");
        Err(LedgerError::Conflict {
            user_id: uid.to_string(),
            attempts: MAX_COMMIT_ATTEMPTS,
        })
    }

    /// Debit a generation and insert its record plus stat row.
    async fn charge_generation<F>(
        &self,
        uid: &str,
        kind: GenerationType,
        collection: &'static str,
        record_id: &str,
        mut rows: F,
    ) -> LedgerResult<ChargeReceipt>
    where
        F: FnMut(&UserRecord, DateTime<Utc>) -> LedgerResult<Vec<Write>> + Send,
    {
        let operation = match kind {
            GenerationType::Image => "create_image",
            GenerationType::Video => "create_video",
        };
        let mutation = self
            .mutate_user(uid, operation, Some((collection, record_id)), |user, now| {
                let remaining = user.debit(kind.cost(), kind, now)?;
                Ok(Some((remaining, rows(user, now)?)))
            })
            .await?;

        let remaining_credits = match mutation {
            Mutation::Applied { output, .. } => {
                info!(user_id = %uid, record_id, kind = %kind, remaining = output, "Charged generation");
                output
            }
            Mutation::Unchanged { user } => user.credits,
        };
        Ok(ChargeReceipt {
            record_id: Some(record_id.to_string()),
            remaining_credits,
        })
    }

    async fn query<T: DeserializeOwned>(&self, query: StructuredQuery) -> LedgerResult<Vec<T>> {
        let docs = self
            .client
            .with_retry("run_query", || self.client.run_query(query.clone()))
            .await?;
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            match from_document(&doc) {
                Ok(record) => out.push(record),
                Err(e) => warn!(doc = ?doc.name, error = %e, "Skipping undecodable document"),
            }
        }
        Ok(out)
    }

    fn owned_by(uid: &str) -> Filter {
        Filter::equal("user_id", Value::StringValue(uid.to_string()))
    }
}

fn user_of<T>(mutation: Mutation<T>) -> UserRecord {
    match mutation {
        Mutation::Applied { user, .. } | Mutation::Unchanged { user } => user,
    }
}

#[async_trait]
impl LedgerStore for FirestoreLedger {
    #[instrument(skip(self))]
    async fn get_user(&self, uid: &str) -> LedgerResult<UserRecord> {
        require_identity(uid)?;
        self.read_user(uid)
            .await?
            .map(|(user, _)| user)
            .ok_or_else(|| LedgerError::UserNotFound(uid.to_string()))
    }

    #[instrument(skip(self, identity), fields(uid = %identity.uid))]
    async fn upsert_user(&self, identity: &UserIdentity) -> LedgerResult<UserRecord> {
        require_identity(&identity.uid)?;
        let now = Utc::now();

        if let Some((mut user, _)) = self.read_user(&identity.uid).await? {
            let stale = user
                .last_active_at
                .map_or(true, |seen| now - seen >= ACTIVITY_REFRESH);
            if stale {
                user.last_active_at = Some(now);
                let mut fields = std::collections::HashMap::new();
                fields.insert("last_active_at".to_string(), timestamp(now));
                let mask = Some(vec!["last_active_at".to_string()]);
                if let Err(e) = self
                    .client
                    .update_document(USERS, &identity.uid, fields, mask)
                    .await
                {
                    warn!(error = %e, "Failed to refresh last_active_at");
                }
            }
            return Ok(user);
        }

        let user = UserRecord::new(
            identity.uid.clone(),
            identity.name.clone(),
            identity.email.clone(),
            now,
        );
        match self
            .client
            .create_document(USERS, &identity.uid, to_fields(&user)?)
            .await
        {
            Ok(_) => {
                info!("Created user record");
                Ok(user)
            }
            Err(FirestoreError::AlreadyExists(_)) => self.get_user(&identity.uid).await,
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, image), fields(record_id = %image.id))]
    async fn create_image(&self, uid: &str, image: NewImage) -> LedgerResult<ChargeReceipt> {
        let record_id = image.id.clone();
        self.charge_generation(uid, GenerationType::Image, IMAGES, &record_id, |user, now| {
            let record = image.clone().into_record(user);
            let stat = GenerationStat::new(
                &user.uid,
                GenerationType::Image,
                &record.model,
                &record.billing,
                image.processing_time_ms,
                now,
            );
            Ok(vec![
                self.insert(IMAGES, &record.id, &record)?,
                self.insert(GENERATION_STATS, &stat.id, &stat)?,
            ])
        })
        .await
    }

    #[instrument(skip(self, video), fields(record_id = %video.id))]
    async fn create_video(&self, uid: &str, video: NewVideo) -> LedgerResult<ChargeReceipt> {
        let record_id = video.id.clone();
        self.charge_generation(uid, GenerationType::Video, VIDEOS, &record_id, |user, now| {
            let record = video.clone().into_record(user);
            let stat = GenerationStat::new(
                &user.uid,
                GenerationType::Video,
                &record.model,
                &record.billing,
                Some(record.processing_time_ms),
                now,
            );
            Ok(vec![
                self.insert(VIDEOS, &record.id, &record)?,
                self.insert(GENERATION_STATS, &stat.id, &stat)?,
            ])
        })
        .await
    }

    #[instrument(skip(self))]
    async fn use_credits(
        &self,
        uid: &str,
        amount: u32,
        kind: GenerationType,
    ) -> LedgerResult<ChargeReceipt> {
        let mutation = self
            .mutate_user(uid, "use_credits", None, |user, now| {
                let remaining = user.debit(amount, kind, now)?;
                let snapshot = amp_models::BillingSnapshot {
                    credits_used: amount,
                    ..amp_models::BillingSnapshot::capture(user, kind)
                };
                let stat =
                    GenerationStat::new(&user.uid, kind, DIRECT_DEBIT_MODEL, &snapshot, None, now);
                Ok(Some((remaining, vec![self.insert(GENERATION_STATS, &stat.id, &stat)?])))
            })
            .await?;

        let remaining_credits = match mutation {
            Mutation::Applied { output, .. } => output,
            Mutation::Unchanged { user } => user.credits,
        };
        Ok(ChargeReceipt {
            record_id: None,
            remaining_credits,
        })
    }

    #[instrument(skip(self, paypal_transaction_id))]
    async fn add_credits(
        &self,
        uid: &str,
        amount: u32,
        paypal_transaction_id: Option<String>,
    ) -> LedgerResult<UserRecord> {
        let mutation = self
            .mutate_user(uid, "add_credits", None, |user, now| {
                user.add_purchased_credits(amount, now)?;
                let purchase = CreditPurchase::completed(
                    &user.uid,
                    amount,
                    paypal_transaction_id.clone(),
                    now,
                );
                Ok(Some(((), vec![self.insert(CREDIT_PURCHASES, &purchase.id, &purchase)?])))
            })
            .await?;
        info!(user_id = %uid, amount, "Added purchased credits");
        Ok(user_of(mutation))
    }

    #[instrument(skip(self, paypal_transaction_id))]
    async fn upgrade_subscription(
        &self,
        uid: &str,
        plan: PlanTier,
        paypal_transaction_id: Option<String>,
    ) -> LedgerResult<UserRecord> {
        let mutation = self
            .mutate_user(uid, "upgrade_subscription", None, |user, now| {
                let change = user.apply_upgrade(plan, now)?;
                let history = SubscriptionHistory::for_change(
                    &user.uid,
                    &change,
                    paypal_transaction_id.clone(),
                    now,
                );
                Ok(Some(((), vec![self.insert(SUBSCRIPTION_HISTORY, &history.id, &history)?])))
            })
            .await?;
        info!(user_id = %uid, plan = %plan, "Changed subscription plan");
        Ok(user_of(mutation))
    }

    #[instrument(skip(self))]
    async fn reset_monthly_usage(&self, now: DateTime<Utc>) -> LedgerResult<ResetSummary> {
        let cutoff = now - chrono::Duration::days(amp_models::user::BILLING_CYCLE_DAYS);
        let mut summary = ResetSummary::default();

        loop {
            let query = StructuredQuery::collection(USERS)
                .filter(Filter::field("last_billing_date", "LESS_THAN_OR_EQUAL", timestamp(cutoff)))
                .limit(RESET_PAGE_SIZE);
            let docs = self
                .client
                .with_retry("reset_query", || self.client.run_query(query.clone()))
                .await?;

            let page_len = docs.len() as u32;
            let mut progressed = 0u32;
            for doc in docs {
                let Some(uid) = doc.id().map(str::to_string) else {
                    continue;
                };
                summary.scanned += 1;
                let result = self
                    .mutate_user(&uid, "reset_monthly_usage", None, |user, now| {
                        if !user.is_due_for_monthly_reset(now) {
                            return Ok(None);
                        }
                        user.apply_monthly_reset(now);
                        Ok(Some(((), Vec::new())))
                    })
                    .await;
                match result {
                    Ok(Mutation::Applied { .. }) => {
                        summary.reset += 1;
                        progressed += 1;
                    }
                    Ok(Mutation::Unchanged { .. }) => {}
                    Err(e) => {
                        summary.failed += 1;
                        warn!(user_id = %uid, error = %e, "Monthly reset failed for user");
                    }
                }
            }

            if page_len < RESET_PAGE_SIZE || progressed == 0 {
                break;
            }
        }

        info!(
            scanned = summary.scanned,
            reset = summary.reset,
            failed = summary.failed,
            "Monthly usage reset sweep finished"
        );
        Ok(summary)
    }

    async fn user_images(&self, uid: &str, limit: u32) -> LedgerResult<Vec<ImageRecord>> {
        require_identity(uid)?;
        self.query(
            StructuredQuery::collection(IMAGES)
                .filter(Self::owned_by(uid))
                .order_desc("generated_at")
                .limit(limit),
        )
        .await
    }

    async fn user_videos(&self, uid: &str, limit: u32) -> LedgerResult<Vec<VideoRecord>> {
        require_identity(uid)?;
        self.query(
            StructuredQuery::collection(VIDEOS)
                .filter(Self::owned_by(uid))
                .order_desc("generated_at")
                .limit(limit),
        )
        .await
    }

    async fn videos_for_image(
        &self,
        uid: &str,
        image_id: &str,
        limit: u32,
    ) -> LedgerResult<Vec<VideoRecord>> {
        require_identity(uid)?;
        self.query(
            StructuredQuery::collection(VIDEOS)
                .filter(Filter::and(vec![
                    Self::owned_by(uid),
                    Filter::equal("original_image_id", Value::StringValue(image_id.to_string())),
                ]))
                .order_desc("generated_at")
                .limit(limit),
        )
        .await
    }

    async fn save_pending_charge(&self, charge: &PendingCharge) -> LedgerResult<()> {
        self.client
            .update_document(PENDING_CHARGES, &charge.id, to_fields(charge)?, None)
            .await?;
        Ok(())
    }

    async fn pending_charges(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> LedgerResult<Vec<PendingCharge>> {
        let due = Filter::and(vec![
            Filter::equal(
                "status",
                Value::StringValue(PendingStatus::Pending.as_str().to_string()),
            ),
            Filter::field("next_attempt_at", "LESS_THAN_OR_EQUAL", timestamp(now)),
        ]);
        self.query(
            StructuredQuery::collection(PENDING_CHARGES)
                .filter(due)
                .order_asc("next_attempt_at")
                .limit(limit),
        )
        .await
    }

    async fn resolve_pending_charge(&self, id: &str) -> LedgerResult<()> {
        self.client.delete_document(PENDING_CHARGES, id).await?;
        Ok(())
    }

    async fn check_connectivity(&self) -> LedgerResult<()> {
        // A missing sentinel document still proves the database answered.
        self.client.get_document("_health", "_check").await?;
        Ok(())
    }
}
