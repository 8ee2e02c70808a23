use crate::application::notifications::{Notification, Notifier};
use crate::application::state_store::StateStore;
use crate::domain::errors::{EnforcementError, GatewayError};
use crate::domain::ports::TradingGateway;
use crate::domain::repositories::{
    EnforcementLogRepository, EnforcementOutcome, EnforcementRecord,
};
use crate::domain::risk::rule::RemediationIntent;
use crate::domain::types::AccountId;
use crate::infrastructure::observability::Metrics;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Cross-account concurrency; per-account concurrency is always 1.
    pub workers: usize,
    /// Sleep after an HTTP 429 before retrying.
    pub rate_limit_backoff: Duration,
    /// First 5xx retry delay; doubles per attempt.
    pub base_backoff: Duration,
    /// Attempt cap across 429/5xx retries.
    pub max_attempts: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            rate_limit_backoff: Duration::from_secs(2),
            base_backoff: Duration::from_millis(500),
            max_attempts: 5,
        }
    }
}

/// In-flight dedup key: `(kind, target)` within an account.
type Fingerprint = (AccountId, &'static str, String);

/// Executes remediation intents against the REST gateway.
///
/// One lane per account preserves submission order and caps per-account
/// concurrency at 1; a global semaphore caps cross-account concurrency. A
/// fingerprint already in flight is refused rather than queued twice, and a
/// close-all in flight coalesces later closes.
pub struct EnforcementExecutor {
    gateway: Arc<dyn TradingGateway>,
    state: Arc<StateStore>,
    log: Arc<dyn EnforcementLogRepository>,
    notifier: Notifier,
    metrics: Arc<Metrics>,
    config: ExecutorConfig,
    global_slots: Arc<Semaphore>,
    pending: Arc<Mutex<HashSet<Fingerprint>>>,
    lanes: Mutex<HashMap<AccountId, mpsc::Sender<LaneJob>>>,
    generations: Mutex<HashMap<AccountId, u64>>,
}

struct LaneJob {
    intent: RemediationIntent,
    generation: u64,
    fingerprint: Fingerprint,
}

impl EnforcementExecutor {
    pub fn new(
        gateway: Arc<dyn TradingGateway>,
        state: Arc<StateStore>,
        log: Arc<dyn EnforcementLogRepository>,
        notifier: Notifier,
        metrics: Arc<Metrics>,
        config: ExecutorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            state,
            log,
            notifier,
            metrics,
            global_slots: Arc::new(Semaphore::new(config.workers)),
            config,
            pending: Arc::new(Mutex::new(HashSet::new())),
            lanes: Mutex::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
        })
    }

    /// Submits an intent; never blocks on the gateway. Duplicates of an
    /// in-flight fingerprint and closes of already-flat contracts are
    /// recorded as skipped.
    pub async fn submit(self: &Arc<Self>, intent: RemediationIntent) {
        let account_id = intent.account_id();
        let kind = intent.kind();
        let fingerprint: Fingerprint = (account_id, kind, intent.target());

        // Skip a close for a contract the state store already knows is flat.
        if let RemediationIntent::ClosePosition { contract_id, .. } = &intent
            && !self.state.holds_position(account_id, contract_id).await
        {
            debug!(account_id, contract_id = %contract_id, "close skipped, already flat");
            self.metrics
                .enforcement_total
                .with_label_values(&["skipped"])
                .inc();
            self.record(&intent, 0, EnforcementOutcome::Skipped, "already flat")
                .await;
            return;
        }

        {
            let mut pending = self.pending.lock().await;
            if pending.contains(&fingerprint) {
                debug!(
                    account_id,
                    kind, "intent already in flight, refusing duplicate"
                );
                return;
            }
            // Coalesce anything subsumed by an in-flight close-all.
            if kind == "close_position" || kind == "close_all" {
                let close_all: Fingerprint = (account_id, "close_all", "*".to_string());
                if pending.contains(&close_all) {
                    debug!(account_id, kind, "coalesced into in-flight close-all");
                    return;
                }
            }
            pending.insert(fingerprint.clone());
        }

        let generation = {
            let mut generations = self.generations.lock().await;
            let counter = generations.entry(account_id).or_insert(0);
            *counter += 1;
            *counter
        };

        let lane = self.lane(account_id).await;
        if lane
            .send(LaneJob {
                intent,
                generation,
                fingerprint: fingerprint.clone(),
            })
            .await
            .is_err()
        {
            warn!(account_id, "executor lane closed, dropping intent");
            self.pending.lock().await.remove(&fingerprint);
        }
    }

    /// Waits until nothing is in flight, up to `grace`. Used at shutdown.
    pub async fn drain(self: &Arc<Self>, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.pending.lock().await.is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                let left = self.pending.lock().await.len();
                warn!(left, "shutdown grace expired with remediations in flight");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn lane(self: &Arc<Self>, account_id: AccountId) -> mpsc::Sender<LaneJob> {
        let mut lanes = self.lanes.lock().await;
        if let Some(tx) = lanes.get(&account_id) {
            return tx.clone();
        }
        let (tx, mut rx) = mpsc::channel::<LaneJob>(64);
        let executor = self.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let Ok(permit) = executor.global_slots.clone().acquire_owned().await else {
                    break;
                };
                executor.run_job(job).await;
                drop(permit);
            }
        });
        lanes.insert(account_id, tx.clone());
        tx
    }

    async fn run_job(self: &Arc<Self>, job: LaneJob) {
        let outcome = self.execute_with_policy(&job.intent).await;
        self.pending.lock().await.remove(&job.fingerprint);

        let account_id = job.intent.account_id();
        let kind = job.intent.kind().to_string();
        let target = job.intent.target();
        match outcome {
            Ok(()) => {
                self.metrics
                    .enforcement_total
                    .with_label_values(&["success"])
                    .inc();
                self.record(&job.intent, job.generation, EnforcementOutcome::Success, "")
                    .await;
                self.notifier.publish(Notification::EnforcementSuccess {
                    account_id,
                    kind,
                    target,
                });
            }
            Err(e) => {
                self.metrics
                    .enforcement_total
                    .with_label_values(&["failed"])
                    .inc();
                self.record(
                    &job.intent,
                    job.generation,
                    EnforcementOutcome::Failed,
                    &e.to_string(),
                )
                .await;
                self.notifier.publish(Notification::EnforcementFailure {
                    account_id,
                    kind,
                    target,
                    detail: e.to_string(),
                });
            }
        }
    }

    /// The retry policy of the remediation path: 429 sleeps and retries, 401
    /// forces one token refresh, 5xx backs off exponentially up to the
    /// attempt cap, any other refusal surfaces immediately.
    async fn execute_with_policy(
        &self,
        intent: &RemediationIntent,
    ) -> Result<(), EnforcementError> {
        let account_id = intent.account_id();
        let refused = |detail: String| match intent {
            RemediationIntent::ModifyOrder { order_id, .. } => EnforcementError::NotModifiable {
                account_id,
                order_id: *order_id,
                detail,
            },
            _ => EnforcementError::Refused { account_id, detail },
        };

        let mut refreshed = false;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = self.call_gateway(intent).await;
            let err = match result {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if err.is_auth() && !refreshed {
                info!(kind = intent.kind(), "401 from gateway, refreshing session once");
                self.gateway
                    .refresh_session()
                    .await
                    .map_err(|e| refused(format!("session refresh failed: {}", e)))?;
                refreshed = true;
                continue;
            }
            if attempt >= self.config.max_attempts {
                return Err(EnforcementError::RetriesExhausted {
                    account_id,
                    attempts: attempt,
                    detail: err.to_string(),
                });
            }
            match err {
                GatewayError::RateLimited => {
                    debug!(kind = intent.kind(), "rate limited, backing off");
                    tokio::time::sleep(self.config.rate_limit_backoff).await;
                }
                ref e if e.is_transient() => {
                    let delay = self.config.base_backoff * 2u32.pow(attempt - 1);
                    debug!(kind = intent.kind(), attempt, ?delay, "transient gateway error, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return Err(refused(other.to_string())),
            }
        }
    }

    async fn call_gateway(&self, intent: &RemediationIntent) -> Result<(), GatewayError> {
        match intent {
            RemediationIntent::ClosePosition {
                account_id,
                contract_id,
            } => self.gateway.close_position(*account_id, contract_id).await,
            RemediationIntent::PartialClose {
                account_id,
                contract_id,
                size,
            } => {
                self.gateway
                    .partial_close(*account_id, contract_id, *size)
                    .await
            }
            RemediationIntent::CancelOrder {
                account_id,
                order_id,
            } => self.gateway.cancel_order(*account_id, *order_id).await,
            RemediationIntent::ModifyOrder {
                account_id,
                order_id,
                changes,
            } => {
                self.gateway
                    .modify_order(*account_id, *order_id, changes)
                    .await
            }
            // The gateway has no bulk endpoints; expand from its own view so
            // nothing local and stale narrows the sweep.
            RemediationIntent::CloseAll { account_id } => {
                let positions = self.gateway.search_open_positions(*account_id).await?;
                for position in positions {
                    self.gateway
                        .close_position(*account_id, &position.contract_id)
                        .await?;
                }
                Ok(())
            }
            RemediationIntent::CancelAll { account_id } => {
                let orders = self.gateway.search_open_orders(*account_id).await?;
                for order in orders {
                    self.gateway.cancel_order(*account_id, order.order_id).await?;
                }
                Ok(())
            }
        }
    }

    async fn record(
        &self,
        intent: &RemediationIntent,
        generation: u64,
        outcome: EnforcementOutcome,
        detail: &str,
    ) {
        let record = EnforcementRecord {
            id: Uuid::new_v4().to_string(),
            account_id: intent.account_id(),
            kind: intent.kind().to_string(),
            target: intent.target(),
            generation,
            outcome,
            detail: detail.to_string(),
            at: Utc::now(),
        };
        if let Err(e) = self.log.append(&record).await {
            // The audit row is not on the decision path; losing one is
            // logged, not fatal.
            warn!(error = %e, "failed to append enforcement record");
        }
    }
}
