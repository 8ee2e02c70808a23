use crate::application::contract_cache::ContractCache;
use crate::application::executor::EnforcementExecutor;
use crate::application::lockout_manager::LockoutManager;
use crate::application::notifications::{Notification, Notifier};
use crate::application::quote_cache::QuoteCache;
use crate::application::state_store::StateStore;
use crate::application::timer_service::TimerService;
use crate::domain::events::RiskEvent;
use crate::domain::risk::rule::{
    Breach, LockoutIntent, RemediationIntent, RiskRule, RuleContext,
};
use crate::domain::session::{HolidayCalendar, SessionClock};
use crate::domain::types::{AccountId, ContractId, Position, symbol_of_contract};
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

/// Retries for a failed decision-path persistence write before the process
/// prefers crashing over silent under-enforcement.
const PERSIST_RETRIES: u32 = 3;

/// Shared services every account worker uses.
pub struct DispatcherContext {
    pub state: Arc<StateStore>,
    pub lockouts: Arc<LockoutManager>,
    pub quotes: Arc<QuoteCache>,
    pub contracts: Arc<ContractCache>,
    pub executor: Arc<EnforcementExecutor>,
    pub timers: Arc<TimerService>,
    pub notifier: Notifier,
    pub metrics: Arc<Metrics>,
    pub clock: SessionClock,
    pub holidays: HolidayCalendar,
    pub quote_max_age: chrono::Duration,
}

/// Routes events to per-account workers: one queue per account, drained by a
/// dedicated task, so a given account's events process in arrival order
/// while distinct accounts progress in parallel.
pub struct Dispatcher {
    context: Arc<DispatcherContext>,
    accounts: RwLock<HashMap<AccountId, mpsc::Sender<RiskEvent>>>,
}

impl Dispatcher {
    pub fn new(context: DispatcherContext) -> Arc<Self> {
        Arc::new(Self {
            context: Arc::new(context),
            accounts: RwLock::new(HashMap::new()),
        })
    }

    /// Spawns the worker for one account with its configured rule list.
    pub async fn register_account(self: &Arc<Self>, account_id: AccountId, rules: Vec<Box<dyn RiskRule>>) {
        let (tx, mut rx) = mpsc::channel::<RiskEvent>(1024);
        let worker = AccountWorker {
            account_id,
            rules,
            context: self.context.clone(),
            submitted_closes: std::sync::Mutex::new(HashMap::new()),
        };
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                worker.process_with_retries(event).await;
            }
            debug!(account_id, "account worker stopped");
        });
        self.accounts.write().await.insert(account_id, tx);
        info!(account_id, "account registered with dispatcher");
    }

    /// The ingress loop: consumes the shared event channel until it closes.
    /// Quote events refresh the cache and fan out to accounts holding the
    /// contract; everything else routes by its account id.
    pub async fn run(self: Arc<Self>, mut ingress: mpsc::Receiver<RiskEvent>) {
        while let Some(event) = ingress.recv().await {
            match &event {
                RiskEvent::Quote(quote) => {
                    self.context.quotes.update(quote.clone()).await;
                    let accounts = self.accounts.read().await;
                    for (&account_id, tx) in accounts.iter() {
                        if self
                            .context
                            .state
                            .holds_position(account_id, &quote.contract_id)
                            .await
                        {
                            let _ = tx.send(event.clone()).await;
                        }
                    }
                }
                other => {
                    let Some(account_id) = other.account_id() else {
                        continue;
                    };
                    let accounts = self.accounts.read().await;
                    match accounts.get(&account_id) {
                        Some(tx) => {
                            let _ = tx.send(event.clone()).await;
                        }
                        None => {
                            debug!(account_id, kind = %event.kind(), "event for unmonitored account dropped");
                        }
                    }
                }
            }
        }
        info!("ingress channel closed, dispatcher stopping");
    }
}

struct AccountWorker {
    account_id: AccountId,
    rules: Vec<Box<dyn RiskRule>>,
    context: Arc<DispatcherContext>,
    /// Open-instance generations a close has already been submitted for,
    /// with submission time. Re-delivered position events map to the same
    /// generation, so a lockout-gated position produces exactly one close
    /// however many times the gateway repeats it. Entries age out so a
    /// failed enforcement can be re-triggered by later events.
    submitted_closes: std::sync::Mutex<HashMap<ContractId, (u64, DateTime<Utc>)>>,
}

/// How long a submitted close suppresses re-submission for the same open
/// instance.
const CLOSE_MEMO_TTL_SECS: i64 = 30;

impl AccountWorker {
    /// Decision-path persistence failures are retried a bounded number of
    /// times; if the write still fails the process exits non-zero.
    async fn process_with_retries(&self, event: RiskEvent) {
        for attempt in 0..=PERSIST_RETRIES {
            match self.process(event.clone()).await {
                Ok(()) => return,
                Err(e) if attempt < PERSIST_RETRIES => {
                    warn!(
                        account_id = self.account_id,
                        attempt,
                        error = %e,
                        "decision-path write failed, retrying"
                    );
                    self.context.notifier.publish(Notification::Degraded {
                        detail: format!("account {}: {}", self.account_id, e),
                    });
                    tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
                }
                Err(e) => {
                    error!(
                        account_id = self.account_id,
                        error = %e,
                        "CRITICAL: persistence failed after retries, refusing to under-enforce"
                    );
                    self.context.notifier.publish(Notification::Offline {
                        detail: format!("persistence failure on account {}", self.account_id),
                    });
                    std::process::exit(1);
                }
            }
        }
    }

    async fn process(&self, event: RiskEvent) -> Result<()> {
        let now = Utc::now();

        match &event {
            RiskEvent::ResetRollover { rollover, .. } => {
                return self.handle_rollover(*rollover).await;
            }
            RiskEvent::LockoutExpired { .. } => {
                // The query reaps the expired record.
                let still = self.context.lockouts.is_locked(self.account_id, now).await?;
                if !still {
                    self.context.notifier.publish(Notification::LockoutCleared {
                        account_id: self.account_id,
                        symbol: None,
                    });
                }
                return Ok(());
            }
            _ => {}
        }

        // Step 1: lockout pre-gate.
        let locked = self.context.lockouts.is_locked(self.account_id, now).await?;
        if let RiskEvent::Position(position) = &event
            && position.size > 0
        {
            let symbol = symbol_of_contract(&position.contract_id);
            let symbol_locked = self
                .context
                .lockouts
                .is_symbol_locked(self.account_id, symbol, now)
                .await?;
            if locked || symbol_locked {
                self.apply_state(&event, now).await?;
                if self.mark_close_submitted(&position.contract_id).await {
                    info!(
                        account_id = self.account_id,
                        contract_id = %position.contract_id,
                        "position while locked out, closing"
                    );
                    self.context
                        .executor
                        .submit(RemediationIntent::ClosePosition {
                            account_id: self.account_id,
                            contract_id: position.contract_id.clone(),
                        })
                        .await;
                }
                return Ok(());
            }
        }
        if locked && !matches!(event, RiskEvent::AccountFlags(_)) {
            // State stays current while locked; rules stay silent. Account
            // flags still reach the rules so the auth guard can lift its own
            // lockout on can_trade=true.
            self.apply_state(&event, now).await?;
            return Ok(());
        }

        // Step 2: state update.
        self.apply_state(&event, now).await?;

        // A grace event for an open instance that has since closed and
        // reopened is stale.
        if let RiskEvent::GraceExpired {
            contract_id,
            open_generation,
            ..
        } = &event
        {
            let current = self
                .context
                .state
                .open_generation(self.account_id, contract_id)
                .await;
            if current != Some(*open_generation) {
                debug!(
                    account_id = self.account_id,
                    contract_id = %contract_id,
                    "stale grace timer ignored"
                );
                return Ok(());
            }
        }

        // Step 3: rule evaluation over a state snapshot.
        let breaches = self.evaluate_rules(&event, now).await;

        // Step 4: lockouts first (the decision must be durable before the
        // enforcement calls race ahead), then remediation submission. The
        // first breach with immediate remediations wins; lockout intents
        // from every breaching rule coexist.
        let mut remediations: Option<Vec<RemediationIntent>> = None;
        for breach in &breaches {
            if remediations.is_none() && breach.is_immediate() {
                info!(
                    account_id = self.account_id,
                    rule = breach.rule,
                    reason = %breach.reason,
                    "breach"
                );
                remediations = Some(breach.remediations.clone());
            }
            if let Some(intent) = &breach.lockout {
                self.apply_lockout_intent(intent, now).await?;
            }
        }
        if let Some(intents) = remediations {
            for intent in intents {
                if let RemediationIntent::ClosePosition { contract_id, .. } = &intent
                    && !self.mark_close_submitted(contract_id).await
                {
                    continue;
                }
                self.context.executor.submit(intent).await;
            }
        }

        Ok(())
    }

    /// Records that a close was submitted for the contract's current open
    /// instance. Returns false when one was already submitted for it.
    async fn mark_close_submitted(&self, contract_id: &ContractId) -> bool {
        let generation = self
            .context
            .state
            .open_generation(self.account_id, contract_id)
            .await
            .unwrap_or(0);
        let now = Utc::now();
        let mut submitted = match self.submitted_closes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(&(known_generation, at)) = submitted.get(contract_id)
            && known_generation == generation
            && (now - at) < chrono::Duration::seconds(CLOSE_MEMO_TTL_SECS)
        {
            debug!(
                account_id = self.account_id,
                contract_id = %contract_id,
                "close already submitted for this open instance"
            );
            return false;
        }
        submitted.insert(contract_id.clone(), (generation, now));
        true
    }

    async fn apply_state(&self, event: &RiskEvent, now: DateTime<Utc>) -> Result<()> {
        let session_date = self.context.clock.session_date(now);
        match event {
            RiskEvent::Trade(trade) => {
                self.context.state.apply_trade(trade, session_date).await?;
            }
            RiskEvent::Position(position) => {
                self.context
                    .contracts
                    .warm(&position.contract_id, session_date)
                    .await;
                let transition = self.context.state.apply_position(position).await?;
                self.manage_grace_timer(position, transition.opened, transition.closed, transition.open_generation)
                    .await;
            }
            RiskEvent::Order(order) => {
                self.context.state.apply_order(order).await?;
            }
            RiskEvent::AccountFlags(flags) => {
                self.context.state.apply_flags(flags).await;
            }
            // Quotes were cached at ingress; ticks carry no state.
            RiskEvent::Quote(_)
            | RiskEvent::GraceExpired { .. }
            | RiskEvent::SessionBoundary { .. }
            | RiskEvent::UnrealizedTick { .. }
            | RiskEvent::ResetRollover { .. }
            | RiskEvent::LockoutExpired { .. } => {}
        }
        Ok(())
    }

    async fn manage_grace_timer(
        &self,
        position: &Position,
        opened: bool,
        closed: bool,
        open_generation: u64,
    ) {
        let Some(grace) = self.rules.iter().find_map(|r| r.grace_period()) else {
            return;
        };
        let timer = format!("grace:{}:{}", self.account_id, position.contract_id);
        if opened {
            self.context
                .timers
                .start(
                    timer,
                    grace,
                    RiskEvent::GraceExpired {
                        account_id: self.account_id,
                        contract_id: position.contract_id.clone(),
                        open_generation,
                    },
                )
                .await;
        } else if closed {
            self.context.timers.cancel(&timer).await;
        }
    }

    async fn evaluate_rules(&self, event: &RiskEvent, now: DateTime<Utc>) -> Vec<Breach> {
        let snapshot = self.context.state.snapshot(self.account_id, now).await;
        let quotes = self.context.quotes.snapshot().await;
        let specs = self.context.contracts.snapshot().await;
        let kind = event.kind();

        let ctx = RuleContext {
            account_id: self.account_id,
            now,
            session_date: self.context.clock.session_date(now),
            positions: &snapshot.positions,
            orders: &snapshot.open_orders,
            realized_pnl: snapshot.realized,
            trades_last_minute: snapshot.trades_last_minute,
            trades_last_hour: snapshot.trades_last_hour,
            trades_this_session: snapshot.trades_this_session,
            quotes: &quotes,
            specs: &specs,
            clock: self.context.clock,
            holidays: &self.context.holidays,
            quote_max_age: self.context.quote_max_age,
        };

        self.rules
            .iter()
            .filter(|rule| rule.inputs().contains(&kind))
            .filter_map(|rule| rule.evaluate(event, &ctx))
            .collect()
    }

    async fn apply_lockout_intent(
        &self,
        intent: &LockoutIntent,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match intent {
            LockoutIntent::Hard { reason, until } => {
                self.context
                    .metrics
                    .lockouts_total
                    .with_label_values(&["hard"])
                    .inc();
                let lockout = self
                    .context
                    .lockouts
                    .set_hard(self.account_id, reason.clone(), *until)
                    .await?;
                self.context.notifier.publish(Notification::LockoutSet {
                    account_id: self.account_id,
                    reason: lockout.reason,
                    until: lockout.expires_at,
                });
            }
            LockoutIntent::Cooldown { reason, duration } => {
                self.context
                    .metrics
                    .lockouts_total
                    .with_label_values(&["cooldown"])
                    .inc();
                let lockout = self
                    .context
                    .lockouts
                    .set_cooldown(self.account_id, reason.clone(), *duration, now)
                    .await?;
                self.context
                    .timers
                    .start(
                        format!("cooldown:{}", self.account_id),
                        duration.to_std().unwrap_or_default(),
                        RiskEvent::LockoutExpired {
                            account_id: self.account_id,
                        },
                    )
                    .await;
                self.context.notifier.publish(Notification::LockoutSet {
                    account_id: self.account_id,
                    reason: lockout.reason,
                    until: lockout.expires_at,
                });
            }
            LockoutIntent::Symbol {
                symbol,
                reason,
                until,
            } => {
                // An existing lockout for the symbol stands untouched, so
                // re-delivered events leave the lockout set unchanged.
                if self
                    .context
                    .lockouts
                    .is_symbol_locked(self.account_id, symbol, now)
                    .await?
                {
                    return Ok(());
                }
                self.context
                    .metrics
                    .lockouts_total
                    .with_label_values(&["symbol"])
                    .inc();
                let lockout = self
                    .context
                    .lockouts
                    .set_symbol(self.account_id, symbol.clone(), reason.clone(), *until)
                    .await?;
                self.context.notifier.publish(Notification::LockoutSet {
                    account_id: self.account_id,
                    reason: lockout.reason,
                    until: lockout.expires_at,
                });
            }
            LockoutIntent::ClearAttributed { rule } => {
                self.context
                    .lockouts
                    .clear_attributed(self.account_id, rule)
                    .await?;
                self.context.notifier.publish(Notification::LockoutCleared {
                    account_id: self.account_id,
                    symbol: None,
                });
            }
        }
        Ok(())
    }

    async fn handle_rollover(&self, rollover: DateTime<Utc>) -> Result<()> {
        // The instant of the rollover already belongs to the new session.
        let new_date = self.context.clock.session_date(rollover);
        info!(
            account_id = self.account_id,
            session_date = %new_date,
            "session rollover"
        );
        self.context
            .state
            .reset_session(self.account_id, new_date)
            .await?;
        if self
            .context
            .lockouts
            .clear_hard_up_to(self.account_id, rollover)
            .await?
        {
            self.context.notifier.publish(Notification::LockoutCleared {
                account_id: self.account_id,
                symbol: None,
            });
        }
        Ok(())
    }
}

/// Emits the minute-resolution session ticks and the 1 Hz unrealized ticks
/// for every monitored account. Runs until the ingress channel closes.
pub async fn run_clock_ticks(
    accounts: Vec<AccountId>,
    event_tx: mpsc::Sender<RiskEvent>,
) {
    let mut second = tokio::time::interval(Duration::from_secs(1));
    second.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_minute: Option<i64> = None;

    loop {
        second.tick().await;
        let now = Utc::now();
        for &account_id in &accounts {
            if event_tx
                .send(RiskEvent::UnrealizedTick { account_id })
                .await
                .is_err()
            {
                return;
            }
        }
        let minute = now.timestamp() / 60;
        if last_minute != Some(minute) {
            last_minute = Some(minute);
            for &account_id in &accounts {
                if event_tx
                    .send(RiskEvent::SessionBoundary { account_id, at: now })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}
