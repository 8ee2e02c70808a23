//! Wiring and lifecycle: build every component, start the background tasks,
//! run until a shutdown signal, then stop in order.

use crate::application::contract_cache::ContractCache;
use crate::application::dispatcher::{Dispatcher, DispatcherContext, run_clock_ticks};
use crate::application::executor::{EnforcementExecutor, ExecutorConfig};
use crate::application::lockout_manager::LockoutManager;
use crate::application::notifications::Notifier;
use crate::application::quote_cache::QuoteCache;
use crate::application::reconciliation::Reconciler;
use crate::application::reset_scheduler::ResetScheduler;
use crate::application::state_store::StateStore;
use crate::application::timer_service::TimerService;
use crate::config::Config;
use crate::domain::events::RiskEvent;
use crate::domain::session::SessionClock;
use crate::domain::types::AccountId;
use crate::infrastructure::gateway::{HubConfig, RestGateway, StreamConsumer, TokenManager};
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::persistence::{Database, SqlitePersistence};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Application {
    config: Config,
    pub notifier: Notifier,
    pub metrics: Metrics,
    executor: Arc<EnforcementExecutor>,
    dispatcher: Arc<Dispatcher>,
    stream: Arc<StreamConsumer>,
    timers: Arc<TimerService>,
    tokens: Arc<TokenManager>,
    scheduler: ResetScheduler,
    event_tx: mpsc::Sender<RiskEvent>,
    event_rx: Option<mpsc::Receiver<RiskEvent>>,
    accounts: Vec<AccountId>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let notifier = Notifier::new();
        let metrics = Metrics::new()?;
        let now = Utc::now();

        let database = Database::new(&config.database_url).await?;
        let persistence = Arc::new(SqlitePersistence::new(database));

        let clock = SessionClock::new(config.rules.timezone, config.rules.rollover);
        let accounts: Vec<AccountId> = config
            .enabled_accounts()
            .map(|a| a.account_id)
            .collect();
        anyhow::ensure!(!accounts.is_empty(), "no enabled accounts configured");

        // Gateway session uses the first enabled account's credentials; all
        // monitored accounts belong to the same gateway user.
        let primary = config
            .enabled_accounts()
            .next()
            .context("no enabled account for gateway credentials")?;
        let tokens = Arc::new(TokenManager::new(
            config.api_base_url.clone(),
            primary.username.clone(),
            primary.api_key.clone(),
        ));
        let gateway = Arc::new(RestGateway::new(config.api_base_url.clone(), tokens.clone()));

        let state = Arc::new(StateStore::new(
            persistence.clone(),
            persistence.clone(),
            persistence.clone(),
        ));
        let lockouts = Arc::new(LockoutManager::new(persistence.clone()));
        let quotes = Arc::new(QuoteCache::new());
        let contracts = Arc::new(ContractCache::new(gateway.clone()));

        // Resume from the durable replica before anything else runs.
        let session_dates: HashMap<AccountId, chrono::NaiveDate> = accounts
            .iter()
            .map(|&id| (id, clock.session_date(now)))
            .collect();
        state.restore(&session_dates, now).await?;
        let restored_cooldowns = lockouts.restore(now).await?;
        info!(
            accounts = accounts.len(),
            cooldowns = restored_cooldowns.len(),
            "state restored from persistence"
        );

        let (event_tx, event_rx) = mpsc::channel::<RiskEvent>(4096);
        let timers = Arc::new(TimerService::new(event_tx.clone()));
        for cooldown in restored_cooldowns {
            let remaining = (cooldown.expires_at - now).to_std().unwrap_or_default();
            timers
                .start(
                    format!("cooldown:{}", cooldown.account_id),
                    remaining,
                    RiskEvent::LockoutExpired {
                        account_id: cooldown.account_id,
                    },
                )
                .await;
        }

        let shared_metrics = Arc::new(metrics.clone());
        let executor = EnforcementExecutor::new(
            gateway.clone(),
            state.clone(),
            persistence.clone(),
            notifier.clone(),
            shared_metrics.clone(),
            ExecutorConfig {
                workers: config.executor_workers,
                ..ExecutorConfig::default()
            },
        );
        let reconciler = Arc::new(Reconciler::new(
            gateway.clone(),
            state.clone(),
            lockouts.clone(),
            contracts.clone(),
            executor.clone(),
            clock,
        ));

        let dispatcher = Dispatcher::new(DispatcherContext {
            state: state.clone(),
            lockouts: lockouts.clone(),
            quotes,
            contracts,
            executor: executor.clone(),
            timers: timers.clone(),
            notifier: notifier.clone(),
            metrics: shared_metrics.clone(),
            clock,
            holidays: config.holidays.clone(),
            quote_max_age: config.rules.quote_max_age,
        });
        for account in config.enabled_accounts() {
            let rules = config.rules.build_rules(account.account_id)?;
            info!(
                account_id = account.account_id,
                nickname = account.nickname.as_deref().unwrap_or(""),
                rules = rules.len(),
                "account configured"
            );
            dispatcher.register_account(account.account_id, rules).await;
        }

        let stream = StreamConsumer::new(
            HubConfig {
                base_url: config.hub_base_url.clone(),
                heartbeat: Duration::from_secs(config.heartbeat_secs),
                accounts: accounts.clone(),
            },
            tokens.clone(),
            event_tx.clone(),
            notifier.clone(),
            reconciler,
            state,
            shared_metrics,
        );

        let scheduler = ResetScheduler::new(
            clock,
            config.holidays.clone(),
            accounts.clone(),
            event_tx.clone(),
        );

        Ok(Self {
            config,
            notifier,
            metrics,
            executor,
            dispatcher,
            stream,
            timers,
            tokens,
            scheduler,
            event_tx,
            event_rx: Some(event_rx),
            accounts,
        })
    }

    /// Starts every background task and blocks until `ctrl_c`, then runs the
    /// ordered shutdown sequence.
    pub async fn run(mut self) -> Result<()> {
        let event_rx = self
            .event_rx
            .take()
            .context("application already started")?;

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let dispatcher = self.dispatcher.clone();
        handles.push(tokio::spawn(dispatcher.run(event_rx)));

        let timers = self.timers.clone();
        handles.push(tokio::spawn(async move { timers.run().await }));

        handles.push(tokio::spawn({
            let scheduler = self.scheduler;
            async move { scheduler.run().await }
        }));

        handles.push(tokio::spawn(run_clock_ticks(
            self.accounts.clone(),
            self.event_tx.clone(),
        )));

        handles.push(tokio::spawn(self.tokens.clone().run_refresh_loop()));

        handles.extend(self.stream.start());

        let reporter = MetricsReporter::new(self.metrics.clone(), 60);
        handles.push(tokio::spawn(reporter.run()));

        info!("risk enforcement running; Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");

        // 1. Stop the producers so the queues stop filling.
        for handle in &handles {
            handle.abort();
        }
        // 2. Give in-flight remediations their grace window.
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        self.executor.drain(grace).await;
        // Persisted lockouts survive by construction; nothing to flush.
        info!("shutdown complete");
        Ok(())
    }

    /// Accounts the daemon monitors; used by the startup summary.
    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }
}

/// Logs the startup summary the operator sees before the stream connects.
pub fn log_startup_summary(config: &Config) {
    for account in config.enabled_accounts() {
        let rule_ids: Vec<&'static str> = config
            .rules
            .specs_for(account.account_id)
            .iter()
            .map(|spec| spec.id())
            .collect();
        info!(
            account_id = account.account_id,
            nickname = account.nickname.as_deref().unwrap_or("-"),
            rules = ?rule_ids,
            "monitoring account"
        );
    }
    if config.accounts.iter().any(|a| !a.enabled) {
        warn!(
            disabled = config.accounts.iter().filter(|a| !a.enabled).count(),
            "some configured accounts are disabled"
        );
    }
}
