//! Shared harness: the full dispatch pipeline over a scriptable gateway and
//! a real sqlite file, minus the network hubs. Tests feed events straight
//! into the ingress channel the hubs would fill.

use riskguard::application::contract_cache::ContractCache;
use riskguard::application::dispatcher::{Dispatcher, DispatcherContext};
use riskguard::application::executor::{EnforcementExecutor, ExecutorConfig};
use riskguard::application::lockout_manager::LockoutManager;
use riskguard::application::notifications::Notifier;
use riskguard::application::quote_cache::QuoteCache;
use riskguard::application::reconciliation::Reconciler;
use riskguard::application::state_store::StateStore;
use riskguard::application::timer_service::TimerService;
use riskguard::config::RulesConfig;
use riskguard::domain::events::RiskEvent;
use riskguard::domain::session::SessionClock;
use riskguard::domain::types::{
    AccountId, Order, OrderSide, OrderStatus, OrderType, Position, PositionSide, Quote, Trade,
};
use riskguard::infrastructure::mock::MockGateway;
use riskguard::infrastructure::observability::Metrics;
use riskguard::infrastructure::persistence::{Database, SqlitePersistence};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const ACCOUNT: AccountId = 101;
pub const MNQ: &str = "CON.F.US.MNQ.U25";
pub const ES: &str = "CON.F.US.ES.U25";
pub const RTY: &str = "CON.F.US.RTY.U25";

pub struct Harness {
    pub gateway: Arc<MockGateway>,
    pub state: Arc<StateStore>,
    pub lockouts: Arc<LockoutManager>,
    pub executor: Arc<EnforcementExecutor>,
    pub reconciler: Reconciler,
    pub clock: SessionClock,
    pub event_tx: mpsc::Sender<RiskEvent>,
    pub notifier: Notifier,
    pub db_url: String,
    _db_dir: Option<tempfile::TempDir>,
}

impl Harness {
    pub async fn with_rules(rules_yaml: &str) -> Self {
        let db_dir = tempfile::tempdir().unwrap();
        let db_url = format!("sqlite://{}/harness.db", db_dir.path().display());
        Self::build(rules_yaml, db_url, Some(db_dir)).await
    }

    /// Opens an existing database path, as a restarted daemon would. The
    /// caller owns the directory's lifetime.
    pub async fn with_rules_and_db(rules_yaml: &str, db_url: &str) -> Self {
        Self::build(rules_yaml, db_url.to_string(), None).await
    }

    async fn build(rules_yaml: &str, db_url: String, db_dir: Option<tempfile::TempDir>) -> Self {
        let mut rules_file = tempfile::NamedTempFile::new().unwrap();
        rules_file.write_all(rules_yaml.as_bytes()).unwrap();
        let rules_config = RulesConfig::load(rules_file.path()).unwrap();
        let clock = SessionClock::new(rules_config.timezone, rules_config.rollover);

        let database = Database::new(&db_url).await.unwrap();
        let persistence = Arc::new(SqlitePersistence::new(database));

        let gateway = Arc::new(MockGateway::new());
        let notifier = Notifier::new();
        let state = Arc::new(StateStore::new(
            persistence.clone(),
            persistence.clone(),
            persistence.clone(),
        ));
        let lockouts = Arc::new(LockoutManager::new(persistence.clone()));
        let quotes = Arc::new(QuoteCache::new());
        let contracts = Arc::new(ContractCache::new(gateway.clone()));

        let now = chrono::Utc::now();
        let session_dates = [(ACCOUNT, clock.session_date(now))].into_iter().collect();
        state.restore(&session_dates, now).await.unwrap();
        let restored = lockouts.restore(now).await.unwrap();

        let (event_tx, event_rx) = mpsc::channel::<RiskEvent>(1024);
        let timers = Arc::new(TimerService::new(event_tx.clone()));
        for cooldown in restored {
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
        let timer_runner = timers.clone();
        tokio::spawn(async move { timer_runner.run().await });

        let metrics = Arc::new(Metrics::new().unwrap());
        let executor = EnforcementExecutor::new(
            gateway.clone(),
            state.clone(),
            persistence.clone(),
            notifier.clone(),
            metrics.clone(),
            ExecutorConfig {
                rate_limit_backoff: Duration::from_millis(1),
                base_backoff: Duration::from_millis(1),
                ..ExecutorConfig::default()
            },
        );
        let reconciler = Reconciler::new(
            gateway.clone(),
            state.clone(),
            lockouts.clone(),
            contracts.clone(),
            executor.clone(),
            clock,
        );

        let dispatcher = Dispatcher::new(DispatcherContext {
            state: state.clone(),
            lockouts: lockouts.clone(),
            quotes,
            contracts,
            executor: executor.clone(),
            timers,
            notifier: notifier.clone(),
            metrics,
            clock,
            holidays: Default::default(),
            quote_max_age: chrono::Duration::seconds(10),
        });
        dispatcher
            .register_account(ACCOUNT, rules_config.build_rules(ACCOUNT).unwrap())
            .await;
        tokio::spawn(dispatcher.run(event_rx));

        Self {
            gateway,
            state,
            lockouts,
            executor,
            reconciler,
            clock,
            event_tx,
            notifier,
            db_url,
            _db_dir: db_dir,
        }
    }

    pub async fn send(&self, event: RiskEvent) {
        self.event_tx.send(event).await.unwrap();
    }

    /// Lets the dispatcher and executor finish what has been fed so far.
    pub async fn settle(&self) {
        // Enough turns for queue -> worker -> executor lane -> gateway.
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.executor.drain(Duration::from_secs(2)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn position(contract_id: &str, side: PositionSide, size: u32, entry: Decimal) -> Position {
    Position {
        account_id: ACCOUNT,
        contract_id: contract_id.to_string(),
        side,
        size,
        average_price: entry,
        opened_at: chrono::Utc::now(),
    }
}

pub fn trade(trade_id: i64, contract_id: &str, pnl: Option<Decimal>) -> Trade {
    Trade {
        trade_id,
        account_id: ACCOUNT,
        contract_id: contract_id.to_string(),
        price: dec!(21000),
        pnl,
        fees: dec!(0.74),
        side: OrderSide::Ask,
        size: 1,
        voided: false,
        order_id: trade_id * 10,
        executed_at: chrono::Utc::now(),
    }
}

pub fn stop_order(order_id: i64, contract_id: &str, side: OrderSide, stop: Decimal) -> Order {
    let now = chrono::Utc::now();
    Order {
        order_id,
        account_id: ACCOUNT,
        contract_id: contract_id.to_string(),
        side,
        order_type: OrderType::Stop,
        status: OrderStatus::Open,
        size: 1,
        limit_price: None,
        stop_price: Some(stop),
        fill_volume: 0,
        filled_price: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn quote(contract_id: &str, last: Decimal) -> Quote {
    let now = chrono::Utc::now();
    Quote {
        contract_id: contract_id.to_string(),
        last,
        best_bid: Some(last - dec!(0.25)),
        best_ask: Some(last + dec!(0.25)),
        source_timestamp: now,
        ingested_at: now,
    }
}
