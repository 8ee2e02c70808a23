use crate::application::contract_cache::ContractCache;
use crate::application::executor::EnforcementExecutor;
use crate::application::lockout_manager::LockoutManager;
use crate::application::state_store::StateStore;
use crate::domain::errors::GatewayError;
use crate::domain::ports::TradingGateway;
use crate::domain::risk::rule::RemediationIntent;
use crate::domain::session::SessionClock;
use crate::domain::types::AccountId;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Synchronizes local state with the gateway's view after every (re)connect.
///
/// Runs before the dispatcher is unblocked: open positions and orders are
/// fetched over REST, merged into the state store (gateway wins, local
/// entries it no longer reports are pruned), and any remediation the merge
/// reveals — a locked account holding positions — is submitted immediately.
pub struct Reconciler {
    gateway: Arc<dyn TradingGateway>,
    state: Arc<StateStore>,
    lockouts: Arc<LockoutManager>,
    contracts: Arc<ContractCache>,
    executor: Arc<EnforcementExecutor>,
    clock: SessionClock,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<dyn TradingGateway>,
        state: Arc<StateStore>,
        lockouts: Arc<LockoutManager>,
        contracts: Arc<ContractCache>,
        executor: Arc<EnforcementExecutor>,
        clock: SessionClock,
    ) -> Self {
        Self {
            gateway,
            state,
            lockouts,
            contracts,
            executor,
            clock,
        }
    }

    pub async fn reconcile_all(&self, accounts: &[AccountId]) -> Result<()> {
        for &account_id in accounts {
            self.reconcile_account(account_id).await?;
        }
        Ok(())
    }

    pub async fn reconcile_account(&self, account_id: AccountId) -> Result<()> {
        let positions = self
            .fetch_retrying(|| self.gateway.search_open_positions(account_id))
            .await?;
        let orders = self
            .fetch_retrying(|| self.gateway.search_open_orders(account_id))
            .await?;

        info!(
            account_id,
            positions = positions.len(),
            orders = orders.len(),
            "reconciled against gateway"
        );

        let session_date = self.clock.session_date(Utc::now());
        for position in &positions {
            self.contracts.warm(&position.contract_id, session_date).await;
        }

        let held: Vec<_> = positions.clone();
        self.state
            .reconcile(account_id, positions, orders)
            .await?;

        // A locked account must not be holding anything.
        let now = Utc::now();
        let locked = self.lockouts.is_locked(account_id, now).await?;
        for position in held {
            let symbol_locked = self
                .lockouts
                .is_symbol_locked(account_id, position.symbol(), now)
                .await?;
            if locked || symbol_locked {
                warn!(
                    account_id,
                    contract_id = %position.contract_id,
                    "locked account holds position after reconnect, closing"
                );
                self.executor
                    .submit(RemediationIntent::ClosePosition {
                        account_id,
                        contract_id: position.contract_id.clone(),
                    })
                    .await;
            }
        }

        Ok(())
    }

    /// Transient gateway errors back off briefly; anything else aborts the
    /// reconciliation so the caller can decide whether to unblock.
    async fn fetch_retrying<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut delay = Duration::from_millis(500);
        for attempt in 0..5 {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < 4 => {
                    warn!(attempt, error = %e, "reconciliation fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }
        unreachable!("retry loop always returns")
    }
}
