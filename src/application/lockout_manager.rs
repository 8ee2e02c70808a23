use crate::domain::repositories::LockoutRepository;
use crate::domain::risk::rule::is_attributed_to;
use crate::domain::types::{AccountId, Lockout, LockoutKind};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Default, Clone)]
struct AccountLockouts {
    hard: Option<Lockout>,
    cooldown: Option<Lockout>,
    symbols: HashMap<String, Lockout>,
}

impl AccountLockouts {
    fn is_empty(&self) -> bool {
        self.hard.is_none() && self.cooldown.is_none() && self.symbols.is_empty()
    }
}

/// Registers, queries, and reaps lockouts.
///
/// Every setter persists before the caller observes success, so the durable
/// record always equals the in-memory one between event acknowledgements.
/// Queries implicitly reap expired records.
pub struct LockoutManager {
    repository: Arc<dyn LockoutRepository>,
    accounts: RwLock<HashMap<AccountId, AccountLockouts>>,
}

impl LockoutManager {
    pub fn new(repository: Arc<dyn LockoutRepository>) -> Self {
        Self {
            repository,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuilds in-memory state from the durable table; expired rows are
    /// reaped rather than restored. Returns the restored cooldowns so the
    /// caller can recreate their expiry timers.
    pub async fn restore(&self, now: DateTime<Utc>) -> Result<Vec<Lockout>> {
        let mut restored_cooldowns = Vec::new();
        let mut accounts: HashMap<AccountId, AccountLockouts> = HashMap::new();

        for lockout in self.repository.load_all().await? {
            if lockout.is_expired(now) {
                self.repository
                    .delete(lockout.account_id, lockout.kind, lockout.symbol.as_deref())
                    .await?;
                info!(
                    account_id = lockout.account_id,
                    reason = %lockout.reason,
                    "expired lockout reaped at startup"
                );
                continue;
            }
            let entry = accounts.entry(lockout.account_id).or_default();
            match lockout.kind {
                LockoutKind::Hard => entry.hard = Some(lockout),
                LockoutKind::Cooldown => {
                    restored_cooldowns.push(lockout.clone());
                    entry.cooldown = Some(lockout);
                }
                LockoutKind::Symbol => {
                    let symbol = lockout.symbol.clone().unwrap_or_default();
                    if symbol.is_empty() {
                        warn!(account_id = lockout.account_id, "symbol lockout without symbol, dropping");
                        continue;
                    }
                    entry.symbols.insert(symbol, lockout);
                }
            }
        }

        *self.accounts.write().await = accounts;
        Ok(restored_cooldowns)
    }

    /// At most one hard lockout per account; a newer one replaces the older.
    pub async fn set_hard(
        &self,
        account_id: AccountId,
        reason: String,
        until: DateTime<Utc>,
    ) -> Result<Lockout> {
        let lockout = Lockout {
            account_id,
            symbol: None,
            kind: LockoutKind::Hard,
            reason,
            expires_at: until,
            created_at: Utc::now(),
        };
        self.repository.save(&lockout).await?;
        self.accounts
            .write()
            .await
            .entry(account_id)
            .or_default()
            .hard = Some(lockout.clone());
        info!(account_id, reason = %lockout.reason, until = %lockout.expires_at, "hard lockout set");
        Ok(lockout)
    }

    pub async fn set_cooldown(
        &self,
        account_id: AccountId,
        reason: String,
        duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Lockout> {
        let lockout = Lockout {
            account_id,
            symbol: None,
            kind: LockoutKind::Cooldown,
            reason,
            expires_at: now + duration,
            created_at: now,
        };
        self.repository.save(&lockout).await?;
        self.accounts
            .write()
            .await
            .entry(account_id)
            .or_default()
            .cooldown = Some(lockout.clone());
        info!(account_id, reason = %lockout.reason, until = %lockout.expires_at, "cooldown set");
        Ok(lockout)
    }

    pub async fn set_symbol(
        &self,
        account_id: AccountId,
        symbol: String,
        reason: String,
        until: DateTime<Utc>,
    ) -> Result<Lockout> {
        let lockout = Lockout {
            account_id,
            symbol: Some(symbol.clone()),
            kind: LockoutKind::Symbol,
            reason,
            expires_at: until,
            created_at: Utc::now(),
        };
        self.repository.save(&lockout).await?;
        self.accounts
            .write()
            .await
            .entry(account_id)
            .or_default()
            .symbols
            .insert(symbol, lockout.clone());
        info!(account_id, reason = %lockout.reason, "symbol lockout set");
        Ok(lockout)
    }

    /// Clears the account's hard and cooldown lockouts, or a single symbol
    /// lockout when `symbol` is given.
    pub async fn clear(&self, account_id: AccountId, symbol: Option<&str>) -> Result<()> {
        match symbol {
            Some(symbol) => {
                self.repository
                    .delete(account_id, LockoutKind::Symbol, Some(symbol))
                    .await?;
                if let Some(entry) = self.accounts.write().await.get_mut(&account_id) {
                    entry.symbols.remove(symbol);
                }
            }
            None => {
                self.repository
                    .delete(account_id, LockoutKind::Hard, None)
                    .await?;
                self.repository
                    .delete(account_id, LockoutKind::Cooldown, None)
                    .await?;
                if let Some(entry) = self.accounts.write().await.get_mut(&account_id) {
                    entry.hard = None;
                    entry.cooldown = None;
                }
            }
        }
        info!(account_id, symbol = symbol.unwrap_or("*"), "lockout cleared");
        Ok(())
    }

    /// Clears hard lockouts with `expires_at <= boundary` (reset-scheduler
    /// semantics). Returns whether anything was cleared.
    pub async fn clear_hard_up_to(
        &self,
        account_id: AccountId,
        boundary: DateTime<Utc>,
    ) -> Result<bool> {
        let mut accounts = self.accounts.write().await;
        let Some(entry) = accounts.get_mut(&account_id) else {
            return Ok(false);
        };
        if let Some(hard) = &entry.hard
            && !hard.is_manual_only()
            && hard.expires_at <= boundary
        {
            self.repository
                .delete(account_id, LockoutKind::Hard, None)
                .await?;
            info!(account_id, "hard lockout cleared at rollover");
            entry.hard = None;
            return Ok(true);
        }
        Ok(false)
    }

    /// Clears every lockout whose reason carries `rule`'s attribution tag.
    pub async fn clear_attributed(&self, account_id: AccountId, rule: &str) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let Some(entry) = accounts.get_mut(&account_id) else {
            return Ok(());
        };

        if entry
            .hard
            .as_ref()
            .is_some_and(|l| is_attributed_to(&l.reason, rule))
        {
            self.repository
                .delete(account_id, LockoutKind::Hard, None)
                .await?;
            entry.hard = None;
            info!(account_id, rule, "attributed hard lockout cleared");
        }
        if entry
            .cooldown
            .as_ref()
            .is_some_and(|l| is_attributed_to(&l.reason, rule))
        {
            self.repository
                .delete(account_id, LockoutKind::Cooldown, None)
                .await?;
            entry.cooldown = None;
        }
        let attributed_symbols: Vec<String> = entry
            .symbols
            .iter()
            .filter(|(_, l)| is_attributed_to(&l.reason, rule))
            .map(|(s, _)| s.clone())
            .collect();
        for symbol in attributed_symbols {
            self.repository
                .delete(account_id, LockoutKind::Symbol, Some(&symbol))
                .await?;
            entry.symbols.remove(&symbol);
        }
        Ok(())
    }

    /// True when a hard or cooldown lockout is in force. Expired records are
    /// reaped before answering.
    pub async fn is_locked(&self, account_id: AccountId, now: DateTime<Utc>) -> Result<bool> {
        self.reap(account_id, now).await?;
        let accounts = self.accounts.read().await;
        Ok(accounts
            .get(&account_id)
            .is_some_and(|e| e.hard.is_some() || e.cooldown.is_some()))
    }

    pub async fn is_symbol_locked(
        &self,
        account_id: AccountId,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.reap(account_id, now).await?;
        let accounts = self.accounts.read().await;
        Ok(accounts
            .get(&account_id)
            .is_some_and(|e| e.symbols.contains_key(symbol)))
    }

    /// The lockout currently gating the account: hard wins over cooldown.
    pub async fn info(&self, account_id: AccountId) -> Option<Lockout> {
        let accounts = self.accounts.read().await;
        let entry = accounts.get(&account_id)?;
        entry.hard.clone().or_else(|| entry.cooldown.clone())
    }

    async fn reap(&self, account_id: AccountId, now: DateTime<Utc>) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let Some(entry) = accounts.get_mut(&account_id) else {
            return Ok(());
        };

        if entry.hard.as_ref().is_some_and(|l| l.is_expired(now)) {
            self.repository
                .delete(account_id, LockoutKind::Hard, None)
                .await?;
            entry.hard = None;
            info!(account_id, "expired hard lockout reaped");
        }
        if entry.cooldown.as_ref().is_some_and(|l| l.is_expired(now)) {
            self.repository
                .delete(account_id, LockoutKind::Cooldown, None)
                .await?;
            entry.cooldown = None;
            info!(account_id, "expired cooldown reaped");
        }
        let expired_symbols: Vec<String> = entry
            .symbols
            .iter()
            .filter(|(_, l)| l.is_expired(now))
            .map(|(s, _)| s.clone())
            .collect();
        for symbol in expired_symbols {
            self.repository
                .delete(account_id, LockoutKind::Symbol, Some(&symbol))
                .await?;
            entry.symbols.remove(&symbol);
        }

        if entry.is_empty() {
            accounts.remove(&account_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::rule::attributed_reason;
    use std::sync::Mutex;

    /// Records calls; always succeeds.
    #[derive(Default)]
    struct MemoryLockoutRepo {
        saved: Mutex<Vec<Lockout>>,
        deleted: Mutex<Vec<(AccountId, LockoutKind, Option<String>)>>,
    }

    #[async_trait::async_trait]
    impl LockoutRepository for MemoryLockoutRepo {
        async fn save(&self, lockout: &Lockout) -> Result<()> {
            self.saved.lock().unwrap().push(lockout.clone());
            Ok(())
        }
        async fn delete(
            &self,
            account_id: AccountId,
            kind: LockoutKind,
            symbol: Option<&str>,
        ) -> Result<()> {
            self.deleted
                .lock()
                .unwrap()
                .push((account_id, kind, symbol.map(String::from)));
            Ok(())
        }
        async fn load_all(&self) -> Result<Vec<Lockout>> {
            Ok(self.saved.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn persist_before_observe() {
        let repo = Arc::new(MemoryLockoutRepo::default());
        let manager = LockoutManager::new(repo.clone());
        let now = Utc::now();

        manager
            .set_hard(1, "test".to_string(), now + chrono::Duration::hours(1))
            .await
            .unwrap();
        // The durable row exists by the time the setter returned.
        assert_eq!(repo.saved.lock().unwrap().len(), 1);
        assert!(manager.is_locked(1, now).await.unwrap());
    }

    #[tokio::test]
    async fn expired_cooldown_reaped_on_query() {
        let repo = Arc::new(MemoryLockoutRepo::default());
        let manager = LockoutManager::new(repo.clone());
        let now = Utc::now();

        manager
            .set_cooldown(1, "cool".to_string(), chrono::Duration::minutes(5), now)
            .await
            .unwrap();
        assert!(manager.is_locked(1, now).await.unwrap());

        let later = now + chrono::Duration::minutes(6);
        assert!(!manager.is_locked(1, later).await.unwrap());
        // Reap deleted the durable row too.
        assert!(
            repo.deleted
                .lock()
                .unwrap()
                .iter()
                .any(|(id, kind, _)| *id == 1 && *kind == LockoutKind::Cooldown)
        );
    }

    #[tokio::test]
    async fn symbol_lockouts_are_independent() {
        let repo = Arc::new(MemoryLockoutRepo::default());
        let manager = LockoutManager::new(repo);
        let now = Utc::now();

        manager
            .set_symbol(1, "RTY".to_string(), "blocked".to_string(), Lockout::never())
            .await
            .unwrap();
        assert!(manager.is_symbol_locked(1, "RTY", now).await.unwrap());
        assert!(!manager.is_symbol_locked(1, "MNQ", now).await.unwrap());
        // A symbol lockout alone does not hard-lock the account.
        assert!(!manager.is_locked(1, now).await.unwrap());
    }

    #[tokio::test]
    async fn clear_attributed_leaves_other_rules_lockouts() {
        let repo = Arc::new(MemoryLockoutRepo::default());
        let manager = LockoutManager::new(repo);
        let now = Utc::now();

        manager
            .set_hard(
                1,
                attributed_reason("auth_loss_guard", "disabled"),
                Lockout::never(),
            )
            .await
            .unwrap();
        manager
            .set_symbol(
                1,
                "RTY".to_string(),
                attributed_reason("symbol_blocks", "blocked"),
                Lockout::never(),
            )
            .await
            .unwrap();

        manager.clear_attributed(1, "auth_loss_guard").await.unwrap();
        assert!(!manager.is_locked(1, now).await.unwrap());
        assert!(manager.is_symbol_locked(1, "RTY", now).await.unwrap());
    }

    #[tokio::test]
    async fn rollover_clears_only_past_due_hard_lockouts() {
        let repo = Arc::new(MemoryLockoutRepo::default());
        let manager = LockoutManager::new(repo);
        let now = Utc::now();
        let rollover = now + chrono::Duration::hours(3);

        manager
            .set_hard(1, "until rollover".to_string(), rollover)
            .await
            .unwrap();
        manager.clear_hard_up_to(1, rollover).await.unwrap();
        assert!(!manager.is_locked(1, now).await.unwrap());

        // Manual-only lockouts survive rollover.
        manager
            .set_hard(1, "manual".to_string(), Lockout::never())
            .await
            .unwrap();
        manager.clear_hard_up_to(1, rollover).await.unwrap();
        assert!(manager.is_locked(1, now).await.unwrap());
    }

    #[tokio::test]
    async fn restore_recreates_cooldowns_and_reaps_expired() {
        let repo = Arc::new(MemoryLockoutRepo::default());
        let now = Utc::now();
        {
            let manager = LockoutManager::new(repo.clone());
            manager
                .set_cooldown(1, "live".to_string(), chrono::Duration::hours(1), now)
                .await
                .unwrap();
            manager
                .set_hard(2, "old".to_string(), now - chrono::Duration::hours(1))
                .await
                .unwrap();
        }

        // Fresh manager, as after a crash.
        let manager = LockoutManager::new(repo);
        let cooldowns = manager.restore(now).await.unwrap();
        assert_eq!(cooldowns.len(), 1);
        assert_eq!(cooldowns[0].account_id, 1);
        assert!(manager.is_locked(1, now).await.unwrap());
        assert!(!manager.is_locked(2, now).await.unwrap());
    }
}
