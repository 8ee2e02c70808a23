use crate::domain::types::AccountId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Everything the status frontend is told about.
#[derive(Debug, Clone, Serialize)]
pub enum Notification {
    LockoutSet {
        account_id: AccountId,
        reason: String,
        until: DateTime<Utc>,
    },
    LockoutCleared {
        account_id: AccountId,
        symbol: Option<String>,
    },
    EnforcementSuccess {
        account_id: AccountId,
        kind: String,
        target: String,
    },
    EnforcementFailure {
        account_id: AccountId,
        kind: String,
        target: String,
        detail: String,
    },
    StreamDisconnected {
        hub: String,
    },
    StreamReconnected {
        hub: String,
    },
    /// A persistence write needed retries; enforcement continues.
    Degraded {
        detail: String,
    },
    /// The daemon is going down rather than under-enforce.
    Offline {
        detail: String,
    },
}

/// Broadcast fan-out to the status frontend. Every notification is also
/// logged, so a daemon with no subscriber still leaves a trail.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        match &notification {
            Notification::LockoutSet {
                account_id,
                reason,
                until,
            } => info!(account_id, reason = %reason, until = %until, "lockout set"),
            Notification::LockoutCleared { account_id, symbol } => {
                info!(account_id, symbol = symbol.as_deref().unwrap_or("*"), "lockout cleared")
            }
            Notification::EnforcementSuccess {
                account_id,
                kind,
                target,
            } => info!(account_id, kind = %kind, target = %target, "enforcement succeeded"),
            Notification::EnforcementFailure {
                account_id,
                kind,
                target,
                detail,
            } => warn!(account_id, kind = %kind, target = %target, detail = %detail, "enforcement failed"),
            Notification::StreamDisconnected { hub } => warn!(hub = %hub, "stream disconnected"),
            Notification::StreamReconnected { hub } => info!(hub = %hub, "stream reconnected"),
            Notification::Degraded { detail } => warn!(detail = %detail, "degraded"),
            Notification::Offline { detail } => error!(detail = %detail, "going offline"),
        }
        // A send only fails when no frontend is subscribed; that's fine.
        let _ = self.tx.send(notification);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
