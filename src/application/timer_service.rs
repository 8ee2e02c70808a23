use crate::domain::events::RiskEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};

struct TimerEntry {
    deadline: Instant,
    event: RiskEvent,
}

/// Named countdown timers that post synthetic events into the ingress queue.
///
/// A single scheduler loop wakes once a second, or earlier when a deadline is
/// nearer. Each timer fires exactly once: the entry is removed before its
/// event is sent, and starting a timer under an existing name replaces it.
/// Cooldown lockouts are the exception to in-memory-only: their expiry lives
/// in the persisted lockout row and the timer is recreated from it at boot.
pub struct TimerService {
    timers: Arc<Mutex<HashMap<String, TimerEntry>>>,
    event_tx: mpsc::Sender<RiskEvent>,
}

impl TimerService {
    pub fn new(event_tx: mpsc::Sender<RiskEvent>) -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
        }
    }

    pub async fn start(&self, name: impl Into<String>, after: Duration, event: RiskEvent) {
        let name = name.into();
        let deadline = Instant::now() + after;
        debug!(timer = %name, secs = after.as_secs(), "timer started");
        self.timers
            .lock()
            .await
            .insert(name, TimerEntry { deadline, event });
    }

    pub async fn cancel(&self, name: &str) -> bool {
        let removed = self.timers.lock().await.remove(name).is_some();
        if removed {
            debug!(timer = %name, "timer cancelled");
        }
        removed
    }

    pub async fn remaining(&self, name: &str) -> Option<Duration> {
        self.timers
            .lock()
            .await
            .get(name)
            .map(|entry| entry.deadline.saturating_duration_since(Instant::now()))
    }

    /// The scheduler loop. Runs until the ingress channel closes.
    pub async fn run(&self) {
        loop {
            let now = Instant::now();
            let (due, next_deadline) = {
                let mut timers = self.timers.lock().await;
                let due_names: Vec<String> = timers
                    .iter()
                    .filter(|(_, e)| e.deadline <= now)
                    .map(|(name, _)| name.clone())
                    .collect();
                let due: Vec<(String, RiskEvent)> = due_names
                    .into_iter()
                    .filter_map(|name| timers.remove(&name).map(|e| (name, e.event)))
                    .collect();
                let next = timers.values().map(|e| e.deadline).min();
                (due, next)
            };

            for (name, event) in due {
                debug!(timer = %name, "timer fired");
                if self.event_tx.send(event).await.is_err() {
                    warn!("ingress channel closed, timer service stopping");
                    return;
                }
            }

            let sleep_for = next_deadline
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_secs(1))
                .min(Duration::from_secs(1));
            tokio::time::sleep(sleep_for).await;
        }
    }
}
