use crate::domain::events::RiskEvent;
use crate::domain::session::{HolidayCalendar, SessionClock};
use crate::domain::types::AccountId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Fires each account's daily session rollover as a synthetic event.
///
/// Rollover instants are computed in the account's timezone and skip
/// holidays. If the process slept through one or more rollovers (laptop
/// suspend, clock jump), exactly one reset fires and the schedule continues
/// from now; missed rollovers are not replayed.
pub struct ResetScheduler {
    clock: SessionClock,
    holidays: HolidayCalendar,
    accounts: Vec<AccountId>,
    event_tx: mpsc::Sender<RiskEvent>,
}

impl ResetScheduler {
    pub fn new(
        clock: SessionClock,
        holidays: HolidayCalendar,
        accounts: Vec<AccountId>,
        event_tx: mpsc::Sender<RiskEvent>,
    ) -> Self {
        Self {
            clock,
            holidays,
            accounts,
            event_tx,
        }
    }

    pub async fn run(&self) {
        let mut next: HashMap<AccountId, DateTime<Utc>> = self
            .accounts
            .iter()
            .map(|&account_id| {
                let at = self.clock.next_rollover(Utc::now(), &self.holidays);
                (account_id, at)
            })
            .collect();
        for (account_id, at) in &next {
            info!(account_id, rollover = %at, "session rollover scheduled");
        }

        loop {
            let now = Utc::now();
            for (&account_id, due) in next.iter_mut() {
                if now < *due {
                    continue;
                }
                let event = RiskEvent::ResetRollover {
                    account_id,
                    rollover: *due,
                };
                if self.event_tx.send(event).await.is_err() {
                    warn!("ingress channel closed, reset scheduler stopping");
                    return;
                }
                // One reset regardless of how many boundaries were skipped.
                *due = self.clock.next_rollover(now, &self.holidays);
                info!(account_id, rollover = %due, "session rollover fired, next scheduled");
            }

            let sleep_for = next
                .values()
                .map(|due| (*due - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                .min()
                .unwrap_or(Duration::from_secs(60))
                .min(Duration::from_secs(60));
            tokio::time::sleep(sleep_for.max(Duration::from_millis(250))).await;
        }
    }
}
