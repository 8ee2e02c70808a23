use crate::application::notifications::{Notification, Notifier};
use crate::application::reconciliation::Reconciler;
use crate::application::state_store::StateStore;
use crate::domain::events::RiskEvent;
use crate::domain::types::{AccountFlags, AccountId, ContractId, Order, Position, Trade};
use crate::infrastructure::gateway::auth::TokenManager;
use crate::infrastructure::gateway::wire::{
    GatewayQuote, GatewayUserAccount, GatewayUserOrder, GatewayUserPosition, GatewayUserTrade,
};
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Reconnect schedule: 0, 2 s, 5 s, 10 s, then 30 s capped, ±20% jitter,
/// unbounded attempts.
fn reconnect_delay(attempt: u32) -> Duration {
    let base_secs = match attempt {
        0 => return Duration::ZERO,
        1 => 2.0,
        2 => 5.0,
        3 => 10.0,
        _ => 30.0,
    };
    let jitter = rand::rng().random_range(0.8..=1.2);
    Duration::from_secs_f64(base_secs * jitter)
}

/// One RPC frame, both directions: a target method and its arguments.
#[derive(Debug, Serialize, Deserialize)]
struct RpcFrame {
    target: String,
    #[serde(default)]
    arguments: Vec<serde_json::Value>,
}

impl RpcFrame {
    fn invoke(target: &str, arguments: Vec<serde_json::Value>) -> Message {
        let frame = RpcFrame {
            target: target.to_string(),
            arguments,
        };
        Message::Text(
            serde_json::to_string(&frame)
                .unwrap_or_default()
                .into(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub base_url: String,
    pub heartbeat: Duration,
    pub accounts: Vec<AccountId>,
}

/// Maintains the two long-lived hub connections.
///
/// The user-events hub subscribes per account and triggers reconciliation
/// before its events start flowing; the market-data hub keeps its quote
/// subscriptions matched to the contracts currently held. Both reconnect
/// forever with backoff. Malformed frames are logged, counted, and dropped
/// without tearing down the connection.
pub struct StreamConsumer {
    config: HubConfig,
    tokens: Arc<TokenManager>,
    event_tx: mpsc::Sender<RiskEvent>,
    notifier: Notifier,
    reconciler: Arc<Reconciler>,
    state: Arc<StateStore>,
    metrics: Arc<Metrics>,
}

impl StreamConsumer {
    pub fn new(
        config: HubConfig,
        tokens: Arc<TokenManager>,
        event_tx: mpsc::Sender<RiskEvent>,
        notifier: Notifier,
        reconciler: Arc<Reconciler>,
        state: Arc<StateStore>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            tokens,
            event_tx,
            notifier,
            reconciler,
            state,
            metrics,
        })
    }

    /// Spawns both hub loops; the handles let shutdown abort them.
    pub fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let user = self.clone();
        let market = self.clone();
        vec![
            tokio::spawn(async move { user.run_hub("user").await }),
            tokio::spawn(async move { market.run_hub("market").await }),
        ]
    }

    async fn run_hub(self: Arc<Self>, hub: &'static str) {
        let mut attempt: u32 = 0;
        loop {
            let delay = reconnect_delay(attempt);
            if !delay.is_zero() {
                debug!(hub, attempt, ?delay, "reconnect backoff");
                tokio::time::sleep(delay).await;
            }
            attempt += 1;

            let result = match hub {
                "user" => self.user_hub_session().await,
                _ => self.market_hub_session().await,
            };
            match result {
                Ok(()) => {
                    info!(hub, "hub connection closed by server");
                    // A session existed; restart the backoff schedule.
                    attempt = 1;
                }
                Err(e) => {
                    warn!(hub, error = %e, "hub connection failed");
                }
            }
            self.metrics.stream_reconnects.inc();
            self.notifier.publish(Notification::StreamDisconnected {
                hub: hub.to_string(),
            });
            if self.event_tx.is_closed() {
                return;
            }
        }
    }

    /// Hub endpoint with the bearer token as query parameter, per the
    /// gateway's handshake contract.
    fn hub_url(&self, path: &str, token: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(&format!("{}{}", self.config.base_url, path))
            .context("invalid hub base URL")?;
        url.query_pairs_mut().append_pair("access_token", token);
        Ok(url)
    }

    async fn user_hub_session(&self) -> Result<()> {
        let token = self.tokens.get().await?;
        let url = self.hub_url("/hubs/user", &token)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .context("Failed to connect to user hub")?;
        info!("user hub connected");
        let (mut write, mut read) = ws_stream.split();

        // All writes go through a channel so the ping task and the
        // subscription calls share one sink.
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if write.send(message).await.is_err() {
                    break;
                }
            }
        });

        out_tx
            .send(RpcFrame::invoke("SubscribeAccounts", vec![]))
            .await
            .context("user hub closed during subscription")?;
        for &account_id in &self.config.accounts {
            for method in ["SubscribeOrders", "SubscribePositions", "SubscribeTrades"] {
                out_tx
                    .send(RpcFrame::invoke(method, vec![serde_json::json!(account_id)]))
                    .await
                    .context("user hub closed during subscription")?;
            }
        }

        // Local state must match the gateway before any pushed event is
        // interpreted against it.
        self.reconciler
            .reconcile_all(&self.config.accounts)
            .await
            .context("post-connect reconciliation failed")?;
        self.notifier.publish(Notification::StreamReconnected {
            hub: "user".to_string(),
        });

        let ping_tx = out_tx.clone();
        let heartbeat = self.config.heartbeat;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat);
            loop {
                interval.tick().await;
                if ping_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_user_frame(&text).await,
                Ok(Message::Ping(payload)) => {
                    let _ = out_tx.send(Message::Pong(payload)).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "user hub read error");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_user_frame(&self, text: &str) {
        let frame: RpcFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.metrics.messages_dropped.inc();
                warn!(error = %e, "malformed user hub frame dropped");
                return;
            }
        };
        let Some(payload) = frame.arguments.into_iter().next() else {
            debug!(target = %frame.target, "frame without payload ignored");
            return;
        };

        let event = match frame.target.as_str() {
            "GatewayUserAccount" => serde_json::from_value::<GatewayUserAccount>(payload)
                .map_err(|e| e.to_string())
                .map(|wire| RiskEvent::AccountFlags(AccountFlags::from(wire))),
            "GatewayUserPosition" => serde_json::from_value::<GatewayUserPosition>(payload)
                .map_err(|e| e.to_string())
                .and_then(|wire| {
                    Position::try_from(wire)
                        .map(RiskEvent::Position)
                        .map_err(String::from)
                }),
            "GatewayUserOrder" => serde_json::from_value::<GatewayUserOrder>(payload)
                .map_err(|e| e.to_string())
                .and_then(|wire| {
                    Order::try_from(wire)
                        .map(RiskEvent::Order)
                        .map_err(String::from)
                }),
            "GatewayUserTrade" => serde_json::from_value::<GatewayUserTrade>(payload)
                .map_err(|e| e.to_string())
                .and_then(|wire| {
                    Trade::try_from(wire)
                        .map(RiskEvent::Trade)
                        .map_err(String::from)
                }),
            other => {
                debug!(target = %other, "unknown hub method ignored");
                return;
            }
        };

        match event {
            Ok(event) => {
                self.metrics.events_ingested.inc();
                let _ = self.event_tx.send(event).await;
            }
            Err(reason) => {
                self.metrics.messages_dropped.inc();
                warn!(target = %frame.target, reason = %reason, "malformed payload dropped");
            }
        }
    }

    async fn market_hub_session(&self) -> Result<()> {
        let token = self.tokens.get().await?;
        let url = self.hub_url("/hubs/market", &token)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .context("Failed to connect to market hub")?;
        info!("market hub connected");
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if write.send(message).await.is_err() {
                    break;
                }
            }
        });

        let mut subscribed: HashSet<ContractId> = HashSet::new();
        self.sync_quote_subscriptions(&out_tx, &mut subscribed)
            .await?;
        self.notifier.publish(Notification::StreamReconnected {
            hub: "market".to_string(),
        });

        let ping_tx = out_tx.clone();
        let heartbeat = self.config.heartbeat;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat);
            loop {
                interval.tick().await;
                if ping_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        });

        // Quote subscriptions follow the held-contract set as positions come
        // and go.
        let mut resync = tokio::time::interval(Duration::from_secs(15));
        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => self.handle_market_frame(&text).await,
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = out_tx.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "market hub read error");
                            break;
                        }
                    }
                }
                _ = resync.tick() => {
                    self.sync_quote_subscriptions(&out_tx, &mut subscribed).await?;
                }
            }
        }
        Ok(())
    }

    async fn sync_quote_subscriptions(
        &self,
        out_tx: &mpsc::Sender<Message>,
        subscribed: &mut HashSet<ContractId>,
    ) -> Result<()> {
        let held = self.state.all_held_contracts().await;
        for contract_id in held.difference(subscribed) {
            debug!(contract_id = %contract_id, "subscribing to quotes");
            out_tx
                .send(RpcFrame::invoke(
                    "SubscribeContractQuotes",
                    vec![serde_json::json!(contract_id)],
                ))
                .await
                .context("market hub closed during subscription")?;
        }
        for contract_id in subscribed.difference(&held) {
            debug!(contract_id = %contract_id, "unsubscribing from quotes");
            out_tx
                .send(RpcFrame::invoke(
                    "UnsubscribeContractQuotes",
                    vec![serde_json::json!(contract_id)],
                ))
                .await
                .context("market hub closed during unsubscription")?;
        }
        *subscribed = held;
        Ok(())
    }

    async fn handle_market_frame(&self, text: &str) {
        let frame: RpcFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.metrics.messages_dropped.inc();
                warn!(error = %e, "malformed market hub frame dropped");
                return;
            }
        };
        if frame.target != "GatewayQuote" {
            return;
        }
        let Some(payload) = frame.arguments.into_iter().next() else {
            return;
        };
        match serde_json::from_value::<GatewayQuote>(payload) {
            Ok(wire) => match wire.into_quote(Utc::now()) {
                Ok(quote) => {
                    self.metrics.events_ingested.inc();
                    let _ = self.event_tx.send(RiskEvent::Quote(quote)).await;
                }
                Err(reason) => {
                    self.metrics.messages_dropped.inc();
                    debug!(reason, "quote dropped");
                }
            },
            Err(e) => {
                self.metrics.messages_dropped.inc();
                warn!(error = %e, "malformed quote dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_shape() {
        assert_eq!(reconnect_delay(0), Duration::ZERO);
        let second = reconnect_delay(1);
        assert!(second >= Duration::from_secs_f64(1.6) && second <= Duration::from_secs_f64(2.4));
        // Capped at 30 s ±20%.
        let late = reconnect_delay(50);
        assert!(late >= Duration::from_secs_f64(24.0) && late <= Duration::from_secs_f64(36.0));
    }

    #[test]
    fn rpc_frame_round_trip() {
        let message = RpcFrame::invoke("SubscribeOrders", vec![serde_json::json!(101)]);
        let Message::Text(text) = message else {
            panic!("expected text frame");
        };
        let frame: RpcFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(frame.target, "SubscribeOrders");
        assert_eq!(frame.arguments, vec![serde_json::json!(101)]);
    }
}
