use crate::domain::types::{ContractId, Quote};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Latest quote per contract. Overwritten on every update, never persisted;
/// the stream refills it after a reconnect.
#[derive(Default)]
pub struct QuoteCache {
    quotes: RwLock<HashMap<ContractId, Quote>>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, quote: Quote) {
        self.quotes
            .write()
            .await
            .insert(quote.contract_id.clone(), quote);
    }

    pub async fn get_last(&self, contract_id: &str) -> Option<Decimal> {
        self.quotes.read().await.get(contract_id).map(|q| q.last)
    }

    pub async fn age(&self, contract_id: &str, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.quotes
            .read()
            .await
            .get(contract_id)
            .map(|q| now.signed_duration_since(q.ingested_at))
    }

    /// A missing quote is stale.
    pub async fn is_stale(
        &self,
        contract_id: &str,
        max_age: chrono::Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match self.age(contract_id, now).await {
            Some(age) => age > max_age,
            None => true,
        }
    }

    /// Cloned view for a rule-evaluation snapshot.
    pub async fn snapshot(&self) -> HashMap<ContractId, Quote> {
        self.quotes.read().await.clone()
    }
}
