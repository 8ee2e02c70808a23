use crate::domain::errors::GatewayError;
use crate::domain::ports::TradingGateway;
use crate::domain::types::{ContractId, ContractSpec};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Tick metadata per contract, filled from the gateway contract search on
/// first miss. Entries are dated so a session rollover can force a refetch.
pub struct ContractCache {
    gateway: Arc<dyn TradingGateway>,
    entries: RwLock<HashMap<ContractId, (ContractSpec, NaiveDate)>>,
}

impl ContractCache {
    pub fn new(gateway: Arc<dyn TradingGateway>) -> Self {
        Self {
            gateway,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the spec, fetching it synchronously on a miss or a dated
    /// entry from a previous session.
    pub async fn get(
        &self,
        contract_id: &ContractId,
        session_date: NaiveDate,
    ) -> Result<ContractSpec, GatewayError> {
        if let Some((spec, fetched_on)) = self.entries.read().await.get(contract_id)
            && *fetched_on == session_date
        {
            return Ok(spec.clone());
        }

        let specs = self.gateway.search_contract(contract_id).await?;
        let spec = specs
            .into_iter()
            .find(|s| &s.contract_id == contract_id)
            .ok_or_else(|| {
                GatewayError::Malformed(format!(
                    "contract search returned no match for {}",
                    contract_id
                ))
            })?;

        info!(
            contract_id = %contract_id,
            tick_size = %spec.tick_size,
            tick_value = %spec.tick_value,
            "contract metadata cached"
        );
        self.entries
            .write()
            .await
            .insert(contract_id.clone(), (spec.clone(), session_date));
        Ok(spec)
    }

    /// Best-effort prefetch used by reconciliation; failures only warn, the
    /// rules will retry on demand.
    pub async fn warm(&self, contract_id: &ContractId, session_date: NaiveDate) {
        if let Err(e) = self.get(contract_id, session_date).await {
            warn!(contract_id = %contract_id, error = %e, "contract metadata prefetch failed");
        }
    }

    /// Cloned view for a rule-evaluation snapshot.
    pub async fn snapshot(&self) -> HashMap<ContractId, ContractSpec> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, (spec, _))| (k.clone(), spec.clone()))
            .collect()
    }
}
