//! Edge Agent Registry
//!
//! Creates ECA identities and owns their authorization flag. Agents are
//! always registered unauthorized; only the operator action in
//! [`EcaRegistry::set_authorized`] can admit them.

use std::sync::Arc;
use tracing::info;

use super::{Eca, EcaConfig, EcaId, InvalidEcaId};
use crate::store::{DocumentStore, StoreError};

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    InvalidId(#[from] InvalidEcaId),

    #[error("ECA not found: {0}")]
    NotFound(EcaId),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Registry of edge agents
pub struct EcaRegistry {
    store: Arc<dyn DocumentStore>,
}

impl EcaRegistry {
    /// Create a registry on top of `store`
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Register a new agent and return its generated id
    pub async fn register(&self, config: EcaConfig) -> Result<EcaId, RegistryError> {
        let eca = Eca::new(config);
        self.store.insert_eca(&eca).await?;

        info!("Registered ECA {} ({})", eca.id, eca.config.name);
        Ok(eca.id)
    }

    /// Look up an agent from an untrusted id string.
    ///
    /// A malformed id fails with `InvalidId` before the store is consulted.
    pub async fn lookup(&self, raw_id: &str) -> Result<Eca, RegistryError> {
        let id: EcaId = raw_id.parse()?;
        self.lookup_id(&id).await
    }

    /// Look up an agent by id
    pub async fn lookup_id(&self, id: &EcaId) -> Result<Eca, RegistryError> {
        self.store
            .find_eca(id)
            .await?
            .ok_or(RegistryError::NotFound(*id))
    }

    /// Whether the agent may be admitted. A missing flag is treated as no.
    pub fn is_authorized(eca: &Eca) -> bool {
        eca.authorized.unwrap_or(false)
    }

    /// Operator action: grant or revoke authorization
    pub async fn set_authorized(&self, id: &EcaId, authorized: bool) -> Result<(), RegistryError> {
        let outcome = self.store.set_eca_authorized(id, authorized).await?;
        if outcome.is_unmatched() {
            return Err(RegistryError::NotFound(*id));
        }

        info!("ECA {} authorization set to {}", id, authorized);
        Ok(())
    }
}
