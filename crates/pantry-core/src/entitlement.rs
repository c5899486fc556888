//! Entitlement ledger: who holds an active paid subscription.
//! Checked on every request; nothing here is cached.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CredentialFault, GatewayError};
use crate::principal::Principal;

const ENTITLEMENT_PREFIX: &str = "entitlement/";
pub const ACTIVE_STATUS: &str = "active";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entitlement ledger: {0}")]
    Sled(#[from] sled::Error),
    #[error("entitlement ledger unavailable: {0}")]
    Unavailable(String),
}

/// Lookup collaborator for subscription records.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Number of records for `uid` whose status is active.
    async fn count_active(&self, uid: &str) -> Result<usize, StoreError>;
}

/// A principal that passed the entitlement check. Only constructed by [`check_entitlement`].
#[derive(Debug, Clone, PartialEq)]
pub struct EntitledPrincipal(Principal);

impl EntitledPrincipal {
    pub fn principal(&self) -> &Principal {
        &self.0
    }

    pub fn uid(&self) -> &str {
        &self.0.uid
    }
}

/// Gate a verified principal on at least one active record.
pub async fn check_entitlement(
    store: &dyn EntitlementStore,
    principal: Principal,
) -> Result<EntitledPrincipal, GatewayError> {
    if principal.uid.is_empty() {
        return Err(CredentialFault::Invalid("empty principal identifier".into()).into());
    }

    let active = store
        .count_active(&principal.uid)
        .await
        .map_err(|e| GatewayError::dependency("entitlement store", e.to_string()))?;

    if active == 0 {
        return Err(GatewayError::EntitlementDenied { uid: principal.uid });
    }

    tracing::debug!(uid = %principal.uid, active, "[PANTRY AUTH] entitlement confirmed");
    Ok(EntitledPrincipal(principal))
}

/// One subscription record as stored in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementRecord {
    pub status: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Sled-backed ledger. Key: `entitlement/{uid_len}:{uid}/{record_id}`; value: JSON
/// [`EntitlementRecord`]. The byte length fixes where the uid ends, so ids may contain `/`.
pub struct SledEntitlementStore {
    db: sled::Db,
}

fn principal_prefix(uid: &str) -> String {
    format!("{}{}:{}/", ENTITLEMENT_PREFIX, uid.len(), uid)
}

impl SledEntitlementStore {
    pub fn open(path: impl AsRef<Path>) -> sled::Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn key(uid: &str, record_id: &str) -> String {
        format!("{}{}", principal_prefix(uid), record_id)
    }

    /// Insert or replace a record's status.
    pub fn grant(&self, uid: &str, record_id: &str, status: &str) -> Result<(), StoreError> {
        let record = EntitlementRecord {
            status: status.to_string(),
            extra: serde_json::Map::new(),
        };
        let payload = serde_json::to_vec(&record)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.db.insert(Self::key(uid, record_id).as_bytes(), payload)?;
        Ok(())
    }

    pub fn revoke(&self, uid: &str, record_id: &str) -> Result<bool, StoreError> {
        Ok(self.db.remove(Self::key(uid, record_id).as_bytes())?.is_some())
    }
}

fn scan_active(db: &sled::Db, prefix: &str) -> Result<usize, StoreError> {
    let mut active = 0;
    for entry in db.scan_prefix(prefix.as_bytes()) {
        let (key, value) = entry?;
        match serde_json::from_slice::<EntitlementRecord>(&value) {
            Ok(record) if record.status == ACTIVE_STATUS => active += 1,
            Ok(_) => {}
            Err(e) => tracing::warn!(
                key = %String::from_utf8_lossy(&key),
                "[PANTRY LEDGER] skipping undecodable entitlement record: {}",
                e
            ),
        }
    }
    Ok(active)
}

#[async_trait]
impl EntitlementStore for SledEntitlementStore {
    async fn count_active(&self, uid: &str) -> Result<usize, StoreError> {
        let db = self.db.clone();
        let prefix = principal_prefix(uid);
        tokio::task::spawn_blocking(move || scan_active(&db, &prefix))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}
