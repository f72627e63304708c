use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{KeyStatus, SigningKeyRecord, SigningKeyView};

/// Storage-layer failures. Only `Transient` is worth retrying.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("key {key_id} was modified concurrently")]
    Conflict { key_id: Uuid },
    #[error("storage constraint rejected write: {0}")]
    Constraint(String),
    #[error("stored key could not be decoded: {0}")]
    Decode(String),
    #[error(transparent)]
    Cardinality(#[from] CardinalityViolation),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("tenant {tenant_id} holds {count} keys with status {status}")]
pub struct CardinalityViolation {
    pub tenant_id: String,
    pub status: KeyStatus,
    pub count: usize,
}

/// One raw write inside a tenant transaction.
#[derive(Clone, Debug)]
pub enum KeyWrite {
    Insert(SigningKeyRecord),
    Update {
        record: SigningKeyRecord,
        expected_version: i64,
    },
    Delete {
        id: Uuid,
        expected_version: i64,
    },
}

impl KeyWrite {
    pub fn update(previous: &SigningKeyRecord, record: SigningKeyRecord) -> Self {
        KeyWrite::Update {
            record,
            expected_version: previous.version,
        }
    }

    pub fn key_id(&self) -> Uuid {
        match self {
            KeyWrite::Insert(record) | KeyWrite::Update { record, .. } => record.id,
            KeyWrite::Delete { id, .. } => *id,
        }
    }
}

/// key: signing-keys-store
/// Authoritative per-tenant key collection. `commit` applies every write or none of them.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// One consistent snapshot of the tenant's keys, in no particular order.
    async fn load(&self, tenant_id: &str) -> Result<Vec<SigningKeyRecord>, StoreError>;

    async fn commit(&self, tenant_id: &str, writes: &[KeyWrite]) -> Result<(), StoreError>;

    async fn list_by_status(&self, tenant_id: &str) -> Result<KeysByStatus, StoreError> {
        let records = self.load(tenant_id).await?;
        Ok(KeysByStatus::partition(tenant_id, records)?)
    }
}

/// Status rank first, newest `created_at` first within a status.
pub fn sort_keys(records: &mut [SigningKeyRecord]) {
    records.sort_by_key(|record| (record.status.rank(), Reverse(record.created_at), record.id));
}

pub fn ensure_cardinality(
    tenant_id: &str,
    records: &[SigningKeyRecord],
) -> Result<(), CardinalityViolation> {
    for status in [KeyStatus::Active, KeyStatus::Standby] {
        let count = records
            .iter()
            .filter(|record| record.status == status)
            .count();
        if count > 1 {
            return Err(CardinalityViolation {
                tenant_id: tenant_id.to_string(),
                status,
                count,
            });
        }
    }
    Ok(())
}

/// Applies `writes` to a copy of `records` without touching storage.
pub fn project(
    records: &[SigningKeyRecord],
    writes: &[KeyWrite],
) -> Result<Vec<SigningKeyRecord>, StoreError> {
    let mut staged = records.to_vec();
    for write in writes {
        match write {
            KeyWrite::Insert(record) => {
                if staged.iter().any(|existing| existing.id == record.id) {
                    return Err(StoreError::Constraint(format!(
                        "key {} already exists",
                        record.id
                    )));
                }
                staged.push(record.clone());
            }
            KeyWrite::Update {
                record,
                expected_version,
            } => {
                let slot = staged
                    .iter_mut()
                    .find(|existing| existing.id == record.id)
                    .filter(|existing| existing.version == *expected_version)
                    .ok_or(StoreError::Conflict { key_id: record.id })?;
                *slot = record.clone();
            }
            KeyWrite::Delete {
                id,
                expected_version,
            } => {
                let position = staged
                    .iter()
                    .position(|existing| existing.id == *id && existing.version == *expected_version)
                    .ok_or(StoreError::Conflict { key_id: *id })?;
                staged.remove(position);
            }
        }
    }
    Ok(staged)
}

/// Keys grouped by lifecycle status. Never holds more than one standby or active key.
#[derive(Clone, Debug, Default)]
pub struct KeysByStatus {
    pub standby: Option<SigningKeyRecord>,
    pub active: Option<SigningKeyRecord>,
    pub retired: Vec<SigningKeyRecord>,
    pub revoked: Vec<SigningKeyRecord>,
}

impl KeysByStatus {
    pub fn partition(
        tenant_id: &str,
        mut records: Vec<SigningKeyRecord>,
    ) -> Result<Self, CardinalityViolation> {
        ensure_cardinality(tenant_id, &records)?;
        sort_keys(&mut records);
        let mut grouped = KeysByStatus::default();
        for record in records {
            match record.status {
                KeyStatus::Standby => grouped.standby = Some(record),
                KeyStatus::Active => grouped.active = Some(record),
                KeyStatus::Retired => grouped.retired.push(record),
                KeyStatus::Revoked => grouped.revoked.push(record),
            }
        }
        Ok(grouped)
    }

    pub fn is_empty(&self) -> bool {
        self.standby.is_none()
            && self.active.is_none()
            && self.retired.is_empty()
            && self.revoked.is_empty()
    }

    /// All keys in listing order.
    pub fn iter(&self) -> impl Iterator<Item = &SigningKeyRecord> {
        self.standby
            .iter()
            .chain(self.active.iter())
            .chain(self.retired.iter())
            .chain(self.revoked.iter())
    }

    pub fn find(&self, key_id: Uuid) -> Option<&SigningKeyRecord> {
        self.iter().find(|record| record.id == key_id)
    }

    pub fn listing(&self) -> KeyListing {
        KeyListing {
            standby: self.standby.as_ref().map(SigningKeyView::from),
            active: self.active.as_ref().map(SigningKeyView::from),
            retired: self.retired.iter().map(SigningKeyView::from).collect(),
            revoked: self.revoked.iter().map(SigningKeyView::from).collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct KeyListing {
    pub standby: Option<SigningKeyView>,
    pub active: Option<SigningKeyView>,
    pub retired: Vec<SigningKeyView>,
    pub revoked: Vec<SigningKeyView>,
}

/// In-process store. Readers see either the state before a commit or after it.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    tenants: RwLock<HashMap<String, Vec<SigningKeyRecord>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds records without any checks. Intended for repair scenarios and tests.
    pub async fn seed(&self, tenant_id: &str, records: Vec<SigningKeyRecord>) {
        let mut tenants = self.tenants.write().await;
        tenants
            .entry(tenant_id.to_string())
            .or_default()
            .extend(records);
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load(&self, tenant_id: &str) -> Result<Vec<SigningKeyRecord>, StoreError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(tenant_id).cloned().unwrap_or_default())
    }

    async fn commit(&self, tenant_id: &str, writes: &[KeyWrite]) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write().await;
        let current = tenants.get(tenant_id).map(Vec::as_slice).unwrap_or_default();
        let staged = project(current, writes)?;
        // Mirrors the partial unique indexes of the Postgres schema.
        ensure_cardinality(tenant_id, &staged)
            .map_err(|violation| StoreError::Constraint(violation.to_string()))?;
        tenants.insert(tenant_id.to_string(), staged);
        Ok(())
    }
}
