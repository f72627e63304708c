use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use super::material::{KeyMaterialGenerator, MaterialError};
use super::models::{KeyMaterial, KeyStatus, PrivateMaterial, SigningAlgorithm, SigningKeyRecord};
use super::policy;
use super::store::{
    ensure_cardinality, project, CardinalityViolation, KeyStore, KeyWrite, KeysByStatus,
    StoreError,
};
use crate::clock::Clock;

/// Bounded retry for the write step of a transition. The transition itself is never
/// re-derived.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        self.base_backoff.saturating_mul(1 << exponent)
    }
}

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Precondition(String),
    #[error("signing key {0} not found")]
    NotFound(Uuid),
    #[error("signing key {key_id} becomes revocable in {} seconds", .remaining.num_seconds())]
    NotEligibleYet {
        key_id: Uuid,
        remaining: chrono::Duration,
    },
    #[error("invariant violated: {0}")]
    Invariant(CardinalityViolation),
    #[error(transparent)]
    Material(#[from] MaterialError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RotationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cardinality(violation) => RotationError::Invariant(violation),
            other => RotationError::Store(other),
        }
    }
}

/// Result of one rotation cascade.
#[derive(Clone, Debug)]
pub struct RotationOutcome {
    pub activated: SigningKeyRecord,
    /// True when no standby existed and the active key was generated on the spot.
    pub created: bool,
    pub retired: Option<SigningKeyRecord>,
    pub revoked: Vec<SigningKeyRecord>,
}

enum Successor<'a> {
    Promote(&'a SigningKeyRecord),
    Create(SigningAlgorithm, KeyMaterial),
}

/// key: signing-keys-engine
/// State-machine core. Every operation reads one snapshot, derives the full set of writes,
/// checks the cardinality invariants on the projected result and commits atomically.
/// Callers are expected to hold the tenant's write lock.
pub struct RotationEngine {
    store: Arc<dyn KeyStore>,
    generator: Arc<dyn KeyMaterialGenerator>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl RotationEngine {
    pub fn new(
        store: Arc<dyn KeyStore>,
        generator: Arc<dyn KeyMaterialGenerator>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            generator,
            clock,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn snapshot(&self, tenant_id: &str) -> Result<KeysByStatus, RotationError> {
        Ok(self.store.list_by_status(tenant_id).await?)
    }

    pub async fn create_standby(
        &self,
        tenant_id: &str,
        algorithm: SigningAlgorithm,
        custom: Option<PrivateMaterial>,
    ) -> Result<SigningKeyRecord, RotationError> {
        let keys = self.snapshot(tenant_id).await?;
        if let Some(existing) = &keys.standby {
            return Err(RotationError::Precondition(format!(
                "tenant already has standby key {}",
                existing.id
            )));
        }

        let material = self.materialize(algorithm, custom).await?;
        let record = SigningKeyRecord::new(
            tenant_id,
            KeyStatus::Standby,
            algorithm,
            material,
            self.clock.now(),
        );
        self.commit(tenant_id, &keys, vec![KeyWrite::Insert(record.clone())])
            .await?;
        Ok(record)
    }

    pub async fn edit_standby(
        &self,
        tenant_id: &str,
        algorithm: SigningAlgorithm,
        custom: Option<PrivateMaterial>,
    ) -> Result<SigningKeyRecord, RotationError> {
        let keys = self.snapshot(tenant_id).await?;
        let standby = keys
            .standby
            .as_ref()
            .ok_or_else(|| RotationError::Precondition("no standby key to edit".to_string()))?;

        let material = self.materialize(algorithm, custom).await?;
        let updated = standby.with_material(algorithm, material, self.clock.now());
        self.commit(
            tenant_id,
            &keys,
            vec![KeyWrite::update(standby, updated.clone())],
        )
        .await?;
        Ok(updated)
    }

    pub async fn delete_standby(&self, tenant_id: &str) -> Result<SigningKeyRecord, RotationError> {
        let keys = self.snapshot(tenant_id).await?;
        let standby = keys
            .standby
            .clone()
            .ok_or_else(|| RotationError::Precondition("no standby key to delete".to_string()))?;

        self.commit(
            tenant_id,
            &keys,
            vec![KeyWrite::Delete {
                id: standby.id,
                expected_version: standby.version,
            }],
        )
        .await?;
        Ok(standby)
    }

    /// Retire the active key, revoke every previously retired key (oldest first), then
    /// promote the standby key or create a fresh active key from `fallback`.
    ///
    /// Refused while a retired legacy key would be revoked and the tenant's legacy API keys
    /// are still enabled, the same guard manual revocation applies.
    pub async fn rotate(
        &self,
        tenant_id: &str,
        fallback: Option<SigningAlgorithm>,
        legacy_api_keys_enabled: bool,
    ) -> Result<RotationOutcome, RotationError> {
        let keys = self.snapshot(tenant_id).await?;
        if legacy_api_keys_enabled {
            if let Some(legacy) = keys.retired.iter().find(|key| key.legacy) {
                return Err(RotationError::Precondition(format!(
                    "rotation would revoke legacy signing key {}; disable legacy JWT-based API keys first",
                    legacy.id
                )));
            }
        }
        let successor = match (&keys.standby, fallback) {
            (Some(standby), _) => Successor::Promote(standby),
            (None, Some(algorithm)) => {
                Successor::Create(algorithm, self.materialize(algorithm, None).await?)
            }
            (None, None) => {
                return Err(RotationError::Validation(
                    "fallback algorithm is required when no standby key exists".to_string(),
                ))
            }
        };

        let now = self.clock.now();
        let mut writes = Vec::new();

        let retired = keys.active.as_ref().map(|active| {
            let next = active.transitioned(KeyStatus::Retired, now);
            writes.push(KeyWrite::update(active, next.clone()));
            next
        });

        let mut revoked = Vec::with_capacity(keys.retired.len());
        for previous in keys.retired.iter().rev() {
            let next = previous.transitioned(KeyStatus::Revoked, now);
            writes.push(KeyWrite::update(previous, next.clone()));
            revoked.push(next);
        }

        let (activated, created) = match successor {
            Successor::Promote(standby) => {
                let next = standby.transitioned(KeyStatus::Active, now);
                writes.push(KeyWrite::update(standby, next.clone()));
                (next, false)
            }
            Successor::Create(algorithm, material) => {
                let record =
                    SigningKeyRecord::new(tenant_id, KeyStatus::Active, algorithm, material, now);
                writes.push(KeyWrite::Insert(record.clone()));
                (record, true)
            }
        };

        self.commit(tenant_id, &keys, writes).await?;
        Ok(RotationOutcome {
            activated,
            created,
            retired,
            revoked,
        })
    }

    /// Retired -> revoked, once the eligibility window has elapsed. A legacy key additionally
    /// requires the tenant's legacy API keys to be disabled.
    pub async fn revoke(
        &self,
        tenant_id: &str,
        key_id: Uuid,
        legacy_api_keys_enabled: bool,
    ) -> Result<SigningKeyRecord, RotationError> {
        let keys = self.snapshot(tenant_id).await?;
        let key = keys.find(key_id).ok_or(RotationError::NotFound(key_id))?;
        if key.status != KeyStatus::Retired {
            return Err(RotationError::Precondition(format!(
                "signing key {} is {}; only retired keys can be revoked",
                key.id, key.status
            )));
        }

        let now = self.clock.now();
        if !policy::can_revoke(key, now) {
            return Err(RotationError::NotEligibleYet {
                key_id,
                remaining: policy::remaining_until_revocable(key, now),
            });
        }
        if key.legacy && legacy_api_keys_enabled {
            return Err(RotationError::Precondition(
                "legacy JWT-based API keys must be disabled before the legacy secret is revoked"
                    .to_string(),
            ));
        }

        let next = key.transitioned(KeyStatus::Revoked, now);
        self.commit(tenant_id, &keys, vec![KeyWrite::update(key, next.clone())])
            .await?;
        Ok(next)
    }

    /// Brings an existing shared HS256 secret under management as the active key.
    pub async fn import_legacy(
        &self,
        tenant_id: &str,
        secret: PrivateMaterial,
    ) -> Result<SigningKeyRecord, RotationError> {
        let keys = self.snapshot(tenant_id).await?;
        if !keys.is_empty() {
            return Err(RotationError::Precondition(
                "legacy secrets can only be imported into a tenant without signing keys"
                    .to_string(),
            ));
        }

        let material = self
            .materialize(SigningAlgorithm::Hs256, Some(secret))
            .await?;
        let mut record = SigningKeyRecord::new(
            tenant_id,
            KeyStatus::Active,
            SigningAlgorithm::Hs256,
            material,
            self.clock.now(),
        );
        record.legacy = true;
        self.commit(tenant_id, &keys, vec![KeyWrite::Insert(record.clone())])
            .await?;
        Ok(record)
    }

    async fn materialize(
        &self,
        algorithm: SigningAlgorithm,
        custom: Option<PrivateMaterial>,
    ) -> Result<KeyMaterial, RotationError> {
        let generator = Arc::clone(&self.generator);
        // RSA generation is CPU-bound.
        let material = tokio::task::spawn_blocking(move || match custom {
            Some(private) => generator.import(algorithm, &private),
            None => generator.generate(algorithm),
        })
        .await
        .map_err(|err| MaterialError::Generation {
            algorithm,
            reason: err.to_string(),
        })??;
        Ok(material)
    }

    async fn commit(
        &self,
        tenant_id: &str,
        keys: &KeysByStatus,
        writes: Vec<KeyWrite>,
    ) -> Result<(), RotationError> {
        let current: Vec<SigningKeyRecord> = keys.iter().cloned().collect();
        let projected = project(&current, &writes)?;
        if let Err(violation) = ensure_cardinality(tenant_id, &projected) {
            error!(
                tenant_id,
                status = %violation.status,
                count = violation.count,
                "signing key transition would break cardinality invariant; aborting"
            );
            return Err(RotationError::Invariant(violation));
        }

        let mut attempt = 1;
        loop {
            match self.store.commit(tenant_id, &writes).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        tenant_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient key store failure; retrying commit"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
