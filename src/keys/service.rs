use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use super::engine::{RotationEngine, RotationOutcome};
use super::events::{SigningKeyEvent, SigningKeyEventType};
use super::material::{KeyMaterialGenerator, LocalKeyMaterialGenerator};
use super::models::{
    Jwks, KeyStatus, PrivateMaterial, SigningAlgorithm, SigningKeyRecord, SigningKeyView,
    VerificationMaterial,
};
use super::policy::{self, RevocationEligibility};
use super::store::{KeyListing, KeyStore};
use crate::clock::{Clock, SystemClock};
use crate::config::{LifecycleConfig, LEGACY_API_KEYS_ENABLED_TENANTS};
use crate::error::{KeyLifecycleError, KeyResult};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const MAX_TENANT_ID_LEN: usize = 128;

/// Answers whether a tenant still accepts legacy JWT-based API keys signed with its shared
/// secret.
#[async_trait]
pub trait LegacyApiKeys: Send + Sync {
    async fn enabled(&self, tenant_id: &str) -> bool;
}

/// Fixed allow-list of tenants with legacy API keys still enabled.
#[derive(Clone, Debug, Default)]
pub struct StaticLegacyApiKeys {
    enabled: HashSet<String>,
}

impl StaticLegacyApiKeys {
    pub fn new<I, S>(tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: tenants.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_env() -> Self {
        Self {
            enabled: LEGACY_API_KEYS_ENABLED_TENANTS.clone(),
        }
    }
}

#[async_trait]
impl LegacyApiKeys for StaticLegacyApiKeys {
    async fn enabled(&self, tenant_id: &str) -> bool {
        self.enabled.contains(tenant_id)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StandbyKeyRequest {
    pub algorithm: Option<String>,
    /// Custom signing key. Generated when absent.
    pub private_key: Option<PrivateMaterial>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RotateKeysRequest {
    pub fallback_algorithm: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ImportLegacySecret {
    pub secret: Option<PrivateMaterial>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RotationSummary {
    pub activated: SigningKeyView,
    pub created: bool,
    pub retired: Option<SigningKeyView>,
    pub revoked: Vec<SigningKeyView>,
}

impl From<&RotationOutcome> for RotationSummary {
    fn from(outcome: &RotationOutcome) -> Self {
        Self {
            activated: outcome.activated.view(),
            created: outcome.created,
            retired: outcome.retired.as_ref().map(SigningKeyView::from),
            revoked: outcome.revoked.iter().map(SigningKeyView::from).collect(),
        }
    }
}

/// key: signing-keys-service
/// Entry point for signing key lifecycle operations. Serializes mutating calls per tenant,
/// validates input, delegates to the rotation engine and publishes transition events.
#[derive(Clone)]
pub struct KeyLifecycleService {
    engine: Arc<RotationEngine>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    legacy: Arc<dyn LegacyApiKeys>,
    events: broadcast::Sender<SigningKeyEvent>,
    config: LifecycleConfig,
}

pub struct KeyLifecycleServiceBuilder {
    store: Arc<dyn KeyStore>,
    generator: Arc<dyn KeyMaterialGenerator>,
    clock: Arc<dyn Clock>,
    legacy: Arc<dyn LegacyApiKeys>,
    config: LifecycleConfig,
}

impl KeyLifecycleServiceBuilder {
    pub fn generator(mut self, generator: Arc<dyn KeyMaterialGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn legacy_api_keys(mut self, legacy: Arc<dyn LegacyApiKeys>) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> KeyLifecycleService {
        let engine = RotationEngine::new(self.store, self.generator, self.clock, self.config.retry);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        KeyLifecycleService {
            engine: Arc::new(engine),
            locks: Arc::new(DashMap::new()),
            legacy: self.legacy,
            events,
            config: self.config,
        }
    }
}

impl KeyLifecycleService {
    pub fn builder(store: Arc<dyn KeyStore>) -> KeyLifecycleServiceBuilder {
        KeyLifecycleServiceBuilder {
            store,
            generator: Arc::new(LocalKeyMaterialGenerator),
            clock: Arc::new(SystemClock),
            legacy: Arc::new(StaticLegacyApiKeys::default()),
            config: LifecycleConfig::default(),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SigningKeyEvent> {
        self.events.subscribe()
    }

    pub async fn list_by_status(&self, tenant_id: &str) -> KeyResult<KeyListing> {
        let tenant_id = validate_tenant(tenant_id)?;
        let keys = self.engine.snapshot(tenant_id).await?;
        Ok(keys.listing())
    }

    pub async fn get_key(&self, tenant_id: &str, key_id: Uuid) -> KeyResult<SigningKeyView> {
        let record = self.find(tenant_id, key_id).await?;
        Ok(record.view())
    }

    pub async fn revocation_status(
        &self,
        tenant_id: &str,
        key_id: Uuid,
    ) -> KeyResult<RevocationEligibility> {
        let record = self.find(tenant_id, key_id).await?;
        Ok(policy::evaluate(&record, self.engine.now()))
    }

    pub async fn active_verification_material(
        &self,
        tenant_id: &str,
    ) -> KeyResult<VerificationMaterial> {
        let tenant_id = validate_tenant(tenant_id)?;
        let keys = self.engine.snapshot(tenant_id).await?;
        let active = keys.active.ok_or_else(|| {
            KeyLifecycleError::PreconditionFailed("tenant has no active signing key".to_string())
        })?;
        Ok(match active.public_jwk {
            Some(public_jwk) if !active.algorithm.is_symmetric() => {
                VerificationMaterial::Asymmetric {
                    key_id: active.id,
                    algorithm: active.algorithm,
                    public_jwk,
                }
            }
            _ => VerificationMaterial::SymmetricUnavailable {
                key_id: active.id,
                algorithm: active.algorithm,
            },
        })
    }

    /// Public keys still accepted for verification: standby, active and retired.
    pub async fn jwks(&self, tenant_id: &str) -> KeyResult<Jwks> {
        let tenant_id = validate_tenant(tenant_id)?;
        let keys = self.engine.snapshot(tenant_id).await?;
        let published = keys
            .iter()
            .filter(|record| record.status != KeyStatus::Revoked)
            .filter_map(published_jwk)
            .collect();
        Ok(Jwks { keys: published })
    }

    pub async fn create_standby(
        &self,
        tenant_id: &str,
        request: StandbyKeyRequest,
    ) -> KeyResult<SigningKeyView> {
        let tenant_id = validate_tenant(tenant_id)?;
        let algorithm = required_algorithm(request.algorithm.as_deref())?;
        let custom_material = request.private_key.is_some();

        let _guard = self.lock_tenant(tenant_id).await?;
        let record = self
            .engine
            .create_standby(tenant_id, algorithm, request.private_key)
            .await?;

        self.publish(
            &record,
            SigningKeyEventType::StandbyCreated,
            json!({ "algorithm": record.algorithm, "custom_material": custom_material }),
        );
        Ok(record.view())
    }

    pub async fn edit_standby(
        &self,
        tenant_id: &str,
        request: StandbyKeyRequest,
    ) -> KeyResult<SigningKeyView> {
        let tenant_id = validate_tenant(tenant_id)?;
        let algorithm = required_algorithm(request.algorithm.as_deref())?;

        let _guard = self.lock_tenant(tenant_id).await?;
        let record = self
            .engine
            .edit_standby(tenant_id, algorithm, request.private_key)
            .await?;

        self.publish(
            &record,
            SigningKeyEventType::StandbyUpdated,
            json!({ "algorithm": record.algorithm }),
        );
        Ok(record.view())
    }

    pub async fn delete_standby(&self, tenant_id: &str) -> KeyResult<SigningKeyView> {
        let tenant_id = validate_tenant(tenant_id)?;

        let _guard = self.lock_tenant(tenant_id).await?;
        let record = self.engine.delete_standby(tenant_id).await?;

        self.publish(
            &record,
            SigningKeyEventType::StandbyDeleted,
            json!({ "algorithm": record.algorithm }),
        );
        Ok(record.view())
    }

    pub async fn rotate(
        &self,
        tenant_id: &str,
        request: RotateKeysRequest,
    ) -> KeyResult<RotationSummary> {
        let tenant_id = validate_tenant(tenant_id)?;
        let fallback = request
            .fallback_algorithm
            .as_deref()
            .map(parse_algorithm)
            .transpose()?;

        let _guard = self.lock_tenant(tenant_id).await?;
        let legacy_enabled = self.legacy.enabled(tenant_id).await;
        let outcome = self
            .engine
            .rotate(tenant_id, fallback, legacy_enabled)
            .await?;

        if let Some(retired) = &outcome.retired {
            self.publish(
                retired,
                SigningKeyEventType::Retired,
                json!({ "replaced_by": outcome.activated.id }),
            );
        }
        for revoked in &outcome.revoked {
            self.publish(
                revoked,
                SigningKeyEventType::Revoked,
                json!({ "reason": "rotation" }),
            );
        }
        self.publish(
            &outcome.activated,
            SigningKeyEventType::Rotated,
            json!({
                "algorithm": outcome.activated.algorithm,
                "created": outcome.created,
                "previous_key_id": outcome.retired.as_ref().map(|key| key.id),
            }),
        );
        Ok(RotationSummary::from(&outcome))
    }

    pub async fn revoke(&self, tenant_id: &str, key_id: Uuid) -> KeyResult<SigningKeyView> {
        let tenant_id = validate_tenant(tenant_id)?;

        let _guard = self.lock_tenant(tenant_id).await?;
        let legacy_enabled = self.legacy.enabled(tenant_id).await;
        let record = self
            .engine
            .revoke(tenant_id, key_id, legacy_enabled)
            .await?;

        self.publish(
            &record,
            SigningKeyEventType::Revoked,
            json!({ "reason": "manual" }),
        );
        Ok(record.view())
    }

    pub async fn import_legacy_secret(
        &self,
        tenant_id: &str,
        request: ImportLegacySecret,
    ) -> KeyResult<SigningKeyView> {
        let tenant_id = validate_tenant(tenant_id)?;
        let secret = request
            .secret
            .ok_or_else(|| KeyLifecycleError::Validation("secret is required".to_string()))?;

        let _guard = self.lock_tenant(tenant_id).await?;
        let record = self.engine.import_legacy(tenant_id, secret).await?;

        self.publish(
            &record,
            SigningKeyEventType::LegacyImported,
            json!({ "algorithm": record.algorithm }),
        );
        Ok(record.view())
    }

    async fn find(&self, tenant_id: &str, key_id: Uuid) -> KeyResult<SigningKeyRecord> {
        let tenant_id = validate_tenant(tenant_id)?;
        let keys = self.engine.snapshot(tenant_id).await?;
        keys.find(key_id).cloned().ok_or(KeyLifecycleError::NotFound)
    }

    async fn lock_tenant(&self, tenant_id: &str) -> KeyResult<TenantLockGuard> {
        let lock = match self.locks.entry(tenant_id.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => entry.insert(Arc::new(Mutex::new(()))).clone(),
        };
        match tokio::time::timeout(self.config.lock_wait, lock.lock_owned()).await {
            Ok(guard) => Ok(TenantLockGuard {
                guard: Some(guard),
                locks: Arc::clone(&self.locks),
                tenant_id: tenant_id.to_string(),
            }),
            Err(_) => {
                warn!(
                    tenant_id,
                    wait_ms = self.config.lock_wait.as_millis() as u64,
                    "timed out waiting for tenant signing key lock"
                );
                Err(KeyLifecycleError::Busy)
            }
        }
    }

    fn publish(&self, record: &SigningKeyRecord, event_type: SigningKeyEventType, payload: Value) {
        info!(
            tenant_id = %record.tenant_id,
            key_id = %record.id,
            event = event_type.as_str(),
            status = %record.status,
            algorithm = %record.algorithm,
            "signing key transition committed"
        );
        let event = SigningKeyEvent::new(
            &record.tenant_id,
            record.id,
            event_type,
            payload,
            self.engine.now(),
        );
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Holds a tenant's mutation lock. On release the tenant's entry is evicted unless another
/// caller holds or awaits the same mutex, so the map only tracks tenants in use.
pub(crate) struct TenantLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    tenant_id: String,
}

impl Drop for TenantLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.tenant_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn validate_tenant(tenant_id: &str) -> KeyResult<&str> {
    if tenant_id.trim().is_empty() {
        return Err(KeyLifecycleError::Validation(
            "tenant id must not be empty".to_string(),
        ));
    }
    if tenant_id.len() > MAX_TENANT_ID_LEN || tenant_id.chars().any(char::is_whitespace) {
        return Err(KeyLifecycleError::Validation(format!(
            "tenant id must be at most {MAX_TENANT_ID_LEN} characters without whitespace"
        )));
    }
    Ok(tenant_id)
}

fn parse_algorithm(raw: &str) -> KeyResult<SigningAlgorithm> {
    SigningAlgorithm::from_str(raw).ok_or_else(|| {
        KeyLifecycleError::Validation(format!(
            "unsupported signing algorithm `{raw}` (expected one of HS256, RS256, ES256, EdDSA)"
        ))
    })
}

fn required_algorithm(raw: Option<&str>) -> KeyResult<SigningAlgorithm> {
    let raw =
        raw.ok_or_else(|| KeyLifecycleError::Validation("algorithm is required".to_string()))?;
    parse_algorithm(raw)
}

fn published_jwk(record: &SigningKeyRecord) -> Option<Value> {
    if record.algorithm.is_symmetric() {
        return None;
    }
    let mut jwk = record.public_jwk.clone()?;
    let params = jwk.as_object_mut()?;
    params.insert("kid".to_string(), json!(record.id.to_string()));
    params.insert("alg".to_string(), json!(record.algorithm.as_str()));
    params.insert("use".to_string(), json!("sig"));
    Some(jwk)
}
