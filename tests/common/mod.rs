#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use signing_keys::clock::ManualClock;
use signing_keys::config::LifecycleConfig;
use signing_keys::keys::{
    KeyLifecycleService, KeyMaterial, KeyMaterialGenerator, KeyStore, KeyWrite, MaterialError,
    MemoryKeyStore, PrivateMaterial, RetryPolicy, SigningAlgorithm, SigningKeyRecord,
    StaticLegacyApiKeys, StoreError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Deterministic key material; avoids paying for RSA generation in every test.
#[derive(Default)]
pub struct FakeGenerator {
    issued: AtomicU32,
}

impl KeyMaterialGenerator for FakeGenerator {
    fn generate(&self, algorithm: SigningAlgorithm) -> Result<KeyMaterial, MaterialError> {
        let serial = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(KeyMaterial {
            public_jwk: (!algorithm.is_symmetric()).then(|| json!({"kty": "FAKE", "serial": serial})),
            private: PrivateMaterial::new(format!("{algorithm}-{serial}")),
        })
    }

    fn import(
        &self,
        algorithm: SigningAlgorithm,
        private: &PrivateMaterial,
    ) -> Result<KeyMaterial, MaterialError> {
        Ok(KeyMaterial {
            public_jwk: (!algorithm.is_symmetric()).then(|| json!({"kty": "FAKE"})),
            private: private.clone(),
        })
    }
}

/// Store whose commits fail transiently a fixed number of times before delegating.
pub struct FlakyStore {
    pub inner: MemoryKeyStore,
    failures: AtomicU32,
    pub commits: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryKeyStore::new(),
            failures: AtomicU32::new(failures),
            commits: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl KeyStore for FlakyStore {
    async fn load(&self, tenant_id: &str) -> Result<Vec<SigningKeyRecord>, StoreError> {
        self.inner.load(tenant_id).await
    }

    async fn commit(&self, tenant_id: &str, writes: &[KeyWrite]) -> Result<(), StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Transient("connection reset by peer".into()));
        }
        self.inner.commit(tenant_id, writes).await
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

pub fn test_config() -> LifecycleConfig {
    LifecycleConfig {
        lock_wait: Duration::from_millis(500),
        retry: RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        },
    }
}

pub fn service_on(store: Arc<dyn KeyStore>) -> (KeyLifecycleService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let service = KeyLifecycleService::builder(store)
        .generator(Arc::new(FakeGenerator::default()))
        .clock(clock.clone())
        .legacy_api_keys(Arc::new(StaticLegacyApiKeys::default()))
        .config(test_config())
        .build();
    (service, clock)
}

pub fn service() -> (KeyLifecycleService, Arc<ManualClock>) {
    service_on(Arc::new(MemoryKeyStore::new()))
}
