mod common;

use chrono::Duration;
use signing_keys::error::KeyLifecycleError;
use signing_keys::keys::{
    KeyStatus, KeyStore, MemoryKeyStore, RotateKeysRequest, SigningAlgorithm, SigningKeyEventType,
    StandbyKeyRequest,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{service, service_on, FlakyStore};

const TENANT: &str = "acme";

fn standby(algorithm: &str) -> StandbyKeyRequest {
    StandbyKeyRequest {
        algorithm: Some(algorithm.to_string()),
        private_key: None,
    }
}

fn fallback(algorithm: &str) -> RotateKeysRequest {
    RotateKeysRequest {
        fallback_algorithm: Some(algorithm.to_string()),
    }
}

#[tokio::test]
async fn standby_to_active_to_retired_to_revoked() {
    let (service, clock) = service();

    let k1 = service.create_standby(TENANT, standby("ES256")).await.unwrap();
    let listing = service.list_by_status(TENANT).await.unwrap();
    assert_eq!(listing.standby.as_ref().map(|key| key.id), Some(k1.id));
    assert_eq!(listing.standby.unwrap().algorithm, SigningAlgorithm::Es256);
    assert!(listing.active.is_none());

    let summary = service
        .rotate(TENANT, RotateKeysRequest::default())
        .await
        .unwrap();
    assert_eq!(summary.activated.id, k1.id);
    assert!(summary.retired.is_none());
    assert!(summary.revoked.is_empty());
    let listing = service.list_by_status(TENANT).await.unwrap();
    assert_eq!(listing.active.map(|key| key.id), Some(k1.id));
    assert!(listing.standby.is_none());

    let k2 = service.create_standby(TENANT, standby("RS256")).await.unwrap();
    let listing = service.list_by_status(TENANT).await.unwrap();
    assert_eq!(listing.active.map(|key| key.id), Some(k1.id));
    assert_eq!(listing.standby.map(|key| key.id), Some(k2.id));

    clock.advance(Duration::hours(2));
    service
        .rotate(TENANT, RotateKeysRequest::default())
        .await
        .unwrap();
    let listing = service.list_by_status(TENANT).await.unwrap();
    let active = listing.active.unwrap();
    assert_eq!(active.id, k2.id);
    assert_eq!(active.algorithm, SigningAlgorithm::Rs256);
    assert_eq!(listing.retired.len(), 1);
    assert_eq!(listing.retired[0].id, k1.id);
    assert!(listing.standby.is_none());
    assert!(listing.revoked.is_empty());

    let err = service.revoke(TENANT, k1.id).await.unwrap_err();
    assert!(
        matches!(err, KeyLifecycleError::NotEligibleYet { remaining } if remaining == Duration::days(30))
    );

    clock.advance(Duration::days(30));
    let revoked = service.revoke(TENANT, k1.id).await.unwrap();
    assert_eq!(revoked.status, KeyStatus::Revoked);

    let listing = service.list_by_status(TENANT).await.unwrap();
    assert_eq!(listing.active.map(|key| key.id), Some(k2.id));
    assert!(listing.retired.is_empty());
    assert_eq!(listing.revoked.len(), 1);
    assert_eq!(listing.revoked[0].id, k1.id);

    // Revoked is terminal.
    let err = service.revoke(TENANT, k1.id).await.unwrap_err();
    assert!(matches!(err, KeyLifecycleError::PreconditionFailed(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotations_are_totally_ordered() {
    let (service, _clock) = service();
    let first = service.rotate(TENANT, fallback("ES256")).await.unwrap();

    let left = service.clone();
    let right = service.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { left.rotate(TENANT, fallback("ES256")).await }),
        tokio::spawn(async move { right.rotate(TENANT, fallback("EdDSA")).await }),
    );
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();

    // Whichever ran second retired the key the other one activated.
    let (earlier, later) = if b.retired.as_ref().map(|key| key.id) == Some(a.activated.id) {
        (a, b)
    } else {
        (b, a)
    };
    assert_eq!(
        earlier.retired.as_ref().map(|key| key.id),
        Some(first.activated.id)
    );
    assert_eq!(
        later.retired.as_ref().map(|key| key.id),
        Some(earlier.activated.id)
    );
    assert_eq!(
        later.revoked.iter().map(|key| key.id).collect::<Vec<_>>(),
        vec![first.activated.id]
    );

    let listing = service.list_by_status(TENANT).await.unwrap();
    assert_eq!(listing.active.map(|key| key.id), Some(later.activated.id));
    assert_eq!(listing.retired.len(), 1);
    assert_eq!(listing.revoked.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_operations_never_break_cardinality() {
    let store = Arc::new(MemoryKeyStore::new());
    let (service, _clock) = service_on(store.clone());

    let mut handles = Vec::new();
    for round in 0..24 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            match round % 3 {
                0 => service.create_standby(TENANT, standby("ES256")).await.map(|_| ()),
                1 => service.rotate(TENANT, fallback("HS256")).await.map(|_| ()),
                _ => service.delete_standby(TENANT).await.map(|_| ()),
            }
        }));
    }
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) | Err(KeyLifecycleError::PreconditionFailed(_)) => {}
            Err(other) => panic!("unexpected failure: {other:?}"),
        }
    }

    let records = store.load(TENANT).await.unwrap();
    let count = |status| records.iter().filter(|key| key.status == status).count();
    assert_eq!(count(KeyStatus::Active), 1);
    assert!(count(KeyStatus::Standby) <= 1);
    assert!(count(KeyStatus::Retired) <= 1);
}

#[tokio::test]
async fn scripted_operation_sequence_preserves_invariants() {
    let store = Arc::new(MemoryKeyStore::new());
    let (service, clock) = service_on(store.clone());
    let algorithms = ["HS256", "RS256", "ES256", "EdDSA"];

    // Small linear congruential generator keeps the sequence reproducible.
    let mut seed: u64 = 0x5eed;
    let mut next = || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) as usize
    };

    for _ in 0..300 {
        let algorithm = algorithms[next() % algorithms.len()];
        let result = match next() % 6 {
            0 => service.create_standby(TENANT, standby(algorithm)).await.map(|_| ()),
            1 => service.edit_standby(TENANT, standby(algorithm)).await.map(|_| ()),
            2 => service.delete_standby(TENANT).await.map(|_| ()),
            3 => service.rotate(TENANT, fallback(algorithm)).await.map(|_| ()),
            4 => {
                let listing = service.list_by_status(TENANT).await.unwrap();
                match listing.retired.first() {
                    Some(key) => service.revoke(TENANT, key.id).await.map(|_| ()),
                    None => Ok(()),
                }
            }
            _ => {
                clock.advance(Duration::days((next() % 20) as i64));
                Ok(())
            }
        };
        match result {
            Ok(())
            | Err(KeyLifecycleError::PreconditionFailed(_))
            | Err(KeyLifecycleError::NotEligibleYet { .. }) => {}
            Err(other) => panic!("unexpected failure: {other:?}"),
        }

        let records = store.load(TENANT).await.unwrap();
        for status in [KeyStatus::Active, KeyStatus::Standby] {
            assert!(records.iter().filter(|key| key.status == status).count() <= 1);
        }
    }
}

#[tokio::test]
async fn transient_storage_failure_is_retried_once_per_attempt() {
    let store = Arc::new(FlakyStore::new(2));
    let (service, _clock) = service_on(store.clone());
    let mut events = service.subscribe();

    let summary = service.rotate(TENANT, fallback("ES256")).await.unwrap();
    assert!(summary.created);
    assert_eq!(store.commits.load(Ordering::SeqCst), 3);

    // One committed rotation, one notification.
    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, SigningKeyEventType::Rotated);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn exhausted_retries_surface_storage_error_and_apply_nothing() {
    let store = Arc::new(FlakyStore::new(u32::MAX));
    let (service, _clock) = service_on(store.clone());

    let err = service.rotate(TENANT, fallback("ES256")).await.unwrap_err();
    assert!(matches!(err, KeyLifecycleError::Storage(_)));
    assert!(err.is_retryable());
    assert_eq!(store.commits.load(Ordering::SeqCst), 3);
    assert!(store.inner.load(TENANT).await.unwrap().is_empty());
}
