use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::keys::models::{KeyStatus, SigningKeyRecord};

/// Minimum number of days a key must sit in `retired` before it may be revoked.
pub const REVOCATION_WINDOW_DAYS: i64 = 30;

pub fn revocation_window() -> Duration {
    Duration::days(REVOCATION_WINDOW_DAYS)
}

/// key: signing-keys-policy
/// True when `key` is retired and its transition clock is at least the window old.
pub fn can_revoke(key: &SigningKeyRecord, now: DateTime<Utc>) -> bool {
    key.status == KeyStatus::Retired && now - key.updated_at >= revocation_window()
}

/// Time left before a retired key becomes revocable, clamped at zero.
pub fn remaining_until_revocable(key: &SigningKeyRecord, now: DateTime<Utc>) -> Duration {
    let remaining = revocation_window() - (now - key.updated_at);
    if remaining < Duration::zero() {
        Duration::zero()
    } else {
        remaining
    }
}

/// `max(0, window - whole days elapsed)`.
pub fn days_remaining(key: &SigningKeyRecord, now: DateTime<Utc>) -> i64 {
    let elapsed = (now - key.updated_at).num_days();
    (REVOCATION_WINDOW_DAYS - elapsed).max(0)
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RevocationEligibility {
    pub key_id: Uuid,
    pub status: KeyStatus,
    pub revocable: bool,
    /// Only present for retired keys; other statuses never become revocable by waiting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<i64>,
}

pub fn evaluate(key: &SigningKeyRecord, now: DateTime<Utc>) -> RevocationEligibility {
    let retired = key.status == KeyStatus::Retired;
    RevocationEligibility {
        key_id: key.id,
        status: key.status,
        revocable: can_revoke(key, now),
        days_remaining: retired.then(|| days_remaining(key, now)),
        remaining_seconds: retired.then(|| remaining_until_revocable(key, now).num_seconds()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::models::{KeyMaterial, PrivateMaterial, SigningAlgorithm};
    use chrono::TimeZone;

    fn retired_at(updated_at: DateTime<Utc>) -> SigningKeyRecord {
        let mut record = SigningKeyRecord::new(
            "tenant-a",
            KeyStatus::Retired,
            SigningAlgorithm::Rs256,
            KeyMaterial {
                public_jwk: None,
                private: PrivateMaterial::new("pem"),
            },
            updated_at - Duration::days(90),
        );
        record.updated_at = updated_at;
        record
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn retired_for_29_days_is_not_revocable() {
        let key = retired_at(now() - Duration::days(29));
        assert!(!can_revoke(&key, now()));
        assert_eq!(days_remaining(&key, now()), 1);
        assert_eq!(remaining_until_revocable(&key, now()), Duration::days(1));
    }

    #[test]
    fn retired_for_exactly_30_days_is_revocable() {
        let key = retired_at(now() - Duration::days(30));
        assert!(can_revoke(&key, now()));
        assert_eq!(days_remaining(&key, now()), 0);
        assert_eq!(remaining_until_revocable(&key, now()), Duration::zero());
    }

    #[test]
    fn one_second_short_of_the_window_is_not_revocable() {
        let key = retired_at(now() - Duration::days(30) + Duration::seconds(1));
        assert!(!can_revoke(&key, now()));
        assert_eq!(remaining_until_revocable(&key, now()), Duration::seconds(1));
    }

    #[test]
    fn only_retired_keys_are_ever_revocable() {
        let mut key = retired_at(now() - Duration::days(400));
        for status in [KeyStatus::Standby, KeyStatus::Active, KeyStatus::Revoked] {
            key.status = status;
            assert!(!can_revoke(&key, now()), "{status} must not be revocable");
            let eligibility = evaluate(&key, now());
            assert!(!eligibility.revocable);
            assert_eq!(eligibility.days_remaining, None);
        }
    }

    #[test]
    fn evaluate_reports_countdown_for_retired_keys() {
        let key = retired_at(now() - Duration::days(12) - Duration::hours(3));
        let eligibility = evaluate(&key, now());
        assert!(!eligibility.revocable);
        assert_eq!(eligibility.days_remaining, Some(18));
        assert_eq!(
            eligibility.remaining_seconds,
            Some((Duration::days(18) - Duration::hours(3)).num_seconds())
        );
    }
}
