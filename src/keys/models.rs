use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// key: signing-keys-model
/// Canonical signing key record. Only the rotation engine produces new versions of it.
#[derive(Clone, Debug, PartialEq)]
pub struct SigningKeyRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub status: KeyStatus,
    pub algorithm: SigningAlgorithm,
    pub public_jwk: Option<Value>,
    pub private_material: PrivateMaterial,
    pub legacy: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SigningKeyRecord {
    pub fn new(
        tenant_id: &str,
        status: KeyStatus,
        algorithm: SigningAlgorithm,
        material: KeyMaterial,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            status,
            algorithm,
            public_jwk: material.public_jwk,
            private_material: material.private,
            legacy: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the next version of this record with `status` applied. `updated_at` is the
    /// transition clock the eligibility policy reads.
    pub fn transitioned(&self, status: KeyStatus, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.updated_at = now;
        next.version += 1;
        next
    }

    pub fn with_material(
        &self,
        algorithm: SigningAlgorithm,
        material: KeyMaterial,
        now: DateTime<Utc>,
    ) -> Self {
        let mut next = self.clone();
        next.algorithm = algorithm;
        next.public_jwk = material.public_jwk;
        next.private_material = material.private;
        next.updated_at = now;
        next.version += 1;
        next
    }

    pub fn view(&self) -> SigningKeyView {
        SigningKeyView::from(self)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Standby,
    Active,
    Retired,
    Revoked,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Standby => "standby",
            KeyStatus::Active => "active",
            KeyStatus::Retired => "retired",
            KeyStatus::Revoked => "revoked",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "standby" => Some(KeyStatus::Standby),
            "active" => Some(KeyStatus::Active),
            "retired" => Some(KeyStatus::Retired),
            "revoked" => Some(KeyStatus::Revoked),
            _ => None,
        }
    }

    /// Listing order: standby, active, retired, revoked.
    pub fn rank(&self) -> u8 {
        match self {
            KeyStatus::Standby => 0,
            KeyStatus::Active => 1,
            KeyStatus::Retired => 2,
            KeyStatus::Revoked => 3,
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// key: signing-keys-algorithm
/// Closed set of JWT signing algorithms a tenant may hold keys for.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    #[serde(rename = "HS256")]
    Hs256,
    #[serde(rename = "RS256")]
    Rs256,
    #[serde(rename = "ES256")]
    Es256,
    #[serde(rename = "EdDSA")]
    EdDsa,
}

impl SigningAlgorithm {
    pub const ALL: [SigningAlgorithm; 4] = [
        SigningAlgorithm::Hs256,
        SigningAlgorithm::Rs256,
        SigningAlgorithm::Es256,
        SigningAlgorithm::EdDsa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::Hs256 => "HS256",
            SigningAlgorithm::Rs256 => "RS256",
            SigningAlgorithm::Es256 => "ES256",
            SigningAlgorithm::EdDsa => "EdDSA",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|algorithm| algorithm.as_str() == value)
    }

    /// HMAC keys have no public half; everything else can be published.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, SigningAlgorithm::Hs256)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized private key or shared secret. Accepted from callers, never serialized back out
/// and never printed.
#[derive(Clone, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct PrivateMaterial(String);

impl PrivateMaterial {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateMaterial(<redacted>)")
    }
}

/// Output of the key-generation collaborator.
#[derive(Clone, Debug)]
pub struct KeyMaterial {
    pub public_jwk: Option<Value>,
    pub private: PrivateMaterial,
}

/// key: signing-keys-view
/// Public projection of a key record; what leaves the service boundary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SigningKeyView {
    pub id: Uuid,
    pub tenant_id: String,
    pub status: KeyStatus,
    pub algorithm: SigningAlgorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_jwk: Option<Value>,
    pub legacy: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&SigningKeyRecord> for SigningKeyView {
    fn from(record: &SigningKeyRecord) -> Self {
        Self {
            id: record.id,
            tenant_id: record.tenant_id.clone(),
            status: record.status,
            algorithm: record.algorithm,
            public_jwk: record.public_jwk.clone(),
            legacy: record.legacy,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Public verification material for the active key, handed to JWKS/exposure collaborators.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationMaterial {
    Asymmetric {
        key_id: Uuid,
        algorithm: SigningAlgorithm,
        public_jwk: Value,
    },
    SymmetricUnavailable {
        key_id: Uuid,
        algorithm: SigningAlgorithm,
    },
}

/// key: signing-keys-jwks
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Jwks {
    pub keys: Vec<Value>,
}
