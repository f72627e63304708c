//! Signing key lifecycle: record model, eligibility policy, storage seam, rotation engine
//! and the tenant-facing service.

pub mod engine;
pub mod events;
pub mod material;
pub mod models;
pub mod policy;
pub mod service;
pub mod store;

pub use engine::{RetryPolicy, RotationEngine, RotationError, RotationOutcome};
pub use events::{SigningKeyEvent, SigningKeyEventType};
pub use material::{KeyMaterialGenerator, LocalKeyMaterialGenerator, MaterialError};
pub use models::{
    Jwks, KeyMaterial, KeyStatus, PrivateMaterial, SigningAlgorithm, SigningKeyRecord,
    SigningKeyView, VerificationMaterial,
};
pub use policy::{RevocationEligibility, REVOCATION_WINDOW_DAYS};
pub use service::{
    ImportLegacySecret, KeyLifecycleService, KeyLifecycleServiceBuilder, LegacyApiKeys,
    RotateKeysRequest, RotationSummary, StandbyKeyRequest, StaticLegacyApiKeys,
};
pub use store::{KeyListing, KeyStore, KeyWrite, KeysByStatus, MemoryKeyStore, StoreError};
