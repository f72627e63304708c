use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// key: signing-keys-event
/// Notification envelope broadcast after a transition commits. Not persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningKeyEvent {
    pub id: Uuid,
    pub tenant_id: String,
    pub key_id: Uuid,
    pub event_type: SigningKeyEventType,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl SigningKeyEvent {
    pub fn new(
        tenant_id: &str,
        key_id: Uuid,
        event_type: SigningKeyEventType,
        payload: Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            key_id,
            event_type,
            payload,
            occurred_at,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SigningKeyEventType {
    StandbyCreated,
    StandbyUpdated,
    StandbyDeleted,
    Rotated,
    Retired,
    Revoked,
    LegacyImported,
}

impl SigningKeyEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningKeyEventType::StandbyCreated => "standby_created",
            SigningKeyEventType::StandbyUpdated => "standby_updated",
            SigningKeyEventType::StandbyDeleted => "standby_deleted",
            SigningKeyEventType::Rotated => "rotated",
            SigningKeyEventType::Retired => "retired",
            SigningKeyEventType::Revoked => "revoked",
            SigningKeyEventType::LegacyImported => "legacy_imported",
        }
    }
}
