use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::keys::models::{KeyStatus, PrivateMaterial, SigningAlgorithm, SigningKeyRecord};
use crate::keys::store::{KeyStore, KeyWrite, StoreError};

/// key: signing-keys-pg-store
/// Postgres-backed key store. A commit is one transaction; partial unique indexes on
/// `(tenant_id) WHERE status = ...` back the single active/standby invariants.
#[derive(Clone)]
pub struct PgKeyStore {
    pool: PgPool,
}

impl PgKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct SigningKeyRow {
    id: Uuid,
    tenant_id: String,
    status: String,
    algorithm: String,
    public_jwk: Option<Value>,
    private_material: String,
    legacy: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SigningKeyRow> for SigningKeyRecord {
    type Error = StoreError;

    fn try_from(row: SigningKeyRow) -> Result<Self, Self::Error> {
        let status = KeyStatus::from_str(&row.status).ok_or_else(|| {
            StoreError::Decode(format!("key {} has unknown status `{}`", row.id, row.status))
        })?;
        let algorithm = SigningAlgorithm::from_str(&row.algorithm).ok_or_else(|| {
            StoreError::Decode(format!(
                "key {} has unknown algorithm `{}`",
                row.id, row.algorithm
            ))
        })?;
        Ok(SigningKeyRecord {
            id: row.id,
            tenant_id: row.tenant_id,
            status,
            algorithm,
            public_jwk: row.public_jwk,
            private_material: PrivateMaterial::new(row.private_material),
            legacy: row.legacy,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Maps driver failures onto the store taxonomy. Serialization failures, deadlocks and
/// connection-level trouble are transient; unique violations mean an invariant index fired.
pub fn classify(error: sqlx::Error) -> StoreError {
    let code = error
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());
    match code.as_deref() {
        Some("23505") => StoreError::Constraint(error.to_string()),
        Some("40001") | Some("40P01") => StoreError::Transient(error.to_string()),
        _ => match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StoreError::Transient(error.to_string())
            }
            other => StoreError::Database(other),
        },
    }
}

/// A unique violation on insert means another process committed a standby or active key for
/// the tenant after our snapshot. That is a lost race, not a broken tenant.
fn insert_conflict(error: StoreError, key_id: Uuid) -> StoreError {
    match error {
        StoreError::Constraint(_) => StoreError::Conflict { key_id },
        other => other,
    }
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn load(&self, tenant_id: &str) -> Result<Vec<SigningKeyRecord>, StoreError> {
        let rows = sqlx::query_as::<_, SigningKeyRow>(
            r#"
            SELECT id, tenant_id, status, algorithm, public_jwk, private_material,
                   legacy, version, created_at, updated_at
            FROM signing_keys
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.into_iter().map(SigningKeyRecord::try_from).collect()
    }

    async fn commit(&self, tenant_id: &str, writes: &[KeyWrite]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        for write in writes {
            apply_write(&mut tx, tenant_id, write).await?;
        }
        tx.commit().await.map_err(classify)?;
        Ok(())
    }
}

async fn apply_write(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    write: &KeyWrite,
) -> Result<(), StoreError> {
    match write {
        KeyWrite::Insert(record) => {
            sqlx::query(
                r#"
                INSERT INTO signing_keys (
                    tenant_id, id, status, algorithm, public_jwk, private_material,
                    legacy, version, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(tenant_id)
            .bind(record.id)
            .bind(record.status.as_str())
            .bind(record.algorithm.as_str())
            .bind(&record.public_jwk)
            .bind(record.private_material.expose())
            .bind(record.legacy)
            .bind(record.version)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|err| insert_conflict(classify(err), record.id))?;
        }
        KeyWrite::Update {
            record,
            expected_version,
        } => {
            let result = sqlx::query(
                r#"
                UPDATE signing_keys
                SET status = $3,
                    algorithm = $4,
                    public_jwk = $5,
                    private_material = $6,
                    legacy = $7,
                    version = $8,
                    updated_at = $9
                WHERE tenant_id = $1 AND id = $2 AND version = $10
                "#,
            )
            .bind(tenant_id)
            .bind(record.id)
            .bind(record.status.as_str())
            .bind(record.algorithm.as_str())
            .bind(&record.public_jwk)
            .bind(record.private_material.expose())
            .bind(record.legacy)
            .bind(record.version)
            .bind(record.updated_at)
            .bind(*expected_version)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict { key_id: record.id });
            }
        }
        KeyWrite::Delete {
            id,
            expected_version,
        } => {
            let result = sqlx::query(
                "DELETE FROM signing_keys WHERE tenant_id = $1 AND id = $2 AND version = $3",
            )
            .bind(tenant_id)
            .bind(*id)
            .bind(*expected_version)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict { key_id: *id });
            }
        }
    }
    Ok(())
}
