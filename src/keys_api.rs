use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::error::KeyResult;
use crate::keys::{
    ImportLegacySecret, Jwks, KeyLifecycleService, KeyListing, RevocationEligibility,
    RotateKeysRequest, RotationSummary, SigningKeyView, StandbyKeyRequest, VerificationMaterial,
};

/// key: signing-keys-api
/// HTTP handlers for the per-tenant signing key lifecycle. Expects a `KeyLifecycleService`
/// extension layer.
pub fn routes() -> Router {
    Router::new()
        .route("/api/projects/:tenant_id/signing-keys", get(list_keys))
        .route(
            "/api/projects/:tenant_id/signing-keys/standby",
            post(create_standby)
                .patch(edit_standby)
                .delete(delete_standby),
        )
        .route(
            "/api/projects/:tenant_id/signing-keys/rotate",
            post(rotate_keys),
        )
        .route(
            "/api/projects/:tenant_id/signing-keys/legacy",
            post(import_legacy),
        )
        .route(
            "/api/projects/:tenant_id/signing-keys/verification",
            get(verification_material),
        )
        .route(
            "/api/projects/:tenant_id/signing-keys/:key_id",
            get(get_key),
        )
        .route(
            "/api/projects/:tenant_id/signing-keys/:key_id/revocation",
            get(revocation_status),
        )
        .route(
            "/api/projects/:tenant_id/signing-keys/:key_id/revoke",
            post(revoke_key),
        )
        .route("/api/projects/:tenant_id/.well-known/jwks.json", get(jwks))
}

async fn list_keys(
    Extension(service): Extension<KeyLifecycleService>,
    Path(tenant_id): Path<String>,
) -> KeyResult<Json<KeyListing>> {
    Ok(Json(service.list_by_status(&tenant_id).await?))
}

async fn create_standby(
    Extension(service): Extension<KeyLifecycleService>,
    Path(tenant_id): Path<String>,
    Json(payload): Json<StandbyKeyRequest>,
) -> KeyResult<(StatusCode, Json<SigningKeyView>)> {
    let key = service.create_standby(&tenant_id, payload).await?;
    Ok((StatusCode::CREATED, Json(key)))
}

async fn edit_standby(
    Extension(service): Extension<KeyLifecycleService>,
    Path(tenant_id): Path<String>,
    Json(payload): Json<StandbyKeyRequest>,
) -> KeyResult<Json<SigningKeyView>> {
    Ok(Json(service.edit_standby(&tenant_id, payload).await?))
}

async fn delete_standby(
    Extension(service): Extension<KeyLifecycleService>,
    Path(tenant_id): Path<String>,
) -> KeyResult<Json<SigningKeyView>> {
    Ok(Json(service.delete_standby(&tenant_id).await?))
}

async fn rotate_keys(
    Extension(service): Extension<KeyLifecycleService>,
    Path(tenant_id): Path<String>,
    payload: Option<Json<RotateKeysRequest>>,
) -> KeyResult<Json<RotationSummary>> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    Ok(Json(service.rotate(&tenant_id, request).await?))
}

async fn import_legacy(
    Extension(service): Extension<KeyLifecycleService>,
    Path(tenant_id): Path<String>,
    Json(payload): Json<ImportLegacySecret>,
) -> KeyResult<(StatusCode, Json<SigningKeyView>)> {
    let key = service.import_legacy_secret(&tenant_id, payload).await?;
    Ok((StatusCode::CREATED, Json(key)))
}

async fn verification_material(
    Extension(service): Extension<KeyLifecycleService>,
    Path(tenant_id): Path<String>,
) -> KeyResult<Json<VerificationMaterial>> {
    Ok(Json(service.active_verification_material(&tenant_id).await?))
}

async fn get_key(
    Extension(service): Extension<KeyLifecycleService>,
    Path((tenant_id, key_id)): Path<(String, Uuid)>,
) -> KeyResult<Json<SigningKeyView>> {
    Ok(Json(service.get_key(&tenant_id, key_id).await?))
}

async fn revocation_status(
    Extension(service): Extension<KeyLifecycleService>,
    Path((tenant_id, key_id)): Path<(String, Uuid)>,
) -> KeyResult<Json<RevocationEligibility>> {
    Ok(Json(service.revocation_status(&tenant_id, key_id).await?))
}

async fn revoke_key(
    Extension(service): Extension<KeyLifecycleService>,
    Path((tenant_id, key_id)): Path<(String, Uuid)>,
) -> KeyResult<Json<SigningKeyView>> {
    Ok(Json(service.revoke(&tenant_id, key_id).await?))
}

async fn jwks(
    Extension(service): Extension<KeyLifecycleService>,
    Path(tenant_id): Path<String>,
) -> KeyResult<Json<Jwks>> {
    Ok(Json(service.jwks(&tenant_id).await?))
}
