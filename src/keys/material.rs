use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::{OsRng, RngCore};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use thiserror::Error;

use super::models::{KeyMaterial, PrivateMaterial, SigningAlgorithm};

/// Shortest shared secret accepted for HS256.
pub const MIN_HMAC_SECRET_LEN: usize = 32;

const HMAC_SECRET_BYTES: usize = 32;
const RSA_MODULUS_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("invalid {algorithm} signing key: {reason}")]
    Invalid {
        algorithm: SigningAlgorithm,
        reason: String,
    },
    #[error("{algorithm} key generation failed: {reason}")]
    Generation {
        algorithm: SigningAlgorithm,
        reason: String,
    },
}

impl MaterialError {
    fn invalid(algorithm: SigningAlgorithm, reason: impl ToString) -> Self {
        MaterialError::Invalid {
            algorithm,
            reason: reason.to_string(),
        }
    }

    fn generation(algorithm: SigningAlgorithm, reason: impl ToString) -> Self {
        MaterialError::Generation {
            algorithm,
            reason: reason.to_string(),
        }
    }
}

/// key: signing-keys-material
/// Key-generation collaborator. Produces opaque private material plus the public JWK
/// parameters for asymmetric algorithms.
pub trait KeyMaterialGenerator: Send + Sync {
    fn generate(&self, algorithm: SigningAlgorithm) -> Result<KeyMaterial, MaterialError>;

    /// Accepts caller-supplied ("custom") private material and derives its public half.
    fn import(
        &self,
        algorithm: SigningAlgorithm,
        private: &PrivateMaterial,
    ) -> Result<KeyMaterial, MaterialError>;
}

/// Generates material in-process. Private keys are PKCS#8 PEM for RS256/ES256, a
/// base64url Ed25519 seed for EdDSA, and a base64url random secret for HS256.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalKeyMaterialGenerator;

impl KeyMaterialGenerator for LocalKeyMaterialGenerator {
    fn generate(&self, algorithm: SigningAlgorithm) -> Result<KeyMaterial, MaterialError> {
        match algorithm {
            SigningAlgorithm::Hs256 => {
                let mut secret = [0u8; HMAC_SECRET_BYTES];
                OsRng.fill_bytes(&mut secret);
                Ok(KeyMaterial {
                    public_jwk: None,
                    private: PrivateMaterial::new(URL_SAFE_NO_PAD.encode(secret)),
                })
            }
            SigningAlgorithm::Rs256 => {
                let key = RsaPrivateKey::new(&mut OsRng, RSA_MODULUS_BITS)
                    .map_err(|err| MaterialError::generation(algorithm, err))?;
                rsa_material(&key).map_err(|reason| MaterialError::generation(algorithm, reason))
            }
            SigningAlgorithm::Es256 => {
                let key = p256::SecretKey::random(&mut OsRng);
                p256_material(&key).map_err(|reason| MaterialError::generation(algorithm, reason))
            }
            SigningAlgorithm::EdDsa => {
                let mut seed = [0u8; ed25519_dalek::SECRET_KEY_LENGTH];
                OsRng.fill_bytes(&mut seed);
                ed25519_material(&seed).map_err(|reason| MaterialError::generation(algorithm, reason))
            }
        }
    }

    fn import(
        &self,
        algorithm: SigningAlgorithm,
        private: &PrivateMaterial,
    ) -> Result<KeyMaterial, MaterialError> {
        let raw = private.expose().trim();
        match algorithm {
            SigningAlgorithm::Hs256 => {
                if raw.len() < MIN_HMAC_SECRET_LEN {
                    return Err(MaterialError::invalid(
                        algorithm,
                        format!("secret must be at least {MIN_HMAC_SECRET_LEN} characters"),
                    ));
                }
                Ok(KeyMaterial {
                    public_jwk: None,
                    private: PrivateMaterial::new(raw),
                })
            }
            SigningAlgorithm::Rs256 => {
                use rsa::pkcs1::DecodeRsaPrivateKey;
                use rsa::pkcs8::DecodePrivateKey;
                let key = RsaPrivateKey::from_pkcs8_pem(raw)
                    .or_else(|_| RsaPrivateKey::from_pkcs1_pem(raw))
                    .map_err(|err| MaterialError::invalid(algorithm, err))?;
                if key.size() * 8 < RSA_MODULUS_BITS {
                    return Err(MaterialError::invalid(
                        algorithm,
                        format!("modulus must be at least {RSA_MODULUS_BITS} bits"),
                    ));
                }
                rsa_material(&key).map_err(|reason| MaterialError::invalid(algorithm, reason))
            }
            SigningAlgorithm::Es256 => {
                use p256::pkcs8::DecodePrivateKey;
                let key = p256::SecretKey::from_pkcs8_pem(raw)
                    .map_err(|err| MaterialError::invalid(algorithm, err))?;
                p256_material(&key).map_err(|reason| MaterialError::invalid(algorithm, reason))
            }
            SigningAlgorithm::EdDsa => {
                let seed = URL_SAFE_NO_PAD
                    .decode(raw)
                    .map_err(|err| MaterialError::invalid(algorithm, err))?;
                ed25519_material(&seed).map_err(|reason| MaterialError::invalid(algorithm, reason))
            }
        }
    }
}

fn rsa_material(key: &RsaPrivateKey) -> Result<KeyMaterial, String> {
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| err.to_string())?;
    let public = RsaPublicKey::from(key);
    Ok(KeyMaterial {
        public_jwk: Some(json!({
            "kty": "RSA",
            "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        })),
        private: PrivateMaterial::new(pem.as_str()),
    })
}

fn p256_material(key: &p256::SecretKey) -> Result<KeyMaterial, String> {
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| err.to_string())?;
    let point = key.public_key().to_encoded_point(false);
    let x = point.x().ok_or("public point has no x coordinate")?;
    let y = point.y().ok_or("public point has no y coordinate")?;
    Ok(KeyMaterial {
        public_jwk: Some(json!({
            "kty": "EC",
            "crv": "P-256",
            "x": URL_SAFE_NO_PAD.encode(x),
            "y": URL_SAFE_NO_PAD.encode(y),
        })),
        private: PrivateMaterial::new(pem.as_str()),
    })
}

fn ed25519_material(seed: &[u8]) -> Result<KeyMaterial, String> {
    let seed: [u8; ed25519_dalek::SECRET_KEY_LENGTH] = seed.try_into().map_err(|_| {
        format!(
            "seed must be exactly {} bytes",
            ed25519_dalek::SECRET_KEY_LENGTH
        )
    })?;
    let signing = ed25519_dalek::SigningKey::from_bytes(&seed);
    Ok(KeyMaterial {
        public_jwk: Some(ed25519_jwk(signing.verifying_key().as_bytes())),
        private: PrivateMaterial::new(URL_SAFE_NO_PAD.encode(seed)),
    })
}

fn ed25519_jwk(public: &[u8]) -> Value {
    json!({
        "kty": "OKP",
        "crv": "Ed25519",
        "x": URL_SAFE_NO_PAD.encode(public),
    })
}
