//! ES256 JWS signing of upload payloads.
//!
//! The gateway expects the exposure list as a JWS compact serialization:
//! `base64url(header) "." base64url(payload) "." base64url(r || s)` with the
//! protected header `{"alg":"ES256"}`.

use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use p256::SecretKey;
use serde::{Deserialize, Serialize};

use crate::error::SigningError;

/// Supplies the P-256 private key used for signing.
pub trait SigningKeyProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns `SigningError::KeyUnavailable` if the key cannot be obtained.
    fn signing_key(&self) -> Result<SigningKey, SigningError>;
}

/// Reads a PKCS#8 PEM private key from disk on every request.
#[derive(Debug, Clone)]
pub struct PemFileKeyProvider {
    path: PathBuf,
}

impl PemFileKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SigningKeyProvider for PemFileKeyProvider {
    fn signing_key(&self) -> Result<SigningKey, SigningError> {
        let pem = std::fs::read_to_string(&self.path).map_err(|e| {
            SigningError::KeyUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        let secret = SecretKey::from_pkcs8_pem(&pem).map_err(|e| {
            SigningError::KeyUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        Ok(SigningKey::from(secret))
    }
}

/// Holds a key in memory.
#[derive(Clone)]
pub struct StaticKeyProvider {
    key: SigningKey,
}

impl StaticKeyProvider {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }
}

impl SigningKeyProvider for StaticKeyProvider {
    fn signing_key(&self) -> Result<SigningKey, SigningError> {
        Ok(self.key.clone())
    }
}

/// Turns payload bytes into the string sent as the upload `payload` field.
pub trait PayloadSigner: Send + Sync {
    /// # Errors
    ///
    /// Any failure must abort the chunk being uploaded.
    fn sign(&self, payload: &[u8]) -> Result<String, SigningError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct JwsHeader {
    alg: String,
}

const ALGORITHM: &str = "ES256";

/// [`PayloadSigner`] producing an ES256 JWS compact serialization.
pub struct JwsSigner {
    keys: Arc<dyn SigningKeyProvider>,
}

impl JwsSigner {
    pub fn new(keys: Arc<dyn SigningKeyProvider>) -> Self {
        Self { keys }
    }
}

impl PayloadSigner for JwsSigner {
    fn sign(&self, payload: &[u8]) -> Result<String, SigningError> {
        let key = self.keys.signing_key()?;
        let header = serde_json::to_vec(&JwsHeader {
            alg: ALGORITHM.to_string(),
        })?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature: Signature = key
            .try_sign(signing_input.as_bytes())
            .map_err(|e| SigningError::Signature(e.to_string()))?;
        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }
}

/// Verifies a compact ES256 JWS and returns its payload.
///
/// # Errors
///
/// Returns `SigningError::Signature` if the token is malformed, uses another
/// algorithm or does not verify under `key`.
pub fn verify_compact(token: &str, key: &VerifyingKey) -> Result<Vec<u8>, SigningError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(SigningError::Signature(
            "expected three dot-separated segments".to_string(),
        ));
    };

    let decode = |segment: &str| {
        URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|e| SigningError::Signature(format!("invalid base64url: {e}")))
    };

    let header: JwsHeader = serde_json::from_slice(&decode(header_b64)?)?;
    if header.alg != ALGORITHM {
        return Err(SigningError::Signature(format!(
            "unsupported algorithm {}",
            header.alg
        )));
    }

    let signature = Signature::from_slice(&decode(signature_b64)?)
        .map_err(|e| SigningError::Signature(e.to_string()))?;
    let signing_input = format!("{header_b64}.{payload_b64}");
    key.verify(signing_input.as_bytes(), &signature)
        .map_err(|e| SigningError::Signature(e.to_string()))?;

    decode(payload_b64)
}
