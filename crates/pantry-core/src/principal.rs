//! Principal verification: bearer extraction and the identity oracle seam.
//!
//! Extraction is pure and runs before any request-shape checks; `verify` may do I/O and runs
//! after them.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};

use crate::error::CredentialFault;

const BEARER_PREFIX: &str = "Bearer ";

/// Token text pulled from an `Authorization: Bearer <token>` header. Not yet verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BearerToken<'a>(&'a str);

impl<'a> BearerToken<'a> {
    pub fn as_str(&self) -> &'a str {
        self.0
    }
}

/// Authenticated identity for the lifetime of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub uid: String,
    pub claims: Map<String, Value>,
}

/// Pulls the bearer token out of a raw `Authorization` header value.
pub fn extract_bearer(header: Option<&str>) -> Result<BearerToken<'_>, CredentialFault> {
    let token = header
        .and_then(|h| h.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(CredentialFault::Missing)?;
    Ok(BearerToken(token))
}

/// Trusted issuer that either vouches for a token or rejects it.
#[async_trait]
pub trait IdentityOracle: Send + Sync {
    async fn verify(&self, token: BearerToken<'_>) -> Result<Principal, CredentialFault>;
}

/// Key material for signature checks.
#[derive(Clone)]
pub enum VerificationKey {
    Hs256Secret(String),
    Rs256Pem(String),
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationKey::Hs256Secret(_) => f.write_str("Hs256Secret(<redacted>)"),
            VerificationKey::Rs256Pem(_) => f.write_str("Rs256Pem(..)"),
        }
    }
}

/// Verifies issuer-signed JWTs locally: signature, `exp`, `iss` and (optionally) `aud`.
pub struct JwtIdentityOracle {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityOracle {
    pub fn new(
        key: &VerificationKey,
        issuer: &str,
        audience: Option<&str>,
    ) -> Result<Self, jsonwebtoken::errors::Error> {
        let (key, algorithm) = match key {
            VerificationKey::Hs256Secret(secret) => {
                (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
            }
            VerificationKey::Rs256Pem(pem) => {
                (DecodingKey::from_rsa_pem(pem.as_bytes())?, Algorithm::RS256)
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[issuer]);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Ok(Self { key, validation })
    }
}

#[async_trait]
impl IdentityOracle for JwtIdentityOracle {
    async fn verify(&self, token: BearerToken<'_>) -> Result<Principal, CredentialFault> {
        let data = jsonwebtoken::decode::<Map<String, Value>>(
            token.as_str(),
            &self.key,
            &self.validation,
        )
        .map_err(|e| CredentialFault::Invalid(e.to_string()))?;

        let claims = data.claims;
        let uid = claims
            .get("sub")
            .or_else(|| claims.get("user_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CredentialFault::Invalid("token has no subject".into()))?;

        Ok(Principal { uid, claims })
    }
}
