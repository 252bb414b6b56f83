//! Caller identity verification

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DeployerError;

/// The authenticated principal making a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    pub uid: String,
}

impl CallerIdentity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

/// Claims carried by a caller token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Explicit user ID, preferred over `sub` when present
    #[serde(default)]
    pub user_id: Option<String>,

    /// Expiration timestamp
    pub exp: i64,

    /// Issued at timestamp
    #[serde(default)]
    pub iat: Option<i64>,

    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,
}

/// Verifies HS256 caller tokens
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &SecretString, issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    /// Verify a raw token and extract the caller
    pub fn verify(&self, token: &str) -> Result<CallerIdentity, DeployerError> {
        let data = decode::<CallerClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("Caller token rejected: {}", e);
            DeployerError::Unauthenticated("Invalid or expired credentials".to_string())
        })?;

        let uid = data.claims.user_id.unwrap_or(data.claims.sub);
        if uid.trim().is_empty() {
            return Err(DeployerError::Unauthenticated(
                "Credentials carry no user".to_string(),
            ));
        }

        Ok(CallerIdentity { uid })
    }

    /// Resolve the caller from an `Authorization` header value.
    ///
    /// A missing header yields `Ok(None)`; a present but unusable one is an
    /// error.
    pub fn caller_from_header(
        &self,
        header: Option<&str>,
    ) -> Result<Option<CallerIdentity>, DeployerError> {
        let Some(header) = header else {
            return Ok(None);
        };

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                DeployerError::Unauthenticated("Malformed Authorization header".to_string())
            })?;

        self.verify(token).map(Some)
    }
}
