//! Signed, expiring session tokens.
//!
//! A token is `{nonce}.{expires_at}.{signature}` where the signature is an
//! HMAC-SHA256 over `{nonce}.{expires_at}`. A token is only accepted while it
//! is unexpired, not revoked, and still the current token of some user.

use std::fs;
use std::path::Path;

use axum::http::{header, HeaderMap};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;

use crate::config::AuthConfig;
use crate::db::models::{RevokedToken, User};
use crate::error::AppError;
use crate::store::UserStore;

type HmacSha256 = Hmac<Sha256>;

const SECRET_FILE: &str = "token_secret";

pub const TOKEN_REQUIRED: &str = "Token requerido";
pub const TOKEN_INVALID: &str = "Token inválido";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Bad signature")]
    BadSignature,

    #[error("Token expired")]
    Expired,

    #[error("Invalid signing key")]
    Key,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

pub struct TokenSigner {
    key: Vec<u8>,
    ttl_secs: i64,
}

impl TokenSigner {
    /// Lifetimes too long for an `i64` of seconds saturate.
    pub fn new(key: Vec<u8>, session_hours: u64) -> Self {
        let ttl_secs = i64::try_from(session_hours)
            .ok()
            .and_then(|hours| hours.checked_mul(3600))
            .unwrap_or(i64::MAX);
        Self { key, ttl_secs }
    }

    /// Use the configured secret, or the one persisted in `data_dir`,
    /// generating it on first start.
    pub fn load_or_create(data_dir: &Path, config: &AuthConfig) -> anyhow::Result<Self> {
        if let Some(ref secret) = config.token_secret {
            return Ok(Self::new(hex::decode(secret.trim())?, config.session_hours));
        }

        let path = data_dir.join(SECRET_FILE);
        let key = if path.exists() {
            hex::decode(fs::read_to_string(&path)?.trim())?
        } else {
            let key: [u8; 32] = rand::thread_rng().gen();
            fs::write(&path, hex::encode(key))?;
            tracing::info!("Created new token signing key at {}", path.display());
            key.to_vec()
        };
        Ok(Self::new(key, config.session_hours))
    }

    pub fn issue(&self) -> Result<IssuedToken, TokenError> {
        self.issue_at(chrono::Utc::now().timestamp())
    }

    pub fn issue_at(&self, now: i64) -> Result<IssuedToken, TokenError> {
        let nonce: [u8; 16] = rand::thread_rng().gen();
        let expires_at = now.saturating_add(self.ttl_secs);
        let payload = format!("{}.{}", hex::encode(nonce), expires_at);
        let signature = hex::encode(self.sign(&payload)?);
        Ok(IssuedToken {
            token: format!("{}.{}", payload, signature),
            expires_at,
        })
    }

    /// Check signature and expiry. Returns the expiry on success.
    pub fn verify(&self, token: &str) -> Result<i64, TokenError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<i64, TokenError> {
        let expires_at = self.signed_expiry(token)?;
        if expires_at <= now {
            return Err(TokenError::Expired);
        }
        Ok(expires_at)
    }

    /// Expiry of a correctly signed token, expired or not.
    pub fn signed_expiry(&self, token: &str) -> Result<i64, TokenError> {
        let (payload, signature) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        let (_nonce, expires) = payload.split_once('.').ok_or(TokenError::Malformed)?;
        let expires_at: i64 = expires.parse().map_err(|_| TokenError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::Key)?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;
        Ok(expires_at)
    }

    fn sign(&self, payload: &str) -> Result<Vec<u8>, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::Key)?;
        mac.update(payload.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Token from the `Authorization` header, raw or with a `Bearer ` prefix.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve a presented token to its user.
pub async fn resolve_token(
    users: &dyn UserStore,
    signer: &TokenSigner,
    token: &str,
) -> Result<User, AppError> {
    if let Err(e) = signer.verify(token) {
        tracing::debug!("Rejected token: {}", e);
        return Err(AppError::auth(TOKEN_INVALID));
    }
    if users.is_revoked(token).await? {
        return Err(AppError::auth(TOKEN_INVALID));
    }
    users
        .user_by_token(token)
        .await?
        .ok_or_else(|| AppError::auth(TOKEN_INVALID))
}

/// Put a token on the revocation list for the rest of its lifetime.
/// Tokens that fail the signature check are ignored.
pub async fn revoke_token(
    users: &dyn UserStore,
    signer: &TokenSigner,
    token: &str,
) -> Result<(), AppError> {
    let Ok(expires_at) = signer.signed_expiry(token) else {
        return Ok(());
    };
    if expires_at <= chrono::Utc::now().timestamp() {
        return Ok(());
    }
    users
        .revoke(&RevokedToken {
            token: token.to_string(),
            expires_at,
        })
        .await?;
    Ok(())
}
