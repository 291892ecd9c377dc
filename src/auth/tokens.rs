//! Signed bearer tokens
//!
//! Compact three-part tokens: `base64url(header).base64url(claims).base64url(sig)`
//! where `sig = HMAC-SHA256(secret, header "." claims)`. HS256 is the only
//! algorithm accepted; the header's `alg` is checked against it, never used to
//! pick one.

use crate::auth::grants::Permissions;
use crate::auth::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// The one signing algorithm this verifier trusts
pub const TRUSTED_ALGORITHM: &str = "HS256";

const TOKEN_TYPE: &str = "JWT";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    InvalidFormat,

    #[error("unsupported signing algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token decode error: {0}")]
    DecodeError(String),

    #[error("token has no expiry")]
    MissingExpiry,

    #[error("token expired at {exp}")]
    Expired { exp: i64 },

    #[error("token not valid before {nbf}")]
    NotYetValid { nbf: i64 },

    #[error("token issued in the future at {iat}")]
    IssuedInFuture { iat: i64 },
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired { .. } => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken,
        }
    }
}

/// Shared HMAC secret for signed tokens
#[derive(Clone)]
pub struct TokenSecret(Vec<u8>);

impl TokenSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.0).expect("HMAC can take key of any size")
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenSecret([REDACTED])")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Claims carried by a verified token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    /// Expiry, seconds since the Unix epoch
    pub exp: i64,
    /// Not valid before, seconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Issued at, seconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
}

impl Claims {
    pub fn new(exp: i64) -> Self {
        Self {
            exp,
            nbf: None,
            iat: None,
            sub: None,
            permissions: None,
        }
    }

    pub fn issued_at(mut self, iat: i64) -> Self {
        self.iat = Some(iat);
        self
    }

    pub fn not_before(mut self, nbf: i64) -> Self {
        self.nbf = Some(nbf);
        self
    }

    pub fn with_subject(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Some(permissions);
        self
    }
}

/// Wire form of the claims. Time claims are JSON numbers that may carry a
/// fraction (`1792421209.0`); `exp` is optional here so its absence can be
/// reported distinctly from other decode failures.
#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    exp: Option<f64>,
    #[serde(default)]
    nbf: Option<f64>,
    #[serde(default)]
    iat: Option<f64>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    permissions: Option<Permissions>,
}

/// Sign `claims` into a compact token
pub fn issue(claims: &Claims, secret: &TokenSecret) -> String {
    let header = Header {
        alg: TRUSTED_ALGORITHM.to_string(),
        typ: Some(TOKEN_TYPE.to_string()),
    };
    let header_json = serde_json::to_vec(&header).expect("serialize header");
    let claims_json = serde_json::to_vec(claims).expect("serialize claims");

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );

    let mut mac = secret.mac();
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();

    format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature))
}

/// Verify a token's signature and expiry against `now` (epoch seconds)
pub fn verify_at(token: &str, secret: &TokenSecret, now: i64) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::InvalidFormat);
    };

    let header: Header = decode_json(header_b64)?;
    if header.alg != TRUSTED_ALGORITHM {
        return Err(TokenError::UnsupportedAlgorithm(header.alg));
    }
    if header.typ.as_deref().is_some_and(|typ| typ != TOKEN_TYPE) {
        return Err(TokenError::InvalidFormat);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| TokenError::DecodeError(e.to_string()))?;

    let signing_input_len = header_b64.len() + 1 + claims_b64.len();
    let mut mac = secret.mac();
    mac.update(token[..signing_input_len].as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    let raw: RawClaims = decode_json(claims_b64)?;
    let exp = raw.exp.map(epoch_seconds).ok_or(TokenError::MissingExpiry)?;
    let nbf = raw.nbf.map(epoch_seconds);
    let iat = raw.iat.map(epoch_seconds);

    if exp <= now {
        return Err(TokenError::Expired { exp });
    }
    if let Some(nbf) = nbf.filter(|nbf| *nbf > now) {
        return Err(TokenError::NotYetValid { nbf });
    }
    if let Some(iat) = iat.filter(|iat| *iat > now) {
        return Err(TokenError::IssuedInFuture { iat });
    }

    Ok(Claims {
        exp,
        nbf,
        iat,
        sub: raw.sub,
        permissions: raw.permissions,
    })
}

/// Verify a token for authentication at `now`, collapsing the failure
/// reason into what the client is told
pub fn verify(token: &str, secret: &TokenSecret, now: i64) -> Result<Claims, AuthError> {
    verify_at(token, secret, now).map_err(|e| {
        debug!(error = %e, "signed token rejected");
        AuthError::from(e)
    })
}

/// Whole seconds of a numeric time claim; out-of-range values saturate
fn epoch_seconds(value: f64) -> i64 {
    value.floor() as i64
}

fn decode_json<T: DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::DecodeError(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::DecodeError(e.to_string()))
}
