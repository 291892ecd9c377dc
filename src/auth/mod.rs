//! Client authentication
//!
//! Strategies:
//! - `open`: no credentials required
//! - `token`: a shared token, configured as plaintext or a bcrypt hash
//! - `plain`: username + password, the password plaintext or a bcrypt hash
//! - `signed_token`: HS256 tokens carrying an expiry and an optional grant
//!
//! Only `signed_token` produces a [`Permissions`] grant; the others admit the
//! connection under whatever default policy the data plane applies.

mod grants;
pub mod password;
pub mod tokens;

pub use grants::{Permissions, FULL_WILDCARD};
pub use password::{BcryptHash, PasswordReference};
pub use tokens::{Claims, TokenError, TokenSecret};

use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a credential was refused.
///
/// The display strings are what clients see after `-ERR`, so none of them
/// says which factor failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Authorization Violation")]
    MissingCredentials,

    #[error("Authorization Violation")]
    InvalidCredentials,

    #[error("Authorization Violation")]
    InvalidToken,

    #[error("Authorization Violation: Token Expired")]
    ExpiredToken,
}

impl AuthError {
    /// Short machine-friendly name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InvalidToken => "invalid_token",
            AuthError::ExpiredToken => "expired_token",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("only one authentication strategy may be configured (got {0})")]
    ConflictingStrategies(String),

    #[error("{0} requires {1}")]
    MissingParameter(&'static str, &'static str),

    #[error("invalid hash reference: {0}")]
    InvalidHash(#[from] password::HashError),

    #[error("invalid hash cost policy: min {min} > max {max}")]
    InvalidPolicy { min: u32, max: u32 },
}

/// Credentials presented in a CONNECT frame
#[derive(Clone, Default)]
pub struct Credentials {
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn user_pass(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    /// True when the client presented nothing at all
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.username.is_none() && self.password.is_none()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Credentials")
            .field("token", &redact(&self.token))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .finish()
    }
}

/// Accepted bcrypt cost range for configured hash references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashPolicy {
    pub min_cost: u32,
    pub max_cost: u32,
}

impl HashPolicy {
    pub fn new(min_cost: u32, max_cost: u32) -> Result<Self, ConfigError> {
        if min_cost > max_cost {
            return Err(ConfigError::InvalidPolicy {
                min: min_cost,
                max: max_cost,
            });
        }
        Ok(Self { min_cost, max_cost })
    }
}

impl Default for HashPolicy {
    fn default() -> Self {
        Self {
            min_cost: password::MIN_COST,
            max_cost: password::MAX_COST,
        }
    }
}

/// Which strategy to run, with its raw parameters
#[derive(Clone, Default)]
pub enum AuthConfig {
    #[default]
    Open,
    Token {
        expected: String,
    },
    Plain {
        username: String,
        password: String,
    },
    SignedToken {
        secret: Vec<u8>,
    },
}

impl AuthConfig {
    /// Pick a strategy from individually supplied options.
    ///
    /// At most one of token, user/pass, or signing secret may be set.
    pub fn from_parts(
        token: Option<String>,
        username: Option<String>,
        password: Option<String>,
        secret: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut chosen = Vec::new();
        if token.is_some() {
            chosen.push("token");
        }
        if username.is_some() || password.is_some() {
            chosen.push("user/pass");
        }
        if secret.is_some() {
            chosen.push("signed token secret");
        }
        if chosen.len() > 1 {
            return Err(ConfigError::ConflictingStrategies(chosen.join(", ")));
        }

        if let Some(expected) = token {
            return Ok(AuthConfig::Token { expected });
        }
        if let Some(secret) = secret {
            return Ok(AuthConfig::SignedToken {
                secret: secret.into_bytes(),
            });
        }
        match (username, password) {
            (Some(username), Some(password)) => Ok(AuthConfig::Plain { username, password }),
            (Some(_), None) => Err(ConfigError::MissingParameter("user", "a password")),
            (None, Some(_)) => Err(ConfigError::MissingParameter("password", "a user")),
            (None, None) => Ok(AuthConfig::Open),
        }
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            AuthConfig::Open => "open",
            AuthConfig::Token { .. } => "token",
            AuthConfig::Plain { .. } => "plain",
            AuthConfig::SignedToken { .. } => "signed_token",
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::Plain { username, .. } => f
                .debug_struct("Plain")
                .field("username", username)
                .finish_non_exhaustive(),
            AuthConfig::Open => write!(f, "Open"),
            other => write!(f, "{}([REDACTED])", other.strategy()),
        }
    }
}

/// The active authentication strategy
#[derive(Debug, Clone)]
pub enum Authenticator {
    Open,
    Token(PasswordReference),
    Plain {
        username: String,
        password: PasswordReference,
    },
    SignedToken(TokenSecret),
}

impl Authenticator {
    pub fn from_config(config: &AuthConfig, policy: &HashPolicy) -> Result<Self, ConfigError> {
        let checked = |reference: &str| -> Result<PasswordReference, ConfigError> {
            let parsed = PasswordReference::parse(reference);
            parsed.check_cost(policy.min_cost, policy.max_cost)?;
            if !parsed.is_hashed() && reference.starts_with("$2") {
                warn!("configured secret looks like a bcrypt hash but does not parse; using it as plaintext");
            }
            Ok(parsed)
        };

        Ok(match config {
            AuthConfig::Open => Authenticator::Open,
            AuthConfig::Token { expected } => Authenticator::Token(checked(expected)?),
            AuthConfig::Plain { username, password } => Authenticator::Plain {
                username: username.clone(),
                password: checked(password)?,
            },
            AuthConfig::SignedToken { secret } => {
                Authenticator::SignedToken(TokenSecret::new(secret.clone()))
            }
        })
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            Authenticator::Open => "open",
            Authenticator::Token(_) => "token",
            Authenticator::Plain { .. } => "plain",
            Authenticator::SignedToken(_) => "signed_token",
        }
    }

    /// Whether clients must present credentials
    pub fn auth_required(&self) -> bool {
        !matches!(self, Authenticator::Open)
    }

    /// Verify `credentials`, returning the grant to attach on success
    pub fn authenticate(&self, credentials: &Credentials) -> Result<Option<Permissions>, AuthError> {
        self.authenticate_at(credentials, chrono::Utc::now().timestamp())
    }

    /// As [`authenticate`](Self::authenticate) with an explicit clock for token expiry
    pub fn authenticate_at(
        &self,
        credentials: &Credentials,
        now: i64,
    ) -> Result<Option<Permissions>, AuthError> {
        match self {
            Authenticator::Open => Ok(None),

            Authenticator::Token(expected) => {
                // A missing token pays for the same comparison as a wrong one
                let Some(token) = credentials.token.as_deref() else {
                    let _ = expected.verify("");
                    return Err(AuthError::InvalidToken);
                };
                if expected.verify(token) {
                    Ok(None)
                } else {
                    Err(AuthError::InvalidToken)
                }
            }

            Authenticator::Plain {
                username,
                password: reference,
            } => {
                // Both factors are always checked; a bad user costs the same as a bad password
                let presented_user = credentials.username.as_deref().unwrap_or_default();
                let user_ok = password::constant_time_eq(presented_user, username);
                let pass_ok = reference.verify(credentials.password.as_deref().unwrap_or_default());

                if user_ok && pass_ok && credentials.username.is_some() && credentials.password.is_some() {
                    Ok(None)
                } else {
                    Err(AuthError::InvalidCredentials)
                }
            }

            Authenticator::SignedToken(secret) => {
                let token = credentials
                    .token
                    .as_deref()
                    .ok_or(AuthError::MissingCredentials)?;
                let claims = tokens::verify(token, secret, now)?;
                debug!(subject = ?claims.sub, exp = claims.exp, "signed token verified");
                Ok(claims.permissions)
            }
        }
    }
}
