//! Password references and verification
//!
//! A configured password (or shared token) is either kept as plaintext or as
//! a bcrypt hash. Which one is decided by the reference's own structure:
//!
//! ```text
//! $2b$11$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW
//! \__/\/ \____________________/\_____________________________/
//!  alg cost      salt (22)                digest (31)
//! ```

use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Cost used when generating new hashes
pub const DEFAULT_COST: u32 = 11;

/// Lowest cost bcrypt supports
pub const MIN_COST: u32 = 4;

/// Highest cost bcrypt supports
pub const MAX_COST: u32 = 31;

const SALT_LEN: usize = 22;
const DIGEST_LEN: usize = 31;
const ENCODED_LEN: usize = 60;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("bcrypt cost {cost} outside the accepted range {min}..={max}")]
    CostOutOfRange { cost: u32, min: u32, max: u32 },

    #[error("hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
}

/// Bcrypt revision named by the hash prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcryptVariant {
    A,
    B,
    X,
    Y,
}

impl BcryptVariant {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "2a" => Some(Self::A),
            "2b" => Some(Self::B),
            "2x" => Some(Self::X),
            "2y" => Some(Self::Y),
            _ => None,
        }
    }
}

impl fmt::Display for BcryptVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::A => "2a",
            Self::B => "2b",
            Self::X => "2x",
            Self::Y => "2y",
        };
        f.write_str(tag)
    }
}

/// A parsed bcrypt hash
#[derive(Clone, PartialEq, Eq)]
pub struct BcryptHash {
    pub variant: BcryptVariant,
    pub cost: u32,
    pub salt: String,
    pub digest: String,
    encoded: String,
}

impl BcryptHash {
    /// Parse the modular-crypt encoding, returning `None` if `s` is not one
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != ENCODED_LEN || !s.is_ascii() {
            return None;
        }

        let mut parts = s.splitn(4, '$');
        let (Some(""), Some(tag), Some(cost), Some(rest)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };

        let variant = BcryptVariant::from_tag(tag)?;
        if cost.len() != 2 || !cost.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let cost: u32 = cost.parse().ok()?;
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return None;
        }

        if rest.len() != SALT_LEN + DIGEST_LEN || !rest.bytes().all(is_bcrypt_base64) {
            return None;
        }
        let (salt, digest) = rest.split_at(SALT_LEN);

        Some(Self {
            variant,
            cost,
            salt: salt.to_string(),
            digest: digest.to_string(),
            encoded: s.to_string(),
        })
    }

    /// Recompute the hash of `plaintext` with this salt and cost and compare
    pub fn verify(&self, plaintext: &str) -> bool {
        bcrypt::verify(plaintext, &self.encoded).unwrap_or(false)
    }
}

impl fmt::Debug for BcryptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BcryptHash")
            .field("variant", &self.variant)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

fn is_bcrypt_base64(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'/'
}

/// A configured secret, as plaintext or as an adaptive hash
#[derive(Clone, PartialEq, Eq)]
pub enum PasswordReference {
    Plaintext(String),
    Hashed(BcryptHash),
}

impl PasswordReference {
    pub fn parse(reference: &str) -> Self {
        match BcryptHash::parse(reference) {
            Some(hash) => Self::Hashed(hash),
            None => Self::Plaintext(reference.to_string()),
        }
    }

    /// Reject hashed references whose cost falls outside `min..=max`
    pub fn check_cost(&self, min: u32, max: u32) -> Result<(), HashError> {
        match self {
            Self::Hashed(hash) if !(min..=max).contains(&hash.cost) => {
                Err(HashError::CostOutOfRange { cost: hash.cost, min, max })
            }
            _ => Ok(()),
        }
    }

    pub fn is_hashed(&self) -> bool {
        matches!(self, Self::Hashed(_))
    }

    /// Check a presented secret against this reference
    pub fn verify(&self, presented: &str) -> bool {
        match self {
            Self::Plaintext(expected) => constant_time_eq(presented, expected),
            Self::Hashed(hash) => hash.verify(presented),
        }
    }
}

impl fmt::Debug for PasswordReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plaintext(_) => write!(f, "Plaintext([REDACTED])"),
            Self::Hashed(hash) => f.debug_tuple("Hashed").field(hash).finish(),
        }
    }
}

/// Compare two strings through their SHA-256 digests in constant time
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    a.as_slice().ct_eq(b.as_slice()).into()
}

/// Check `plaintext` against a reference string
pub fn verify(plaintext: &str, reference: &str) -> bool {
    PasswordReference::parse(reference).verify(plaintext)
}

/// Hash a password for use as a configured reference
pub fn hash_password(plaintext: &str, cost: u32) -> Result<String, HashError> {
    if !(MIN_COST..=MAX_COST).contains(&cost) {
        return Err(HashError::CostOutOfRange {
            cost,
            min: MIN_COST,
            max: MAX_COST,
        });
    }
    Ok(bcrypt::hash(plaintext, cost)?)
}
