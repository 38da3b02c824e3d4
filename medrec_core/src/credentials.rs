//! Credential engine: password digests and signed session tokens.
//!
//! Passwords are stored as bcrypt digests. Session tokens are compact JWTs
//! (`header.claims.signature`, base64url without padding) signed with
//! HMAC-SHA256 under the server secret. Tokens are stateless: a token is
//! valid exactly when its signature verifies and its `exp` lies in the
//! future.

use crate::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// bcrypt work factor used unless configured otherwise
pub const DEFAULT_HASH_COST: u32 = 12;

/// Token lifetime used when the caller does not pass one
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 30;

const MIN_HASH_COST: u32 = 4;
const MAX_HASH_COST: u32 = 31;

/// bcrypt only reads the first 72 bytes of its input
const BCRYPT_MAX_PASSWORD_BYTES: usize = 72;

const TOKEN_ALGORITHM: &str = "HS256";

// ============================================================================
// Passwords
// ============================================================================

/// Salted, adaptive password hashing
#[derive(Clone, Copy, Debug)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            cost: DEFAULT_HASH_COST,
        }
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Result<Self> {
        if !(MIN_HASH_COST..=MAX_HASH_COST).contains(&cost) {
            return Err(Error::Config(format!(
                "bcrypt cost must be between {} and {} (got {})",
                MIN_HASH_COST, MAX_HASH_COST, cost
            )));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password for storage.
    ///
    /// Inputs bcrypt would silently truncate or cannot represent are
    /// rejected rather than hashed.
    pub fn hash_password(&self, plaintext: &str) -> Result<String> {
        if plaintext.len() > BCRYPT_MAX_PASSWORD_BYTES {
            return Err(Error::Hashing(format!(
                "password must be at most {} bytes",
                BCRYPT_MAX_PASSWORD_BYTES
            )));
        }
        if plaintext.contains('\0') {
            return Err(Error::Hashing("password must not contain NUL bytes".into()));
        }

        // Past the input checks, a failure is the primitive's, not the caller's
        bcrypt::hash(plaintext, self.cost).map_err(|e| {
            tracing::error!("Error hashing password: {}", e);
            Error::Other(format!("bcrypt hashing failed: {}", e))
        })
    }

    /// Compare a password against a stored digest.
    ///
    /// `Ok(false)` means the password is wrong; `Err` means the digest could
    /// not be checked at all (e.g. it is malformed).
    pub fn check_password(&self, plaintext: &str, digest: &str) -> Result<bool> {
        if plaintext.len() > BCRYPT_MAX_PASSWORD_BYTES {
            // Never stored, so can never match
            return Ok(false);
        }
        bcrypt::verify(plaintext, digest)
            .map_err(|e| Error::Other(format!("bcrypt verification failed: {}", e)))
    }

    /// Boolean form of [`check_password`](Self::check_password): any failure is a reject.
    pub fn verify_password(&self, plaintext: &str, digest: &str) -> bool {
        match self.check_password(plaintext, digest) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::error!("Error verifying password: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// Tokens
// ============================================================================

/// Verified contents of a session token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenClaims {
    /// Username the token was issued to
    pub sub: String,
    /// Expiry, seconds since the epoch
    pub exp: i64,
    /// Issue time, seconds since the epoch
    pub iat: i64,
}

impl TokenClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

/// Claims as found on the wire, before required fields are checked
#[derive(Serialize, Deserialize)]
struct WireClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
}

/// Issues and verifies HS256 session tokens under one server secret
#[derive(Clone)]
pub struct TokenSigner {
    key: Vec<u8>,
    default_ttl: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("key", &"<redacted>")
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl TokenSigner {
    /// Build a signer; an empty secret is a configuration error
    pub fn new(secret: &str, default_ttl: Duration) -> Result<Self> {
        if secret.trim().is_empty() {
            return Err(Error::Config(
                "token signing secret is empty; set SECRET_KEY".into(),
            ));
        }
        Ok(Self {
            key: secret.as_bytes().to_vec(),
            default_ttl,
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Issue a token for `subject`, valid for `ttl` (default window when `None`)
    pub fn issue_token(&self, subject: &str, ttl: Option<Duration>) -> Result<String> {
        self.issue_token_at(subject, ttl.unwrap_or(self.default_ttl), Utc::now())
    }

    fn issue_token_at(&self, subject: &str, ttl: Duration, now: DateTime<Utc>) -> Result<String> {
        if subject.is_empty() {
            return Err(Error::Validation("token subject must not be empty".into()));
        }
        let claims = WireClaims {
            sub: Some(subject.to_string()),
            exp: Some((now + ttl).timestamp()),
            iat: Some(now.timestamp()),
        };
        self.encode(&claims)
    }

    fn encode(&self, claims: &WireClaims) -> Result<String> {
        let header = TokenHeader {
            alg: TOKEN_ALGORITHM.into(),
            typ: "JWT".into(),
        };
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{}.{}", header_b64, claims_b64);

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Other(format!("Failed to create HMAC: {}", e)))
    }

    /// Verify a token; `None` for any invalid token, never an error
    pub fn verify_token(&self, token: &str) -> Option<TokenClaims> {
        self.verify_token_at(token, Utc::now())
    }

    /// Verify a token as of `now`
    pub fn verify_token_at(&self, token: &str, now: DateTime<Utc>) -> Option<TokenClaims> {
        match self.decode(token, now) {
            Ok(claims) => Some(claims),
            Err(reason) => {
                tracing::warn!("Token verification failed: {}", reason);
                None
            }
        }
    }

    fn decode(&self, token: &str, now: DateTime<Utc>) -> std::result::Result<TokenClaims, &'static str> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err("malformed token structure");
        };

        let header_json = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| "malformed header encoding")?;
        let header: TokenHeader =
            serde_json::from_slice(&header_json).map_err(|_| "malformed header")?;
        if header.alg != TOKEN_ALGORITHM {
            return Err("unexpected signing algorithm");
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| "malformed signature encoding")?;
        let mut mac = self.mac().map_err(|_| "signer unavailable")?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature).map_err(|_| "bad signature")?;

        let claims_json = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| "malformed claims encoding")?;
        let claims: WireClaims =
            serde_json::from_slice(&claims_json).map_err(|_| "malformed claims")?;

        let sub = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or("username not found in payload")?;
        let exp = claims.exp.ok_or("missing expiry")?;
        if now.timestamp() >= exp {
            return Err("token expired");
        }

        Ok(TokenClaims {
            sub,
            exp,
            iat: claims.iat.unwrap_or(0),
        })
    }
}
