use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sessions expire exactly 24 hours after issuance.
pub const SESSION_TTL_SECS: i64 = 86_400;

/// Point-in-time snapshot of the authenticated member, captured at OAuth
/// callback completion. Display data only: authorization is always
/// re-derived from a live role check, never from this snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub username: String,
    pub discriminator: String,
    pub email: Option<String>,
    pub avatar: String,
    pub joined_at: Option<String>,
    pub nickname: Option<String>,
    pub roles: Vec<String>,
    pub nitro: bool,
    pub connections: Vec<String>,
    pub guilds: Vec<String>,
    pub locale: Option<String>,
    pub mfa_enabled: bool,
    pub verified: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user: SessionUser,
    exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("token has expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

/// HS256 signing/verification keys derived from the process-wide secret.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Signs a credential expiring [`SESSION_TTL_SECS`] from now.
    pub fn sign(&self, user: &SessionUser) -> Result<String, SessionError> {
        self.sign_expiring_at(user, Utc::now().timestamp() + SESSION_TTL_SECS)
    }

    /// Signs a credential with an explicit expiry instant (unix seconds).
    pub fn sign_expiring_at(&self, user: &SessionUser, exp: i64) -> Result<String, SessionError> {
        let claims = Claims {
            user: user.clone(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| SessionError::Invalid)
    }

    /// Verifies signature and expiry, returning the embedded snapshot.
    ///
    /// A token is expired at and after its `exp` instant. Signature failures
    /// always report [`SessionError::Invalid`], never `Expired`.
    pub fn verify(&self, token: &str) -> Result<SessionUser, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        // Expiry is checked by hand below so the boundary instant is exact.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| SessionError::Invalid)?;
        if data.claims.exp <= Utc::now().timestamp() {
            return Err(SessionError::Expired);
        }
        Ok(data.claims.user)
    }
}
