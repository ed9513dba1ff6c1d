//! Wydawca sesji - nieprzezroczyste tokeny HMAC-SHA256 wydawane przy ACCEPT
//!
//! Układ tokenu przed kodowaniem base64url:
//! `len(identity) u16 ‖ identity ‖ expiry i64 ‖ nonce[16] ‖ hmac[32]`

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox, SecretString};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::clock::{Clock, SystemClock};
use crate::error::{AuthError, AuthResult};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 16;
const MAC_LEN: usize = 32;

/// Issues an opaque session token for an accepted identity
pub trait SessionIssuer: Send + Sync {
    fn issue_session(&self, identity_id: &str) -> AuthResult<SecretString>;
}

/// Claims recovered from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub identity_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Tokeny sesji podpisane HMAC, z terminem ważności
pub struct HmacSessionIssuer {
    key: SecretBox<[u8; 32]>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl HmacSessionIssuer {
    /// Fresh random signing key (tokens die with the process)
    pub fn generate(ttl: Duration) -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut *key);
        Self::from_key(*key, ttl)
    }

    pub fn from_key(key: [u8; 32], ttl: Duration) -> Self {
        Self {
            key: SecretBox::new(Box::new(key)),
            ttl,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn mac(&self) -> AuthResult<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(self.key.expose_secret())
            .map_err(|e| AuthError::Session(e.to_string()))
    }

    /// Sprawdza podpis i termin ważności
    pub fn verify(&self, token: &str) -> AuthResult<SessionClaims> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| AuthError::Session("malformed token".into()))?;
        if raw.len() < 2 + 8 + NONCE_LEN + MAC_LEN {
            return Err(AuthError::Session("token too short".into()));
        }

        let (body, tag) = raw.split_at(raw.len() - MAC_LEN);
        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(tag)
            .map_err(|_| AuthError::Session("bad signature".into()))?;

        let id_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        if body.len() != 2 + id_len + 8 + NONCE_LEN {
            return Err(AuthError::Session("bad token layout".into()));
        }
        let identity_id = String::from_utf8(body[2..2 + id_len].to_vec())
            .map_err(|_| AuthError::Session("bad identity encoding".into()))?;

        let mut expiry = [0u8; 8];
        expiry.copy_from_slice(&body[2 + id_len..2 + id_len + 8]);
        let expires_at = Utc
            .timestamp_opt(i64::from_be_bytes(expiry), 0)
            .single()
            .ok_or_else(|| AuthError::Session("bad expiry".into()))?;

        if self.clock.now() >= expires_at {
            return Err(AuthError::Session("token expired".into()));
        }
        Ok(SessionClaims {
            identity_id,
            expires_at,
        })
    }
}

impl SessionIssuer for HmacSessionIssuer {
    fn issue_session(&self, identity_id: &str) -> AuthResult<SecretString> {
        let id = identity_id.as_bytes();
        let id_len = u16::try_from(id.len())
            .map_err(|_| AuthError::Session("identity id too long".into()))?;
        let expires_at = self.clock.now() + self.ttl;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut body = Vec::with_capacity(2 + id.len() + 8 + NONCE_LEN + MAC_LEN);
        body.extend_from_slice(&id_len.to_be_bytes());
        body.extend_from_slice(id);
        body.extend_from_slice(&expires_at.timestamp().to_be_bytes());
        body.extend_from_slice(&nonce);

        let mut mac = self.mac()?;
        mac.update(&body);
        body.extend_from_slice(&mac.finalize().into_bytes());

        Ok(SecretString::from(URL_SAFE_NO_PAD.encode(&body)))
    }
}
