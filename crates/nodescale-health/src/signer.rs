//! Shared-secret tokens for agent probes and the deploy trigger.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::HealthError;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iat: u64,
    exp: u64,
}

/// Signs and verifies HS256 tokens with the service key.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, HealthError> {
        if secret.is_empty() {
            return Err(HealthError::EmptyKey);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        })
    }

    /// A fresh token valid for the configured ttl.
    pub fn sign(&self) -> Result<String, HealthError> {
        let iat = now_secs();
        let claims = Claims {
            iat,
            exp: iat + self.ttl.as_secs().max(1),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(HealthError::Sign)
    }

    /// Check signature and expiry.
    pub fn verify(&self, token: &str) -> Result<(), HealthError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|_| ())
            .map_err(HealthError::Rejected)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
