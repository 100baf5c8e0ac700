//! Sender key material.
//!
//! # Security
//! - Keys may be loaded from environment variables
//! - Keys are never logged or serialized

use std::fmt;

use crate::blockchain::types::{ChainError, ChainResult};

/// Environment variable name for the sending private key.
pub const PRIVATE_KEY_ENV_VAR: &str = "CHAINWATCH_PRIVATE_KEY";

/// Opaque private key handed to the [`Signer`](crate::blockchain::signer::Signer).
///
/// The core never interprets the key; it only passes it through.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    secret: String,
}

impl KeyMaterial {
    /// Wrap a hex-encoded private key (with or without 0x prefix).
    pub fn from_private_key(private_key_hex: &str) -> ChainResult<Self> {
        let key_hex = private_key_hex
            .trim()
            .strip_prefix("0x")
            .unwrap_or(private_key_hex.trim());

        if key_hex.len() != 64 || !key_hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChainError::InvalidArgument(
                "Invalid private key format: expected 32 hex-encoded bytes".to_string(),
            ));
        }

        Ok(Self {
            secret: key_hex.to_ascii_lowercase(),
        })
    }

    /// Wrap an already encoded secret (for example WIF) without validation.
    pub fn from_encoded(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Load the key from `CHAINWATCH_PRIVATE_KEY`.
    pub fn from_env() -> ChainResult<Self> {
        let private_key = std::env::var(PRIVATE_KEY_ENV_VAR).map_err(|_| {
            ChainError::Config(format!(
                "Environment variable {} not set",
                PRIVATE_KEY_ENV_VAR
            ))
        })?;

        Self::from_private_key(&private_key)
    }

    /// Raw secret for the signer.
    pub fn expose_secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}
