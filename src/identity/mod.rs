//! Ed25519 keypairs and the account ids derived from them.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::ledger::AccountId;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IdentityError {
    #[error("secret key is not hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("secret key must be 32 bytes, got {0}")]
    Length(usize),
}

/// `0x` followed by the first 20 bytes of SHA-256 over the public key.
pub fn derive_address(key: &VerifyingKey) -> AccountId {
    let digest = Sha256::digest(key.as_bytes());
    format!("0x{}", hex::encode(&digest[..20]))
}

pub struct Identity {
    signing: SigningKey,
}

impl Identity {
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    pub fn from_secret_hex(text: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(text.trim())?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::Length(bytes.len()))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&secret),
        })
    }

    pub fn address(&self) -> AccountId {
        derive_address(&self.signing.verifying_key())
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().as_bytes())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }
}
