//! In-memory secp256k1 key material.
//!
//! The address is never stored: it is recomputed from the public key every time it is asked
//! for, so the three views of the key cannot drift apart.

use crate::errors::WalletError;
use alloy::{
    primitives::{keccak256, Address, B256},
    signers::local::PrivateKeySigner,
};
use k256::ecdsa::SigningKey;
use rand::Rng as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const PRIVATE_KEY_LEN: usize = 32;
/// SEC1 uncompressed encoding: `0x04 || X || Y`.
pub const PUBLIC_KEY_UNCOMPRESSED_LEN: usize = 65;

/// An unlocked keypair. Not `Clone`: the lifecycle owns the only copy and lends it out.
pub struct KeyMaterial {
    signer: PrivateKeySigner,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("address", &self.address())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl KeyMaterial {
    /// Draw a fresh random scalar. Candidates outside `[1, n)` are discarded and redrawn.
    pub fn generate() -> Self {
        let mut candidate = Zeroizing::new([0_u8; PRIVATE_KEY_LEN]);
        loop {
            rand::rng().fill_bytes(candidate.as_mut_slice());
            if let Ok(sk) = SigningKey::from_slice(candidate.as_slice()) {
                return Self::from_signing_key(sk);
            }
        }
    }

    /// Accept a user-supplied hex private key (optionally `0x`-prefixed).
    ///
    /// Rejects anything that is not exactly 32 bytes, zero, or at/above the curve order.
    pub fn from_hex(input: &SecretString) -> Result<Self, WalletError> {
        let trimmed = input.expose_secret().trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = Zeroizing::new(
            hex::decode(hex_part)
                .map_err(|_e| WalletError::validation("private key must be hex encoded"))?,
        );
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        if bytes.len() != PRIVATE_KEY_LEN {
            return Err(WalletError::validation(format!(
                "private key must be {PRIVATE_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let sk = SigningKey::from_slice(bytes).map_err(|_e| {
            WalletError::validation("private key is not a valid secp256k1 scalar")
        })?;
        Ok(Self::from_signing_key(sk))
    }

    fn from_signing_key(sk: SigningKey) -> Self {
        Self {
            signer: PrivateKeySigner::from_signing_key(sk),
        }
    }

    /// Uncompressed SEC1 public key (65 bytes).
    pub fn public_key(&self) -> Vec<u8> {
        self.signer
            .credential()
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// Last 20 bytes of `keccak256(X || Y)`.
    pub fn address(&self) -> Address {
        address_from_public_key(&self.public_key())
    }

    /// The raw scalar, wrapped so it is wiped when the caller drops it.
    pub fn private_key_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_LEN]> {
        let b: B256 = self.signer.to_bytes();
        Zeroizing::new(b.0)
    }

    pub(crate) const fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    pub(crate) fn to_payload(&self) -> WalletPayload {
        WalletPayload {
            private_key: hex::encode(self.private_key_bytes().as_slice()),
            public_key: hex::encode(self.public_key()),
        }
    }

    /// Rebuild key material from a decrypted payload. The stored public key must match the one
    /// derived from the private key.
    pub(crate) fn from_payload(payload: &WalletPayload) -> Result<Self, WalletError> {
        let km = Self::from_hex(&SecretString::new(payload.private_key.clone().into()))?;
        let stored = hex::decode(payload.public_key.trim_start_matches("0x"))
            .map_err(|_e| WalletError::validation("stored public key is not hex"))?;
        let derived = km.public_key();
        let matches = match stored.len() {
            PUBLIC_KEY_UNCOMPRESSED_LEN => stored == derived,
            // Bare `X || Y` without the SEC1 tag byte.
            64 => derived.get(1..).is_some_and(|xy| xy == stored.as_slice()),
            _ => false,
        };
        if !matches {
            return Err(WalletError::validation(
                "stored public key does not match private key",
            ));
        }
        Ok(km)
    }
}

/// Derive an address from an uncompressed public key (with or without the `0x04` tag).
pub fn address_from_public_key(public_key: &[u8]) -> Address {
    let xy = match public_key {
        [0x04, rest @ ..] if rest.len() == 64 => rest,
        other => other,
    };
    Address::from_word(keccak256(xy))
}

/// Decrypted keystore payload.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct WalletPayload {
    pub private_key: String,
    pub public_key: String,
}
