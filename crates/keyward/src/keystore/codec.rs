use super::kdf::{self, SALT_LEN};
use crate::{
    errors::WalletError,
    keys::{KeyMaterial, WalletPayload},
};
use aes_gcm::{
    aead::{Aead as _, KeyInit as _, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::Rng as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// On-disk keystore record.
///
/// `wallet` is `nonce || ciphertext || tag`; the salt is bound into the tag as associated data so
/// swapping salts between files is detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeystore {
    pub salt: String,
    pub wallet: String,
}

impl EncryptedKeystore {
    /// A file that does not parse is treated like a wrong password.
    pub fn from_json(s: &str) -> Result<Self, WalletError> {
        serde_json::from_str(s).map_err(|_e| WalletError::Authentication)
    }

    pub fn to_json(&self) -> Result<String, WalletError> {
        serde_json::to_string(self).map_err(|e| WalletError::Storage(format!("serialize: {e}")))
    }
}

pub(crate) fn fill_random(buf: &mut [u8]) {
    rand::rng().fill_bytes(buf);
}

/// Encrypt `key` under `password` with a fresh salt and nonce. Pure: the caller persists.
pub fn encrypt(
    key: &KeyMaterial,
    password: &SecretString,
) -> Result<EncryptedKeystore, WalletError> {
    seal_payload(&key.to_payload(), password)
}

fn seal_payload(
    payload: &WalletPayload,
    password: &SecretString,
) -> Result<EncryptedKeystore, WalletError> {
    if password.expose_secret().is_empty() {
        return Err(WalletError::validation("password must not be empty"));
    }
    let plaintext = Zeroizing::new(
        serde_json::to_vec(payload).map_err(|e| WalletError::Storage(format!("encode: {e}")))?,
    );

    let mut salt = [0_u8; SALT_LEN];
    fill_random(&mut salt);
    let mut nonce = [0_u8; NONCE_LEN];
    fill_random(&mut nonce);

    let derived = kdf::derive(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(derived.as_slice())
        .map_err(|e| WalletError::Storage(format!("aes init: {e}")))?;
    let ct = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext.as_slice(),
                aad: &salt,
            },
        )
        .map_err(|e| WalletError::Storage(format!("aes encrypt: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ct.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ct);
    Ok(EncryptedKeystore {
        salt: URL_SAFE.encode(salt),
        wallet: URL_SAFE.encode(blob),
    })
}

/// Recover the key material. Every failure mode collapses into `WalletError::Authentication`.
pub fn decrypt(
    ks: &EncryptedKeystore,
    password: &SecretString,
) -> Result<KeyMaterial, WalletError> {
    let salt: [u8; SALT_LEN] = URL_SAFE
        .decode(&ks.salt)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or(WalletError::Authentication)?;
    let blob = URL_SAFE
        .decode(&ks.wallet)
        .map_err(|_e| WalletError::Authentication)?;
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(WalletError::Authentication);
    }
    let (nonce, ct) = blob.split_at(NONCE_LEN);

    let derived = kdf::derive(password, &salt);
    let cipher =
        Aes256Gcm::new_from_slice(derived.as_slice()).map_err(|_e| WalletError::Authentication)?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ct, aad: &salt })
            .map_err(|_e| WalletError::Authentication)?,
    );
    let payload: WalletPayload =
        serde_json::from_slice(&plaintext).map_err(|_e| WalletError::Authentication)?;
    KeyMaterial::from_payload(&payload).map_err(|_e| WalletError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pw(s: &str) -> SecretString {
        SecretString::new(s.to_owned().into())
    }

    #[test]
    fn roundtrip_restores_same_scalar() -> eyre::Result<()> {
        let km = KeyMaterial::generate();
        let ks = encrypt(&km, &pw("correct-horse"))?;
        let back = decrypt(&ks, &pw("correct-horse"))?;
        assert_eq!(*back.private_key_bytes(), *km.private_key_bytes());
        assert_eq!(back.address(), km.address());
        Ok(())
    }

    #[test]
    fn wrong_password_is_authentication_error() -> eyre::Result<()> {
        let ks = encrypt(&KeyMaterial::generate(), &pw("correct-horse"))?;
        let err = decrypt(&ks, &pw("battery-staple")).err();
        assert_eq!(err, Some(WalletError::Authentication));
        Ok(())
    }

    #[test]
    fn every_save_uses_a_fresh_salt_and_nonce() -> eyre::Result<()> {
        let km = KeyMaterial::generate();
        let a = encrypt(&km, &pw("pw"))?;
        let b = encrypt(&km, &pw("pw"))?;
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.wallet, b.wallet);
        Ok(())
    }

    #[test]
    fn flipping_any_ciphertext_bit_fails() -> eyre::Result<()> {
        let ks = encrypt(&KeyMaterial::generate(), &pw("pw"))?;
        let blob = URL_SAFE.decode(&ks.wallet)?;
        // Nonce, body and tag positions, each bit.
        for idx in [0, NONCE_LEN, blob.len() / 2, blob.len() - 1] {
            for bit in 0..8 {
                let mut tampered = blob.clone();
                if let Some(b) = tampered.get_mut(idx) {
                    *b ^= 1 << bit;
                }
                let bad = EncryptedKeystore {
                    salt: ks.salt.clone(),
                    wallet: URL_SAFE.encode(&tampered),
                };
                assert_eq!(
                    decrypt(&bad, &pw("pw")).err(),
                    Some(WalletError::Authentication),
                    "byte {idx} bit {bit}"
                );
            }
        }
        Ok(())
    }

    #[test]
    fn swapped_salt_fails_even_with_right_password() -> eyre::Result<()> {
        let a = encrypt(&KeyMaterial::generate(), &pw("pw"))?;
        let b = encrypt(&KeyMaterial::generate(), &pw("pw"))?;
        let mixed = EncryptedKeystore {
            salt: b.salt,
            wallet: a.wallet,
        };
        assert_eq!(
            decrypt(&mixed, &pw("pw")).err(),
            Some(WalletError::Authentication)
        );
        Ok(())
    }

    #[test]
    fn malformed_records_look_like_wrong_password() -> eyre::Result<()> {
        let ks = encrypt(&KeyMaterial::generate(), &pw("pw"))?;
        let cases = [
            EncryptedKeystore {
                salt: "!!not base64!!".into(),
                wallet: ks.wallet.clone(),
            },
            EncryptedKeystore {
                salt: URL_SAFE.encode([0_u8; 8]),
                wallet: ks.wallet.clone(),
            },
            EncryptedKeystore {
                salt: ks.salt.clone(),
                wallet: URL_SAFE.encode([0_u8; NONCE_LEN]),
            },
        ];
        for c in &cases {
            assert_eq!(decrypt(c, &pw("pw")).err(), Some(WalletError::Authentication));
        }
        assert_eq!(
            EncryptedKeystore::from_json("{\"salt\": 1}").err(),
            Some(WalletError::Authentication)
        );
        Ok(())
    }

    #[test]
    fn mismatched_inner_public_key_is_authentication_error() -> eyre::Result<()> {
        let km = KeyMaterial::generate();
        let other = KeyMaterial::generate();
        let forged = WalletPayload {
            private_key: km.to_payload().private_key.clone(),
            public_key: hex::encode(other.public_key()),
        };
        let ks = seal_payload(&forged, &pw("pw"))?;
        assert_eq!(decrypt(&ks, &pw("pw")).err(), Some(WalletError::Authentication));
        Ok(())
    }

    #[test]
    fn empty_password_is_rejected_before_encrypting() {
        let r = encrypt(&KeyMaterial::generate(), &pw(""));
        assert!(matches!(r, Err(WalletError::Validation(_))));
    }

    #[test]
    fn json_shape_has_salt_and_wallet() -> eyre::Result<()> {
        let ks = encrypt(&KeyMaterial::generate(), &pw("pw"))?;
        let v: serde_json::Value = serde_json::from_str(&ks.to_json()?)?;
        assert!(v.get("salt").is_some_and(serde_json::Value::is_string));
        assert!(v.get("wallet").is_some_and(serde_json::Value::is_string));
        assert_eq!(EncryptedKeystore::from_json(&ks.to_json()?)?, ks);
        Ok(())
    }
}
