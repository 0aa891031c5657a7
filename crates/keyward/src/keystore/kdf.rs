//! Password to symmetric key.

use secrecy::{ExposeSecret as _, SecretString};
use sha2::Sha256;
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
/// Frozen here so a dependency bump can never silently change the work factor.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// PBKDF2-HMAC-SHA256 over the password bytes. Deterministic for a given `(password, salt)`.
pub fn derive(password: &SecretString, salt: &[u8; SALT_LEN]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut out = Zeroizing::new([0_u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        salt,
        PBKDF2_ITERATIONS,
        out.as_mut_slice(),
    );
    out
}
