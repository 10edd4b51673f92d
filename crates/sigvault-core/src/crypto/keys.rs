//! Key derivation from the backup passphrase.

use crate::error::{Error, Result};
use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the AES and MAC keys in bytes (256 bits each).
pub const KEY_LEN: usize = 32;

/// Number of SHA-512 rounds in the passphrase hash.
const ROUNDS: usize = 250_000;

/// HKDF info string used by the Signal backup exporter.
const HKDF_INFO: &[u8] = b"Backup Export";

/// The cipher and MAC keys for one backup file.
///
/// Derived once at open; zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Keys {
    cipher: [u8; KEY_LEN],
    mac: [u8; KEY_LEN],
}

impl Keys {
    /// Derive the cipher and MAC keys from a passphrase and the salt from
    /// the backup header.
    ///
    /// The passphrase is the 30-digit backup code with spaces already
    /// stripped by the caller. The construction matches the exporter:
    /// an initial SHA-512 over `salt || passphrase || passphrase`, then
    /// 249,999 rounds of SHA-512 over `previous || passphrase`, then
    /// HKDF-SHA-256 expansion of the first 32 digest bytes into the two
    /// keys.
    pub fn derive(passphrase: &str, salt: Option<&[u8]>) -> Result<Self> {
        let pass = passphrase.as_bytes();

        let mut digest = Zeroizing::new([0u8; 64]);

        let mut sha = Sha512::new();
        if let Some(salt) = salt {
            sha.update(salt);
        }
        sha.update(pass);
        sha.update(pass);
        digest.copy_from_slice(&sha.finalize());

        for _ in 1..ROUNDS {
            let mut sha = Sha512::new();
            sha.update(&digest[..]);
            sha.update(pass);
            digest.copy_from_slice(&sha.finalize());
        }

        let hkdf = Hkdf::<Sha256>::new(None, &digest[..KEY_LEN]);
        let mut okm = Zeroizing::new([0u8; KEY_LEN * 2]);
        hkdf.expand(HKDF_INFO, &mut okm[..])
            .map_err(|_| Error::Crypto("HKDF expansion failed".into()))?;

        let mut keys = Keys {
            cipher: [0u8; KEY_LEN],
            mac: [0u8; KEY_LEN],
        };
        keys.cipher.copy_from_slice(&okm[..KEY_LEN]);
        keys.mac.copy_from_slice(&okm[KEY_LEN..]);
        Ok(keys)
    }

    /// The AES-256-CTR key.
    pub fn cipher_key(&self) -> &[u8; KEY_LEN] {
        &self.cipher
    }

    /// The HMAC-SHA-256 key.
    pub fn mac_key(&self) -> &[u8; KEY_LEN] {
        &self.mac
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keys([REDACTED])")
    }
}
