//! At-rest encryption for federation peer credentials.
//!
//! Passwords are encrypted with AES-256-GCM before being handed to
//! `beads-storage` for storage in `federation_peers.password_encrypted`. The
//! key is derived from the database path so that a vault is only ever
//! readable alongside the database it belongs to; there is no separate key
//! file to lose or leak.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{FederationError, Result};

/// Salt mixed into the key derivation. Bumping this invalidates all
/// previously-encrypted credentials -- only do so alongside a migration.
const KEY_SALT: &str = "beads-federation-key-v1";

const NONCE_LEN: usize = 12;

/// Derives the AES-256 key for a database at `db_path` from
/// `SHA256(db_path || KEY_SALT)`.
fn derive_key(db_path: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(db_path.as_bytes());
    hasher.update(KEY_SALT.as_bytes());
    hasher.finalize().into()
}

/// Encrypts `plaintext` under the key derived from `db_path`.
///
/// The returned blob is `nonce || ciphertext`, matching the layout
/// `decrypt_password` expects.
pub fn encrypt_password(db_path: &str, plaintext: &str) -> Result<Vec<u8>> {
    let key_bytes = derive_key(db_path);
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| FederationError::Crypto(e.to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypts a blob produced by [`encrypt_password`].
pub fn decrypt_password(db_path: &str, blob: &[u8]) -> Result<String> {
    if blob.len() < NONCE_LEN {
        return Err(FederationError::Crypto(
            "ciphertext shorter than nonce prefix".to_string(),
        ));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

    let key_bytes = derive_key(db_path);
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| FederationError::Crypto(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| FederationError::Crypto(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let blob = encrypt_password("/tmp/beads.db", "hunter2").unwrap();
        let plain = decrypt_password("/tmp/beads.db", &blob).unwrap();
        assert_eq!(plain, "hunter2");
    }

    #[test]
    fn wrong_path_fails_to_decrypt() {
        let blob = encrypt_password("/tmp/beads.db", "hunter2").unwrap();
        let err = decrypt_password("/tmp/other.db", &blob).unwrap_err();
        assert!(matches!(err, FederationError::Crypto(_)));
    }

    #[test]
    fn nonce_varies_per_call() {
        let a = encrypt_password("/tmp/beads.db", "hunter2").unwrap();
        let b = encrypt_password("/tmp/beads.db", "hunter2").unwrap();
        assert_ne!(a, b, "nonces must not repeat across calls");
    }

    #[test]
    fn truncated_blob_rejected() {
        let err = decrypt_password("/tmp/beads.db", &[0u8; 4]).unwrap_err();
        assert!(matches!(err, FederationError::Crypto(_)));
    }
}
