//! Content cipher collaborator (XChaCha20-Poly1305).
//!
//! The engine treats ciphertext as opaque content; the nonce travels
//! detached, base64-encoded, as the message's opaque IV. Key management is
//! external to this crate.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::NONCE_SIZE;
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt a payload body. Returns `(ciphertext_b64, iv_b64)`; the IV is
/// carried detached on the message rather than prepended to the ciphertext.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<(String, String), CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok((B64.encode(ciphertext), B64.encode(nonce_bytes)))
}

/// Decrypt a payload body given the detached base64 IV.
pub fn decrypt(
    key: &SymmetricKey,
    ciphertext_b64: &str,
    iv_b64: &str,
) -> Result<Vec<u8>, CryptoError> {
    let nonce_bytes = B64.decode(iv_b64).map_err(|_| CryptoError::InvalidIv)?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidIv);
    }
    let ciphertext = B64
        .decode(ciphertext_b64)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(&nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_symmetric_key();
        let plaintext = b"the quiet part out loud";

        let (ct, iv) = encrypt(&key, plaintext).unwrap();
        let recovered = decrypt(&key, &ct, &iv).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = generate_symmetric_key();
        let other = generate_symmetric_key();
        let (ct, iv) = encrypt(&key, b"secret").unwrap();
        assert!(matches!(
            decrypt(&other, &ct, &iv),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_garbage_iv_rejected() {
        let key = generate_symmetric_key();
        let (ct, _) = encrypt(&key, b"secret").unwrap();
        assert!(matches!(
            decrypt(&key, &ct, "not base64!"),
            Err(CryptoError::InvalidIv)
        ));
        assert!(matches!(
            decrypt(&key, &ct, &B64.encode([0u8; 5])),
            Err(CryptoError::InvalidIv)
        ));
    }
}
