use anyhow::{anyhow, Result};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::models::EncryptedStore;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

pub fn encrypt_with_key(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<EncryptedStore> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| anyhow!("Encryption failed: {e}"))?;

    Ok(EncryptedStore {
        nonce: base64::engine::general_purpose::STANDARD.encode(nonce_bytes),
        data: base64::engine::general_purpose::STANDARD.encode(ciphertext),
    })
}

pub fn decrypt_with_key(key: &[u8; KEY_LEN], enc: &EncryptedStore) -> Result<Vec<u8>> {
    let nonce_bytes = base64::engine::general_purpose::STANDARD.decode(&enc.nonce)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(anyhow!("Invalid nonce length"));
    }
    let ciphertext = base64::engine::general_purpose::STANDARD.decode(&enc.data)?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|_| anyhow!("Decryption failed. Wrong key or corrupted store?"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = generate_key();
        let enc = encrypt_with_key(&key, b"account list").unwrap();
        assert_eq!(decrypt_with_key(&key, &enc).unwrap(), b"account list");
    }

    #[test]
    fn wrong_key_fails() {
        let key = generate_key();
        let enc = encrypt_with_key(&key, b"account list").unwrap();
        let other = generate_key();
        assert!(decrypt_with_key(&other, &enc).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_key();
        let enc = encrypt_with_key(&key, b"account list").unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(&enc.data)
            .unwrap();
        raw[0] ^= 0x01;
        let tampered = EncryptedStore {
            nonce: enc.nonce,
            data: base64::engine::general_purpose::STANDARD.encode(raw),
        };
        assert!(decrypt_with_key(&key, &tampered).is_err());
    }

    #[test]
    fn nonces_are_fresh_per_write() {
        let key = generate_key();
        let a = encrypt_with_key(&key, b"same plaintext").unwrap();
        let b = encrypt_with_key(&key, b"same plaintext").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.data, b.data);
    }
}
