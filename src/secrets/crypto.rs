use crate::error::{Error, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};

const AAD: &[u8] = b"gardi-secrets:v1";

/// Seals a plaintext blob under the store key.
/// Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let payload = Payload {
        msg: plaintext,
        aad: AAD,
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| Error::Crypto(format!("encryption failure: {e}")))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Opens a sealed blob. Expects `data` to be `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if the blob is truncated or fails authentication.
pub fn open(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 12 {
        return Err(Error::Crypto("sealed blob too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let payload = Payload {
        msg: ciphertext,
        aad: AAD,
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|e| Error::Crypto(format!("decryption failure: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = [7u8; 32];
        let plaintext = b"named secrets as json";

        let sealed = seal(&key, plaintext).unwrap();
        assert_ne!(sealed.as_slice(), plaintext.as_slice());
        assert!(sealed.len() > plaintext.len());

        let opened = open(&key, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn open_fails_with_wrong_key() {
        let sealed = seal(&[7u8; 32], b"payload").unwrap();
        assert!(open(&[8u8; 32], &sealed).is_err());
    }

    #[test]
    fn open_fails_on_tampered_ciphertext() {
        let key = [7u8; 32];
        let mut sealed = seal(&key, b"payload").unwrap();
        let len = sealed.len();
        if let Some(byte) = sealed.get_mut(len - 1) {
            *byte ^= 0xFF;
        }
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn open_rejects_truncated_blob() {
        assert!(open(&[7u8; 32], &[0u8; 4]).is_err());
    }
}
