use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tracing::debug;

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts individual text fields with one AES-256-GCM key.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt a field value. Returns `base64(nonce || ciphertext)`.
    pub fn encrypt_field(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(token))
    }

    /// Decrypt a token produced by [`FieldCipher::encrypt_field`].
    pub fn decrypt_field(&self, token: &str) -> Result<String> {
        let raw = BASE64.decode(token)?;
        if raw.len() <= NONCE_LEN {
            return Err(anyhow!("Ciphertext too short ({} bytes)", raw.len()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        Ok(String::from_utf8(plaintext)?)
    }

    /// Decrypt a stored value, handing back the input unchanged if it is not
    /// a valid token for this key. A bad field never fails the whole row.
    pub fn decrypt_or_original(&self, value: &str) -> String {
        match self.decrypt_field(value) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                debug!("Field left as stored: {}", e);
                value.to_string()
            }
        }
    }
}
