use aes_gcm::{aead::Aead, aead::KeyInit, Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand_core::{OsRng, RngCore};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum EncryptionError {
    #[error("encryption key must be 32 bytes")]
    InvalidKeyLength,
    #[error("failed to seal parameter value")]
    Encrypt,
    #[error("failed to open parameter value")]
    Decrypt,
    #[error("invalid ciphertext encoding")]
    InvalidEncoding,
}

/// AES-256-GCM sealing for parameters stored as secure values.
///
/// Sealed output is `base64(nonce || ciphertext)`.
#[derive(Clone)]
pub struct ParameterCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for ParameterCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterCipher").finish_non_exhaustive()
    }
}

impl ParameterCipher {
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        if key.len() != KEY_LEN {
            return Err(EncryptionError::InvalidKeyLength);
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)?;
        Ok(Self { cipher })
    }

    pub fn from_base64(key_b64: &str) -> Result<Self, EncryptionError> {
        Self::new(&decode_key(key_b64)?)
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| EncryptionError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    pub fn open(&self, sealed_b64: &str) -> Result<String, EncryptionError> {
        let data = STANDARD
            .decode(sealed_b64)
            .map_err(|_| EncryptionError::InvalidEncoding)?;
        if data.len() <= NONCE_LEN {
            return Err(EncryptionError::InvalidEncoding);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| EncryptionError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| EncryptionError::Decrypt)
    }
}

pub fn decode_key(key_b64: &str) -> Result<Vec<u8>, EncryptionError> {
    let decoded = STANDARD
        .decode(key_b64.trim())
        .map_err(|_| EncryptionError::InvalidEncoding)?;
    if decoded.len() != KEY_LEN {
        return Err(EncryptionError::InvalidKeyLength);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_value_opens_with_same_key() {
        let encoded = STANDARD.encode([42u8; 32]);
        let cipher = ParameterCipher::from_base64(&encoded).unwrap();
        let sealed = cipher.seal(r#"{"accessToken":"a"}"#).unwrap();
        assert!(!sealed.contains("accessToken"));
        assert_eq!(cipher.open(&sealed).unwrap(), r#"{"accessToken":"a"}"#);
    }

    #[test]
    fn other_key_cannot_open() {
        let sealed = ParameterCipher::new(&[1u8; 32]).unwrap().seal("secret").unwrap();
        let err = ParameterCipher::new(&[2u8; 32]).unwrap().open(&sealed);
        assert!(matches!(err, Err(EncryptionError::Decrypt)));
    }

    #[test]
    fn invalid_inputs_error() {
        assert!(matches!(
            ParameterCipher::new(&[1, 2, 3]),
            Err(EncryptionError::InvalidKeyLength)
        ));
        let cipher = ParameterCipher::new(&[0u8; 32]).unwrap();
        assert!(matches!(
            cipher.open("abc"),
            Err(EncryptionError::InvalidEncoding)
        ));
        assert!(matches!(
            decode_key(&STANDARD.encode([0u8; 16])),
            Err(EncryptionError::InvalidKeyLength)
        ));
    }
}
