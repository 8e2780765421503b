//! Per-user API token storage: decrypts the `Token` rows the data model
//! carries (AES-256-GCM, key from `secrets.yaml`) and implements the
//! "per-user token first, fall back to the system secret" resolution
//! sequence the orchestrator's credential step needs.

use std::collections::HashMap;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sandboxd_protocol::Token;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("token_encryption_key_hex is not valid hex: {0}")]
    InvalidKeyHex(#[from] hex_error::HexError),
    #[error("token encryption key must be exactly 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("token ciphertext could not be decrypted (wrong key or corrupted data)")]
    DecryptionFailed,
    #[error("token ciphertext could not be decoded as UTF-8")]
    InvalidUtf8,
}

/// A minimal hex encode/decode so this module doesn't need a `hex` crate
/// dependency just for 32-byte keys.
mod hex_error {
    #[derive(Debug, thiserror::Error)]
    #[error("invalid hex digit")]
    pub struct HexError;
}

fn decode_hex(s: &str) -> Result<Vec<u8>, hex_error::HexError> {
    if s.len() % 2 != 0 {
        return Err(hex_error::HexError);
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| hex_error::HexError))
        .collect()
}

/// Wraps a loaded AES-256-GCM key and encrypts/decrypts [`Token`] payloads.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    pub fn from_hex_key(key_hex: &str) -> Result<Self, SecretsError> {
        let bytes = decode_hex(key_hex)?;
        if bytes.len() != 32 {
            return Err(SecretsError::InvalidKeyLength(bytes.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt `plaintext` under a fresh random-ish nonce. Nonce uniqueness
    /// here is the caller's responsibility, same as every AEAD API.
    pub fn encrypt(&self, plaintext: &str, nonce: &[u8; 12]) -> Result<Vec<u8>, SecretsError> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext.as_bytes())
            .map_err(|_| SecretsError::DecryptionFailed)
    }

    pub fn decrypt(&self, token: &Token) -> Result<String, SecretsError> {
        if token.nonce.len() != 12 {
            return Err(SecretsError::DecryptionFailed);
        }
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&token.nonce), token.ciphertext.as_slice())
            .map_err(|_| SecretsError::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| SecretsError::InvalidUtf8)
    }
}

/// In-process `Token` lookup keyed by `(user_id, provider)`. A future
/// deployment backs this with a real credentials table; this is the trait
/// boundary for it, plus the one implementation this crate ships.
pub trait TokenStore: Send + Sync {
    fn get(&self, user_id: Uuid, provider: &str) -> Option<Token>;
}

#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<HashMap<(Uuid, String), Token>>,
}

impl InMemoryTokenStore {
    pub fn insert(&self, token: Token) {
        let key = (token.user_id, token.provider.clone());
        self.tokens.lock().expect("token store lock poisoned").insert(key, token);
    }
}

impl TokenStore for InMemoryTokenStore {
    fn get(&self, user_id: Uuid, provider: &str) -> Option<Token> {
        self.tokens
            .lock()
            .expect("token store lock poisoned")
            .get(&(user_id, provider.to_string()))
            .cloned()
    }
}

/// Resolve the API key to use for `user_id`/`provider`: the user's own
/// decrypted token if one is stored, else the system-wide key read from
/// `system_api_key_env_var`. Matches the original's "per-user token first,
/// fallback to the system secret" sequence.
pub fn resolve_api_key(
    cipher: Option<&TokenCipher>,
    store: &dyn TokenStore,
    user_id: Uuid,
    provider: &str,
    system_api_key_env_var: &str,
) -> Result<Option<String>, SecretsError> {
    if let (Some(cipher), Some(token)) = (cipher, store.get(user_id, provider)) {
        return Ok(Some(cipher.decrypt(&token)?));
    }
    Ok(std::env::var(system_api_key_env_var).ok())
}
