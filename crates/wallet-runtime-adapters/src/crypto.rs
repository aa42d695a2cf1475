//! At-rest encryption of auth tokens.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use wallet_runtime_core::{WalletError, WalletResult};

const TOKEN_KEY_INFO: &[u8] = b"token_enc_v1";

/// Serialized form of a sealed token; every field is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedToken {
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// Argon2id root key, HKDF-SHA256 expansion, AES-256-GCM.
#[derive(Debug, Clone, Copy)]
pub struct TokenVault {
    memory_kib: u32,
    iterations: u32,
}

impl Default for TokenVault {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
        }
    }
}

impl TokenVault {
    /// Lower cost parameters, for hosts that re-derive often.
    pub fn with_cost(memory_kib: u32, iterations: u32) -> Self {
        Self {
            memory_kib,
            iterations,
        }
    }

    pub fn seal(&self, encryption_key: &[u8], token: &str) -> WalletResult<SealedToken> {
        let salt: [u8; 16] = random_bytes()?;
        let nonce: [u8; 12] = random_bytes()?;
        let key = self.derive_key(encryption_key, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| WalletError::Validation(format!("aes-gcm init failed: {e}")))?;
        let ciphertext = cipher
            .encrypt(&Nonce::from(nonce), token.as_bytes())
            .map_err(|e| WalletError::Transport(format!("aes-gcm encrypt failed: {e}")))?;
        Ok(SealedToken {
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    pub fn open(&self, encryption_key: &[u8], sealed: &SealedToken) -> WalletResult<String> {
        let salt: [u8; 16] = decode_fixed(&sealed.salt, "salt")?;
        let nonce: [u8; 12] = decode_fixed(&sealed.nonce, "nonce")?;
        let ciphertext = STANDARD
            .decode(&sealed.ciphertext)
            .map_err(|e| WalletError::Validation(format!("sealed token ciphertext: {e}")))?;
        let key = self.derive_key(encryption_key, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| WalletError::Validation(format!("aes-gcm init failed: {e}")))?;
        let plaintext = cipher
            .decrypt(&Nonce::from(nonce), ciphertext.as_slice())
            .map_err(|_| WalletError::Auth("sealed token rejected: wrong key or tampered data".to_owned()))?;
        String::from_utf8(plaintext)
            .map_err(|e| WalletError::Validation(format!("sealed token is not utf-8: {e}")))
    }

    fn derive_key(&self, encryption_key: &[u8], salt: &[u8; 16]) -> WalletResult<[u8; 32]> {
        let params = Params::new(self.memory_kib, self.iterations, 1, Some(32))
            .map_err(|e| WalletError::Validation(format!("argon2 params: {e}")))?;
        let mut root = [0u8; 32];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(encryption_key, salt, &mut root)
            .map_err(|e| WalletError::Validation(format!("argon2 derivation failed: {e}")))?;
        let hk = Hkdf::<Sha256>::new(None, &root);
        let mut key = [0u8; 32];
        hk.expand(TOKEN_KEY_INFO, &mut key)
            .map_err(|_| WalletError::Validation("hkdf expand failed".to_owned()))?;
        Ok(key)
    }
}

fn random_bytes<const N: usize>() -> WalletResult<[u8; N]> {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out)
        .map_err(|e| WalletError::Transport(format!("random generation failed: {e}")))?;
    Ok(out)
}

fn decode_fixed<const N: usize>(raw: &str, what: &str) -> WalletResult<[u8; N]> {
    let bytes = STANDARD
        .decode(raw)
        .map_err(|e| WalletError::Validation(format!("sealed token {what}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| WalletError::Validation(format!("sealed token {what} has the wrong length")))
}
