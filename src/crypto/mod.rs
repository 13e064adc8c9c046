//! Password-derived authenticated encryption for clipboard payloads
//!
//! Every text field travels as a self-describing token:
//! `version(1) || unix_seconds_be(8) || iv(16) || ciphertext || hmac(32)`,
//! URL-safe base64 encoded. Encryption is AES-128-CBC with PKCS7 padding,
//! authentication is HMAC-SHA256 over everything before the tag. The 32-byte
//! key is derived with PBKDF2-HMAC-SHA256 and split in half: first 16 bytes
//! sign, last 16 bytes encrypt. Any peer can reproduce this format.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Shared key-derivation salt.
///
/// Intentionally static and non-secret: every peer must derive the same key
/// from the same password without any configuration exchange. Changing this
/// breaks interop with all existing peers.
pub const STATIC_SALT: &[u8] = b"TailSync_Shared_Salt_v1";

/// Token format version byte, fixed across all peers.
pub const TOKEN_VERSION: u8 = 0x80;

/// PBKDF2 iteration count used by every peer.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const TIMESTAMP_LEN: usize = 8;
const IV_LEN: usize = 16;
const HMAC_LEN: usize = 32;
const HEADER_LEN: usize = 1 + TIMESTAMP_LEN + IV_LEN;

/// Smallest possible token: header, one padded block, tag.
pub const MIN_TOKEN_LEN: usize = HEADER_LEN + 16 + HMAC_LEN;

/// Cipher errors
#[derive(Debug, Error)]
pub enum CipherError {
    /// Empty password passed to key derivation
    #[error("encryption password must not be empty")]
    EmptyPassword,

    /// Token is structurally invalid (bad base64, too short, wrong version)
    #[error("malformed token: {0}")]
    Malformed(&'static str),

    /// HMAC verification failed, most likely a password mismatch
    #[error("token authentication failed (wrong password or corrupted data)")]
    Authentication,

    /// Decrypted bytes are not valid UTF-8
    #[error("decrypted payload is not valid UTF-8")]
    Utf8,
}

/// Derive the shared 32-byte key from a password.
///
/// Deterministic: the same password always yields the same key on every peer.
pub fn derive_key(password: &str) -> Result<[u8; 32], CipherError> {
    if password.is_empty() {
        return Err(CipherError::EmptyPassword);
    }
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), STATIC_SALT, PBKDF2_ITERATIONS, &mut key);
    Ok(key)
}

/// Authenticated symmetric cipher for individual text values
#[derive(Clone)]
pub struct Cipher {
    signing_key: [u8; 16],
    encryption_key: [u8; 16],
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Build a cipher from a password via [`derive_key`].
    pub fn from_password(password: &str) -> Result<Self, CipherError> {
        Ok(Self::from_key(derive_key(password)?))
    }

    /// Build a cipher from an already-derived 32-byte key.
    pub fn from_key(key: [u8; 32]) -> Self {
        let mut signing_key = [0u8; 16];
        let mut encryption_key = [0u8; 16];
        signing_key.copy_from_slice(&key[..16]);
        encryption_key.copy_from_slice(&key[16..]);
        Self {
            signing_key,
            encryption_key,
        }
    }

    /// Encrypt a plaintext into a token with a fresh random IV.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        self.encrypt_at(plaintext, timestamp, &iv)
    }

    fn encrypt_at(&self, plaintext: &str, timestamp: u64, iv: &[u8; IV_LEN]) -> String {
        let ciphertext = Aes128CbcEnc::new(&self.encryption_key.into(), iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut token = Vec::with_capacity(HEADER_LEN + ciphertext.len() + HMAC_LEN);
        token.push(TOKEN_VERSION);
        token.extend_from_slice(&timestamp.to_be_bytes());
        token.extend_from_slice(iv);
        token.extend_from_slice(&ciphertext);

        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .expect("HMAC accepts any key length");
        mac.update(&token);
        token.extend_from_slice(&mac.finalize().into_bytes());

        URL_SAFE.encode(token)
    }

    /// Decrypt a token, verifying its HMAC first.
    ///
    /// The embedded timestamp is decoded but never used to reject old tokens:
    /// clipboard items may be legitimately re-sent or delayed.
    pub fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        let raw = decode_token(token)?;
        if raw.len() < MIN_TOKEN_LEN {
            return Err(CipherError::Malformed("token too short"));
        }
        if raw[0] != TOKEN_VERSION {
            return Err(CipherError::Malformed("unknown token version"));
        }

        let (signed, tag) = raw.split_at(raw.len() - HMAC_LEN);
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .expect("HMAC accepts any key length");
        mac.update(signed);
        mac.verify_slice(tag)
            .map_err(|_| CipherError::Authentication)?;

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&signed[1 + TIMESTAMP_LEN..HEADER_LEN]);
        let plaintext = Aes128CbcDec::new(&self.encryption_key.into(), (&iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(&signed[HEADER_LEN..])
            .map_err(|_| CipherError::Malformed("invalid padding"))?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
    }

    /// Cheap structural check: does this text look like one of our tokens?
    ///
    /// Used to avoid double-encrypting already-encrypted content and to skip
    /// decryption attempts on plaintext from encryption-disabled peers.
    pub fn looks_like_token(text: &str) -> bool {
        match decode_token(text) {
            Ok(raw) => raw.len() >= MIN_TOKEN_LEN && raw[0] == TOKEN_VERSION,
            Err(_) => false,
        }
    }
}

/// Base64-decode a token, tolerating missing padding.
fn decode_token(token: &str) -> Result<Vec<u8>, CipherError> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(CipherError::Malformed("empty token"));
    }
    let mut padded = trimmed.to_owned();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    URL_SAFE
        .decode(padded)
        .map_err(|_| CipherError::Malformed("invalid base64"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cipher(password: &str) -> Cipher {
        Cipher::from_password(password).unwrap()
    }

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key("correct-horse").unwrap();
        let b = derive_key("correct-horse").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, derive_key("wrong-horse").unwrap());
    }

    #[test]
    fn derive_key_rejects_empty_password() {
        assert!(matches!(derive_key(""), Err(CipherError::EmptyPassword)));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let c = cipher("correct-horse");
        for text in ["secret", "héllo wörld 你好", "a", &"x".repeat(4096)] {
            let token = c.encrypt(text);
            assert_eq!(c.decrypt(&token).unwrap(), text);
        }
    }

    #[test]
    fn token_structure() {
        let c = cipher("pw");
        let raw = decode_token(&c.encrypt("hello")).unwrap();
        assert_eq!(raw[0], TOKEN_VERSION);
        assert!(raw.len() >= MIN_TOKEN_LEN);
        // ciphertext region is whole AES blocks
        assert_eq!((raw.len() - HEADER_LEN - HMAC_LEN) % 16, 0);
    }

    #[test]
    fn fresh_iv_per_token() {
        let c = cipher("pw");
        assert_ne!(c.encrypt("same"), c.encrypt("same"));
    }

    #[test]
    fn wrong_password_fails_authentication() {
        let token = cipher("correct-horse").encrypt("secret");
        let err = cipher("wrong-horse").decrypt(&token).unwrap_err();
        assert!(matches!(err, CipherError::Authentication));
    }

    #[test]
    fn tampered_token_fails_authentication() {
        let c = cipher("pw");
        let mut raw = decode_token(&c.encrypt("secret")).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0x01;
        let err = c.decrypt(&URL_SAFE.encode(raw)).unwrap_err();
        assert!(matches!(err, CipherError::Authentication));
    }

    #[test]
    fn unpadded_base64_is_tolerated() {
        let c = cipher("pw");
        let token = c.encrypt("secret");
        let stripped = token.trim_end_matches('=');
        assert_eq!(c.decrypt(stripped).unwrap(), "secret");
    }

    #[test]
    fn short_token_rejected() {
        let c = cipher("pw");
        let short = URL_SAFE.encode([TOKEN_VERSION; 20]);
        assert!(matches!(
            c.decrypt(&short),
            Err(CipherError::Malformed(_))
        ));
    }

    #[test]
    fn wrong_version_rejected() {
        let c = cipher("pw");
        let mut raw = decode_token(&c.encrypt("secret")).unwrap();
        raw[0] = 0x81;
        assert!(matches!(
            c.decrypt(&URL_SAFE.encode(raw)),
            Err(CipherError::Malformed(_))
        ));
    }

    #[test]
    fn looks_like_token_accepts_own_output() {
        let c = cipher("pw");
        assert!(Cipher::looks_like_token(&c.encrypt("anything")));
    }

    #[test]
    fn looks_like_token_rejects_plain_strings() {
        for text in ["", "hello world", "https://example.com", "not-base-64!!"] {
            assert!(!Cipher::looks_like_token(text), "{text:?}");
        }
    }
}
