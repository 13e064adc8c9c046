//! Wire codec for clipboard update messages
//!
//! One JSON object per logical update, newline-free. Decoding is permissive:
//! unknown fields are ignored and missing fields default instead of rejecting,
//! which is how protocol compatibility is maintained without version
//! negotiation. When a cipher is configured, the text fields are encrypted
//! field-by-field; values that do not look like tokens pass through unchanged
//! so encrypted and unencrypted peers can coexist on one relay.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{Cipher, CipherError};

/// Source tag attributed to messages that carry none.
pub const DEFAULT_SOURCE: &str = "server";

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Malformed wire bytes
    #[error("malformed message: {0}")]
    Parse(#[from] serde_json::Error),

    /// The primary payload could not be decrypted
    #[error("failed to decrypt clipboard payload: {0}")]
    Decryption(#[source] CipherError),
}

/// One clipboard update as it travels over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardUpdate {
    /// Primary payload, never empty when emitted by a producer
    pub plain_text: String,
    /// Optional rich-text mirror of `plain_text`, explicit `null` when absent
    pub html_text: Option<String>,
    /// Producer-assigned milliseconds since epoch; display/ordering hint only
    pub timestamp: i64,
    /// Free-form origin tag, used for attribution and echo avoidance
    pub source: String,
}

impl ClipboardUpdate {
    /// Create an update stamped with the current time.
    pub fn new(plain_text: String, html_text: Option<String>, source: String) -> Self {
        Self {
            plain_text,
            html_text,
            timestamp: chrono::Utc::now().timestamp_millis(),
            source,
        }
    }
}

/// Raw wire shape with every field optional, normalized during decode.
#[derive(Deserialize)]
struct WireUpdate {
    #[serde(default)]
    plain_text: Option<String>,
    #[serde(default)]
    html_text: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    source: Option<String>,
}

/// Serialize an update, encrypting text fields when a cipher is configured.
///
/// A `plain_text` that already looks like a token is passed through rather
/// than double-encrypted; this guards against caller mistakes, it is not a
/// protocol feature.
pub fn encode(update: &ClipboardUpdate, cipher: Option<&Cipher>) -> Result<String, CodecError> {
    let message = match cipher {
        Some(cipher) => {
            let plain_text = if Cipher::looks_like_token(&update.plain_text) {
                update.plain_text.clone()
            } else {
                cipher.encrypt(&update.plain_text)
            };
            let html_text = update.html_text.as_deref().map(|html| {
                if Cipher::looks_like_token(html) {
                    html.to_owned()
                } else {
                    cipher.encrypt(html)
                }
            });
            ClipboardUpdate {
                plain_text,
                html_text,
                timestamp: update.timestamp,
                source: update.source.clone(),
            }
        }
        None => update.clone(),
    };
    Ok(serde_json::to_string(&message)?)
}

/// Parse wire bytes back into an update, decrypting token-shaped fields.
///
/// Decryption failure on `plain_text` aborts the decode (it almost always
/// means a password mismatch and the user should hear about it); failure on
/// `html_text` degrades to `None` because rich text is best-effort.
pub fn decode(raw: &str, cipher: Option<&Cipher>) -> Result<ClipboardUpdate, CodecError> {
    let wire: WireUpdate = serde_json::from_str(raw)?;

    let mut plain_text = wire.plain_text.unwrap_or_default();
    let mut html_text = wire.html_text;

    if let Some(cipher) = cipher {
        if Cipher::looks_like_token(&plain_text) {
            plain_text = cipher.decrypt(&plain_text).map_err(CodecError::Decryption)?;
        }
        html_text = html_text.and_then(|html| {
            if Cipher::looks_like_token(&html) {
                cipher.decrypt(&html).ok()
            } else {
                Some(html)
            }
        });
    }

    Ok(ClipboardUpdate {
        plain_text,
        html_text,
        timestamp: wire
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        source: wire.source.unwrap_or_else(|| DEFAULT_SOURCE.to_owned()),
    })
}

/// Heartbeat frame broadcast by the relay; decodes to an empty update that
/// every consumer skips.
pub fn heartbeat() -> String {
    serde_json::json!({ "type": "ping", "source": DEFAULT_SOURCE }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn update() -> ClipboardUpdate {
        ClipboardUpdate {
            plain_text: "hello".to_owned(),
            html_text: Some("<b>hello</b>".to_owned()),
            timestamp: 1_700_000_000_000,
            source: "desktop".to_owned(),
        }
    }

    #[test]
    fn plain_roundtrip() {
        let raw = encode(&update(), None).unwrap();
        assert_eq!(decode(&raw, None).unwrap(), update());
    }

    #[test]
    fn encrypted_roundtrip() {
        let cipher = Cipher::from_password("correct-horse").unwrap();
        let raw = encode(&update(), Some(&cipher)).unwrap();
        // text fields are opaque on the wire
        assert!(!raw.contains("hello"));
        assert_eq!(decode(&raw, Some(&cipher)).unwrap(), update());
    }

    #[test]
    fn html_is_explicit_null_when_absent() {
        let mut msg = update();
        msg.html_text = None;
        let raw = encode(&msg, None).unwrap();
        assert!(raw.contains("\"html_text\":null"));
        assert_eq!(decode(&raw, None).unwrap().html_text, None);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let decoded = decode("{}", None).unwrap();
        assert_eq!(decoded.plain_text, "");
        assert_eq!(decoded.html_text, None);
        assert_eq!(decoded.source, DEFAULT_SOURCE);
        assert!(decoded.timestamp > 0);
    }

    #[test]
    fn heartbeat_decodes_to_empty_update() {
        let decoded = decode(&heartbeat(), None).unwrap();
        assert_eq!(decoded.plain_text, "");
        assert_eq!(decoded.source, DEFAULT_SOURCE);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            decode("not json", None),
            Err(CodecError::Parse(_))
        ));
    }

    #[test]
    fn wrong_password_is_a_decryption_error() {
        let sender = Cipher::from_password("correct-horse").unwrap();
        let receiver = Cipher::from_password("wrong-horse").unwrap();
        let raw = encode(&update(), Some(&sender)).unwrap();
        assert!(matches!(
            decode(&raw, Some(&receiver)),
            Err(CodecError::Decryption(_))
        ));
    }

    #[test]
    fn html_decryption_failure_degrades_to_none() {
        let sender = Cipher::from_password("a").unwrap();
        let receiver = Cipher::from_password("b").unwrap();
        // plain text stays readable, html is under the mismatched key
        let raw = serde_json::to_string(&ClipboardUpdate {
            plain_text: "readable".to_owned(),
            html_text: Some(sender.encrypt("<b>secret</b>")),
            timestamp: 1_700_000_000_000,
            source: "desktop".to_owned(),
        })
        .unwrap();
        let decoded = decode(&raw, Some(&receiver)).unwrap();
        assert_eq!(decoded.plain_text, "readable");
        assert_eq!(decoded.html_text, None);
    }

    #[test]
    fn plaintext_passes_through_with_cipher_configured() {
        let cipher = Cipher::from_password("pw").unwrap();
        let raw = encode(&update(), None).unwrap();
        // an unencrypted peer's message still decodes on an encrypted peer
        assert_eq!(decode(&raw, Some(&cipher)).unwrap(), update());
    }

    #[test]
    fn already_encrypted_text_is_not_double_encrypted() {
        let cipher = Cipher::from_password("pw").unwrap();
        let mut msg = update();
        msg.plain_text = cipher.encrypt("hello");
        msg.html_text = None;
        let raw = encode(&msg, Some(&cipher)).unwrap();
        assert_eq!(decode(&raw, Some(&cipher)).unwrap().plain_text, "hello");
    }
}
