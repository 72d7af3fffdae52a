/*!
 * Serde utilities for common serialization/deserialization patterns.
 *
 * Attachment bodies and signature values travel as base64 text in the
 * canonical JSON representation of an AS4 message; the helpers in here keep
 * the in-memory model on plain `Vec<u8>`.
 */

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize a byte buffer as a standard base64 string.
///
/// # Usage with serde
///
/// ```rust
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Part {
///     #[serde(with = "as4_core::utils::serde::base64_bytes")]
///     content: Vec<u8>,
/// }
/// ```
pub mod base64_bytes {
    use super::*;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| D::Error::custom(format!("Invalid base64 content: {e}")))
    }
}

/// Encode raw bytes as base64 text (digest and signature values)
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64 text, returning `None` for malformed input
pub fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    STANDARD.decode(encoded.as_bytes()).ok()
}
