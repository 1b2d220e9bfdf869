//! Wire codec: frames to envelopes and back, with HMAC signing.
//!
//! Frame layout:
//!
//! ```text
//! [identity…, "<IDS|MSG>", signature, header, parent_header, metadata, content, buffer…]
//! ```
//!
//! The signature is the hex HMAC of the four JSON parts, in order.

use bytes::Bytes;
use hmac::{Hmac, Mac, digest::KeyInit};
use serde_json::{Map, Value};
use sha2::{Sha256, Sha512};
use thiserror::Error;

use crate::{
    config::{ConnectionConfig, SignatureScheme},
    message::{Envelope, Header},
};

/// Separates routing identities from the signed message parts.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Signature plus the four JSON parts.
const MIN_PARTS: usize = 5;

/// Codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Signature mismatch")]
    Authentication,
    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl CodecError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }
}

/// Encodes and decodes envelopes for one shared secret.
#[derive(Clone)]
pub struct MessageCodec {
    scheme: SignatureScheme,
    key: Vec<u8>,
}

impl std::fmt::Debug for MessageCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCodec")
            .field("scheme", &self.scheme)
            .field("signed", &!self.key.is_empty())
            .finish()
    }
}

impl MessageCodec {
    /// Create a codec. An empty key disables signing and verification.
    #[must_use]
    pub fn new(scheme: SignatureScheme, key: impl Into<Vec<u8>>) -> Self {
        Self {
            scheme,
            key: key.into(),
        }
    }

    /// Codec for a connection's scheme and key.
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(config.signature_scheme, config.key.as_bytes())
    }

    /// Decode transport frames into an envelope, verifying the signature.
    ///
    /// # Errors
    /// Returns `Authentication` on signature mismatch and `Malformed` on
    /// missing, incomplete or unparsable parts.
    pub fn decode(&self, frames: Vec<Bytes>) -> Result<Envelope, CodecError> {
        let split = frames
            .iter()
            .position(|f| f.as_ref() == DELIMITER)
            .ok_or_else(|| CodecError::malformed("missing <IDS|MSG> delimiter"))?;

        let mut frames = frames.into_iter();
        let identities: Vec<Bytes> = frames.by_ref().take(split).collect();
        let rest: Vec<Bytes> = frames.skip(1).collect();
        if rest.len() < MIN_PARTS {
            return Err(CodecError::malformed(format!(
                "expected at least {MIN_PARTS} frames after delimiter, got {}",
                rest.len()
            )));
        }

        let parts = [&rest[1], &rest[2], &rest[3], &rest[4]];
        if !self.key.is_empty() && !self.verify(&parts, &rest[0]) {
            return Err(CodecError::Authentication);
        }

        let header: Header = parse_part(&rest[1], "header")?;
        let parent: Value = parse_part(&rest[2], "parent_header")?;
        let parent_header = match parent {
            Value::Object(ref map) if map.is_empty() => None,
            other => Some(
                serde_json::from_value(other)
                    .map_err(|e| CodecError::malformed(format!("parent_header: {e}")))?,
            ),
        };
        let metadata: Map<String, Value> = parse_part(&rest[3], "metadata")?;
        let content: Value = parse_part(&rest[4], "content")?;

        Ok(Envelope {
            identities,
            header,
            parent_header,
            metadata,
            content,
            buffers: rest[MIN_PARTS..].to_vec(),
        })
    }

    /// Encode an envelope into signed transport frames.
    ///
    /// # Errors
    /// Returns `Malformed` if a part cannot be serialized.
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<Bytes>, CodecError> {
        let header = to_part(&envelope.header, "header")?;
        let parent = match &envelope.parent_header {
            Some(parent) => to_part(parent, "parent_header")?,
            None => Bytes::from_static(b"{}"),
        };
        let metadata = to_part(&envelope.metadata, "metadata")?;
        let content = to_part(&envelope.content, "content")?;

        let signature = self.sign(&[&header, &parent, &metadata, &content]);

        let mut frames = Vec::with_capacity(envelope.identities.len() + 6 + envelope.buffers.len());
        frames.extend(envelope.identities.iter().cloned());
        frames.push(Bytes::from_static(DELIMITER));
        frames.push(Bytes::from(signature));
        frames.extend([header, parent, metadata, content]);
        frames.extend(envelope.buffers.iter().cloned());
        Ok(frames)
    }

    fn sign(&self, parts: &[&Bytes; 4]) -> String {
        if self.key.is_empty() {
            return String::new();
        }
        let digest = match self.scheme {
            SignatureScheme::HmacSha256 => {
                keyed::<Hmac<Sha256>>(&self.key, parts).map(|m| m.finalize().into_bytes().to_vec())
            }
            SignatureScheme::HmacSha512 => {
                keyed::<Hmac<Sha512>>(&self.key, parts).map(|m| m.finalize().into_bytes().to_vec())
            }
        };
        digest.map(hex::encode).unwrap_or_default()
    }

    fn verify(&self, parts: &[&Bytes; 4], signature: &Bytes) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        match self.scheme {
            SignatureScheme::HmacSha256 => keyed::<Hmac<Sha256>>(&self.key, parts)
                .is_some_and(|m| m.verify_slice(&expected).is_ok()),
            SignatureScheme::HmacSha512 => keyed::<Hmac<Sha512>>(&self.key, parts)
                .is_some_and(|m| m.verify_slice(&expected).is_ok()),
        }
    }
}

fn keyed<M: Mac + KeyInit>(key: &[u8], parts: &[&Bytes; 4]) -> Option<M> {
    let mut mac = <M as KeyInit>::new_from_slice(key).ok()?;
    for part in parts {
        mac.update(part);
    }
    Some(mac)
}

fn parse_part<T: serde::de::DeserializeOwned>(frame: &Bytes, name: &str) -> Result<T, CodecError> {
    serde_json::from_slice(frame).map_err(|e| CodecError::malformed(format!("{name}: {e}")))
}

fn to_part<T: serde::Serialize>(value: &T, name: &str) -> Result<Bytes, CodecError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| CodecError::malformed(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::message::{ExecuteRequest, MessageContent};

    const KEY: &str = "0c3b4e1e-2f52-4b23-9d5a-8f7f5e7e1c11";

    fn codec() -> MessageCodec {
        MessageCodec::new(SignatureScheme::HmacSha256, KEY)
    }

    fn execute_envelope() -> Envelope {
        let mut env = Envelope::new(
            &ExecuteRequest {
                code: "let x = 3".to_string(),
                silent: false,
                store_history: true,
                user_expressions: Map::new(),
                allow_stdin: false,
                stop_on_error: true,
            },
            "client",
            "user",
        )
        .unwrap();
        env.identities = vec![Bytes::from_static(b"route-a")];
        env
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let codec = codec();
        let env = execute_envelope();
        let frames = codec.encode(&env).unwrap();
        assert_eq!(frames[1].as_ref(), DELIMITER);

        let decoded = codec.decode(frames.clone()).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(codec.encode(&decoded).unwrap(), frames);
    }

    #[test]
    fn test_signature_is_hex_hmac_of_parts() {
        let codec = codec();
        let frames = codec.encode(&execute_envelope()).unwrap();
        let mut mac = <Hmac<Sha256> as KeyInit>::new_from_slice(KEY.as_bytes()).unwrap();
        for part in &frames[3..7] {
            mac.update(part);
        }
        assert_eq!(
            frames[2].as_ref(),
            hex::encode(mac.finalize().into_bytes()).as_bytes()
        );
    }

    #[test]
    fn test_tampered_content_fails_authentication() {
        let codec = codec();
        let mut frames = codec.encode(&execute_envelope()).unwrap();
        frames[6] = Bytes::from(json!({"code": "rm -rf"}).to_string());
        assert!(matches!(codec.decode(frames), Err(CodecError::Authentication)));
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let frames = codec().encode(&execute_envelope()).unwrap();
        let other = MessageCodec::new(SignatureScheme::HmacSha256, "other");
        assert!(matches!(other.decode(frames), Err(CodecError::Authentication)));
    }

    #[test]
    fn test_sha512_scheme() {
        let codec = MessageCodec::new(SignatureScheme::HmacSha512, KEY);
        let frames = codec.encode(&execute_envelope()).unwrap();
        assert_eq!(frames[2].len(), 128);
        assert!(codec.decode(frames).is_ok());
    }

    #[test]
    fn test_unsigned_codec_skips_verification() {
        let codec = MessageCodec::new(SignatureScheme::HmacSha256, "");
        let mut frames = codec.encode(&execute_envelope()).unwrap();
        assert!(frames[2].is_empty());
        frames[2] = Bytes::from_static(b"garbage");
        assert!(codec.decode(frames).is_ok());
    }

    #[test]
    fn test_missing_delimiter_is_malformed() {
        let frames = vec![Bytes::from_static(b"{}"); 6];
        assert!(matches!(codec().decode(frames), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_truncated_frames_are_malformed() {
        let codec = codec();
        let mut frames = codec.encode(&execute_envelope()).unwrap();
        frames.truncate(5);
        assert!(matches!(codec.decode(frames), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_invalid_header_is_malformed() {
        let codec = MessageCodec::new(SignatureScheme::HmacSha256, "");
        let frames = vec![
            Bytes::from_static(DELIMITER),
            Bytes::new(),
            Bytes::from_static(b"{\"msg_type\": \"execute_request\"}"),
            Bytes::from_static(b"{}"),
            Bytes::from_static(b"{}"),
            Bytes::from_static(b"{}"),
        ];
        assert!(matches!(codec.decode(frames), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_parent_and_buffers_survive() {
        let codec = codec();
        let parent = execute_envelope();
        let mut child = Envelope::reply_to(
            &parent,
            &crate::message::IsCompleteReply {
                status: "complete".to_string(),
            },
            "kernel",
            "kernel",
        )
        .unwrap();
        child.buffers = vec![Bytes::from_static(b"\x00\x01")];

        let decoded = codec.decode(codec.encode(&child).unwrap()).unwrap();
        assert_eq!(decoded.parent_header, Some(parent.header));
        assert_eq!(decoded.buffers, child.buffers);
        assert_eq!(decoded.msg_type(), crate::message::IsCompleteReply::MSG_TYPE);
    }
}
