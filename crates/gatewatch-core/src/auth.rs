//! Credential blob decoding.
//!
//! Provider credentials arrive as `base64:<payload>` strings, the payload
//! using the URL-safe alphabet with padding.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use thiserror::Error;

use crate::types::AuthBundle;

pub const BLOB_PREFIX: &str = "base64:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("wrong base64 encoding: missing prefix")]
    MissingPrefix,
    #[error("wrong base64 encoding: {0}")]
    Invalid(String),
}

/// Decode a `base64:`-prefixed blob.
///
/// An empty payload decodes to `None`.
pub fn decode_blob(val: &str) -> Result<Option<Vec<u8>>, DecodeError> {
    let payload = val.strip_prefix(BLOB_PREFIX).ok_or(DecodeError::MissingPrefix)?;
    let decoded = URL_SAFE
        .decode(payload.trim())
        .map_err(|e| DecodeError::Invalid(e.to_string()))?;
    if decoded.is_empty() {
        return Ok(None);
    }
    Ok(Some(decoded))
}

/// Decoded credential material handed to the tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ca: Option<Vec<u8>>,
    pub cert: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
}

impl Credentials {
    /// Decode every field of `bundle`, leaving a field empty when it fails.
    ///
    /// The failures are returned alongside so the caller can report them.
    pub fn decode_lossy(bundle: &AuthBundle) -> (Self, Vec<(&'static str, DecodeError)>) {
        let mut errors = Vec::new();
        let mut field = |name: &'static str, raw: &str| match decode_blob(raw) {
            Ok(v) => v,
            Err(e) => {
                errors.push((name, e));
                None
            }
        };
        let creds = Self {
            ca: field("ca", &bundle.ca),
            cert: field("cert", &bundle.cert),
            key: field("key", &bundle.key),
        };
        (creds, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(data: &[u8]) -> String {
        format!("{BLOB_PREFIX}{}", URL_SAFE.encode(data))
    }

    #[test]
    fn decodes_prefixed_payload() {
        assert_eq!(decode_blob(&blob(b"-----BEGIN")).unwrap(), Some(b"-----BEGIN".to_vec()));
    }

    #[test]
    fn trims_payload_whitespace() {
        let val = format!("{BLOB_PREFIX}  {}\n", URL_SAFE.encode(b"key"));
        assert_eq!(decode_blob(&val).unwrap(), Some(b"key".to_vec()));
    }

    #[test]
    fn empty_payload_is_none() {
        assert_eq!(decode_blob("base64:").unwrap(), None);
    }

    #[test]
    fn missing_prefix_fails() {
        let raw = URL_SAFE.encode(b"cert");
        assert_eq!(decode_blob(&raw), Err(DecodeError::MissingPrefix));
    }

    #[test]
    fn invalid_payload_fails() {
        assert!(matches!(decode_blob("base64:not*base64"), Err(DecodeError::Invalid(_))));
    }

    #[test]
    fn decode_lossy_keeps_good_fields() {
        let bundle = AuthBundle {
            ca: blob(b"ca"),
            cert: "plain-text".to_string(),
            key: blob(b"key"),
        };
        let (creds, errors) = Credentials::decode_lossy(&bundle);
        assert_eq!(creds.ca, Some(b"ca".to_vec()));
        assert_eq!(creds.cert, None);
        assert_eq!(creds.key, Some(b"key".to_vec()));
        assert_eq!(errors, vec![("cert", DecodeError::MissingPrefix)]);
    }
}
