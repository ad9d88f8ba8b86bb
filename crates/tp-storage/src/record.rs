//! Transmission records and their stored encoding.
//!
//! A stored record is one JSON header line followed by the raw payload:
//!
//! ```text
//! {"version":1,"endpoint":"...","content_type":"...","content_encoding":null,"created_at":"...","payload_len":123}\n
//! <payload bytes>
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::RECORD_FORMAT_VERSION;

/// A serialized batch addressed to an ingestion endpoint.
///
/// Immutable once stored; the payload is opaque to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub endpoint: String,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub created_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl Transmission {
    pub fn new(
        endpoint: impl Into<String>,
        content_type: impl Into<String>,
        content_encoding: Option<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            content_type: content_type.into(),
            content_encoding,
            created_at: Utc::now(),
            payload,
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A transmission read back from a store, with the key needed to delete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTransmission {
    pub key: String,
    pub transmission: Transmission,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordHeader {
    version: u32,
    endpoint: String,
    content_type: String,
    #[serde(default)]
    content_encoding: Option<String>,
    created_at: DateTime<Utc>,
    payload_len: u64,
}

/// Encode a transmission into its stored form.
pub fn encode_record(transmission: &Transmission) -> Result<Vec<u8>, serde_json::Error> {
    let header = RecordHeader {
        version: RECORD_FORMAT_VERSION,
        endpoint: transmission.endpoint.clone(),
        content_type: transmission.content_type.clone(),
        content_encoding: transmission.content_encoding.clone(),
        created_at: transmission.created_at,
        payload_len: transmission.payload.len() as u64,
    };

    let mut out = serde_json::to_vec(&header)?;
    out.push(b'\n');
    out.extend_from_slice(&transmission.payload);
    Ok(out)
}

/// Decode a stored record.
pub fn decode_record(bytes: &[u8]) -> Result<Transmission, DecodeError> {
    let newline = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or(DecodeError::MissingHeader)?;

    let header: RecordHeader = serde_json::from_slice(&bytes[..newline])?;
    if header.version != RECORD_FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(header.version));
    }

    let payload = &bytes[newline + 1..];
    if payload.len() as u64 != header.payload_len {
        return Err(DecodeError::LengthMismatch {
            expected: header.payload_len,
            actual: payload.len() as u64,
        });
    }

    Ok(Transmission {
        endpoint: header.endpoint,
        content_type: header.content_type,
        content_encoding: header.content_encoding,
        created_at: header.created_at,
        payload: payload.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transmission {
        Transmission::new(
            "http://localhost/track",
            "application/x-json-stream",
            None,
            b"{\"a\":1}\n{\"b\":2}".to_vec(),
        )
    }

    #[test]
    fn test_encode_decode() {
        let t = sample();
        let bytes = encode_record(&t).unwrap();
        assert_eq!(decode_record(&bytes).unwrap(), t);
    }

    #[test]
    fn test_payload_may_contain_newlines_and_binary() {
        let mut t = sample();
        t.payload = vec![0, 10, 255, 10, 13];
        t.content_encoding = Some("gzip".into());
        let bytes = encode_record(&t).unwrap();
        assert_eq!(decode_record(&bytes).unwrap().payload, vec![0, 10, 255, 10, 13]);
    }

    #[test]
    fn test_missing_header() {
        assert!(matches!(
            decode_record(b"no newline here"),
            Err(DecodeError::MissingHeader)
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = encode_record(&sample()).unwrap();
        let err = decode_record(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { .. }));
    }

    #[test]
    fn test_garbage_header() {
        let err = decode_record(b"{not json\npayload").unwrap_err();
        assert!(matches!(err, DecodeError::Header(_)));
    }

    #[test]
    fn test_future_version_rejected() {
        let bytes = encode_record(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let bumped = text.replacen("\"version\":1", "\"version\":9", 1);
        let err = decode_record(bumped.as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVersion(9)));
    }
}
