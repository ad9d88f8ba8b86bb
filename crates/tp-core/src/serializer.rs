//! Batch serialization.
//!
//! [`JsonLinesSerializer`] writes one envelope per line:
//!
//! ```json
//! {"name":"Request","time":"2026-01-01T00:00:00Z","sampleRate":25.0,
//!  "iKey":"...","tags":{"ai.operation.id":"..."},"data":{"kind":"request",...}}
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use tp_common::{Error, Result, TelemetryData, TelemetryItem};

pub const CONTENT_TYPE_JSON_STREAM: &str = "application/x-json-stream";

const TAG_OPERATION_ID: &str = "ai.operation.id";
const TAG_OPERATION_PARENT_ID: &str = "ai.operation.parentId";
const TAG_OPERATION_NAME: &str = "ai.operation.name";
const TAG_USER_ID: &str = "ai.user.id";

/// Encodes a batch of items into a transmission payload.
pub trait Serializer: Send + Sync {
    fn serialize(&self, items: &[TelemetryItem]) -> Result<Vec<u8>>;

    fn content_type(&self) -> &str;

    fn content_encoding(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    name: &'static str,
    time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    i_key: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<&'static str, &'a str>,
    data: &'a TelemetryData,
    #[serde(skip_serializing_if = "no_properties")]
    properties: &'a BTreeMap<String, String>,
}

fn no_properties(properties: &&BTreeMap<String, String>) -> bool {
    properties.is_empty()
}

impl<'a> Envelope<'a> {
    fn new(item: &'a TelemetryItem) -> Self {
        let context = &item.context;
        let tags = [
            (TAG_OPERATION_ID, context.operation_id.as_deref()),
            (TAG_OPERATION_PARENT_ID, context.parent_id.as_deref()),
            (TAG_OPERATION_NAME, context.operation_name.as_deref()),
            (TAG_USER_ID, context.user_id.as_deref()),
        ]
        .into_iter()
        .filter_map(|(tag, value)| value.map(|v| (tag, v)))
        .collect();

        Self {
            name: item.kind().envelope_name(),
            time: item.timestamp.to_rfc3339(),
            sample_rate: item.sampling_percentage(),
            i_key: item.instrumentation_key.as_deref(),
            tags,
            data: &item.data,
            properties: &item.properties,
        }
    }
}

/// Newline-delimited JSON envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesSerializer;

impl JsonLinesSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonLinesSerializer {
    fn serialize(&self, items: &[TelemetryItem]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(items.len() * 256);
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push(b'\n');
            }
            serde_json::to_writer(&mut out, &Envelope::new(item))
                .map_err(|e| Error::Serialization(e.to_string()))?;
        }
        Ok(out)
    }

    fn content_type(&self) -> &str {
        CONTENT_TYPE_JSON_STREAM
    }
}
