use std::io::prelude::*;

use bytes::{Buf, Bytes};
use flate2::read::GzDecoder;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::api::RegisterError;
use crate::metrics_consts::{RECORDS_SKIPPED, RECORD_PARSE_ERROR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Unsupported,
}

impl Compression {
    /// Maps a `Content-Encoding` header value, `None` meaning the body is sent as is.
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => None,
            "gzip" | "x-gzip" => Some(Compression::Gzip),
            _ => Some(Compression::Unsupported),
        }
    }
}

/// Why a line of the batch did not produce a `TrackEvent`.
#[derive(Error, Debug)]
pub enum RecordSkip {
    #[error("line is not valid json: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("line is not a json object")]
    NotAnObject,
}

/// One tracking record of a registration batch, reduced to the fields used for
/// registration. Values of the wrong json type are treated as absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackEvent {
    /// Empty when the record carried no usable project.
    pub project: String,
    pub event: Option<String>,
    pub event_type: Option<String>,
    pub distinct_id: Option<String>,
    pub login_id: Option<String>,
    pub original_id: Option<String>,
    pub properties_keys: Vec<String>,
    pub properties: Map<String, Value>,
}

impl TrackEvent {
    /// Decompress the request payload if needed and decode it as text. Invalid UTF-8 is
    /// replaced rather than rejected. Inflated payloads larger than `limit` are rejected.
    pub fn decode_body(
        compression: Option<Compression>,
        bytes: Bytes,
        limit: usize,
    ) -> Result<String, RegisterError> {
        tracing::debug!(len = bytes.len(), "decoding registration batch");

        match compression {
            None => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Some(Compression::Gzip) => {
                let d = GzDecoder::new(bytes.reader());
                let mut buf = Vec::new();
                d.take(limit as u64 + 1)
                    .read_to_end(&mut buf)
                    .map_err(|e| {
                        tracing::error!("failed to decode gzip: {}", e);
                        RegisterError::RequestDecodingError(String::from("invalid gzip data"))
                    })?;
                if buf.len() > limit {
                    tracing::warn!(limit, "rejecting gzip body inflating past the limit");
                    return Err(RegisterError::RequestDecodingError(String::from(
                        "decompressed body too large",
                    )));
                }
                Ok(String::from_utf8_lossy(&buf).into_owned())
            }
            Some(Compression::Unsupported) => Err(RegisterError::RequestDecodingError(
                String::from("unsupported compression format"),
            )),
        }
    }

    /// Lazily decode a newline-delimited batch. Blank lines are ignored and lines that
    /// fail to decode are skipped, they never abort the batch.
    pub fn parse_batch(payload: &str) -> impl Iterator<Item = TrackEvent> + '_ {
        payload
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match TrackEvent::decode_line(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    metrics::counter!(RECORD_PARSE_ERROR).increment(1);
                    metrics::counter!(RECORDS_SKIPPED, &[("reason", "malformed")]).increment(1);
                    tracing::debug!("skipping batch line: {}", e);
                    None
                }
            })
    }

    pub fn decode_line(line: &str) -> Result<TrackEvent, RecordSkip> {
        match serde_json::from_str::<Value>(line)? {
            Value::Object(record) => Ok(TrackEvent::from_record(record)),
            _ => Err(RecordSkip::NotAnObject),
        }
    }

    fn from_record(mut record: Map<String, Value>) -> TrackEvent {
        let properties_keys = match record.get("properties_keys") {
            Some(Value::Array(keys)) => keys
                .iter()
                .filter_map(Value::as_str)
                .filter(|key| !key.is_empty())
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        };

        let properties = match record.remove("properties") {
            Some(Value::Object(properties)) => properties,
            Some(Value::String(encoded)) => match serde_json::from_str::<Value>(&encoded) {
                Ok(Value::Object(properties)) => properties,
                _ => Map::new(),
            },
            _ => Map::new(),
        };

        TrackEvent {
            project: text_field(&record, "project").unwrap_or_default(),
            event: text_field(&record, "event"),
            event_type: text_field(&record, "type"),
            distinct_id: text_field(&record, "distinct_id"),
            login_id: text_field(&record, "login_id"),
            original_id: text_field(&record, "original_id"),
            properties_keys,
            properties,
        }
    }
}

fn text_field(record: &Map<String, Value>, key: &str) -> Option<String> {
    match record.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
