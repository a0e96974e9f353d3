// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Payload codecs.
//!
//! | Format | Inbound | Outbound |
//! |---|---|---|
//! | `raw` | payload text is the value | value text |
//! | `json` | value object, array of value objects, or bare scalar | value object |
//!
//! Inbound values without own timestamps are stamped with the receive time.

use chrono::{DateTime, Utc};
use tagway_core::{CanonicalValue, Value, ValueCodec, STATUS_GOOD};

use crate::error::{MqttError, MqttResult};
use crate::settings::PayloadFormat;

/// Codec for `raw` payloads.
#[derive(Debug, Clone, Copy)]
pub struct RawPayloadCodec {
    received: DateTime<Utc>,
}

impl ValueCodec for RawPayloadCodec {
    type Raw = Vec<u8>;

    fn from_backend(&self, raw: Vec<u8>) -> CanonicalValue {
        let text = String::from_utf8_lossy(&raw).into_owned();
        CanonicalValue::new(text)
            .with_source_time(self.received)
            .with_server_time(self.received)
    }
}

/// Codec for one element of a `json` payload.
#[derive(Debug, Clone, Copy)]
pub struct JsonPayloadCodec {
    received: DateTime<Utc>,
}

impl ValueCodec for JsonPayloadCodec {
    type Raw = serde_json::Value;

    fn from_backend(&self, raw: serde_json::Value) -> CanonicalValue {
        if !raw.is_object() {
            return match Value::from_json(&raw) {
                Some(value) => CanonicalValue::new(value)
                    .with_source_time(self.received)
                    .with_server_time(self.received),
                None => CanonicalValue::empty(STATUS_GOOD),
            };
        }

        let mut value = CanonicalValue::from_json(&raw);
        if raw.get("statusCode").is_none() {
            value = value.with_status(STATUS_GOOD);
        }
        if raw.get("sourceTime").is_none() && raw.get("sourceTimeMs").is_none() {
            value = value.with_source_time(self.received);
        }
        if raw.get("serverTime").is_none() && raw.get("serverTimeMs").is_none() {
            value = value.with_server_time(self.received);
        }
        value
    }
}

/// Decodes a received payload into its values.
///
/// A `json` array yields one value per object element. Other elements are
/// skipped.
pub fn decode_payload(
    format: PayloadFormat,
    topic: &str,
    payload: &[u8],
    received: DateTime<Utc>,
) -> MqttResult<Vec<CanonicalValue>> {
    match format {
        PayloadFormat::Raw => Ok(vec![RawPayloadCodec { received }.from_backend(payload.to_vec())]),
        PayloadFormat::Json => {
            let codec = JsonPayloadCodec { received };
            let json: serde_json::Value = serde_json::from_slice(payload)
                .map_err(|e| MqttError::payload(topic, e.to_string()))?;
            Ok(match json {
                serde_json::Value::Array(items) => items
                    .into_iter()
                    .filter(serde_json::Value::is_object)
                    .map(|item| codec.from_backend(item))
                    .collect(),
                other => vec![codec.from_backend(other)],
            })
        }
    }
}

/// Encodes value text for publication.
pub fn encode_payload(format: PayloadFormat, text: &str, time: DateTime<Utc>) -> Vec<u8> {
    match format {
        PayloadFormat::Raw => text.as_bytes().to_vec(),
        PayloadFormat::Json => {
            let value = CanonicalValue::new(text)
                .with_source_time(time)
                .with_server_time(time);
            value.to_json().to_string().into_bytes()
        }
    }
}
