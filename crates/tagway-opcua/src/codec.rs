// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Conversion between OPC UA values and canonical values.
//!
//! Inbound, [`DataValueCodec`] normalizes a [`DataValue`] into a
//! [`CanonicalValue`]: unsigned and narrow integers widen, identifiers and
//! names become text, the status code becomes its symbolic name and missing
//! timestamps become the epoch.
//!
//! Outbound, [`variant_from_text`] converts write text to the node's data
//! type.

use tagway_core::{CanonicalValue, Value, ValueCodec};

use crate::error::{OpcUaError, OpcUaResult};
use crate::types::{BuiltinType, DataValue, Variant};

// =============================================================================
// Inbound
// =============================================================================

/// Codec from OPC UA data values to canonical values.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataValueCodec;

impl ValueCodec for DataValueCodec {
    type Raw = DataValue;

    fn from_backend(&self, raw: DataValue) -> CanonicalValue {
        let status = raw.status().name();
        CanonicalValue::from_parts(
            to_value(raw.value),
            status,
            raw.source_timestamp,
            raw.server_timestamp,
        )
    }
}

/// Converts a variant to a host scalar. `Null` has none.
pub fn to_value(variant: Variant) -> Option<Value> {
    let value = match variant {
        Variant::Null => return None,
        Variant::Boolean(v) => Value::Bool(v),
        Variant::SByte(v) => Value::Int64(v.into()),
        Variant::Byte(v) => Value::Int64(v.into()),
        Variant::Int16(v) => Value::Int64(v.into()),
        Variant::UInt16(v) => Value::Int64(v.into()),
        Variant::Int32(v) => Value::Int64(v.into()),
        Variant::UInt32(v) => Value::Int64(v.into()),
        Variant::Int64(v) => Value::Int64(v),
        Variant::UInt64(v) => Value::UInt64(v),
        Variant::Float(v) => Value::Float32(v),
        Variant::Double(v) => Value::Float64(v),
        Variant::String(v) => Value::String(v),
        Variant::DateTime(v) => Value::DateTime(v),
        Variant::Guid(v) => Value::String(v.to_string()),
        Variant::ByteString(v) => Value::Bytes(v),
        Variant::NodeId(v) => Value::String(v.to_opc_string()),
        Variant::LocalizedText(v) | Variant::QualifiedName(v) => Value::String(v),
        Variant::StatusCode(v) => Value::String(v.name()),
        Variant::Array(items) => Value::Array(items.into_iter().filter_map(to_value).collect()),
    };
    Some(value)
}

// =============================================================================
// Outbound
// =============================================================================

/// Converts write text to a variant of the given type.
///
/// Empty text writes `Null`. Booleans are false for `"0"` and `"false"` in
/// any case and true otherwise.
pub fn variant_from_text(text: &str, data_type: BuiltinType) -> OpcUaResult<Variant> {
    if text.is_empty() {
        return Ok(Variant::Null);
    }

    let trimmed = text.trim();
    let fail = |e: &dyn std::fmt::Display| {
        OpcUaError::conversion(text, format!("{:?}", data_type), e.to_string())
    };

    let variant = match data_type {
        BuiltinType::Boolean => {
            Variant::Boolean(!(trimmed == "0" || trimmed.eq_ignore_ascii_case("false")))
        }
        BuiltinType::String => Variant::String(text.to_string()),
        BuiltinType::SByte => Variant::SByte(trimmed.parse().map_err(|e| fail(&e))?),
        BuiltinType::Byte => Variant::Byte(trimmed.parse().map_err(|e| fail(&e))?),
        BuiltinType::Int16 => Variant::Int16(trimmed.parse().map_err(|e| fail(&e))?),
        BuiltinType::UInt16 => Variant::UInt16(trimmed.parse().map_err(|e| fail(&e))?),
        BuiltinType::Int32 | BuiltinType::Integer => {
            Variant::Int32(trimmed.parse().map_err(|e| fail(&e))?)
        }
        BuiltinType::UInt32 | BuiltinType::UInteger => {
            Variant::UInt32(trimmed.parse().map_err(|e| fail(&e))?)
        }
        BuiltinType::Int64 => Variant::Int64(trimmed.parse().map_err(|e| fail(&e))?),
        BuiltinType::UInt64 => Variant::UInt64(trimmed.parse().map_err(|e| fail(&e))?),
        BuiltinType::Float => Variant::Float(trimmed.parse().map_err(|e| fail(&e))?),
        BuiltinType::Double => Variant::Double(trimmed.parse().map_err(|e| fail(&e))?),
    };
    Ok(variant)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, StatusCode};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_integers_widen() {
        assert_eq!(to_value(Variant::UInt16(7)), Some(Value::Int64(7)));
        assert_eq!(to_value(Variant::UInt32(u32::MAX)), Some(Value::Int64(u32::MAX as i64)));
        assert_eq!(to_value(Variant::UInt64(9)), Some(Value::UInt64(9)));
    }

    #[test]
    fn test_identifiers_become_text() {
        assert_eq!(
            to_value(Variant::NodeId(NodeId::string(2, "A"))),
            Some(Value::String("ns=2;s=A".into()))
        );
        assert_eq!(
            to_value(Variant::StatusCode(StatusCode::BAD_NOT_WRITABLE)),
            Some(Value::String("BadNotWritable".into()))
        );
    }

    #[test]
    fn test_data_value_status_and_timestamps() {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let raw = DataValue::new(Variant::Double(21.5)).with_source_timestamp(time);
        let value = DataValueCodec.from_backend(raw);

        assert_eq!(value.status_code(), "Good");
        assert_eq!(value.value_as_string(), "21.5");
        assert_eq!(value.source_time(), time);
        assert_eq!(value.server_time().timestamp_millis(), 0);
    }

    #[test]
    fn test_bad_value_has_no_value() {
        let raw = DataValue::new(Variant::Null).with_status(StatusCode::BAD_NODE_ID_UNKNOWN);
        let value = DataValueCodec.from_backend(raw);
        assert!(value.has_no_value());
        assert_eq!(value.status_code(), "BadNodeIdUnknown");
    }

    #[test]
    fn test_boolean_text() {
        for (text, expected) in [("0", false), ("FALSE", false), ("false", false), ("1", true), ("on", true)] {
            assert_eq!(
                variant_from_text(text, BuiltinType::Boolean).unwrap(),
                Variant::Boolean(expected),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_numeric_text() {
        assert_eq!(variant_from_text(" 42 ", BuiltinType::Int32).unwrap(), Variant::Int32(42));
        assert_eq!(variant_from_text("42", BuiltinType::UInteger).unwrap(), Variant::UInt32(42));
        assert_eq!(variant_from_text("1.5", BuiltinType::Double).unwrap(), Variant::Double(1.5));
        assert!(variant_from_text("abc", BuiltinType::Int16).is_err());
        assert!(variant_from_text("-1", BuiltinType::UInt16).is_err());
    }

    #[test]
    fn test_empty_text_is_null() {
        assert_eq!(variant_from_text("", BuiltinType::Double).unwrap(), Variant::Null);
        assert_eq!(
            variant_from_text("plain", BuiltinType::String).unwrap(),
            Variant::String("plain".into())
        );
    }
}
