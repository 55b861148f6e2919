// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Telemetry packet model and its JSON wire codec.
//!
//! One datagram carries exactly one JSON object. Absent fields and explicit `null`s take their
//! default value; a field of the wrong JSON type or a timestamp that is not RFC 3339 makes the
//! whole datagram undecodable.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

use crate::errors::DecodeError;

/// Largest datagram the relay will read. Anything longer is truncated by the socket and will
/// fail to decode.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// A decoded telemetry packet.
///
/// `seq` and `crc_ok` are sender assertions: the relay neither checks monotonicity or uniqueness
/// of `seq` nor verifies `crc_ok`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(
        default,
        deserialize_with = "rfc3339_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(
        rename = "signal_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub signal: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub seq: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub crc_ok: bool,
    #[serde(default, deserialize_with = "null_readings_as_zero")]
    pub values: HashMap<String, f64>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A `null` reading is kept as `0.0` rather than failing the whole packet.
fn null_readings_as_zero<'de, D>(deserializer: D) -> Result<HashMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let readings = Option::<HashMap<String, Option<f64>>>::deserialize(deserializer)?;
    Ok(readings
        .unwrap_or_default()
        .into_iter()
        .map(|(name, reading)| (name, reading.unwrap_or(0.0)))
        .collect())
}

/// Strict RFC 3339: the date and time must be joined by `T`.
fn rfc3339_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if raw.as_bytes().get(10) != Some(&b'T') {
        return Err(D::Error::custom(format!(
            "timestamp \"{raw}\" is not RFC 3339"
        )));
    }
    DateTime::parse_from_rfc3339(&raw)
        .map(|parsed| Some(parsed.with_timezone(&Utc)))
        .map_err(|e| D::Error::custom(format!("timestamp \"{raw}\" is not RFC 3339: {e}")))
}

/// Decodes one datagram payload.
///
/// The top-level value must be a JSON object; arrays, scalars and `null` are rejected even
/// though serde would happily build a struct out of a sequence.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
    if first != Some(&b'{') {
        // Well-formed but not an object, or not JSON at all.
        serde_json::from_slice::<serde::de::IgnoredAny>(bytes)?;
        return Err(DecodeError::NotAnObject);
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Encodes a packet into the same JSON schema it was decoded from.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(packet)
}
