//! Message envelope
//!
//! ```text
//! +--------+---------------------------+---------------------------+
//! | format | produced (i64, BE, nanos) | payload                   |
//! | 1 byte | 8 bytes                   | rest of message           |
//! +--------+---------------------------+---------------------------+
//! ```
//!
//! The payload is an array of metric records in the given format. `null`
//! entries are holes and decode to `None`.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

use crate::error::DecodeError;
use crate::types::MetricData;

/// Length of the envelope header
pub const HEADER_LEN: usize = 9;

/// Encoding of the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadFormat {
    /// JSON array
    Json = 0,
    /// MessagePack array of maps
    MsgPack = 1,
}

impl TryFrom<u8> for PayloadFormat {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(PayloadFormat::Json),
            1 => Ok(PayloadFormat::MsgPack),
            other => Err(DecodeError::UnknownFormat(other)),
        }
    }
}

/// A message split into header fields and the still-encoded payload
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    /// Payload encoding
    pub format: PayloadFormat,
    /// Production time, unix nanoseconds
    pub produced: i64,
    /// Encoded payload
    pub payload: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Production time as a timestamp
    pub fn produced_at(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.produced)
    }

    /// Time between production and `now`; zero when produced in the future
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.produced_at()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Decode the payload records
    pub fn decode_payload(&self) -> Result<Vec<Option<MetricData>>, DecodeError> {
        decode_payload(self.format, self.payload)
    }
}

/// Split a raw message into its envelope fields
pub fn decode_envelope(data: &[u8]) -> Result<Envelope<'_>, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::TooShort(data.len()));
    }
    let format = PayloadFormat::try_from(data[0])?;
    let mut produced = [0u8; 8];
    produced.copy_from_slice(&data[1..HEADER_LEN]);

    Ok(Envelope {
        format,
        produced: i64::from_be_bytes(produced),
        payload: &data[HEADER_LEN..],
    })
}

/// Decode a payload of the given format
pub fn decode_payload(
    format: PayloadFormat,
    payload: &[u8],
) -> Result<Vec<Option<MetricData>>, DecodeError> {
    match format {
        PayloadFormat::Json => Ok(serde_json::from_slice(payload)?),
        PayloadFormat::MsgPack => Ok(rmp_serde::from_slice(payload)?),
    }
}

/// Build a message carrying `metrics`
///
/// # Arguments
///
/// * `format` - Payload encoding
/// * `produced` - Production time, unix nanoseconds
/// * `metrics` - Records; `None` entries are encoded as holes
pub fn encode_message(
    format: PayloadFormat,
    produced: i64,
    metrics: &[Option<MetricData>],
) -> Result<Vec<u8>, DecodeError> {
    let payload = match format {
        PayloadFormat::Json => {
            serde_json::to_vec(metrics).map_err(|e| DecodeError::Encode(e.to_string()))?
        },
        PayloadFormat::MsgPack => {
            rmp_serde::to_vec_named(metrics).map_err(|e| DecodeError::Encode(e.to_string()))?
        },
    };

    let mut msg = Vec::with_capacity(HEADER_LEN + payload.len());
    msg.push(format as u8);
    msg.extend_from_slice(&produced.to_be_bytes());
    msg.extend_from_slice(&payload);
    Ok(msg)
}
