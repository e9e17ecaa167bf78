//! Binary wire format for [`MetricBundle`].
//!
//! Publisher and receiver only need to agree on one encoding; this one is bincode
//! varint encoding. Only decoding is size-limited, so a corrupt length prefix cannot
//! trigger a huge allocation while any bundle a publisher gathers still encodes.

use crate::domain::bundle::MetricBundle;
use crate::domain::errors::{DecodeError, EncodeError};
use bincode::Options;

/// Largest payload [`decode`] accepts
pub const MAX_BUNDLE_BYTES: u64 = 16 * 1024 * 1024;

pub fn encode(bundle: &MetricBundle) -> Result<Vec<u8>, EncodeError> {
    Ok(bincode::DefaultOptions::new().serialize(bundle)?)
}

pub fn decode(bytes: &[u8]) -> Result<MetricBundle, DecodeError> {
    bincode::DefaultOptions::new()
        .with_limit(MAX_BUNDLE_BYTES)
        .reject_trailing_bytes()
        .deserialize(bytes)
        .map_err(|source| DecodeError {
            len: bytes.len(),
            source,
        })
}
