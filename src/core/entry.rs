use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::core::error::StoreError;

/// Identifier of one queued hit, unique among all currently stored entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HitId(Uuid);

impl HitId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_raw(value: Uuid) -> Self {
        Self(value)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for HitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The durable record wrapping one outbound hit.
///
/// Immutable once appended; the payload is opaque to the queue and the
/// timestamp (milliseconds since epoch) is kept for ordering diagnostics
/// only, never for expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitEntry {
    pub id: HitId,
    pub payload: Bytes,
    pub timestamp: u64,
}

pub fn new_hit(payload: impl Into<Bytes>) -> HitEntry {
    HitEntry {
        id: HitId::generate(),
        payload: payload.into(),
        timestamp: current_timestamp(),
    }
}

pub fn with_custom_hit(id: HitId, payload: impl Into<Bytes>, timestamp: u64) -> HitEntry {
    HitEntry {
        id,
        payload: payload.into(),
        timestamp,
    }
}

pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

const ENTRY_HEADER_LEN: usize = 16 + 8;

/// Serialize a `HitEntry` body (no record framing).
pub(crate) fn encode_hit(hit: &HitEntry) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(ENTRY_HEADER_LEN + hit.payload.len());
    buf.put_slice(hit.id.as_uuid().as_bytes());
    buf.put_u64_le(hit.timestamp);
    buf.put_slice(&hit.payload);
    buf.to_vec()
}

/// Deserialize a `HitEntry` body (no record framing).
pub(crate) fn decode_hit(bytes: &[u8]) -> Result<HitEntry, StoreError> {
    if bytes.len() < ENTRY_HEADER_LEN {
        return Err(StoreError::Corruption(
            "hit record too short to contain header".to_string(),
        ));
    }

    let mut slice = bytes;
    let mut id_bytes = [0u8; 16];
    slice.copy_to_slice(&mut id_bytes);
    let timestamp = slice.get_u64_le();
    let payload = slice.copy_to_bytes(slice.remaining());

    Ok(HitEntry {
        id: HitId::from_raw(Uuid::from_bytes(id_bytes)),
        payload,
        timestamp,
    })
}
