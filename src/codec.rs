// Sources:
// - https://learn.microsoft.com/windows/win32/sysinfo/file-times
// - https://learn.microsoft.com/windows/win32/api/guiddef/ns-guiddef-guid

//! Small field codecs shared by the record and value decoders.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{NtfsError, Result};

/// Seconds between 1601-01-01 and 1970-01-01.
const UNIX_EPOCH_DELTA_SECS: i64 = 11_644_473_600;
const TICKS_PER_SEC: i128 = 10_000_000;

/// Convert a Windows FILETIME (100ns ticks since 1601-01-01 UTC) to a UTC instant.
pub fn filetime_to_datetime(ft: u64) -> DateTime<Utc> {
    let ticks = ft as i128 - UNIX_EPOCH_DELTA_SECS as i128 * TICKS_PER_SEC;
    let secs = ticks.div_euclid(TICKS_PER_SEC) as i64;
    let nanos = (ticks.rem_euclid(TICKS_PER_SEC) * 100) as u32;
    // Every u64 tick count lands well inside chrono's range.
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// Decode little-endian UTF-16. An empty range is the empty string.
/// Unpaired surrogates become U+FFFD; only an odd byte count is an error.
pub fn utf16_to_string(raw: &[u8]) -> Result<String> {
    if raw.len() % 2 != 0 {
        return Err(NtfsError::InvalidUnicode);
    }
    let units = raw.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]]));
    Ok(char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}

/// Decode an on-disk GUID. The first three fields are stored little-endian,
/// the trailing eight bytes as-is.
pub fn guid_from_disk(raw: &[u8]) -> Result<Uuid> {
    let bytes: [u8; 16] = raw
        .get(..16)
        .and_then(|b| b.try_into().ok())
        .ok_or(NtfsError::Truncated)?;
    Ok(Uuid::from_bytes_le(bytes))
}

/// Inverse of [`guid_from_disk`].
pub fn guid_to_disk(guid: &Uuid) -> [u8; 16] {
    guid.to_bytes_le()
}
