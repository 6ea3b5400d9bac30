// Sources:
// - https://learn.microsoft.com/windows/win32/devnotes/mft-segment-reference

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;

use crate::error::{NtfsError, Result};

/// An address in the master file table: a 48-bit record number plus the
/// sequence number of the generation it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub struct SegmentReference {
    pub segment_number_low: u32,
    pub segment_number_high: u16,
    pub sequence_number: u16,
}

/// References to files use the segment reference layout.
pub type FileReference = SegmentReference;

impl SegmentReference {
    pub const LENGTH: usize = 8;

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err(NtfsError::Truncated);
        }
        let mut c = Cursor::new(buf);
        Ok(Self {
            segment_number_low: c.read_u32::<LittleEndian>()?,
            segment_number_high: c.read_u16::<LittleEndian>()?,
            sequence_number: c.read_u16::<LittleEndian>()?,
        })
    }

    pub fn record_number(&self) -> u64 {
        (self.segment_number_high as u64) << 32 | self.segment_number_low as u64
    }

    /// The all-zero reference means "no reference".
    pub fn is_zero(&self) -> bool {
        self.segment_number_low == 0 && self.segment_number_high == 0 && self.sequence_number == 0
    }
}

impl fmt::Display for SegmentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (seq {})", self.record_number(), self.sequence_number)
    }
}
