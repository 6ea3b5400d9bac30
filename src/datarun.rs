// Sources:
// - https://learn.microsoft.com/windows/win32/devnotes/attribute-record-header
// - https://flatcap.org/linux-ntfs/ntfs/concepts/data_runs.html

//! Mapping pairs ("data runs") of a non-resident attribute.
//!
//! Each run starts with a header byte: the low nibble is the byte width of
//! the cluster count, the high nibble the byte width of the signed offset
//! relative to the previous run. A zero header ends the stream.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{NtfsError, Result};

/// Header byte of a single mapping pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header(pub u8);

impl Header {
    /// End-of-stream sentinel.
    pub const END: Header = Header(0);

    pub fn length_bytes(&self) -> usize {
        (self.0 & 0x0F) as usize
    }

    pub fn offset_bytes(&self) -> usize {
        (self.0 >> 4) as usize
    }

    /// Bytes following the header.
    pub fn data_bytes(&self) -> usize {
        self.length_bytes() + self.offset_bytes()
    }

    pub fn is_valid(&self) -> bool {
        let (length, offset) = (self.length_bytes(), self.offset_bytes());
        // Each field must fit in 64 bits and an offset needs a length.
        length <= 8 && offset <= 8 && !(offset > 0 && length == 0)
    }
}

/// One decoded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MappingPair {
    /// In clusters.
    pub length: u64,
    /// Absolute starting LCN, accumulated across runs. `None` for a sparse run.
    pub offset: Option<i64>,
}

impl MappingPair {
    pub fn is_sparse(&self) -> bool {
        self.offset.is_none()
    }
}

impl fmt::Display for MappingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(lcn) => write!(f, "{} clusters @ LCN {}", self.length, lcn),
            None => write!(f, "{} clusters (sparse)", self.length),
        }
    }
}

fn read_unsigned(raw: &[u8]) -> u64 {
    raw.iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (*b as u64) << (8 * i))
}

fn read_signed(raw: &[u8]) -> i64 {
    let value = read_unsigned(raw);
    let width = raw.len();
    if width == 0 || width == 8 {
        return value as i64;
    }
    // sign-extend from the top bit of the last byte
    let shift = 64 - 8 * width as u32;
    ((value << shift) as i64) >> shift
}

/// Incremental mapping-pair decoder. Yields one run per call and stops for
/// good at the sentinel, at the end of input, or after the first error.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    offset: i64,
    done: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            offset: 0,
            done: false,
        }
    }

    /// Absolute LCN of the last run that carried an offset.
    pub fn current_offset(&self) -> i64 {
        self.offset
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode the next run. `Ok(None)` once the stream has ended.
    pub fn next_pair(&mut self) -> Result<Option<MappingPair>> {
        if self.done {
            return Ok(None);
        }
        let result = self.step();
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    fn step(&mut self) -> Result<Option<MappingPair>> {
        let Some(&byte) = self.data.get(self.pos) else {
            return Ok(None);
        };
        let header = Header(byte);
        if !header.is_valid() {
            return Err(NtfsError::InvalidHeader);
        }
        if header == Header::END {
            return Ok(None);
        }

        let start = self.pos + 1;
        let fields = self
            .data
            .get(start..start + header.data_bytes())
            .ok_or(NtfsError::Truncated)?;
        let (len_raw, off_raw) = fields.split_at(header.length_bytes());

        let length = read_unsigned(len_raw);
        let offset = if off_raw.is_empty() {
            None
        } else {
            self.offset = self
                .offset
                .checked_add(read_signed(off_raw))
                .ok_or(NtfsError::RunOffsetOverflow)?;
            Some(self.offset)
        };

        self.pos = start + header.data_bytes();
        Ok(Some(MappingPair { length, offset }))
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<MappingPair>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_pair().transpose()
    }
}

/// Decode every run up to the sentinel or the end of `data`.
pub fn decode(data: &[u8]) -> Result<Vec<MappingPair>> {
    Decoder::new(data).collect()
}
