use std::io;
use thiserror::Error;

use crate::types::AttributeType;

/// Every way decoding NTFS metadata can fail.
///
/// None of these are fatal to the process: a failure on one MFT record says
/// nothing about the others.
#[derive(Error, Debug)]
pub enum NtfsError {
    #[error("insufficient or truncated data")]
    Truncated,

    #[error("volume boot record does not contain a valid NTFS file system label")]
    InvalidLabel,

    #[error("invalid unicode data")]
    InvalidUnicode,

    /// Typically indicative of MFT corruption.
    #[error("attribute name data exceeds the bounds of its file record segment")]
    AttributeNameOutOfBounds,

    /// Typically indicative of MFT corruption.
    #[error("attribute value exceeds the bounds of its file record segment")]
    AttributeValueOutOfBounds,

    #[error("file name value exceeds the bounds of its attribute value")]
    FileNameOutOfBounds,

    #[error("invalid data run header")]
    InvalidHeader,

    #[error("data run offset overflows a 64-bit cluster number")]
    RunOffsetOverflow,

    #[error("data run starts at negative cluster {0}")]
    InvalidRunOffset(i64),

    #[error("unusable parameter block: {0}")]
    InvalidParameterBlock(String),

    #[error("record signature is not 'FILE', found {}", String::from_utf8_lossy(.0))]
    BadSignature([u8; 4]),

    #[error("update sequence number mismatch at sector {sector}")]
    FixupMismatch { sector: usize },

    #[error("MFT record {0} is not covered by the mapped MFT extents")]
    RecordOutOfRange(u64),

    #[error("required {0} attribute not found")]
    MissingAttribute(AttributeType),

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for NtfsError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            NtfsError::Truncated
        } else {
            NtfsError::Io(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, NtfsError>;
