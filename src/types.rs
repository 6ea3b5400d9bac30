// Sources:
// - https://learn.microsoft.com/windows/win32/devnotes/attribute-list-entry
// - https://flatcap.org/linux-ntfs/ntfs/attributes/index_root.html

//! Closed enums over the on-disk code values, each with a fallback that keeps
//! the raw value of anything unrecognised.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute type code. Anything not listed decodes to `Unknown`, which
/// still carries the raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AttributeType {
    StandardInformation,
    AttributeList,
    FileName,
    ObjectId,
    SecurityDescriptor,
    VolumeName,
    VolumeInformation,
    Data,
    IndexRoot,
    IndexAllocation,
    Bitmap,
    ReparsePoint,
    EaInformation,
    Ea,
    PropertySet,
    LoggedUtilityStream,
    /// `0xFFFFFFFF`, terminates an attribute stream.
    End,
    Unknown(u32),
}

impl AttributeType {
    pub const END_CODE: u32 = 0xFFFF_FFFF;

    pub fn code(&self) -> u32 {
        use AttributeType::*;
        match *self {
            StandardInformation => 0x10,
            AttributeList => 0x20,
            FileName => 0x30,
            ObjectId => 0x40,
            SecurityDescriptor => 0x50,
            VolumeName => 0x60,
            VolumeInformation => 0x70,
            Data => 0x80,
            IndexRoot => 0x90,
            IndexAllocation => 0xA0,
            Bitmap => 0xB0,
            ReparsePoint => 0xC0,
            EaInformation => 0xD0,
            Ea => 0xE0,
            PropertySet => 0xF0,
            LoggedUtilityStream => 0x100,
            End => Self::END_CODE,
            Unknown(v) => v,
        }
    }

    /// The `$NAME` used by NTFS documentation.
    pub fn name(&self) -> &'static str {
        use AttributeType::*;
        match self {
            StandardInformation => "$STANDARD_INFORMATION",
            AttributeList => "$ATTRIBUTE_LIST",
            FileName => "$FILE_NAME",
            ObjectId => "$OBJECT_ID",
            SecurityDescriptor => "$SECURITY_DESCRIPTOR",
            VolumeName => "$VOLUME_NAME",
            VolumeInformation => "$VOLUME_INFORMATION",
            Data => "$DATA",
            IndexRoot => "$INDEX_ROOT",
            IndexAllocation => "$INDEX_ALLOCATION",
            Bitmap => "$BITMAP",
            ReparsePoint => "$REPARSE_POINT",
            EaInformation => "$EA_INFORMATION",
            Ea => "$EA",
            PropertySet => "$PROPERTY_SET",
            LoggedUtilityStream => "$LOGGED_UTILITY_STREAM",
            End => "$END",
            Unknown(_) => "$UNKNOWN",
        }
    }
}

impl From<u32> for AttributeType {
    fn from(value: u32) -> Self {
        use AttributeType::*;
        match value {
            0x10 => StandardInformation,
            0x20 => AttributeList,
            0x30 => FileName,
            0x40 => ObjectId,
            0x50 => SecurityDescriptor,
            0x60 => VolumeName,
            0x70 => VolumeInformation,
            0x80 => Data,
            0x90 => IndexRoot,
            0xA0 => IndexAllocation,
            0xB0 => Bitmap,
            0xC0 => ReparsePoint,
            0xD0 => EaInformation,
            0xE0 => Ea,
            0xF0 => PropertySet,
            0x100 => LoggedUtilityStream,
            Self::END_CODE => End,
            v => Unknown(v),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeType::Unknown(v) => write!(f, "$UNKNOWN(0x{:X})", v),
            t => f.write_str(t.name()),
        }
    }
}

/// Attribute form code: where the value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum FormCode {
    Resident,
    Nonresident,
    Unknown(u8),
}

impl FormCode {
    pub fn code(&self) -> u8 {
        match *self {
            FormCode::Resident => 0x00,
            FormCode::Nonresident => 0x01,
            FormCode::Unknown(v) => v,
        }
    }

    /// Only form 0 keeps its value inline; every other code is read as
    /// non-resident.
    pub fn is_resident(&self) -> bool {
        matches!(self, FormCode::Resident)
    }
}

impl From<u8> for FormCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => FormCode::Resident,
            0x01 => FormCode::Nonresident,
            v => FormCode::Unknown(v),
        }
    }
}

impl fmt::Display for FormCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FormCode::Resident => "RESIDENT",
            FormCode::Nonresident => "NONRESIDENT",
            FormCode::Unknown(_) => "UNKNOWN",
        })
    }
}

/// Collation rule of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CollationRule {
    Binary,
    FileName,
    Unicode,
    NtofsUlong,
    NtofsSid,
    NtofsSecurityHash,
    NtofsUlongs,
    Other(u32),
}

impl From<u32> for CollationRule {
    fn from(value: u32) -> Self {
        match value {
            0x00 => CollationRule::Binary,
            0x01 => CollationRule::FileName,
            0x02 => CollationRule::Unicode,
            0x10 => CollationRule::NtofsUlong,
            0x11 => CollationRule::NtofsSid,
            0x12 => CollationRule::NtofsSecurityHash,
            0x13 => CollationRule::NtofsUlongs,
            v => CollationRule::Other(v),
        }
    }
}

impl fmt::Display for CollationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollationRule::Binary => f.write_str("BINARY"),
            CollationRule::FileName => f.write_str("FILENAME"),
            CollationRule::Unicode => f.write_str("UNICODE"),
            CollationRule::NtofsUlong => f.write_str("NTOFS_ULONG"),
            CollationRule::NtofsSid => f.write_str("NTOFS_SID"),
            CollationRule::NtofsSecurityHash => f.write_str("NTOFS_SECURITY_HASH"),
            CollationRule::NtofsUlongs => f.write_str("NTOFS_ULONGS"),
            CollationRule::Other(v) => write!(f, "COLLATION({})", v),
        }
    }
}
