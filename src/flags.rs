// Sources:
// - https://flatcap.org/linux-ntfs/ntfs/attributes/volume_information.html
// - https://learn.microsoft.com/windows/win32/fileio/file-attribute-constants

//! Bitmask newtypes. Each prints its known bits by name and any remaining
//! set bits in hex, so nothing on disk is silently hidden.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Join the names of the known masks present in `value`, then every unknown
/// set bit as hex. Prints `None` when nothing is set.
fn describe(value: u64, known: &[(u64, &str)]) -> String {
    let mut v: Vec<String> = Vec::new();
    let mut known_mask = 0u64;
    for &(mask, name) in known {
        known_mask |= mask;
        if value & mask != 0 {
            v.push(name.to_string());
        }
    }
    let unknown = value & !known_mask;
    for bit in 0..64 {
        let q = 1u64 << bit;
        if unknown & q != 0 {
            v.push(format!("{:#06x}", q));
        }
    }
    if v.is_empty() {
        "None".into()
    } else {
        v.join(" | ")
    }
}

/// Flags of an attribute record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct AttributeFlags(pub u16);

impl AttributeFlags {
    pub const COMPRESSION_MASK: u16 = 0x00FF;
    pub const ENCRYPTED: u16 = 0x4000;
    pub const SPARSE: u16 = 0x8000;

    pub fn is_compressed(&self) -> bool {
        self.0 & Self::COMPRESSION_MASK != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.0 & Self::SPARSE != 0
    }
}

impl fmt::Display for AttributeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(
            self.0 as u64,
            &[
                (Self::COMPRESSION_MASK as u64, "Compressed"),
                (Self::ENCRYPTED as u64, "Encrypted"),
                (Self::SPARSE as u64, "Sparse"),
            ],
        ))
    }
}

/// Flags of a $VOLUME_INFORMATION value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct VolumeFlags(pub u16);

impl VolumeFlags {
    pub const DIRTY: u16 = 0x0001;
    pub const RESIZE_LOG_FILE: u16 = 0x0002;
    pub const UPGRADE_ON_MOUNT: u16 = 0x0004;
    pub const MOUNTED_ON_NT4: u16 = 0x0008;
    pub const DELETE_USN_UNDERWAY: u16 = 0x0010;
    pub const REPAIR_OBJECT_ID: u16 = 0x0020;
    pub const CHKDSK_UNDERWAY: u16 = 0x4000;
    pub const MODIFIED_BY_CHKDSK: u16 = 0x8000;

    pub fn is_dirty(&self) -> bool {
        self.0 & Self::DIRTY != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for VolumeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(
            self.0 as u64,
            &[
                (Self::DIRTY as u64, "Dirty"),
                (Self::RESIZE_LOG_FILE as u64, "ResizeLogFile"),
                (Self::UPGRADE_ON_MOUNT as u64, "UpgradeOnMount"),
                (Self::MOUNTED_ON_NT4 as u64, "MountedOnNT4"),
                (Self::DELETE_USN_UNDERWAY as u64, "DeleteUSNUnderway"),
                (Self::REPAIR_OBJECT_ID as u64, "RepairObjectID"),
                (Self::CHKDSK_UNDERWAY as u64, "ChkdskUnderway"),
                (Self::MODIFIED_BY_CHKDSK as u64, "ModifiedByChkdsk"),
            ],
        ))
    }
}

/// Namespace bits of a $FILE_NAME value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct FileNameFlags(pub u8);

impl FileNameFlags {
    pub const NTFS: u8 = 0x01;
    pub const DOS: u8 = 0x02;
}

impl fmt::Display for FileNameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(
            self.0 as u64,
            &[(Self::NTFS as u64, "NTFS"), (Self::DOS as u64, "DOS")],
        ))
    }
}

/// DOS permission / file attribute bits ($STANDARD_INFORMATION, $FILE_NAME).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct FileAttributes(pub u32);

impl FileAttributes {
    pub const READONLY: u32 = 0x0001;
    pub const HIDDEN: u32 = 0x0002;
    pub const SYSTEM: u32 = 0x0004;
    pub const ARCHIVE: u32 = 0x0020;
    pub const DEVICE: u32 = 0x0040;
    pub const NORMAL: u32 = 0x0080;
    pub const TEMPORARY: u32 = 0x0100;
    pub const SPARSE_FILE: u32 = 0x0200;
    pub const REPARSE_POINT: u32 = 0x0400;
    pub const COMPRESSED: u32 = 0x0800;
    pub const OFFLINE: u32 = 0x1000;
    pub const NOT_CONTENT_INDEXED: u32 = 0x2000;
    pub const ENCRYPTED: u32 = 0x4000;
    pub const DIRECTORY: u32 = 0x1000_0000;
    pub const INDEX_VIEW: u32 = 0x2000_0000;
}

impl fmt::Display for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(
            self.0 as u64,
            &[
                (Self::READONLY as u64, "READONLY"),
                (Self::HIDDEN as u64, "HIDDEN"),
                (Self::SYSTEM as u64, "SYSTEM"),
                (Self::ARCHIVE as u64, "ARCHIVE"),
                (Self::DEVICE as u64, "DEVICE"),
                (Self::NORMAL as u64, "NORMAL"),
                (Self::TEMPORARY as u64, "TEMPORARY"),
                (Self::SPARSE_FILE as u64, "SPARSE_FILE"),
                (Self::REPARSE_POINT as u64, "REPARSE_POINT"),
                (Self::COMPRESSED as u64, "COMPRESSED"),
                (Self::OFFLINE as u64, "OFFLINE"),
                (Self::NOT_CONTENT_INDEXED as u64, "NOT_CONTENT_INDEXED"),
                (Self::ENCRYPTED as u64, "ENCRYPTED"),
                (Self::DIRECTORY as u64, "DIRECTORY"),
                (Self::INDEX_VIEW as u64, "INDEX_VIEW"),
            ],
        ))
    }
}

/// Flags of a FILE record segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct RecordFlags(pub u16);

impl RecordFlags {
    pub const IN_USE: u16 = 0x0001;
    pub const DIRECTORY: u16 = 0x0002;
    pub const EXTENSION: u16 = 0x0004;
    pub const VIEW_INDEX: u16 = 0x0008;

    pub fn is_in_use(&self) -> bool {
        self.0 & Self::IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.0 & Self::DIRECTORY != 0
    }
}

impl fmt::Display for RecordFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(
            self.0 as u64,
            &[
                (Self::IN_USE as u64, "InUse"),
                (Self::DIRECTORY as u64, "Directory"),
                (Self::EXTENSION as u64, "Extension"),
                (Self::VIEW_INDEX as u64, "ViewIndex"),
            ],
        ))
    }
}
