// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://learn.microsoft.com/windows/win32/devnotes/standard-information
// - https://learn.microsoft.com/windows/win32/devnotes/file-name
// - https://flatcap.org/linux-ntfs/ntfs/attributes/index.html

//! Decoders for the values of resident attributes.
//!
//! Every decoder takes the inline value bytes, fails with
//! [`NtfsError::Truncated`] below its minimum length and never reads past
//! the slice it was handed.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use uuid::Uuid;

use crate::codec::{filetime_to_datetime, guid_from_disk, utf16_to_string};
use crate::error::{NtfsError, Result};
use crate::flags::{FileAttributes, FileNameFlags, VolumeFlags};
use crate::reference::FileReference;
use crate::types::{AttributeType, CollationRule};

/// Parsed $STANDARD_INFORMATION (v1.2 layout, optionally the 3.0 extension).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardInformation {
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub mft_modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub file_attributes: FileAttributes,
    pub max_versions: u32,
    pub version_number: u32,
    pub class_id: u32,
    pub owner_id: Option<u32>,
    pub security_id: Option<u32>,
    pub quota_charged: Option<u64>,
    pub usn: Option<u64>,
}

impl StandardInformation {
    pub const MIN_LENGTH: usize = 48;
    pub const EXTENDED_LENGTH: usize = 72;

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::MIN_LENGTH {
            return Err(NtfsError::Truncated);
        }
        let mut cur = Cursor::new(raw);
        let created = filetime_to_datetime(cur.read_u64::<LittleEndian>()?);
        let modified = filetime_to_datetime(cur.read_u64::<LittleEndian>()?);
        let mft_modified = filetime_to_datetime(cur.read_u64::<LittleEndian>()?);
        let accessed = filetime_to_datetime(cur.read_u64::<LittleEndian>()?);
        let file_attributes = FileAttributes(cur.read_u32::<LittleEndian>()?);
        let max_versions = cur.read_u32::<LittleEndian>()?;
        let version_number = cur.read_u32::<LittleEndian>()?;
        let class_id = cur.read_u32::<LittleEndian>()?;

        let (mut owner_id, mut security_id, mut quota_charged, mut usn) = (None, None, None, None);
        if raw.len() >= Self::EXTENDED_LENGTH {
            owner_id = Some(cur.read_u32::<LittleEndian>()?);
            security_id = Some(cur.read_u32::<LittleEndian>()?);
            quota_charged = Some(cur.read_u64::<LittleEndian>()?);
            usn = Some(cur.read_u64::<LittleEndian>()?);
        }

        Ok(Self {
            created,
            modified,
            mft_modified,
            accessed,
            file_attributes,
            max_versions,
            version_number,
            class_id,
            owner_id,
            security_id,
            quota_charged,
            usn,
        })
    }
}

impl fmt::Display for StandardInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Created: {}, Modified: {}, MFT Modified: {}, Accessed: {}, Attributes: {}",
            self.created.to_rfc3339(),
            self.modified.to_rfc3339(),
            self.mft_modified.to_rfc3339(),
            self.accessed.to_rfc3339(),
            self.file_attributes
        )?;
        if let Some(id) = self.security_id {
            write!(f, ", Security ID: {}", id)?;
        }
        Ok(())
    }
}

/// Parsed $FILE_NAME value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileName {
    pub parent_directory: FileReference,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub mft_modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub allocated_size: u64,
    pub real_size: u64,
    pub file_attributes: FileAttributes,
    pub reparse_value: u32,
    /// In UTF-16 code units, not bytes.
    pub name_length: u8,
    pub flags: FileNameFlags,
    pub name: String,
}

impl FileName {
    pub const MIN_LENGTH: usize = 66;

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::MIN_LENGTH {
            return Err(NtfsError::Truncated);
        }
        let parent_directory = FileReference::from_bytes(&raw[0..8])?;
        let mut cur = Cursor::new(&raw[8..]);
        let created = filetime_to_datetime(cur.read_u64::<LittleEndian>()?);
        let modified = filetime_to_datetime(cur.read_u64::<LittleEndian>()?);
        let mft_modified = filetime_to_datetime(cur.read_u64::<LittleEndian>()?);
        let accessed = filetime_to_datetime(cur.read_u64::<LittleEndian>()?);
        let allocated_size = cur.read_u64::<LittleEndian>()?;
        let real_size = cur.read_u64::<LittleEndian>()?;
        let file_attributes = FileAttributes(cur.read_u32::<LittleEndian>()?);
        let reparse_value = cur.read_u32::<LittleEndian>()?;
        let name_length = cur.read_u8()?;
        let flags = FileNameFlags(cur.read_u8()?);

        let end = Self::MIN_LENGTH + name_length as usize * 2;
        let name_raw = raw
            .get(Self::MIN_LENGTH..end)
            .ok_or(NtfsError::FileNameOutOfBounds)?;
        let name = utf16_to_string(name_raw)?;

        Ok(Self {
            parent_directory,
            created,
            modified,
            mft_modified,
            accessed,
            allocated_size,
            real_size,
            file_attributes,
            reparse_value,
            name_length,
            flags,
            name,
        })
    }
}

/// Parsed $OBJECT_ID value. GUIDs after the first are present only when
/// the value is long enough to hold them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectId {
    pub object_id: Uuid,
    pub birth_volume_id: Option<Uuid>,
    pub birth_object_id: Option<Uuid>,
    pub domain_id: Option<Uuid>,
}

impl ObjectId {
    pub const MIN_LENGTH: usize = 16;

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::MIN_LENGTH {
            return Err(NtfsError::Truncated);
        }
        let optional = |start: usize| raw.get(start..start + 16).map(guid_from_disk).transpose();
        Ok(Self {
            object_id: guid_from_disk(&raw[0..16])?,
            birth_volume_id: optional(16)?,
            birth_object_id: optional(32)?,
            domain_id: optional(48)?,
        })
    }
}

/// Parsed $VOLUME_INFORMATION value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInformation {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: VolumeFlags,
}

impl VolumeInformation {
    pub const MIN_LENGTH: usize = 12;

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::MIN_LENGTH {
            return Err(NtfsError::Truncated);
        }
        let mut cur = Cursor::new(&raw[8..]);
        Ok(Self {
            major_version: cur.read_u8()?,
            minor_version: cur.read_u8()?,
            flags: VolumeFlags(cur.read_u16::<LittleEndian>()?),
        })
    }
}

impl fmt::Display for VolumeInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NTFS v{}.{}", self.major_version, self.minor_version)?;
        if !self.flags.is_empty() {
            write!(f, " (Flags: {})", self.flags)?;
        }
        Ok(())
    }
}

/// The fixed part of an $INDEX_ROOT value. Describes an index, not enough
/// to walk it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRoot {
    pub indexed_type: AttributeType,
    pub collation_rule: CollationRule,
    pub bytes_per_index_record: u32,
    /// Clusters, or sectors when an index record is smaller than a cluster.
    pub blocks_per_index_record: u8,
}

impl IndexRoot {
    pub const MIN_LENGTH: usize = 16;

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::MIN_LENGTH {
            return Err(NtfsError::Truncated);
        }
        let mut cur = Cursor::new(raw);
        Ok(Self {
            indexed_type: AttributeType::from(cur.read_u32::<LittleEndian>()?),
            collation_rule: CollationRule::from(cur.read_u32::<LittleEndian>()?),
            bytes_per_index_record: cur.read_u32::<LittleEndian>()?,
            blocks_per_index_record: cur.read_u8()?,
        })
    }
}

impl fmt::Display for IndexRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AttrType: {}, Collation: {}, IndexRecordSize: {} bytes, Blocks: {}",
            self.indexed_type,
            self.collation_rule,
            self.bytes_per_index_record,
            self.blocks_per_index_record
        )
    }
}

/// A $BITMAP value, kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bitmap(pub Vec<u8>);

impl Bitmap {
    const DISPLAY_LIMIT: usize = 32;

    pub fn from_bytes(raw: &[u8]) -> Self {
        Bitmap(raw.to_vec())
    }

    /// Bit `index`, least significant bit of byte 0 first.
    pub fn is_set(&self, index: usize) -> bool {
        self.0
            .get(index / 8)
            .is_some_and(|b| b & (1 << (index % 8)) != 0)
    }

    pub fn count_set(&self) -> usize {
        self.0.iter().map(|b| b.count_ones() as usize).sum()
    }
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        f.write_str("0b")?;
        for b in self.0.iter().take(Self::DISPLAY_LIMIT) {
            write!(f, "{:08b}", b)?;
        }
        if self.0.len() > Self::DISPLAY_LIMIT {
            f.write_str("...")?;
        }
        Ok(())
    }
}

/// The interpreted value of a resident attribute, chosen by type code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    StandardInformation(StandardInformation),
    FileName(FileName),
    ObjectId(ObjectId),
    VolumeName(String),
    VolumeInformation(VolumeInformation),
    IndexRoot(IndexRoot),
    Bitmap(Bitmap),
    /// Any type without a dedicated decoder.
    Raw(Vec<u8>),
}

impl AttributeValue {
    pub fn decode(attr_type: AttributeType, raw: &[u8]) -> Result<Self> {
        Ok(match attr_type {
            AttributeType::StandardInformation => {
                AttributeValue::StandardInformation(StandardInformation::from_bytes(raw)?)
            }
            AttributeType::FileName => AttributeValue::FileName(FileName::from_bytes(raw)?),
            AttributeType::ObjectId => AttributeValue::ObjectId(ObjectId::from_bytes(raw)?),
            AttributeType::VolumeName => AttributeValue::VolumeName(utf16_to_string(raw)?),
            AttributeType::VolumeInformation => {
                AttributeValue::VolumeInformation(VolumeInformation::from_bytes(raw)?)
            }
            AttributeType::IndexRoot => AttributeValue::IndexRoot(IndexRoot::from_bytes(raw)?),
            AttributeType::Bitmap => AttributeValue::Bitmap(Bitmap::from_bytes(raw)),
            _ => AttributeValue::Raw(raw.to_vec()),
        })
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::StandardInformation(si) => write!(f, "{}", si),
            AttributeValue::FileName(name) => f.write_str(&name.name),
            AttributeValue::ObjectId(id) => write!(f, "{}", id.object_id),
            AttributeValue::VolumeName(name) => f.write_str(name),
            AttributeValue::VolumeInformation(info) => write!(f, "{}", info),
            AttributeValue::IndexRoot(root) => write!(f, "{}", root),
            AttributeValue::Bitmap(bitmap) => write!(f, "{}", bitmap),
            AttributeValue::Raw(raw) => write!(f, "{} bytes", raw.len()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::guid_to_disk;

    pub(crate) const FT_2020: u64 = 132_223_104_000_000_000;

    pub(crate) fn file_name_value(parent: u64, name: &str) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut v = vec![0u8; FileName::MIN_LENGTH];
        v[0..8].copy_from_slice(&parent.to_le_bytes());
        for i in 0..4 {
            v[8 + i * 8..16 + i * 8].copy_from_slice(&FT_2020.to_le_bytes());
        }
        v[40..48].copy_from_slice(&4096u64.to_le_bytes());
        v[48..56].copy_from_slice(&100u64.to_le_bytes());
        v[56..60].copy_from_slice(&0x20u32.to_le_bytes());
        v[64] = units.len() as u8;
        v[65] = FileNameFlags::NTFS;
        for u in units {
            v.extend_from_slice(&u.to_le_bytes());
        }
        v
    }

    pub(crate) fn standard_information_value(extended: bool) -> Vec<u8> {
        let mut v = Vec::new();
        for _ in 0..4 {
            v.extend_from_slice(&FT_2020.to_le_bytes());
        }
        v.extend_from_slice(&0x26u32.to_le_bytes()); // HIDDEN | SYSTEM | ARCHIVE
        v.extend_from_slice(&[0u8; 12]);
        if extended {
            v.extend_from_slice(&7u32.to_le_bytes());
            v.extend_from_slice(&0x100u32.to_le_bytes());
            v.extend_from_slice(&0u64.to_le_bytes());
            v.extend_from_slice(&0x4242u64.to_le_bytes());
        }
        v
    }

    #[test]
    fn standard_information_short_form() {
        let si = StandardInformation::from_bytes(&standard_information_value(false)).unwrap();
        assert_eq!(si.created.timestamp(), 1_577_836_800);
        assert_eq!(si.file_attributes.to_string(), "HIDDEN | SYSTEM | ARCHIVE");
        assert_eq!(si.owner_id, None);
        assert_eq!(si.usn, None);
    }

    #[test]
    fn standard_information_extended_form() {
        let si = StandardInformation::from_bytes(&standard_information_value(true)).unwrap();
        assert_eq!(si.owner_id, Some(7));
        assert_eq!(si.security_id, Some(0x100));
        assert_eq!(si.quota_charged, Some(0));
        assert_eq!(si.usn, Some(0x4242));
    }

    #[test]
    fn standard_information_between_lengths_has_no_extension() {
        let mut v = standard_information_value(true);
        v.truncate(60);
        let si = StandardInformation::from_bytes(&v).unwrap();
        assert_eq!(si.security_id, None);
    }

    #[test]
    fn file_name_decodes() {
        let fname = FileName::from_bytes(&file_name_value(5 | 5 << 48, "hello.txt")).unwrap();
        assert_eq!(fname.parent_directory.record_number(), 5);
        assert_eq!(fname.parent_directory.sequence_number, 5);
        assert_eq!(fname.name, "hello.txt");
        assert_eq!(fname.name_length, 9);
        assert_eq!(fname.allocated_size, 4096);
        assert_eq!(fname.real_size, 100);
        assert_eq!(fname.flags.to_string(), "NTFS");
        assert_eq!(fname.modified.timestamp(), 1_577_836_800);
    }

    #[test]
    fn file_name_out_of_bounds() {
        let mut v = file_name_value(5, "abc");
        v.pop();
        assert!(matches!(FileName::from_bytes(&v), Err(NtfsError::FileNameOutOfBounds)));
    }

    #[test]
    fn object_id_partial_guids() {
        let a = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let b = Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        let mut raw = guid_to_disk(&a).to_vec();
        raw.extend_from_slice(&guid_to_disk(&b));
        raw.extend_from_slice(&[0u8; 8]);

        let oid = ObjectId::from_bytes(&raw).unwrap();
        assert_eq!(oid.object_id, a);
        assert_eq!(oid.birth_volume_id, Some(b));
        assert_eq!(oid.birth_object_id, None);
        assert_eq!(oid.domain_id, None);
    }

    #[test]
    fn volume_information() {
        let mut raw = vec![0u8; 12];
        raw[8] = 3;
        raw[9] = 1;
        raw[10..12].copy_from_slice(&0x0201u16.to_le_bytes());
        let vi = VolumeInformation::from_bytes(&raw).unwrap();
        assert_eq!((vi.major_version, vi.minor_version), (3, 1));
        assert!(vi.flags.is_dirty());
        assert_eq!(vi.to_string(), "NTFS v3.1 (Flags: Dirty | 0x0200)");

        raw[10] = 0;
        raw[11] = 0;
        assert_eq!(
            VolumeInformation::from_bytes(&raw).unwrap().to_string(),
            "NTFS v3.1"
        );
    }

    #[test]
    fn index_root() {
        let mut raw = vec![0u8; 16];
        raw[0..4].copy_from_slice(&0x30u32.to_le_bytes());
        raw[4..8].copy_from_slice(&1u32.to_le_bytes());
        raw[8..12].copy_from_slice(&4096u32.to_le_bytes());
        raw[12] = 1;
        let root = IndexRoot::from_bytes(&raw).unwrap();
        assert_eq!(root.indexed_type, AttributeType::FileName);
        assert_eq!(root.collation_rule, CollationRule::FileName);
        assert_eq!(
            root.to_string(),
            "AttrType: $FILE_NAME, Collation: FILENAME, IndexRecordSize: 4096 bytes, Blocks: 1"
        );
    }

    #[test]
    fn bitmap_bits_and_display() {
        let bm = Bitmap::from_bytes(&[0b0000_0101, 0x80]);
        assert!(bm.is_set(0));
        assert!(!bm.is_set(1));
        assert!(bm.is_set(2));
        assert!(bm.is_set(15));
        assert!(!bm.is_set(16));
        assert_eq!(bm.count_set(), 3);
        assert_eq!(bm.to_string(), "0b0000010110000000");
        assert_eq!(Bitmap::default().to_string(), "");
        assert!(Bitmap::from_bytes(&[0u8; 40]).to_string().ends_with("..."));
    }

    #[test]
    fn every_decoder_rejects_short_input() {
        assert!(matches!(StandardInformation::from_bytes(&[0u8; 47]), Err(NtfsError::Truncated)));
        assert!(matches!(FileName::from_bytes(&[0u8; 65]), Err(NtfsError::Truncated)));
        assert!(matches!(ObjectId::from_bytes(&[0u8; 15]), Err(NtfsError::Truncated)));
        assert!(matches!(VolumeInformation::from_bytes(&[0u8; 11]), Err(NtfsError::Truncated)));
        assert!(matches!(IndexRoot::from_bytes(&[0u8; 15]), Err(NtfsError::Truncated)));
    }

    #[test]
    fn dispatch_by_type() {
        let v = AttributeValue::decode(AttributeType::VolumeName, b"C\0:\0").unwrap();
        assert_eq!(v, AttributeValue::VolumeName("C:".into()));
        assert_eq!(v.to_string(), "C:");

        let v = AttributeValue::decode(AttributeType::Data, b"abc").unwrap();
        assert_eq!(v, AttributeValue::Raw(b"abc".to_vec()));
        assert_eq!(v.to_string(), "3 bytes");

        let v = AttributeValue::decode(AttributeType::Unknown(0x1000), &[1, 2]).unwrap();
        assert_eq!(v, AttributeValue::Raw(vec![1, 2]));

        let v =
            AttributeValue::decode(AttributeType::FileName, &file_name_value(5, "x")).unwrap();
        assert_eq!(v.to_string(), "x");

        assert!(matches!(
            AttributeValue::decode(AttributeType::VolumeName, b"C\0:"),
            Err(NtfsError::InvalidUnicode)
        ));

        let mut raw = file_name_value(5, "ab");
        raw[66..68].copy_from_slice(&0xD800u16.to_le_bytes());
        assert_eq!(FileName::from_bytes(&raw).unwrap().name, "\u{FFFD}b");
    }
}
