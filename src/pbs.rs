// Sources:
// - https://en.wikipedia.org/wiki/NTFS
// - https://en.wikipedia.org/wiki/BIOS_parameter_block#NTFS

//! Parse the NTFS volume boot record and its BIOS parameter block.

use byteorder::{LittleEndian, ReadBytesExt};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::io::{Cursor, Read};

use crate::error::{NtfsError, Result};

/// One byte media descriptor, as used in file allocation tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum MediaDescriptor {
    HardDisk,
    RamDisk,
    Floppy,
    Other(u8),
}

impl From<u8> for MediaDescriptor {
    fn from(value: u8) -> Self {
        match value {
            0xF8 => MediaDescriptor::HardDisk,
            0xFC => MediaDescriptor::RamDisk,
            0xF0 => MediaDescriptor::Floppy,
            v => MediaDescriptor::Other(v),
        }
    }
}

impl fmt::Display for MediaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaDescriptor::HardDisk => f.write_str("Hard disk (0xF8)"),
            MediaDescriptor::RamDisk => f.write_str("RAM disk (0xFC)"),
            MediaDescriptor::Floppy => f.write_str("Floppy (0xF0)"),
            MediaDescriptor::Other(v) => write!(f, "0x{:02X}", v),
        }
    }
}

/// The 73-byte BIOS parameter block embedded in the boot record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ParameterBlock {
    /* -- DOS 2.0 parameter block ---------------------------- */
    pub bytes_per_sector: u16,   //  0
    pub sectors_per_cluster: u8, //  2 (power of two)
    pub reserved_sectors: u16,   //  3
    pub unused1: [u8; 5],        //  5 FAT count, root entries, small sector count
    pub media_descriptor: MediaDescriptor, // 10
    pub unused2: u16,                      // 11 sectors per FAT

    /* -- DOS 3.31 parameter block --------------------------- */
    pub sectors_per_track: u16, // 13
    pub number_of_heads: u16,   // 15
    pub hidden_sectors: u32,    // 17
    pub unused3: u32,           // 21

    /* -- NTFS extended parameter block ---------------------- */
    pub physical_drive_number: u8,    // 25
    pub flags: u8,                    // 26
    pub extended_boot_signature: u8,  // 27
    pub unused4: u8,                  // 28
    pub total_sectors: u64,           // 29
    pub mft_cluster: u64,             // 37
    pub mft_mirror_cluster: u64,      // 45
    pub clusters_per_file_record: i8, // 53 (negative: 2^|n| bytes)
    pub unused5: [u8; 3],
    pub clusters_per_index_block: i8, // 57 (negative: 2^|n| bytes)
    pub unused6: [u8; 3],
    pub volume_serial_number: u64, // 61
    pub checksum: u32,             // 69
}

/// Clusters when positive, `2^|n|` bytes when negative.
fn size_from_encoding(n: i8, cluster_size: u64) -> u64 {
    if n >= 0 {
        n as u64 * cluster_size
    } else {
        1u64.checked_shl(n.unsigned_abs() as u32).unwrap_or(0)
    }
}

impl ParameterBlock {
    pub const LENGTH: usize = 73;

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err(NtfsError::Truncated);
        }
        let mut c = Cursor::new(buf);

        /* helper macros to reduce boilerplate */
        macro_rules! read_array {
            ($len:expr) => {{
                let mut tmp = [0u8; $len];
                c.read_exact(&mut tmp)?;
                tmp
            }};
        }
        macro_rules! read_u8 {
            () => {
                c.read_u8()?
            };
        }
        macro_rules! read_u16 {
            () => {
                c.read_u16::<LittleEndian>()?
            };
        }
        macro_rules! read_u32 {
            () => {
                c.read_u32::<LittleEndian>()?
            };
        }
        macro_rules! read_u64 {
            () => {
                c.read_u64::<LittleEndian>()?
            };
        }
        macro_rules! read_i8 {
            () => {
                c.read_i8()?
            };
        }

        Ok(Self {
            bytes_per_sector: read_u16!(),
            sectors_per_cluster: read_u8!(),
            reserved_sectors: read_u16!(),
            unused1: read_array!(5),
            media_descriptor: MediaDescriptor::from(read_u8!()),
            unused2: read_u16!(),
            sectors_per_track: read_u16!(),
            number_of_heads: read_u16!(),
            hidden_sectors: read_u32!(),
            unused3: read_u32!(),
            physical_drive_number: read_u8!(),
            flags: read_u8!(),
            extended_boot_signature: read_u8!(),
            unused4: read_u8!(),
            total_sectors: read_u64!(),
            mft_cluster: read_u64!(),
            mft_mirror_cluster: read_u64!(),
            clusters_per_file_record: read_i8!(),
            unused5: read_array!(3),
            clusters_per_index_block: read_i8!(),
            unused6: read_array!(3),
            volume_serial_number: read_u64!(),
            checksum: read_u32!(),
        })
    }

    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    /// Compute actual bytes per file-record segment
    pub fn file_record_size(&self) -> u64 {
        size_from_encoding(self.clusters_per_file_record, self.cluster_size())
    }

    pub fn index_block_size(&self) -> u64 {
        size_from_encoding(self.clusters_per_index_block, self.cluster_size())
    }

    /// Byte offset of $MFT from the start of the volume.
    pub fn mft_address(&self) -> u64 {
        self.mft_cluster.saturating_mul(self.cluster_size())
    }

    pub fn mft_mirror_address(&self) -> u64 {
        self.mft_mirror_cluster.saturating_mul(self.cluster_size())
    }

    /// Check the geometry is usable for addressing the MFT.
    pub fn validate(&self) -> Result<()> {
        if self.bytes_per_sector == 0 || !self.bytes_per_sector.is_power_of_two() {
            return Err(NtfsError::InvalidParameterBlock(format!(
                "bytes per sector {} is not a power of two",
                self.bytes_per_sector
            )));
        }
        if !self.sectors_per_cluster.is_power_of_two() {
            return Err(NtfsError::InvalidParameterBlock(format!(
                "sectors per cluster {} is not a positive power of two",
                self.sectors_per_cluster
            )));
        }
        let record_size = self.file_record_size();
        if record_size < 512 || record_size > 1 << 16 {
            return Err(NtfsError::InvalidParameterBlock(format!(
                "file record size {} out of range",
                record_size
            )));
        }
        Ok(())
    }
}

/// The first 84 bytes of an NTFS volume.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BootRecord {
    pub jump_instruction: [u8; 3], // x86 JMP + NOP
    pub oem_id: [u8; 8],           // "NTFS    "
    pub bpb: ParameterBlock,
}

impl BootRecord {
    pub const LENGTH: usize = 84;
    pub const NTFS_OEM_ID: [u8; 8] = *b"NTFS    ";

    /// Parse the boot record from the first 84 bytes of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err(NtfsError::Truncated);
        }
        if buf[3..11] != Self::NTFS_OEM_ID {
            return Err(NtfsError::InvalidLabel);
        }
        let mut jump_instruction = [0u8; 3];
        jump_instruction.copy_from_slice(&buf[0..3]);
        let mut oem_id = [0u8; 8];
        oem_id.copy_from_slice(&buf[3..11]);
        Ok(Self {
            jump_instruction,
            oem_id,
            bpb: ParameterBlock::from_bytes(&buf[11..Self::LENGTH])?,
        })
    }

    pub fn cluster_size(&self) -> u64 {
        self.bpb.cluster_size()
    }

    pub fn file_record_size(&self) -> u64 {
        self.bpb.file_record_size()
    }

    pub fn index_block_size(&self) -> u64 {
        self.bpb.index_block_size()
    }

    pub fn to_string(&self) -> String {
        let bpb = &self.bpb;
        let mut t = Table::new();
        t.add_row(row!["Boot Record"]);
        t.add_row(row![b -> "OEM ID", String::from_utf8_lossy(&self.oem_id)]);
        t.add_row(row![b -> "Bytes per sector", bpb.bytes_per_sector]);
        t.add_row(row![b -> "Sectors per cluster", bpb.sectors_per_cluster]);
        t.add_row(row![b -> "Cluster size", self.cluster_size()]);
        t.add_row(row![b -> "Media descriptor", bpb.media_descriptor]);
        t.add_row(row![b -> "Total sectors", bpb.total_sectors]);
        t.add_row(row![b -> "$MFT cluster", bpb.mft_cluster]);
        t.add_row(row![b -> "$MFTMirr cluster", bpb.mft_mirror_cluster]);
        t.add_row(row![b -> "File record size", self.file_record_size()]);
        t.add_row(row![b -> "Index block size", self.index_block_size()]);
        t.add_row(row![b -> "Serial number", format!("{:016X}", bpb.volume_serial_number)]);
        t.add_row(row![b -> "Checksum", format!("0x{:08X}", bpb.checksum)]);
        t.to_string()
    }

    pub fn to_json(&self) -> Value {
        let mut v = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Some(obj) = v.as_object_mut() {
            obj.insert("cluster_size".into(), json!(self.cluster_size()));
            obj.insert("file_record_size".into(), json!(self.file_record_size()));
            obj.insert("index_block_size".into(), json!(self.index_block_size()));
        }
        v
    }
}
