// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://learn.microsoft.com/windows/win32/devnotes/file-record-segment-header
// - https://learn.microsoft.com/windows/win32/devnotes/attribute-record-header
// - https://en.wikipedia.org/wiki/NTFS

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use log::{debug, warn};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::Cursor;

use crate::attr::{AttributeValue, FileName, StandardInformation};
use crate::codec::utf16_to_string;
use crate::datarun::{self, MappingPair};
use crate::error::{NtfsError, Result};
use crate::flags::{AttributeFlags, RecordFlags};
use crate::pbs::BootRecord;
use crate::reference::{FileReference, SegmentReference};
use crate::source::ReadAt;
use crate::types::{AttributeType, FormCode};

/// Header found at the very beginning of every **FILE** record (offset 0).
/// The update sequence array follows it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileRecordSegmentHeader {
    /* multi-sector header */
    pub signature: [u8; 4],
    pub usa_offset: u16,
    pub usa_size: u16,

    pub lsn: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub first_attribute_offset: u16,
    pub flags: RecordFlags,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_file_record: FileReference,
    pub next_attribute_instance: u16,
}

impl FileRecordSegmentHeader {
    pub const LENGTH: usize = 42;
    pub const FILE_SIGNATURE: [u8; 4] = *b"FILE";

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err(NtfsError::Truncated);
        }
        let mut signature = [0u8; 4];
        signature.copy_from_slice(&buf[0..4]);
        let mut c = Cursor::new(&buf[4..]);
        let usa_offset = c.read_u16::<LittleEndian>()?;
        let usa_size = c.read_u16::<LittleEndian>()?;
        let lsn = c.read_u64::<LittleEndian>()?;
        let sequence_number = c.read_u16::<LittleEndian>()?;
        let hard_link_count = c.read_u16::<LittleEndian>()?;
        let first_attribute_offset = c.read_u16::<LittleEndian>()?;
        let flags = RecordFlags(c.read_u16::<LittleEndian>()?);
        let bytes_in_use = c.read_u32::<LittleEndian>()?;
        let bytes_allocated = c.read_u32::<LittleEndian>()?;
        let base_file_record = SegmentReference::from_bytes(&buf[32..40])?;
        let next_attribute_instance = LittleEndian::read_u16(&buf[40..42]);
        Ok(Self {
            signature,
            usa_offset,
            usa_size,
            lsn,
            sequence_number,
            hard_link_count,
            first_attribute_offset,
            flags,
            bytes_in_use,
            bytes_allocated,
            base_file_record,
            next_attribute_instance,
        })
    }

    pub fn has_file_signature(&self) -> bool {
        self.signature == Self::FILE_SIGNATURE
    }

    /// Extension records point back at their base record.
    pub fn is_base_record(&self) -> bool {
        self.base_file_record.is_zero()
    }
}

/// Common header part for resident & non-resident attributes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttributeRecordHeader {
    pub attr_type: AttributeType,
    pub record_length: u32,
    pub form_code: FormCode,
    /// In UTF-16 code units.
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: AttributeFlags,
    pub instance: u16,
    pub name: Option<String>,
}

impl AttributeRecordHeader {
    pub const LENGTH: usize = 16;

    /// Decode the 16 fixed bytes. The name is filled in by [`Attribute::from_bytes`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err(NtfsError::Truncated);
        }
        let mut c = Cursor::new(buf);
        Ok(Self {
            attr_type: AttributeType::from(c.read_u32::<LittleEndian>()?),
            record_length: c.read_u32::<LittleEndian>()?,
            form_code: FormCode::from(c.read_u8()?),
            name_length: c.read_u8()?,
            name_offset: c.read_u16::<LittleEndian>()?,
            flags: AttributeFlags(c.read_u16::<LittleEndian>()?),
            instance: c.read_u16::<LittleEndian>()?,
            name: None,
        })
    }
}

/// Additional 8-byte header present only when the attribute is resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResidentHeader {
    pub value_length: u32,
    pub value_offset: u16,
    pub resident_flags: u8, // 1 = indexed
}

impl ResidentHeader {
    pub const LENGTH: usize = 8;

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err(NtfsError::Truncated);
        }
        let mut c = Cursor::new(buf);
        Ok(Self {
            value_length: c.read_u32::<LittleEndian>()?,
            value_offset: c.read_u16::<LittleEndian>()?,
            resident_flags: c.read_u8()?,
        })
    }
}

/// Additional 48-byte header present only when the attribute is non-resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct NonresidentHeader {
    pub lowest_vcn: u64,
    pub highest_vcn: u64,
    pub mapping_pairs_offset: u16,
    pub compression_unit: u16,
    pub allocated_length: u64,
    pub data_length: u64,
    pub initialized_length: u64,
}

impl NonresidentHeader {
    pub const LENGTH: usize = 48;

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err(NtfsError::Truncated);
        }
        let mut c = Cursor::new(buf);
        let lowest_vcn = c.read_u64::<LittleEndian>()?;
        let highest_vcn = c.read_u64::<LittleEndian>()?;
        let mapping_pairs_offset = c.read_u16::<LittleEndian>()?;
        let compression_unit = c.read_u16::<LittleEndian>()?;
        c.read_u32::<LittleEndian>()?; // reserved
        Ok(Self {
            lowest_vcn,
            highest_vcn,
            mapping_pairs_offset,
            compression_unit,
            allocated_length: c.read_u64::<LittleEndian>()?,
            data_length: c.read_u64::<LittleEndian>()?,
            initialized_length: c.read_u64::<LittleEndian>()?,
        })
    }

    /// initialized <= data <= allocated
    pub fn lengths_consistent(&self) -> bool {
        self.initialized_length <= self.data_length && self.data_length <= self.allocated_length
    }
}

/// A single attribute record. Resident values are copied out of the file
/// record; mapping pairs are kept raw and decoded on request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Attribute {
    Resident {
        header: AttributeRecordHeader,
        resident: ResidentHeader,
        value: Vec<u8>,
    },
    NonResident {
        header: AttributeRecordHeader,
        non_resident: NonresidentHeader,
        mapping_pairs: Vec<u8>,
    },
}

impl Attribute {
    /// Decode one attribute record from the start of `data`, which may run on
    /// past this record. Everything after the common header is bounds-checked
    /// against the record's own declared length.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut header = AttributeRecordHeader::from_bytes(data)?;

        let record_length = header.record_length as usize;
        if record_length > data.len() {
            return Err(NtfsError::Truncated);
        }
        let data = &data[..record_length];
        let form = data
            .get(AttributeRecordHeader::LENGTH..)
            .ok_or(NtfsError::Truncated)?;

        enum Form {
            Resident(ResidentHeader),
            NonResident(NonresidentHeader),
        }
        let form = if header.form_code.is_resident() {
            Form::Resident(ResidentHeader::from_bytes(form)?)
        } else {
            Form::NonResident(NonresidentHeader::from_bytes(form)?)
        };

        if header.name_length > 0 {
            let start = header.name_offset as usize;
            let end = start + header.name_length as usize * 2;
            let raw = data
                .get(start..end)
                .ok_or(NtfsError::AttributeNameOutOfBounds)?;
            header.name = Some(utf16_to_string(raw)?);
        }

        Ok(match form {
            Form::Resident(resident) => {
                let mut value = Vec::new();
                if resident.value_length > 0 {
                    let start = resident.value_offset as usize;
                    let raw = start
                        .checked_add(resident.value_length as usize)
                        .and_then(|end| data.get(start..end))
                        .ok_or(NtfsError::AttributeValueOutOfBounds)?;
                    value = raw.to_vec();
                }
                Attribute::Resident {
                    header,
                    resident,
                    value,
                }
            }
            Form::NonResident(non_resident) => {
                if !non_resident.lengths_consistent() {
                    warn!(
                        "{} attribute #{} has inconsistent lengths (allocated {}, data {}, initialized {})",
                        header.attr_type,
                        header.instance,
                        non_resident.allocated_length,
                        non_resident.data_length,
                        non_resident.initialized_length
                    );
                }
                let mapping_pairs = data
                    .get(non_resident.mapping_pairs_offset as usize..)
                    .ok_or(NtfsError::Truncated)?
                    .to_vec();
                Attribute::NonResident {
                    header,
                    non_resident,
                    mapping_pairs,
                }
            }
        })
    }

    pub fn header(&self) -> &AttributeRecordHeader {
        match self {
            Attribute::Resident { header, .. } | Attribute::NonResident { header, .. } => header,
        }
    }

    pub fn attr_type(&self) -> AttributeType {
        self.header().attr_type
    }

    pub fn name(&self) -> Option<&str> {
        self.header().name.as_deref()
    }

    pub fn is_resident(&self) -> bool {
        matches!(self, Attribute::Resident { .. })
    }

    /// Logical size of the value in bytes.
    pub fn data_size(&self) -> u64 {
        match self {
            Attribute::Resident { resident, .. } => resident.value_length as u64,
            Attribute::NonResident { non_resident, .. } => non_resident.data_length,
        }
    }

    pub fn resident_value(&self) -> Option<&[u8]> {
        match self {
            Attribute::Resident { value, .. } => Some(value),
            Attribute::NonResident { .. } => None,
        }
    }

    /// Interpret the resident value by type code. Non-resident attributes
    /// have nothing to interpret here and yield `None`.
    pub fn value(&self) -> Result<Option<AttributeValue>> {
        match self {
            Attribute::Resident { header, value, .. } => {
                AttributeValue::decode(header.attr_type, value).map(Some)
            }
            Attribute::NonResident { .. } => Ok(None),
        }
    }

    /// Incremental decoder over the mapping pairs, `None` for resident attributes.
    pub fn run_decoder(&self) -> Option<datarun::Decoder<'_>> {
        match self {
            Attribute::Resident { .. } => None,
            Attribute::NonResident { mapping_pairs, .. } => {
                Some(datarun::Decoder::new(mapping_pairs))
            }
        }
    }

    /// All data runs; empty for resident attributes.
    pub fn data_runs(&self) -> Result<Vec<MappingPair>> {
        match self {
            Attribute::Resident { .. } => Ok(Vec::new()),
            Attribute::NonResident { mapping_pairs, .. } => datarun::decode(mapping_pairs),
        }
    }
}

/// A parsed MFT record: header plus attributes in stream order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct File {
    pub header: FileRecordSegmentHeader,
    pub attributes: Vec<Attribute>,
}

impl File {
    /// Parse a record buffer; any attribute failure fails the whole record.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        match File::scan(buf)? {
            (file, None) => Ok(file),
            (_, Some(e)) => Err(e),
        }
    }

    /// Parse a record buffer, keeping the attributes decoded before a failure.
    ///
    /// A bad record header is returned as `Err`. A bad attribute stops the
    /// scan and comes back next to the attributes read so far, which are
    /// only as trustworthy as the rest of the record.
    pub fn scan(buf: &[u8]) -> Result<(Self, Option<NtfsError>)> {
        let header = FileRecordSegmentHeader::from_bytes(buf)?;
        let mut attributes = Vec::new();
        let mut error = None;

        let mut pos = header.first_attribute_offset as usize;
        if pos + 4 > buf.len() {
            warn!(
                "First attribute offset {} leaves no room for attributes in a {} byte record.",
                pos,
                buf.len()
            );
        }
        while pos + 4 <= buf.len() {
            let code = LittleEndian::read_u32(&buf[pos..pos + 4]);
            if code == AttributeType::END_CODE {
                debug!("End of attribute stream at offset 0x{:X}.", pos);
                break;
            }
            match Attribute::from_bytes(&buf[pos..]) {
                Ok(attr) => {
                    debug!(
                        "{} attribute #{} at offset 0x{:X} ({} bytes, {})",
                        attr.attr_type(),
                        attr.header().instance,
                        pos,
                        attr.header().record_length,
                        attr.header().form_code
                    );
                    pos += attr.header().record_length as usize;
                    attributes.push(attr);
                }
                Err(e) => {
                    warn!("Attribute at offset 0x{:X} is unreadable: {}", pos, e);
                    error = Some(e);
                    break;
                }
            }
        }

        Ok((File { header, attributes }, error))
    }

    pub fn is_in_use(&self) -> bool {
        self.header.flags.is_in_use()
    }

    pub fn is_directory(&self) -> bool {
        self.header.flags.is_directory()
    }

    pub fn attributes_of(&self, attr_type: AttributeType) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .filter(move |a| a.attr_type() == attr_type)
    }

    /// The unnamed $DATA attribute, if any.
    pub fn data_attribute(&self) -> Option<&Attribute> {
        self.attributes_of(AttributeType::Data)
            .find(|a| a.name().is_none())
    }

    pub fn standard_information(&self) -> Result<Option<StandardInformation>> {
        self.attributes_of(AttributeType::StandardInformation)
            .find_map(Attribute::resident_value)
            .map(StandardInformation::from_bytes)
            .transpose()
    }

    /// Every $FILE_NAME attribute (often a long and a DOS name).
    pub fn file_names(&self) -> Result<Vec<FileName>> {
        self.attributes_of(AttributeType::FileName)
            .filter_map(Attribute::resident_value)
            .map(FileName::from_bytes)
            .collect()
    }

    /// NTFS keeps attributes sorted by type code; nothing here relies on it.
    pub fn attributes_in_type_order(&self) -> bool {
        let ordered = self
            .attributes
            .windows(2)
            .all(|w| w[0].attr_type().code() <= w[1].attr_type().code());
        if !ordered {
            warn!("Attributes are not in ascending type code order.");
        }
        ordered
    }

    pub fn to_string(&self) -> String {
        let mut out = String::new();

        let mut hdr = Table::new();
        hdr.add_row(row!["MFT Entry Header Values"]);
        hdr.add_row(row![b -> "Sequence", self.header.sequence_number]);
        hdr.add_row(row![b -> "$LogFile Sequence Number", self.header.lsn]);
        hdr.add_row(row![b -> "Flags", self.header.flags]);
        hdr.add_row(row![b -> "Links", self.header.hard_link_count]);
        hdr.add_row(row![b -> "Base record", self.header.base_file_record]);
        hdr.add_row(row![
            b -> "Used / allocated",
            format!("{} / {}", self.header.bytes_in_use, self.header.bytes_allocated)
        ]);
        out.push_str(&hdr.to_string());

        let mut attrs = Table::new();
        attrs.add_row(row!["Attributes", "Name", "Status", "Flags", "Size"]);
        for a in &self.attributes {
            let header = a.header();
            attrs.add_row(row![
                format!("{} (0x{:X}-#{})", header.attr_type, header.attr_type.code(), header.instance),
                a.name().unwrap_or("N/A"),
                header.form_code,
                header.flags,
                a.data_size()
            ]);
        }
        out.push('\n');
        out.push_str(&attrs.to_string());

        for a in &self.attributes {
            let header = a.header();
            let mut t = Table::new();
            t.add_row(row![format!("{} #{}", header.attr_type, header.instance)]);
            match a {
                Attribute::Resident { .. } => match a.value() {
                    Ok(Some(AttributeValue::Raw(raw))) => {
                        t.add_row(row![b -> "Value", format!("{} raw bytes", raw.len())]);
                    }
                    Ok(Some(value)) => {
                        t.add_row(row![b -> "Value", value]);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        t.add_row(row![b -> "Value", format!("unreadable: {}", e)]);
                    }
                },
                Attribute::NonResident { non_resident, .. } => {
                    t.add_row(row![
                        b -> "VCN range",
                        format!("{}..={}", non_resident.lowest_vcn, non_resident.highest_vcn)
                    ]);
                    t.add_row(row![
                        b -> "Allocated / data / initialized",
                        format!(
                            "{} / {} / {}",
                            non_resident.allocated_length,
                            non_resident.data_length,
                            non_resident.initialized_length
                        )
                    ]);
                    match a.data_runs() {
                        Ok(runs) => {
                            for run in runs {
                                t.add_row(row![b -> "Run", run]);
                            }
                        }
                        Err(e) => {
                            t.add_row(row![b -> "Run", format!("unreadable: {}", e)]);
                        }
                    }
                }
            }
            out.push('\n');
            out.push_str(&t.to_string());
        }
        out
    }

    /// Serialize to JSON (uses `serde`).
    pub fn to_json(&self) -> Value {
        let attributes: Vec<Value> = self
            .attributes
            .iter()
            .map(|a| {
                let mut v = serde_json::to_value(a).unwrap_or_else(|_| json!({}));
                if let Some(obj) = v.as_object_mut() {
                    if let Ok(Some(value)) = a.value() {
                        obj.insert("decoded".into(), json!(value));
                    }
                    if let Ok(runs) = a.data_runs() {
                        if !runs.is_empty() {
                            obj.insert("data_runs".into(), json!(runs));
                        }
                    }
                }
                v
            })
            .collect();
        json!({
            "header": &self.header,
            "attributes": attributes,
        })
    }
}

/// Update sequence stride. Independent of the volume's logical sector size.
pub const NTFS_BLOCK_SIZE: usize = 512;

/// Undo the update sequence protection of a multi-sector record.
///
/// The last two bytes of every 512-byte block hold the update sequence
/// number; the real bytes are saved in the update sequence array.
pub fn apply_fixups(buf: &mut [u8]) -> Result<()> {
    let header = FileRecordSegmentHeader::from_bytes(buf)?;
    let usa_offset = header.usa_offset as usize;
    let usa_size = header.usa_size as usize;
    if usa_size == 0 {
        return Ok(());
    }
    if usa_offset + 2 * usa_size > buf.len() {
        warn!("Incomplete multi-sector transfer, update sequence array outside record.");
        return Err(NtfsError::Truncated);
    }

    let usn = [buf[usa_offset], buf[usa_offset + 1]];
    for i in 1..usa_size {
        let sector_end = i * NTFS_BLOCK_SIZE - 2;
        if sector_end + 2 > buf.len() {
            return Err(NtfsError::Truncated);
        }
        if buf[sector_end..sector_end + 2] != usn {
            return Err(NtfsError::FixupMismatch { sector: i });
        }
        let fix_pos = usa_offset + 2 * i;
        buf[sector_end] = buf[fix_pos];
        buf[sector_end + 1] = buf[fix_pos + 1];
    }
    debug!("Applied {} update sequence fixups.", usa_size - 1);
    Ok(())
}

/// One contiguous piece of the MFT on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MftExtent {
    pub vcn: u64,
    pub lcn: u64,
    pub clusters: u64,
}

/// Where MFT records live on the volume.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Mft {
    pub cluster_size: u64,
    pub record_size: u64,
    pub base_address: u64,
    /// Set once the MFT's own run list is known; otherwise the MFT is
    /// assumed contiguous from `base_address`.
    pub extents: Option<Vec<MftExtent>>,
}

impl Mft {
    pub fn new(boot: &BootRecord) -> Self {
        Self {
            cluster_size: boot.cluster_size(),
            record_size: boot.file_record_size(),
            base_address: boot.bpb.mft_address(),
            extents: None,
        }
    }

    /// Address records through the given runs of the MFT's $DATA attribute.
    /// A run starting before cluster 0 fails with `InvalidRunOffset`.
    pub fn with_runs(mut self, runs: &[MappingPair]) -> Result<Self> {
        let mut vcn = 0u64;
        let mut extents = Vec::new();
        for run in runs {
            if let Some(offset) = run.offset {
                let lcn = u64::try_from(offset).map_err(|_| {
                    warn!("$MFT run at VCN {} starts at negative LCN {}.", vcn, offset);
                    NtfsError::InvalidRunOffset(offset)
                })?;
                extents.push(MftExtent {
                    vcn,
                    lcn,
                    clusters: run.length,
                });
            }
            vcn = vcn.saturating_add(run.length);
        }
        self.extents = Some(extents);
        Ok(self)
    }

    /// Number of records covered by the mapped extents.
    pub fn record_count(&self) -> Option<u64> {
        let clusters = self
            .extents
            .as_ref()?
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.clusters));
        Some(clusters.saturating_mul(self.cluster_size) / self.record_size.max(1))
    }

    /// Byte offset of record `id` from the start of the volume. A record is
    /// assumed not to straddle two extents.
    pub fn record_offset(&self, id: u64) -> Result<u64> {
        let rel = id
            .checked_mul(self.record_size)
            .ok_or(NtfsError::RecordOutOfRange(id))?;
        let Some(extents) = &self.extents else {
            return self
                .base_address
                .checked_add(rel)
                .ok_or(NtfsError::RecordOutOfRange(id));
        };
        let cluster_size = self.cluster_size.max(1);
        let vcn = rel / cluster_size;
        let within = rel % cluster_size;
        let extent = extents
            .iter()
            .find(|e| vcn >= e.vcn && vcn - e.vcn < e.clusters)
            .ok_or(NtfsError::RecordOutOfRange(id))?;
        extent
            .lcn
            .checked_add(vcn - extent.vcn)
            .and_then(|c| c.checked_mul(cluster_size))
            .and_then(|b| b.checked_add(within))
            .ok_or(NtfsError::RecordOutOfRange(id))
    }

    /// Read record `id` and undo its update sequence fixups.
    pub fn read_record<S: ReadAt + ?Sized>(&self, source: &S, id: u64) -> Result<Vec<u8>> {
        let offset = self.record_offset(id)?;
        let mut buf = vec![0u8; self.record_size as usize];
        source.read_exact_at(offset, &mut buf)?;
        debug!("MFT entry {} read from offset 0x{:X}", id, offset);

        let header = FileRecordSegmentHeader::from_bytes(&buf)?;
        if !header.has_file_signature() {
            return Err(NtfsError::BadSignature(header.signature));
        }
        apply_fixups(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::attr::tests::{file_name_value, standard_information_value};
    use crate::pbs::tests::sample_boot;

    pub(crate) const RECORD_SIZE: usize = 1024;
    pub(crate) const FIRST_ATTR: usize = 0x38;

    /// Builds FILE records attribute by attribute.
    pub(crate) struct RecordBuilder {
        pub(crate) buf: Vec<u8>,
        pub(crate) pos: usize,
        instance: u16,
    }

    impl RecordBuilder {
        pub(crate) fn new(flags: u16) -> Self {
            let mut buf = vec![0u8; RECORD_SIZE];
            buf[0..4].copy_from_slice(b"FILE");
            buf[4..6].copy_from_slice(&0x30u16.to_le_bytes());
            buf[6..8].copy_from_slice(&3u16.to_le_bytes());
            buf[16..18].copy_from_slice(&1u16.to_le_bytes());
            buf[18..20].copy_from_slice(&1u16.to_le_bytes());
            buf[20..22].copy_from_slice(&(FIRST_ATTR as u16).to_le_bytes());
            buf[22..24].copy_from_slice(&flags.to_le_bytes());
            buf[28..32].copy_from_slice(&(RECORD_SIZE as u32).to_le_bytes());
            Self {
                buf,
                pos: FIRST_ATTR,
                instance: 0,
            }
        }

        fn common(&mut self, attr_type: u32, len: usize, form: u8, name: &[u16], name_off: usize) {
            let p = self.pos;
            self.buf[p..p + 4].copy_from_slice(&attr_type.to_le_bytes());
            self.buf[p + 4..p + 8].copy_from_slice(&(len as u32).to_le_bytes());
            self.buf[p + 8] = form;
            self.buf[p + 9] = name.len() as u8;
            self.buf[p + 10..p + 12].copy_from_slice(&(name_off as u16).to_le_bytes());
            self.buf[p + 14..p + 16].copy_from_slice(&self.instance.to_le_bytes());
            for (i, u) in name.iter().enumerate() {
                let o = p + name_off + i * 2;
                self.buf[o..o + 2].copy_from_slice(&u.to_le_bytes());
            }
            self.instance += 1;
        }

        pub(crate) fn resident(mut self, attr_type: u32, name: &str, value: &[u8]) -> Self {
            let name: Vec<u16> = name.encode_utf16().collect();
            let name_off = 0x18;
            let value_off = (name_off + name.len() * 2 + 7) & !7;
            let len = (value_off + value.len() + 7) & !7;
            self.common(attr_type, len, 0, &name, name_off);
            let p = self.pos;
            self.buf[p + 16..p + 20].copy_from_slice(&(value.len() as u32).to_le_bytes());
            self.buf[p + 20..p + 22].copy_from_slice(&(value_off as u16).to_le_bytes());
            self.buf[p + value_off..p + value_off + value.len()].copy_from_slice(value);
            self.pos += len;
            self
        }

        pub(crate) fn non_resident(
            mut self,
            attr_type: u32,
            name: &str,
            runs: &[u8],
            data_length: u64,
        ) -> Self {
            let name: Vec<u16> = name.encode_utf16().collect();
            let name_off = 0x40;
            let runs_off = (name_off + name.len() * 2 + 7) & !7;
            let len = (runs_off + runs.len() + 7) & !7;
            self.common(attr_type, len, 1, &name, name_off);
            let p = self.pos;
            let clusters: u64 = datarun::decode(runs)
                .unwrap()
                .iter()
                .map(|r| r.length)
                .sum();
            self.buf[p + 24..p + 32].copy_from_slice(&clusters.saturating_sub(1).to_le_bytes());
            self.buf[p + 32..p + 34].copy_from_slice(&(runs_off as u16).to_le_bytes());
            self.buf[p + 40..p + 48].copy_from_slice(&(clusters * 4096).to_le_bytes());
            self.buf[p + 48..p + 56].copy_from_slice(&data_length.to_le_bytes());
            self.buf[p + 56..p + 64].copy_from_slice(&data_length.to_le_bytes());
            self.buf[p + runs_off..p + runs_off + runs.len()].copy_from_slice(runs);
            self.pos += len;
            self
        }

        pub(crate) fn end(mut self) -> Vec<u8> {
            let p = self.pos;
            self.buf[p..p + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
            let in_use = (p + 8) as u32;
            self.buf[24..28].copy_from_slice(&in_use.to_le_bytes());
            self.buf
        }
    }

    /// Apply update sequence protection as NTFS writes it to disk.
    pub(crate) fn protect(buf: &mut [u8], usn: u16) {
        let usa = 0x30;
        buf[usa..usa + 2].copy_from_slice(&usn.to_le_bytes());
        for i in 1..=2 {
            let end = i * 512 - 2;
            buf[usa + 2 * i] = buf[end];
            buf[usa + 2 * i + 1] = buf[end + 1];
            buf[end..end + 2].copy_from_slice(&usn.to_le_bytes());
        }
    }

    fn sample_record() -> Vec<u8> {
        RecordBuilder::new(RecordFlags::IN_USE)
            .resident(0x10, "", &standard_information_value(true))
            .resident(0x30, "", &file_name_value(5, "report.txt"))
            .non_resident(0x80, "", &[0x21, 0x04, 0x10, 0x00, 0x00], 16384)
            .resident(0x80, "Zone.Identifier", b"[ZoneTransfer]")
            .end()
    }

    #[test]
    fn header_fields() {
        let buf = sample_record();
        let h = FileRecordSegmentHeader::from_bytes(&buf).unwrap();
        assert!(h.has_file_signature());
        assert_eq!(h.usa_offset, 0x30);
        assert_eq!(h.usa_size, 3);
        assert_eq!(h.sequence_number, 1);
        assert_eq!(h.first_attribute_offset, FIRST_ATTR as u16);
        assert!(h.flags.is_in_use());
        assert!(h.is_base_record());
        assert!(matches!(
            FileRecordSegmentHeader::from_bytes(&buf[..41]),
            Err(NtfsError::Truncated)
        ));
    }

    #[test]
    fn parses_attribute_stream() {
        let file = File::from_bytes(&sample_record()).unwrap();
        let types: Vec<AttributeType> = file.attributes.iter().map(|a| a.attr_type()).collect();
        assert_eq!(
            types,
            vec![
                AttributeType::StandardInformation,
                AttributeType::FileName,
                AttributeType::Data,
                AttributeType::Data
            ]
        );
        assert!(file.is_in_use());
        assert!(!file.is_directory());
        assert!(file.attributes_in_type_order());

        let names = file.file_names().unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].name, "report.txt");
        assert_eq!(file.standard_information().unwrap().unwrap().owner_id, Some(7));

        let data = file.data_attribute().unwrap();
        assert!(!data.is_resident());
        assert_eq!(data.data_size(), 16384);
        assert_eq!(
            data.data_runs().unwrap(),
            vec![MappingPair {
                length: 4,
                offset: Some(16)
            }]
        );
        assert!(data.value().unwrap().is_none());

        let ads = &file.attributes[3];
        assert_eq!(ads.name(), Some("Zone.Identifier"));
        assert_eq!(ads.resident_value(), Some(&b"[ZoneTransfer]"[..]));
        assert!(ads.data_runs().unwrap().is_empty());
        assert!(ads.run_decoder().is_none());
    }

    #[test]
    fn resident_values_decode_on_request() {
        let file = File::from_bytes(&sample_record()).unwrap();
        match file.attributes[1].value().unwrap() {
            Some(AttributeValue::FileName(f)) => assert_eq!(f.parent_directory.record_number(), 5),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn sentinel_first_gives_empty_stream() {
        let buf = RecordBuilder::new(0).end();
        let (file, err) = File::scan(&buf).unwrap();
        assert!(file.attributes.is_empty());
        assert!(err.is_none());
    }

    #[test]
    fn buffer_exhausted_without_sentinel() {
        let mut buf = RecordBuilder::new(0)
            .resident(0x10, "", &standard_information_value(false))
            .buf;
        buf.truncate(FIRST_ATTR + 0x18 + 48 + 3);
        let file = File::from_bytes(&buf).unwrap();
        assert_eq!(file.attributes.len(), 1);
    }

    #[test]
    fn oversized_record_length_is_truncated_with_partial_result() {
        let mut buf = sample_record();
        // Second attribute claims to run past the end of the record.
        let second = FIRST_ATTR + 0x18 + 72;
        assert_eq!(LittleEndian::read_u32(&buf[second..]), 0x30);
        buf[second + 4..second + 8].copy_from_slice(&0x1000u32.to_le_bytes());

        let (file, err) = File::scan(&buf).unwrap();
        assert!(matches!(err, Some(NtfsError::Truncated)));
        assert_eq!(file.attributes.len(), 1);
        assert_eq!(file.attributes[0].attr_type(), AttributeType::StandardInformation);

        assert!(matches!(File::from_bytes(&buf), Err(NtfsError::Truncated)));
    }

    #[test]
    fn value_out_of_bounds() {
        let mut buf = sample_record();
        let p = FIRST_ATTR;
        // value_length 72 -> 0x200, record is only 0x60 long
        buf[p + 16..p + 20].copy_from_slice(&0x200u32.to_le_bytes());
        assert!(matches!(
            File::from_bytes(&buf),
            Err(NtfsError::AttributeValueOutOfBounds)
        ));
    }

    #[test]
    fn value_cannot_read_into_next_record() {
        let mut buf = sample_record();
        let p = FIRST_ATTR;
        // One byte more than the record length, still inside the buffer.
        let len = LittleEndian::read_u32(&buf[p + 4..]) as usize;
        let value_len = len - 0x18 + 1;
        buf[p + 16..p + 20].copy_from_slice(&(value_len as u32).to_le_bytes());
        assert!(matches!(
            Attribute::from_bytes(&buf[p..]),
            Err(NtfsError::AttributeValueOutOfBounds)
        ));
    }

    #[test]
    fn name_out_of_bounds() {
        let mut buf = sample_record();
        let p = FIRST_ATTR;
        buf[p + 9] = 0x7F;
        assert!(matches!(
            File::from_bytes(&buf),
            Err(NtfsError::AttributeNameOutOfBounds)
        ));
    }

    #[test]
    fn short_attribute_header() {
        let mut buf = RecordBuilder::new(0).buf;
        buf.truncate(FIRST_ATTR + 10);
        buf[FIRST_ATTR..FIRST_ATTR + 4].copy_from_slice(&0x10u32.to_le_bytes());
        let (file, err) = File::scan(&buf).unwrap();
        assert!(file.attributes.is_empty());
        assert!(matches!(err, Some(NtfsError::Truncated)));
    }

    #[test]
    fn zero_record_length_does_not_loop() {
        let mut buf = RecordBuilder::new(0).buf;
        buf[FIRST_ATTR..FIRST_ATTR + 4].copy_from_slice(&0x10u32.to_le_bytes());
        assert!(matches!(File::from_bytes(&buf), Err(NtfsError::Truncated)));
    }

    #[test]
    fn unknown_type_is_kept() {
        let buf = RecordBuilder::new(0).resident(0x1000, "", &[1, 2, 3]).end();
        let file = File::from_bytes(&buf).unwrap();
        assert_eq!(file.attributes[0].attr_type(), AttributeType::Unknown(0x1000));
        assert_eq!(
            file.attributes[0].value().unwrap(),
            Some(AttributeValue::Raw(vec![1, 2, 3]))
        );
    }

    #[test]
    fn out_of_order_types_are_reported_not_rejected() {
        let buf = RecordBuilder::new(0)
            .resident(0x30, "", &file_name_value(5, "a"))
            .resident(0x10, "", &standard_information_value(false))
            .end();
        let file = File::from_bytes(&buf).unwrap();
        assert_eq!(file.attributes.len(), 2);
        assert!(!file.attributes_in_type_order());
    }

    #[test]
    fn non_resident_lengths() {
        let nr = NonresidentHeader {
            lowest_vcn: 0,
            highest_vcn: 3,
            mapping_pairs_offset: 0x40,
            compression_unit: 0,
            allocated_length: 4096,
            data_length: 5000,
            initialized_length: 100,
        };
        assert!(!nr.lengths_consistent());
        assert!(matches!(
            NonresidentHeader::from_bytes(&[0u8; 47]),
            Err(NtfsError::Truncated)
        ));
        assert!(matches!(ResidentHeader::from_bytes(&[0u8; 7]), Err(NtfsError::Truncated)));
        assert!(matches!(
            AttributeRecordHeader::from_bytes(&[0u8; 15]),
            Err(NtfsError::Truncated)
        ));
    }

    #[test]
    fn mapping_pairs_offset_outside_record() {
        let mut buf = sample_record();
        let data = FIRST_ATTR + 0x60 + 0x70;
        assert_eq!(LittleEndian::read_u32(&buf[data..]), 0x80);
        buf[data + 32..data + 34].copy_from_slice(&0x400u16.to_le_bytes());
        let (file, err) = File::scan(&buf).unwrap();
        assert_eq!(file.attributes.len(), 2);
        assert!(matches!(err, Some(NtfsError::Truncated)));
    }

    #[test]
    fn fixups_restore_sector_tails() {
        let original = sample_record();
        let mut buf = original.clone();
        protect(&mut buf, 0x0007);
        assert_ne!(buf, original);
        apply_fixups(&mut buf).unwrap();
        assert_eq!(buf[..0x30], original[..0x30]);
        assert_eq!(buf[510..512], original[510..512]);
        assert_eq!(buf[1022..1024], original[1022..1024]);
    }

    #[test]
    fn fixup_mismatch_is_reported() {
        let mut buf = sample_record();
        protect(&mut buf, 0x0007);
        buf[1022] ^= 0xFF;
        assert!(matches!(
            apply_fixups(&mut buf),
            Err(NtfsError::FixupMismatch { sector: 2 })
        ));
    }

    #[test]
    fn fixups_use_512_byte_blocks_on_4k_records() {
        let mut original = vec![0u8; 4096];
        original[0..4].copy_from_slice(b"FILE");
        original[4..6].copy_from_slice(&0x30u16.to_le_bytes());
        original[6..8].copy_from_slice(&9u16.to_le_bytes());
        for i in 1..=8 {
            original[i * 512 - 2] = i as u8;
            original[i * 512 - 1] = 0xA0;
        }
        let mut buf = original.clone();
        let usn = 0x0011u16.to_le_bytes();
        buf[0x30..0x32].copy_from_slice(&usn);
        for i in 1..=8 {
            let end = i * 512 - 2;
            buf[0x30 + 2 * i] = buf[end];
            buf[0x31 + 2 * i] = buf[end + 1];
            buf[end..end + 2].copy_from_slice(&usn);
        }

        apply_fixups(&mut buf).unwrap();
        for i in 1..=8 {
            assert_eq!(buf[i * 512 - 2..i * 512], [i as u8, 0xA0]);
        }
        assert_eq!(buf[0x42..], original[0x42..]);
    }

    #[test]
    fn lone_surrogate_in_attribute_name_is_replaced() {
        let mut buf = RecordBuilder::new(0).resident(0x80, "ab", b"x").end();
        let name = FIRST_ATTR + 0x18;
        buf[name..name + 2].copy_from_slice(&0xDC00u16.to_le_bytes());
        let (file, err) = File::scan(&buf).unwrap();
        assert!(err.is_none());
        assert_eq!(file.attributes[0].name(), Some("\u{FFFD}b"));
    }

    #[test]
    fn negative_mft_run_is_rejected() {
        let boot = BootRecord::from_bytes(&sample_boot(4)).unwrap();
        let runs = datarun::decode(&[0x11, 0x04, 0xFF, 0x00]).unwrap();
        assert_eq!(runs[0].offset, Some(-1));
        assert!(matches!(
            Mft::new(&boot).with_runs(&runs),
            Err(NtfsError::InvalidRunOffset(-1))
        ));
    }

    #[test]
    fn extent_at_top_of_address_space_does_not_overflow() {
        let boot = BootRecord::from_bytes(&sample_boot(4)).unwrap();
        let mut mft = Mft::new(&boot);
        mft.extents = Some(vec![MftExtent {
            vcn: 0,
            lcn: u64::MAX,
            clusters: 4,
        }]);
        assert!(matches!(mft.record_offset(4), Err(NtfsError::RecordOutOfRange(4))));
        assert!(matches!(mft.record_offset(0), Err(NtfsError::RecordOutOfRange(0))));
    }

    #[test]
    fn linear_addressing() {
        let boot = BootRecord::from_bytes(&sample_boot(4)).unwrap();
        let mft = Mft::new(&boot);
        assert_eq!(mft.record_offset(0).unwrap(), 4 * 4096);
        assert_eq!(mft.record_offset(5).unwrap(), 4 * 4096 + 5 * 1024);
        assert!(mft.record_count().is_none());
        assert!(matches!(
            mft.record_offset(u64::MAX),
            Err(NtfsError::RecordOutOfRange(_))
        ));
    }

    #[test]
    fn fragmented_addressing() {
        let boot = BootRecord::from_bytes(&sample_boot(4)).unwrap();
        // 2 clusters @ 4, 1 sparse, 2 clusters @ 10
        let runs = datarun::decode(&[0x11, 0x02, 0x04, 0x01, 0x01, 0x11, 0x02, 0x06, 0x00]).unwrap();
        let mft = Mft::new(&boot).with_runs(&runs).unwrap();
        assert_eq!(mft.record_count(), Some(16));
        assert_eq!(mft.record_offset(7).unwrap(), 4 * 4096 + 7 * 1024);
        assert!(matches!(mft.record_offset(8), Err(NtfsError::RecordOutOfRange(8))));
        assert_eq!(mft.record_offset(12).unwrap(), 10 * 4096);
        assert_eq!(mft.record_offset(17).unwrap(), 11 * 4096 + 1024);
        assert!(mft.record_offset(20).is_err());
    }

    #[test]
    fn read_record_checks_signature() {
        let boot = BootRecord::from_bytes(&sample_boot(1)).unwrap();
        let mft = Mft::new(&boot);
        let mut image = vec![0u8; 4096 * 2];
        let mut rec = sample_record();
        protect(&mut rec, 3);
        image[4096..5120].copy_from_slice(&rec);
        let buf = mft.read_record(&image, 0).unwrap();
        assert_eq!(File::from_bytes(&buf).unwrap().attributes.len(), 4);

        assert!(matches!(
            mft.read_record(&image, 1),
            Err(NtfsError::BadSignature([0, 0, 0, 0]))
        ));
        assert!(matches!(mft.read_record(&image, 4), Err(NtfsError::Truncated)));
    }

    #[test]
    fn table_lists_every_attribute() {
        let out = File::from_bytes(&sample_record()).unwrap().to_string();
        assert!(out.contains("$STANDARD_INFORMATION"));
        assert!(out.contains("Zone.Identifier"));
        assert!(out.contains("4 clusters @ LCN 16"));
    }

    #[test]
    fn json_includes_decoded_values() {
        let file = File::from_bytes(&sample_record()).unwrap();
        let v = file.to_json();
        assert_eq!(v["attributes"].as_array().unwrap().len(), 4);
        assert_eq!(
            v["attributes"][1]["decoded"]["FileName"]["name"],
            "report.txt"
        );
        assert_eq!(v["attributes"][2]["data_runs"][0]["offset"], 16);
    }
}
