// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

//! Decode NTFS on-disk metadata: the boot record, MFT file records, their
//! attributes, resident attribute values and non-resident data runs.
//!
//! The decoders in [`pbs`], [`mft`], [`attr`] and [`datarun`] work on byte
//! slices. [`Ntfs`] ties them to a positioned byte source and locates MFT
//! records on the volume.

use log::{debug, error, info};

pub mod attr;
pub mod codec;
pub mod datarun;
pub mod error;
pub mod flags;
pub mod mft;
pub mod pbs;
pub mod reference;
pub mod source;
pub mod types;

pub use attr::{AttributeValue, FileName, StandardInformation, VolumeInformation};
pub use datarun::MappingPair;
pub use error::{NtfsError, Result};
pub use mft::{Attribute, File, Mft};
pub use pbs::BootRecord;
pub use reference::{FileReference, SegmentReference};
pub use source::ReadAt;
pub use types::{AttributeType, FormCode};

/// Well-known MFT record numbers.
pub const MFT_RECORD: u64 = 0;
pub const VOLUME_RECORD: u64 = 3;

/// An opened NTFS volume.
pub struct Ntfs<S: ReadAt> {
    boot: BootRecord,
    mft: Mft,
    source: S,
}

impl<S: ReadAt> Ntfs<S> {
    /// Read and check the boot record at offset 0 of `source`.
    pub fn new(source: S) -> Result<Self> {
        let mut buf = [0u8; BootRecord::LENGTH];
        source.read_exact_at(0, &mut buf)?;
        let boot = BootRecord::from_bytes(&buf).inspect_err(|e| {
            error!("Not an NTFS boot record: {}", e);
        })?;
        boot.bpb.validate().inspect_err(|e| {
            error!("Unusable volume geometry: {}", e);
        })?;
        let mft = Mft::new(&boot);
        info!(
            "NTFS volume: {} byte clusters, {} byte file records, $MFT at 0x{:X}",
            boot.cluster_size(),
            boot.file_record_size(),
            mft.base_address
        );
        Ok(Self { boot, mft, source })
    }

    pub fn boot_record(&self) -> &BootRecord {
        &self.boot
    }

    pub fn mft(&self) -> &Mft {
        &self.mft
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Load record `id` from disk, fixups applied.
    pub fn read_record(&self, id: u64) -> Result<Vec<u8>> {
        self.mft.read_record(&self.source, id).inspect_err(|e| {
            if matches!(e, NtfsError::BadSignature(_)) {
                error!("MFT entry {} has no FILE signature.", id);
            }
        })
    }

    /// Load and parse record `id`.
    pub fn file(&self, id: u64) -> Result<File> {
        File::from_bytes(&self.read_record(id)?)
    }

    /// Like [`Ntfs::file`], but keeps what was readable of a damaged record.
    pub fn scan_file(&self, id: u64) -> Result<(File, Option<NtfsError>)> {
        File::scan(&self.read_record(id)?)
    }

    /// Resolve the extents of $MFT from the runs of its own $DATA attribute.
    /// Records past the first extent are only reachable once this has run.
    pub fn map_mft_extents(&mut self) -> Result<&Mft> {
        if self.mft.extents.is_some() {
            debug!("Using cached $MFT extents.");
            return Ok(&self.mft);
        }
        debug!("Loading $MFT extents from record {}.", MFT_RECORD);

        // record 0 is always in the first extent
        let mft_file = self.file(MFT_RECORD)?;
        let data = mft_file
            .attributes_of(AttributeType::Data)
            .find(|a| a.name().is_none() && !a.is_resident())
            .ok_or_else(|| {
                error!("$MFT has no non-resident $DATA attribute.");
                NtfsError::MissingAttribute(AttributeType::Data)
            })?;
        let runs = data.data_runs()?;
        self.mft = Mft::new(&self.boot).with_runs(&runs)?;
        if let Some(count) = self.mft.record_count() {
            info!("$MFT spans {} run(s), {} records.", runs.len(), count);
        }
        Ok(&self.mft)
    }

    /// Number of records covered by the $MFT extents.
    pub fn mft_records_count(&mut self) -> Result<u64> {
        let mft = self.map_mft_extents()?;
        Ok(mft.record_count().unwrap_or_default())
    }

    fn volume_value(&self, attr_type: AttributeType) -> Result<Option<AttributeValue>> {
        let volume = self.file(VOLUME_RECORD)?;
        match volume.attributes_of(attr_type).next() {
            Some(attr) => attr.value(),
            None => Ok(None),
        }
    }

    /// The volume label stored in $Volume.
    pub fn volume_name(&self) -> Result<Option<String>> {
        Ok(match self.volume_value(AttributeType::VolumeName)? {
            Some(AttributeValue::VolumeName(name)) => Some(name),
            _ => None,
        })
    }

    /// NTFS version and volume flags stored in $Volume.
    pub fn volume_information(&self) -> Result<Option<VolumeInformation>> {
        Ok(match self.volume_value(AttributeType::VolumeInformation)? {
            Some(AttributeValue::VolumeInformation(info)) => Some(info),
            _ => None,
        })
    }
}
