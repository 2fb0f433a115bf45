//! PE/PE+ image parsing and patch enumeration.
//!
//! [`PeFile`] parses the DOS → NT → section header chain of a mapped image and
//! enumerates every field that makes a build non-reproducible into a
//! [`crate::patches::PatchSet`]: header timestamps, the checksum, data-directory
//! timestamps, and the CodeView record's PDB signature and age.
//!
//! The two optional-header dialects (PE32 and PE32+) share everything up to and
//! including the file header, so the dialect decision is deferred until the first
//! 16-bit field of the optional header has been read.
//!
//! Nothing is written while parsing. Patches are collected first and applied by the
//! driver only after the PDB side of the run has succeeded, so a failure can never
//! leave a half-patched image behind.
//!
//! # Examples
//!
//! ```rust,no_run
//! use pefreeze::{patches::PatchSet, pe::PeFile};
//!
//! let data = std::fs::read("app.exe")?;
//! let pe = PeFile::parse(&data)?;
//! let mut patches = PatchSet::new();
//! let codeview = pe.collect_patches(&mut patches)?;
//! patches.sort();
//! println!("{} patches, CodeView: {}", patches.len(), codeview.is_some());
//! # Ok::<(), pefreeze::Error>(())
//! ```

pub mod format;

use uguid::Guid;

use crate::{
    file::io::read_le,
    patches::PatchSet,
    pe::format::*,
    Result,
};

/// Replacement for timestamps.
///
/// The timestamp can't just be set to zero as that represents a special value in the
/// PE file. Instead this is an arbitrary fixed date in the past: Jan 1, 2010,
/// 0:00:00 GMT. The date shouldn't be too far in the past, otherwise Windows may warn
/// that the image has known compatibility issues when someone runs it.
pub const REPRO_TIMESTAMP: u32 = 1_262_304_000;

/// Replacement for the PDB age. Normally incremented on every incremental PDB update;
/// a reproducible image pins it.
pub const REPRO_PDB_AGE: u32 = 1;

/// Patch label of the CodeView signature patch. The signature bytes are only known
/// after the gap checksum has been computed, so the driver re-binds this patch late.
pub const PDB_SIGNATURE_LABEL: &str = "PDB Signature";

/// The parsed `CV_INFO_PDB70` record of an image.
///
/// This is what ties a PE to its PDB: the pair `(signature, age)` here must match the
/// PDB header stream, and both sides are rewritten to the same deterministic values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeViewInfo {
    /// File offset of the CodeView record inside the image.
    pub offset: usize,
    /// The unique identifier shared with the PDB. Regenerated on every link.
    pub signature: Guid,
    /// Ever-incrementing PDB update counter, starting at 1.
    pub age: u32,
}

/// Parsed header chain of a PE or PE+ image.
///
/// Holds the offsets of the interesting header structures; all field access goes back
/// through the underlying byte slice, bounds-checked.
#[derive(Debug)]
pub struct PeFile<'a> {
    data: &'a [u8],

    /// Offset of `IMAGE_FILE_HEADER`.
    file_header: usize,
    /// Offset of the optional header. Dialect is decided by its leading magic.
    optional: usize,
    /// Offset of the section header array.
    sections: usize,

    num_sections: u16,
    magic: u16,
}

impl<'a> PeFile<'a> {
    /// Parses the header chain of `data`.
    ///
    /// The parse order is fixed: DOS header, PE signature, file header, optional
    /// header offset (dialect not yet committed), section header array offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidImage`] naming the missing or invalid structure.
    pub fn parse(data: &'a [u8]) -> Result<PeFile<'a>> {
        if data.len() < DOS_HEADER_SIZE {
            return Err(invalid_image!("missing DOS header"));
        }

        let e_magic: u16 = read_le(data, 0).ok_or_else(|| invalid_image!("missing DOS header"))?;
        if e_magic != DOS_SIGNATURE {
            return Err(invalid_image!("invalid DOS signature"));
        }

        let e_lfanew: u32 = read_le(data, DOS_LFANEW_OFFSET)
            .ok_or_else(|| invalid_image!("missing DOS header"))?;

        let signature: u32 = read_le(data, e_lfanew as usize)
            .ok_or_else(|| invalid_image!("missing PE signature"))?;
        if signature != PE_SIGNATURE {
            return Err(invalid_image!("invalid PE signature"));
        }

        let file_header = e_lfanew as usize + 4;
        if file_header + FILE_HEADER_SIZE > data.len() {
            return Err(invalid_image!("missing IMAGE_FILE_HEADER"));
        }

        let num_sections: u16 = read_le(data, file_header + FILE_HEADER_NUM_SECTIONS)
            .ok_or_else(|| invalid_image!("missing IMAGE_FILE_HEADER"))?;
        let optional_size: u16 = read_le(data, file_header + FILE_HEADER_OPTIONAL_SIZE)
            .ok_or_else(|| invalid_image!("missing IMAGE_FILE_HEADER"))?;

        let optional = file_header + FILE_HEADER_SIZE;
        let sections = optional + optional_size as usize;

        let magic: u16 =
            read_le(data, optional).ok_or_else(|| invalid_image!("missing IMAGE_OPTIONAL_HEADER"))?;

        Ok(PeFile {
            data,
            file_header,
            optional,
            sections,
            num_sections,
            magic,
        })
    }

    /// The `Magic` field of the optional header, deciding between PE32 (`0x10B`) and
    /// PE32+ (`0x20B`).
    #[must_use]
    pub fn magic(&self) -> u16 {
        self.magic
    }

    /// Translates a relative virtual address to a file offset via the section table.
    ///
    /// Linear scan; the first section whose `[VirtualAddress, VirtualAddress +
    /// VirtualSize)` range contains the RVA wins. The returned offset is *not* length
    /// checked; callers that read through it must call [`PeFile::is_valid_ref`].
    #[must_use]
    pub fn translate(&self, rva: u32) -> Option<usize> {
        for i in 0..self.num_sections as usize {
            let section = self.sections + i * SECTION_HEADER_SIZE;

            let virtual_size: u32 = read_le(self.data, section + SECTION_VIRTUAL_SIZE)?;
            let virtual_address: u32 = read_le(self.data, section + SECTION_VIRTUAL_ADDRESS)?;
            let raw_pointer: u32 = read_le(self.data, section + SECTION_RAW_POINTER)?;

            let section_end = virtual_address.checked_add(virtual_size)?;
            if rva >= virtual_address && rva < section_end {
                return Some((rva - virtual_address) as usize + raw_pointer as usize);
            }
        }

        None
    }

    /// Checks that `len` bytes starting at `offset` fit inside the image.
    #[must_use]
    pub fn is_valid_ref(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.data.len())
    }

    /// Enumerates all patches for this image into `patches` and returns the parsed
    /// CodeView record, if the image carries one.
    ///
    /// The fixed patch list: `IMAGE_FILE_HEADER.TimeDateStamp`,
    /// `OptionalHeader.CheckSum`, the export and resource directory timestamps when
    /// those directories exist, every debug directory timestamp, and the CodeView
    /// record's signature and age. The signature patch is added with placeholder
    /// bytes; the driver binds the deterministic value after the gap checksum has
    /// been computed.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidImage`] for an unsupported optional header
    /// magic, undersized data directories, out-of-image directory targets, more than
    /// one CodeView entry, or a CodeView record that is not PDB 7.0.
    pub fn collect_patches(&self, patches: &mut PatchSet) -> Result<Option<CodeViewInfo>> {
        patches.add_u32(
            self.file_header + FILE_HEADER_TIMESTAMP,
            REPRO_TIMESTAMP,
            "IMAGE_FILE_HEADER.TimeDateStamp",
        );

        let (full_size, directories) = match self.magic {
            OPTIONAL_MAGIC_PE32 => (OPTIONAL_HEADER32_SIZE, OPTIONAL_HEADER32_DIRECTORIES),
            OPTIONAL_MAGIC_PE32_PLUS => (OPTIONAL_HEADER64_SIZE, OPTIONAL_HEADER64_DIRECTORIES),
            _ => return Err(invalid_image!("unsupported IMAGE_NT_HEADERS.OptionalHeader")),
        };

        if !self.is_valid_ref(self.optional, full_size) {
            return Err(invalid_image!("missing IMAGE_OPTIONAL_HEADER"));
        }

        patches.add_u32(
            self.optional + OPTIONAL_CHECKSUM_OFFSET,
            REPRO_TIMESTAMP,
            "OptionalHeader.CheckSum",
        );

        if let Some(dir) =
            self.data_dir(directories, DIRECTORY_ENTRY_EXPORT, EXPORT_DIRECTORY_SIZE)?
        {
            patches.add_u32(dir + 4, REPRO_TIMESTAMP, "IMAGE_EXPORT_DIRECTORY.TimeDateStamp");
        }

        if let Some(dir) =
            self.data_dir(directories, DIRECTORY_ENTRY_RESOURCE, RESOURCE_DIRECTORY_SIZE)?
        {
            patches.add_u32(
                dir + 4,
                REPRO_TIMESTAMP,
                "IMAGE_RESOURCE_DIRECTORY.TimeDateStamp",
            );
        }

        let codeview = self.patch_debug_directories(patches, directories)?;

        if let Some(cv) = &codeview {
            patches.add(
                cv.offset + CV_INFO_SIGNATURE_OFFSET,
                vec![0; 16],
                PDB_SIGNATURE_LABEL,
            );
            patches.add_u32(cv.offset + CV_INFO_AGE_OFFSET, REPRO_PDB_AGE, "PDB Age");
        }

        Ok(codeview)
    }

    /// There are 0 or more debug data directories; the timestamp in each one gets
    /// patched. At most one of them may be of type CODEVIEW, and that one names the
    /// PDB this image belongs to.
    fn patch_debug_directories(
        &self,
        patches: &mut PatchSet,
        directories: usize,
    ) -> Result<Option<CodeViewInfo>> {
        let (virtual_address, size) = self.data_dir_entry(directories, DIRECTORY_ENTRY_DEBUG);
        if virtual_address == 0 {
            return Ok(None);
        }

        let base = self
            .translate(virtual_address)
            .ok_or_else(|| invalid_image!("IMAGE_DATA_DIRECTORY.VirtualAddress is invalid"))?;
        if !self.is_valid_ref(base, size as usize) {
            return Err(invalid_image!("IMAGE_DATA_DIRECTORY.VirtualAddress is invalid"));
        }

        let mut codeview = None;

        let count = size as usize / DEBUG_DIRECTORY_SIZE;
        for i in 0..count {
            let entry = base + i * DEBUG_DIRECTORY_SIZE;

            let timestamp: u32 = read_le(self.data, entry + DEBUG_DIRECTORY_TIMESTAMP)
                .ok_or_else(|| invalid_image!("missing IMAGE_DEBUG_DIRECTORY"))?;
            if timestamp != 0 {
                patches.add_u32(
                    entry + DEBUG_DIRECTORY_TIMESTAMP,
                    REPRO_TIMESTAMP,
                    "IMAGE_DEBUG_DIRECTORY.TimeDateStamp",
                );
            }

            let dir_type: u32 = read_le(self.data, entry + DEBUG_DIRECTORY_TYPE)
                .ok_or_else(|| invalid_image!("missing IMAGE_DEBUG_DIRECTORY"))?;
            if dir_type != DEBUG_TYPE_CODEVIEW {
                continue;
            }

            if codeview.is_some() {
                return Err(invalid_image!("found multiple CodeView debug entries"));
            }

            let raw: u32 = read_le(self.data, entry + DEBUG_DIRECTORY_RAW_POINTER)
                .ok_or_else(|| invalid_image!("missing IMAGE_DEBUG_DIRECTORY"))?;
            codeview = Some(self.parse_codeview(raw as usize)?);
        }

        Ok(codeview)
    }

    fn parse_codeview(&self, offset: usize) -> Result<CodeViewInfo> {
        if !self.is_valid_ref(offset, CV_INFO_PDB70_SIZE) {
            return Err(invalid_image!("invalid CodeView debug entry location"));
        }

        let cv_signature: u32 = read_le(self.data, offset)
            .ok_or_else(|| invalid_image!("invalid CodeView debug entry location"))?;
        if cv_signature != CV_INFO_SIGNATURE_PDB70 {
            return Err(invalid_image!(
                "unsupported PDB format, only version 7.0 is supported"
            ));
        }

        let mut signature = [0u8; 16];
        signature.copy_from_slice(
            &self.data[offset + CV_INFO_SIGNATURE_OFFSET..offset + CV_INFO_AGE_OFFSET],
        );
        let age: u32 = read_le(self.data, offset + CV_INFO_AGE_OFFSET)
            .ok_or_else(|| invalid_image!("invalid CodeView debug entry location"))?;

        Ok(CodeViewInfo {
            offset,
            signature: Guid::from_bytes(signature),
            age,
        })
    }

    /// Reads the raw `(VirtualAddress, Size)` pair of a data directory entry. The
    /// optional header was bounds checked as a whole, so these reads cannot fail.
    fn data_dir_entry(&self, directories: usize, entry: usize) -> (u32, u32) {
        let offset = self.optional + directories + entry * DATA_DIRECTORY_SIZE;
        let virtual_address = read_le(self.data, offset).unwrap_or(0);
        let size = read_le(self.data, offset + 4).unwrap_or(0);
        (virtual_address, size)
    }

    /// Resolves a data directory to a file offset, or `None` if the directory is
    /// absent.
    ///
    /// Directory sizes are allowed to be *larger* than the structure: Microsoft is
    /// free to grow these structs at the end while keeping ABI compatibility. Smaller
    /// is an error.
    fn data_dir(&self, directories: usize, entry: usize, min_size: usize) -> Result<Option<usize>> {
        let (virtual_address, size) = self.data_dir_entry(directories, entry);
        if virtual_address == 0 {
            return Ok(None);
        }

        if (size as usize) < min_size {
            return Err(invalid_image!("IMAGE_DATA_DIRECTORY.Size is invalid"));
        }

        let offset = self
            .translate(virtual_address)
            .ok_or_else(|| invalid_image!("IMAGE_DATA_DIRECTORY.VirtualAddress is invalid"))?;
        if !self.is_valid_ref(offset, min_size) {
            return Err(invalid_image!("IMAGE_DATA_DIRECTORY.VirtualAddress is invalid"));
        }

        Ok(Some(offset))
    }
}
