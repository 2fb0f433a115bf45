//! PE/PE+ on-disk layout: magic values, field offsets and record sizes.
//!
//! The rewriter patches header fields in place, so what it needs from the format is not
//! a parsed object graph but the *file offsets* of individual fields. This module names
//! those offsets once; [`crate::pe::PeFile`] does the arithmetic.
//!
//! # Reference
//! - Microsoft PE/COFF Specification
//! - <http://www.debuginfo.com/articles/debuginfomatch.html> (CodeView record)

/// `IMAGE_DOS_HEADER.e_magic`, the `MZ` signature.
pub const DOS_SIGNATURE: u16 = 0x5A4D;

/// Offset of `e_lfanew` within the DOS header.
pub const DOS_LFANEW_OFFSET: usize = 60;

/// Size of the DOS header.
pub const DOS_HEADER_SIZE: usize = 64;

/// The 32-bit `"PE\0\0"` signature preceding the file header.
pub const PE_SIGNATURE: u32 = 0x0000_4550;

/// Size of `IMAGE_FILE_HEADER`.
pub const FILE_HEADER_SIZE: usize = 20;

/// Offset of `NumberOfSections` within the file header.
pub const FILE_HEADER_NUM_SECTIONS: usize = 2;

/// Offset of `TimeDateStamp` within the file header.
pub const FILE_HEADER_TIMESTAMP: usize = 4;

/// Offset of `SizeOfOptionalHeader` within the file header.
pub const FILE_HEADER_OPTIONAL_SIZE: usize = 16;

/// `IMAGE_OPTIONAL_HEADER32.Magic`.
pub const OPTIONAL_MAGIC_PE32: u16 = 0x10B;

/// `IMAGE_OPTIONAL_HEADER64.Magic`.
pub const OPTIONAL_MAGIC_PE32_PLUS: u16 = 0x20B;

/// Full size of the 32-bit optional header, data directories included.
pub const OPTIONAL_HEADER32_SIZE: usize = 224;

/// Full size of the 64-bit optional header, data directories included.
pub const OPTIONAL_HEADER64_SIZE: usize = 240;

/// Offset of `CheckSum` within the optional header. Identical for both dialects; the
/// layouts only diverge after `SizeOfStackReserve`.
pub const OPTIONAL_CHECKSUM_OFFSET: usize = 64;

/// Offset of the data directory array within the 32-bit optional header.
pub const OPTIONAL_HEADER32_DIRECTORIES: usize = 96;

/// Offset of the data directory array within the 64-bit optional header.
pub const OPTIONAL_HEADER64_DIRECTORIES: usize = 112;

/// Size of one `IMAGE_DATA_DIRECTORY` entry (`VirtualAddress`, `Size`).
pub const DATA_DIRECTORY_SIZE: usize = 8;

/// Data directory index of `IMAGE_EXPORT_DIRECTORY`.
pub const DIRECTORY_ENTRY_EXPORT: usize = 0;

/// Data directory index of `IMAGE_RESOURCE_DIRECTORY`.
pub const DIRECTORY_ENTRY_RESOURCE: usize = 2;

/// Data directory index of the debug directory.
pub const DIRECTORY_ENTRY_DEBUG: usize = 6;

/// Size of `IMAGE_EXPORT_DIRECTORY`.
pub const EXPORT_DIRECTORY_SIZE: usize = 40;

/// Size of `IMAGE_RESOURCE_DIRECTORY`.
pub const RESOURCE_DIRECTORY_SIZE: usize = 16;

/// Size of one `IMAGE_DEBUG_DIRECTORY` entry.
pub const DEBUG_DIRECTORY_SIZE: usize = 28;

/// Offset of `TimeDateStamp` within a debug directory entry.
pub const DEBUG_DIRECTORY_TIMESTAMP: usize = 4;

/// Offset of `Type` within a debug directory entry.
pub const DEBUG_DIRECTORY_TYPE: usize = 12;

/// Offset of `PointerToRawData` within a debug directory entry.
pub const DEBUG_DIRECTORY_RAW_POINTER: usize = 24;

/// `IMAGE_DEBUG_TYPE_CODEVIEW`.
pub const DEBUG_TYPE_CODEVIEW: u32 = 2;

/// Size of one `IMAGE_SECTION_HEADER`.
pub const SECTION_HEADER_SIZE: usize = 40;

/// Offset of `VirtualSize` within a section header.
pub const SECTION_VIRTUAL_SIZE: usize = 8;

/// Offset of `VirtualAddress` within a section header.
pub const SECTION_VIRTUAL_ADDRESS: usize = 12;

/// Offset of `PointerToRawData` within a section header.
pub const SECTION_RAW_POINTER: usize = 20;

/// `CV_INFO_PDB70.CvSignature`, reads `RSDS` in memory.
pub const CV_INFO_SIGNATURE_PDB70: u32 = 0x5344_5352;

/// Minimum size of a `CV_INFO_PDB70` record: signature, GUID, age, and at least the
/// NUL of the PDB file name.
pub const CV_INFO_PDB70_SIZE: usize = 25;

/// Offset of `Signature` (the 16-byte GUID) within a CodeView record.
pub const CV_INFO_SIGNATURE_OFFSET: usize = 4;

/// Offset of `Age` within a CodeView record.
pub const CV_INFO_AGE_OFFSET: usize = 20;
