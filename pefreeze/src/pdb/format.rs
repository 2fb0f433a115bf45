//! PDB substream layouts: versions, signatures, and field offsets.
//!
//! The patchers rewrite fields in place inside materialised stream buffers, so every
//! structure here carries its field offsets alongside a parsed form. Fixed sizes:
//! `PdbStream70` 28, `DbiHeader` 64, `SectionContribution` 28, `ModuleInfo` 64,
//! `PublicSymbolHeader` 28, `LinkInfo` 24, `StringTableHeader` 12, `SymbolRecord`
//! header 4.
//!
//! # Reference
//! - <https://github.com/Microsoft/microsoft-pdb> (Microsoft's reference implementation)
//! - LLVM `lib/DebugInfo/PDB`

use bitflags::bitflags;
use uguid::Guid;

use crate::file::{io::read_le, Parser};

/// Stream table stream (the previous one; always discarded on write).
pub const STREAM_TABLE_STREAM: usize = 0;

/// Version information, and the identity tying this PDB to its PE.
pub const HEADER_STREAM: usize = 1;

/// Debug information stream: section contributions and the list of modules.
pub const DBI_STREAM: usize = 3;

/// Minimum supported PDB implementation version ("vc70").
pub const PDB_VERSION_VC70: u32 = 20000404;

/// The DBI header signature.
pub const DBI_SIGNATURE: u32 = u32::MAX;

/// The only supported DBI implementation version (v7.0).
pub const DBI_VERSION_V70: u32 = 19990903;

/// Section contribution substream version signatures.
pub const SECTION_CONTRIB_V1: u32 = 0xEFFE_0000 + 19970605;
#[allow(missing_docs)]
pub const SECTION_CONTRIB_V2: u32 = 0xEFFE_0000 + 20140516;

/// Signature of the `/names` string table (and of PDB hash tables in general).
pub const HASH_TABLE_SIGNATURE: u32 = 0xEFFE_EFFE;

/// Leading signature of a C13-format module stream.
pub const CV_SIGNATURE_C13: u32 = 4;

/// Symbol record type: path to the object file name.
pub const S_OBJNAME: u16 = 0x1101;

/// The deterministic replacement for a GUID embedded in a file name. Same length as
/// any brace-wrapped GUID it overwrites.
pub const NULL_GUID_NAME: &[u8; 38] = b"{00000000-0000-0000-0000-000000000000}";

/// The PDB 7.0 header at the start of stream 1.
#[derive(Debug, Clone, Copy)]
pub struct PdbStream70 {
    /// Implementation version number.
    pub version: u32,
    /// Timestamp of when the PDB was created.
    pub timestamp: u32,
    /// Number of times this PDB instance has been updated.
    pub age: u32,
    /// PDB GUID. Must match the PE file's CodeView record.
    pub guid: Guid,
}

impl PdbStream70 {
    /// Size of the header on disk.
    pub const SIZE: usize = 28;
    /// Offset of [`PdbStream70::timestamp`].
    pub const TIMESTAMP_OFFSET: usize = 4;
    /// Offset of [`PdbStream70::age`].
    pub const AGE_OFFSET: usize = 8;
    /// Offset of [`PdbStream70::guid`].
    pub const GUID_OFFSET: usize = 12;

    /// Parses the header from the start of `data`. `None` if too short.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<PdbStream70> {
        if data.len() < Self::SIZE {
            return None;
        }

        let mut guid = [0u8; 16];
        guid.copy_from_slice(&data[Self::GUID_OFFSET..Self::SIZE]);

        Some(PdbStream70 {
            version: read_le(data, 0)?,
            timestamp: read_le(data, Self::TIMESTAMP_OFFSET)?,
            age: read_le(data, Self::AGE_OFFSET)?,
            guid: Guid::from_bytes(guid),
        })
    }
}

bitflags! {
    /// The DBI header flags word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DbiFlags: u16 {
        /// Linked incrementally (ilink thunks are present).
        const INC_LINK = 1 << 0;
        /// Private data stripped out.
        const STRIPPED = 1 << 1;
        /// Using CTypes.
        const CTYPES = 1 << 2;
    }
}

/// The Debug Information stream (DBI) header, followed in order by the module info,
/// section contribution, section map, file info, type server map, EC info and debug
/// header substreams, whose sizes it records.
#[derive(Debug, Clone, Copy)]
pub struct DbiHeader {
    /// Must equal [`DBI_SIGNATURE`].
    pub signature: u32,
    /// Must equal [`DBI_VERSION_V70`].
    pub version: u32,
    /// Update counter; must match the age in the PDB header stream.
    pub age: u32,
    /// The global symbols info (GSI) stream.
    pub global_symbol_stream: u16,
    /// The public symbols info (PSI) stream.
    pub public_symbol_stream: u16,
    /// Stream number of the symbol records.
    pub symbol_records_stream: u16,
    /// Size of the module info substream.
    pub mod_info_size: u32,
    /// Size of the section contribution substream.
    pub section_contribution_size: u32,
    /// Size of the section map substream.
    pub section_map_size: u32,
    /// Size of the file info substream.
    pub file_info_size: u32,
    /// Size of the type server map substream.
    pub type_server_map_size: u32,
    /// Size of the EC info substream.
    pub ec_info_size: u32,
    /// Size of the debug header appended at the end of the stream.
    pub debug_header_size: u32,
    /// Header flags.
    pub flags: DbiFlags,
    /// Machine type.
    pub machine: u16,
}

impl DbiHeader {
    /// Size of the header on disk (padded to 64 bytes for future growth).
    pub const SIZE: usize = 64;
    /// Offset of [`DbiHeader::age`].
    pub const AGE_OFFSET: usize = 8;

    /// Parses the header from the start of `data`. `None` if too short.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<DbiHeader> {
        if data.len() < Self::SIZE {
            return None;
        }

        let mut parser = Parser::new(data);
        let signature = parser.read_le::<u32>()?;
        let version = parser.read_le::<u32>()?;
        let age = parser.read_le::<u32>()?;
        let global_symbol_stream = parser.read_le::<u16>()?;
        let _pdb_dll_version = parser.read_le::<u16>()?;
        let public_symbol_stream = parser.read_le::<u16>()?;
        let _pdb_dll_build_major = parser.read_le::<u16>()?;
        let symbol_records_stream = parser.read_le::<u16>()?;
        let _pdb_dll_build_minor = parser.read_le::<u16>()?;
        let mod_info_size = parser.read_le::<u32>()?;
        let section_contribution_size = parser.read_le::<u32>()?;
        let section_map_size = parser.read_le::<u32>()?;
        let file_info_size = parser.read_le::<u32>()?;
        let type_server_map_size = parser.read_le::<u32>()?;
        let _mfc_index = parser.read_le::<u32>()?;
        let debug_header_size = parser.read_le::<u32>()?;
        let ec_info_size = parser.read_le::<u32>()?;
        let flags = DbiFlags::from_bits_truncate(parser.read_le::<u16>()?);
        let machine = parser.read_le::<u16>()?;

        Some(DbiHeader {
            signature,
            version,
            age,
            global_symbol_stream,
            public_symbol_stream,
            symbol_records_stream,
            mod_info_size,
            section_contribution_size,
            section_map_size,
            file_info_size,
            type_server_map_size,
            ec_info_size,
            debug_header_size,
            flags,
            machine,
        })
    }
}

/// Section contribution entry layout.
///
/// Two padding fields exist purely because of struct alignment in Microsoft's
/// implementation; they are written to disk without ever being initialised and so
/// carry stack garbage.
pub struct SectionContribution;

impl SectionContribution {
    /// Size of one entry on disk.
    pub const SIZE: usize = 28;
    /// Offset of the first alignment padding field.
    pub const PADDING1_OFFSET: usize = 2;
    /// Offset of the second alignment padding field.
    pub const PADDING2_OFFSET: usize = 18;
}

/// Module info entry layout: 64 fixed bytes, then the NUL-terminated module name and
/// object file name, padded to a 4-byte boundary.
pub struct ModuleInfo;

impl ModuleInfo {
    /// Size of the fixed part of an entry.
    pub const SIZE: usize = 64;
    /// Offset of the embedded section contribution's first padding field.
    pub const SC_PADDING1_OFFSET: usize = 4 + SectionContribution::PADDING1_OFFSET;
    /// Offset of the embedded section contribution's second padding field.
    pub const SC_PADDING2_OFFSET: usize = 4 + SectionContribution::PADDING2_OFFSET;
    /// Offset of the module's debug info stream number.
    pub const STREAM_OFFSET: usize = 34;
    /// Offset of the `offsets` scratch field. Microsoft's DBI writer serialises the
    /// memory address of an allocated array here; it is never read back.
    pub const OFFSETS_OFFSET: usize = 52;
    /// Offset of the names blob.
    pub const NAMES_OFFSET: usize = 64;

    /// The module name of the linker-generated manifest resource entry, the one
    /// module whose stream embeds a GUID-bearing path.
    pub const LINKER_MANIFEST_NAME: &'static [u8] = b"* Linker Generated Manifest RES *";
}

/// Symbol record layout: `(u16 length, u16 type, u8 data[length - 2])`.
///
/// `length` excludes its own field, so a whole record spans `length + 2` bytes and
/// that total must be a multiple of 4.
pub struct SymbolRecord;

impl SymbolRecord {
    /// Size of the record header.
    pub const SIZE: usize = 4;
}

/// Public symbol info stream header layout.
///
/// `padding1` is alignment garbage; `section_count` is a field Microsoft's writer
/// forgets to initialise on some code paths, so it also leaks garbage.
pub struct PublicSymbolHeader;

impl PublicSymbolHeader {
    /// Size of the header on disk.
    pub const SIZE: usize = 28;
    /// Offset of the alignment padding field.
    pub const PADDING1_OFFSET: usize = 18;
    /// Offset of the sometimes-uninitialised section count.
    pub const SECTION_COUNT_OFFSET: usize = 24;
}

/// The `/LinkInfo` stream header: the linker command line description.
///
/// `size` covers the header plus its string data; anything in the stream past
/// `size` bytes is garbage.
pub struct LinkInfo;

impl LinkInfo {
    /// Size of the fixed header.
    pub const SIZE: usize = 24;
    /// Offset of the `size` field.
    pub const SIZE_OFFSET: usize = 0;
}

/// The header present at the start of string tables (`/names`).
pub struct StringTableHeader;

impl StringTableHeader {
    /// Size of the fixed header; the string blob follows.
    pub const SIZE: usize = 12;
    /// Offset of the signature field.
    pub const SIGNATURE_OFFSET: usize = 0;
    /// Offset of the version field.
    pub const VERSION_OFFSET: usize = 4;
    /// Offset of the string data size field.
    pub const STRINGS_SIZE_OFFSET: usize = 8;
}

/// The file info substream header. Skipped when walking: it does not always carry
/// correct counts, so the module count from the module info walk is used instead.
pub struct FileInfoHeader;

impl FileInfoHeader {
    /// Size of the header on disk.
    pub const SIZE: usize = 4;
}

/// The `OBJNAMESYM` record layout inside a module stream.
pub struct ObjNameSym;

impl ObjNameSym {
    /// Offset of the signature field from the record start.
    pub const SIGNATURE_OFFSET: usize = 4;
    /// Offset of the NUL-terminated path from the record start.
    pub const NAME_OFFSET: usize = 8;
}
