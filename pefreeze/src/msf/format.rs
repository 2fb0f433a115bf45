//! MSF 7.00 on-disk layout.
//!
//! At a high level, the MSF format implements *streams*: standalone byte sequences
//! embedded in one file, each made of pages that can live anywhere in the file and in
//! any order. PDBs use it so the toolchain gets a single sidecar file on disk and can
//! commit updates atomically, like a tiny database.
//!
//! The first page holds the [`MsfHeader`] and the page list of the *stream table*
//! stream, which in turn lists every stream's size and pages. The stream table is
//! itself a stream, hence the extra level of indirection in the header.

use crate::{
    file::{io::write_le, Parser},
    Result,
};

/// Magic version string in the MSF header.
pub const MSF_MAGIC: [u8; 32] = *b"Microsoft C/C++ MSF 7.00\r\n\x1aDS\0\0\0";

/// Size of the fixed part of the MSF header; the root page list follows it.
pub const MSF_HEADER_SIZE: usize = 52;

/// The page size every produced MSF uses. Readable files may use other powers of two;
/// written files never do.
pub const PAGE_SIZE: usize = 4096;

/// Number of pages required to hold `len` bytes.
#[must_use]
pub fn page_count_for(page_size: usize, len: usize) -> usize {
    len.div_ceil(page_size)
}

/// Returns true if the given page number is reserved for the Free Page Map.
///
/// The FPM is spread across the file at regular intervals: two FPM pages every
/// `page_size` pages, starting at page 1. The pair exists so Microsoft's writer can
/// commit atomically by flipping the header's FPM index between 1 and 2. With a 4096
/// byte page one FPM page already tracks 4096*8 pages, so most of these pages are
/// wasted; that ship sailed with Microsoft's first implementation and every PDB on
/// disk encodes it.
#[must_use]
pub fn is_fpm_page(page: usize, page_size: usize) -> bool {
    matches!(page & (page_size - 1), 1 | 2)
}

/// The fixed MSF header at offset 0.
#[derive(Debug, Clone, Copy)]
pub struct MsfHeader {
    /// Page size. Always a power of 2, usually 4096.
    pub page_size: u32,

    /// Page number of the active free page map (1 or 2).
    pub free_page_map: u32,

    /// Number of pages. The file length must equal `page_size * page_count` exactly.
    pub page_count: u32,

    /// Size of the stream table stream, in bytes.
    pub stream_table_size: u32,

    /// Page number field of the stream table info. Not consulted when reading; the
    /// root page list after the header is what locates the stream table.
    pub stream_table_index: i32,
}

impl MsfHeader {
    /// Parses the header from the start of `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidMsf`] if the data is too short, the magic does
    /// not match, or the page size is not a power of two.
    pub fn parse(data: &[u8]) -> Result<MsfHeader> {
        if data.len() < MSF_HEADER_SIZE {
            return Err(invalid_msf!("Missing MSF header"));
        }

        if data[..32] != MSF_MAGIC {
            return Err(invalid_msf!("Invalid MSF header"));
        }

        let mut parser = Parser::new(data);
        parser.seek(32).ok_or_else(|| invalid_msf!("Missing MSF header"))?;

        let page_size = parser
            .read_le::<u32>()
            .ok_or_else(|| invalid_msf!("Missing MSF header"))?;
        let free_page_map = parser
            .read_le::<u32>()
            .ok_or_else(|| invalid_msf!("Missing MSF header"))?;
        let page_count = parser
            .read_le::<u32>()
            .ok_or_else(|| invalid_msf!("Missing MSF header"))?;
        let stream_table_size = parser
            .read_le::<u32>()
            .ok_or_else(|| invalid_msf!("Missing MSF header"))?;
        let stream_table_index = parser
            .read_le::<i32>()
            .ok_or_else(|| invalid_msf!("Missing MSF header"))?;

        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(invalid_msf!("Invalid MSF header"));
        }

        Ok(MsfHeader {
            page_size,
            free_page_map,
            page_count,
            stream_table_size,
            stream_table_index,
        })
    }

    /// Serialises the header into the first [`MSF_HEADER_SIZE`] bytes of `buf`.
    pub fn write(&self, buf: &mut [u8]) {
        buf[..32].copy_from_slice(&MSF_MAGIC);
        let _ = write_le(buf, 32, self.page_size);
        let _ = write_le(buf, 36, self.free_page_map);
        let _ = write_le(buf, 40, self.page_count);
        let _ = write_le(buf, 44, self.stream_table_size);
        let _ = write_le(buf, 48, self.stream_table_index);
    }
}
