//! PDB stream patchers.
//!
//! A PDB is an MSF container whose numbered and named streams each leak their own
//! flavour of non-determinism: creation timestamps, random GUIDs, incrementing ages,
//! uninitialised struct padding, heap addresses, and hash-table orderings. This
//! module walks the substreams it understands and normalises every known source;
//! streams it does not understand pass through the rewrite byte-for-byte.
//!
//! # Key Components
//!
//! - [`patch_pdb`] - entry point: discards the old stream table, rewrites the header
//!   stream, and dispatches to the substream patchers.
//! - [`crate::pdb::dbi`] - the DBI stream walk (modules, section contributions,
//!   file info).
//! - [`crate::pdb::symbols`] - symbol records, public symbols, module streams.
//! - [`crate::pdb::names`] - `/names`, `/LinkInfo`, GUID normalisation.
//!
//! The PDB header's `(age, guid)` pair must match the image's CodeView record before
//! anything is touched; patching a PDB that does not belong to the image would break
//! the pairing the debugger relies on.

pub mod format;

mod dbi;
mod names;
mod symbols;

use std::collections::HashMap;

use uguid::Guid;

use crate::{
    file::{io::write_le, Parser},
    msf::{MemoryStream, MsfFile},
    pe::CodeViewInfo,
    pdb::format::{PdbStream70, DBI_STREAM, HEADER_STREAM, PDB_VERSION_VC70, STREAM_TABLE_STREAM},
    Result,
};

/// Rewrites a PDB in place inside its opened container, eliminating
/// non-determinism.
///
/// `timestamp` and `signature` are the deterministic replacements computed by the
/// driver; the signature is the gap checksum of the image, so PE and PDB stay
/// paired after the rewrite.
///
/// # Errors
/// Returns [`crate::Error::InvalidPdb`] if the PDB does not match the image's
/// CodeView record, or any understood substream is malformed.
pub fn patch_pdb(
    msf: &mut MsfFile,
    codeview: Option<&CodeViewInfo>,
    timestamp: u32,
    signature: Guid,
) -> Result<()> {
    // The old stream table is always discarded; the writer builds a new one.
    msf.replace_stream(STREAM_TABLE_STREAM, None);

    let mut header_stream = msf
        .stream_mut(HEADER_STREAM)
        .ok_or_else(|| invalid_pdb!("missing PDB header stream"))?
        .materialize()?;
    patch_header_stream(msf, &mut header_stream, codeview, timestamp, signature)?;
    msf.replace_stream(HEADER_STREAM, Some(header_stream));

    let dbi_stream = match msf.stream_mut(DBI_STREAM) {
        Some(view) => Some(view.materialize()?),
        None => None,
    };

    if let Some(mut dbi_stream) = dbi_stream {
        let dbi_header = dbi::patch_dbi_stream(msf, &mut dbi_stream)?;
        msf.replace_stream(DBI_STREAM, Some(dbi_stream));

        patch_stream_at(
            msf,
            dbi_header.symbol_records_stream,
            symbols::patch_symbol_records_stream,
        )?;
        patch_stream_at(
            msf,
            dbi_header.public_symbol_stream,
            symbols::patch_public_symbol_stream,
        )?;
    }

    Ok(())
}

/// Materialises the stream at `index`, runs `patcher` over it, and swaps the result
/// back in. Absent streams (including the `0xFFFF` "no stream" marker, which is out
/// of range for any real container) are skipped.
fn patch_stream_at(
    msf: &mut MsfFile,
    index: u16,
    patcher: fn(&mut MemoryStream) -> Result<()>,
) -> Result<()> {
    if let Some(view) = msf.stream_mut(index as usize) {
        let mut stream = view.materialize()?;
        patcher(&mut stream)?;
        msf.replace_stream(index as usize, Some(stream));
    }

    Ok(())
}

/// Patches the PDB header stream: timestamp, age and GUID become the deterministic
/// replacements, then the name map table following the header is used to locate and
/// patch the `/LinkInfo` and `/names` streams.
fn patch_header_stream(
    msf: &mut MsfFile,
    stream: &mut MemoryStream,
    codeview: Option<&CodeViewInfo>,
    timestamp: u32,
    signature: Guid,
) -> Result<()> {
    let data = stream.data_mut();

    let header =
        PdbStream70::parse(data).ok_or_else(|| invalid_pdb!("missing PDB 7.0 header"))?;

    if header.version < PDB_VERSION_VC70 {
        return Err(invalid_pdb!("unsupported PDB implementation version"));
    }

    // Check that this PDB actually belongs to the PE file being patched.
    let signatures_match =
        codeview.is_some_and(|cv| cv.age == header.age && cv.signature == header.guid);
    if !signatures_match {
        return Err(invalid_pdb!("PE and PDB signatures do not match"));
    }

    let _ = write_le(data, PdbStream70::TIMESTAMP_OFFSET, timestamp);
    let _ = write_le::<u32>(data, PdbStream70::AGE_OFFSET, 1);
    data[PdbStream70::GUID_OFFSET..PdbStream70::SIZE].copy_from_slice(&signature.to_bytes());

    let table = read_name_map(&data[PdbStream70::SIZE..])?;

    if let Some(&index) = table.get("/LinkInfo") {
        let mut link_info = msf
            .stream_mut(index as usize)
            .ok_or_else(|| invalid_pdb!("missing '/LinkInfo' stream"))?
            .materialize()?;
        names::patch_link_info_stream(&mut link_info)?;
        msf.replace_stream(index as usize, Some(link_info));
    }

    if let Some(&index) = table.get("/names") {
        let mut names_stream = msf
            .stream_mut(index as usize)
            .ok_or_else(|| invalid_pdb!("missing '/names' stream"))?
            .materialize()?;
        names::patch_names_stream(&mut names_stream)?;
        msf.replace_stream(index as usize, Some(names_stream));
    }

    Ok(())
}

/// Reads the name map table that follows the PDB header: a string-keyed map to
/// stream indices.
///
/// Layout: a length-prefixed blob of NUL-terminated strings, the element count and
/// capacity, a `present` bitset, a `deleted` bitset, then `(string offset, stream
/// index)` pairs. The bitsets track which hash-table slots are occupied; the table
/// is reconstructed from the pairs alone, so both bitsets are skipped rather than
/// verified.
///
/// # Errors
/// Returns [`crate::Error::InvalidPdb`] naming the table piece that was truncated.
fn read_name_map(data: &[u8]) -> Result<HashMap<String, u32>> {
    let mut parser = Parser::new(data);

    let strings_size = parser
        .read_le::<u32>()
        .ok_or_else(|| invalid_pdb!("missing PDB name table strings length"))?
        as usize;
    let strings_start = parser.pos();
    parser
        .advance_by(strings_size)
        .ok_or_else(|| invalid_pdb!("missing PDB name table strings data"))?;

    let elem_count = parser
        .read_le::<u32>()
        .ok_or_else(|| invalid_pdb!("missing PDB stream name map sizes"))?;
    let _elem_count_max = parser
        .read_le::<u32>()
        .ok_or_else(|| invalid_pdb!("missing PDB stream name map sizes"))?;

    let present_size = parser
        .read_le::<u32>()
        .ok_or_else(|| invalid_pdb!("missing PDB name table 'present' bitset size"))?
        as usize;
    present_size
        .checked_mul(4)
        .and_then(|bytes| parser.advance_by(bytes))
        .ok_or_else(|| invalid_pdb!("missing PDB name table 'present' bitset data"))?;

    let deleted_size = parser
        .read_le::<u32>()
        .ok_or_else(|| invalid_pdb!("missing PDB name table 'deleted' bitset size"))?
        as usize;
    deleted_size
        .checked_mul(4)
        .and_then(|bytes| parser.advance_by(bytes))
        .ok_or_else(|| invalid_pdb!("missing PDB name table 'deleted' bitset data"))?;

    let mut table = HashMap::with_capacity(elem_count as usize);
    for _ in 0..elem_count {
        let offset = parser
            .read_le::<u32>()
            .ok_or_else(|| invalid_pdb!("missing PDB name table pairs"))?
            as usize;
        let stream = parser
            .read_le::<u32>()
            .ok_or_else(|| invalid_pdb!("missing PDB name table pairs"))?;

        if offset >= strings_size {
            return Err(invalid_pdb!(
                "invalid PDB name table offset into strings buffer"
            ));
        }

        let strings = &data[strings_start..strings_start + strings_size];
        let name_len = strings[offset..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| {
                invalid_pdb!("invalid PDB name table offset into strings buffer")
            })?;

        let name = String::from_utf8_lossy(&strings[offset..offset + name_len]).into_owned();
        table.insert(name, stream);
    }

    Ok(table)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{
        file::io::write_le,
        msf::{MemoryStream, MsfFile, StreamView},
        pdb::format::ModuleInfo,
    };

    /// Builds one module info entry with recognisable garbage in the fields the
    /// patcher is supposed to zero.
    pub(crate) fn module_info_entry(module: &[u8], object: &[u8], stream: u16) -> Vec<u8> {
        let mut entry = vec![0u8; ModuleInfo::SIZE];
        let _ = write_le::<u16>(&mut entry, ModuleInfo::SC_PADDING1_OFFSET, 0xDDDD);
        let _ = write_le::<u16>(&mut entry, ModuleInfo::SC_PADDING2_OFFSET, 0xDDDD);
        let _ = write_le::<u32>(&mut entry, ModuleInfo::OFFSETS_OFFSET, 0xDEAD_BEEF);
        let _ = write_le::<u16>(&mut entry, ModuleInfo::STREAM_OFFSET, stream);

        entry.extend_from_slice(module);
        entry.push(0);
        entry.extend_from_slice(object);
        entry.push(0);
        while entry.len() % 4 != 0 {
            entry.push(0);
        }

        entry
    }

    /// An in-memory MSF container for exercising the patchers without a file.
    pub(crate) struct FakeMsf(pub MsfFile);

    impl FakeMsf {
        pub(crate) fn empty(count: usize) -> FakeMsf {
            let streams = (0..count)
                .map(|_| Some(StreamView::Memory(MemoryStream::new(Vec::new()))))
                .collect();
            FakeMsf(MsfFile::from_streams(streams))
        }

        pub(crate) fn with_stream(count: usize, index: usize, data: Vec<u8>) -> FakeMsf {
            let mut fake = FakeMsf::empty(count);
            fake.0.replace_stream(index, Some(MemoryStream::new(data)));
            fake
        }

        pub(crate) fn stream_data(&mut self, index: usize) -> Vec<u8> {
            self.0
                .stream_mut(index)
                .unwrap()
                .materialize()
                .unwrap()
                .data()
                .to_vec()
        }
    }
}
