//! The DBI (Debug Information) stream walk.
//!
//! The DBI stream is a fixed header followed, in order, by the module info, section
//! contribution, section map, file info, type server map, EC info and debug header
//! substreams. Three of them leak non-determinism and get patched here:
//!
//! - module info entries carry alignment padding and a scratch field holding the
//!   memory address of an allocated array,
//! - section contribution entries carry the same alignment padding,
//! - file info names can embed temp-file GUIDs.
//!
//! The walk also locates the linker-generated manifest module and hands its stream
//! to [`crate::pdb::symbols::patch_module_stream`].

use crate::{
    file::{
        io::{read_le, write_le},
        Parser,
    },
    msf::{MemoryStream, MsfFile},
    pdb::{
        format::{
            DbiFlags, DbiHeader, FileInfoHeader, ModuleInfo, SectionContribution, DBI_SIGNATURE,
            DBI_VERSION_V70, SECTION_CONTRIB_V1, SECTION_CONTRIB_V2,
        },
        names::normalize_guid,
        symbols::patch_module_stream,
    },
    Result,
};

/// Patches the DBI stream in place and returns its parsed header, which the caller
/// needs to locate the symbol-records and public-symbol streams.
///
/// # Errors
/// Returns [`crate::Error::InvalidPdb`] for a bad signature or version, or any
/// substream that does not fit its recorded size.
pub fn patch_dbi_stream(msf: &mut MsfFile, stream: &mut MemoryStream) -> Result<DbiHeader> {
    if stream.len() < DbiHeader::SIZE {
        return Err(invalid_pdb!("DBI stream too short"));
    }

    let data = stream.data_mut();
    let length = data.len();

    let header = DbiHeader::parse(data).ok_or_else(|| invalid_pdb!("DBI stream too short"))?;

    if header.signature != DBI_SIGNATURE {
        return Err(invalid_pdb!("invalid DBI header signature"));
    }

    if header.version != DBI_VERSION_V70 {
        return Err(invalid_pdb!("Unsupported DBI stream version"));
    }

    if header.flags.contains(DbiFlags::INC_LINK) {
        log::warn!(
            "/INCREMENTAL was specified in the linker options. Incrementally linked \
             images are not expected to become reproducible."
        );
    }

    // The age must match the age in the PDB header stream.
    let _ = write_le::<u32>(data, DbiHeader::AGE_OFFSET, 1);

    let mut offset = DbiHeader::SIZE;

    let mod_info_size = header.mod_info_size as usize;
    if offset + mod_info_size > length {
        return Err(invalid_pdb!("DBI module info size exceeds stream length"));
    }

    let module_count = patch_module_info(msf, data, offset, mod_info_size)?;
    offset += mod_info_size;

    let contribution_size = header.section_contribution_size as usize;
    if offset + contribution_size > length {
        return Err(invalid_pdb!(
            "DBI section contributions size exceeds stream length"
        ));
    }
    patch_section_contributions(data, offset, contribution_size)?;
    offset += contribution_size;

    // The section map holds nothing volatile.
    offset += header.section_map_size as usize;

    let file_info_size = header.file_info_size as usize;
    if file_info_size > 0 {
        if offset + file_info_size > length {
            return Err(invalid_pdb!("Missing file info in DBI stream"));
        }
        patch_file_info(&mut data[offset..offset + file_info_size], module_count)?;
    }

    // Type server map, EC info and the debug header pass through unchanged.

    Ok(header)
}

/// Walks the module info substream: zeroes the garbage fields of every entry, and
/// patches the stream of the linker-generated manifest module when it appears.
/// Returns the number of modules walked; the file info substream needs it.
fn patch_module_info(
    msf: &mut MsfFile,
    data: &mut [u8],
    offset: usize,
    size: usize,
) -> Result<usize> {
    let mut module_count = 0;
    let mut i = 0;

    while i < size {
        if size - i < ModuleInfo::SIZE {
            return Err(invalid_pdb!("got partial DBI module info"));
        }

        let base = offset + i;

        // Alignment garbage in the embedded section contribution, plus the scratch
        // field where the producer serialises a heap address.
        let _ = write_le::<u16>(data, base + ModuleInfo::SC_PADDING1_OFFSET, 0);
        let _ = write_le::<u16>(data, base + ModuleInfo::SC_PADDING2_OFFSET, 0);
        let _ = write_le::<u32>(data, base + ModuleInfo::OFFSETS_OFFSET, 0);

        // Both names are NUL-terminated and must land inside the substream.
        let mut names = Parser::new(&data[base + ModuleInfo::NAMES_OFFSET..offset + size]);
        let module_name = names
            .read_cstr()
            .ok_or_else(|| invalid_pdb!("got partial DBI module info"))?;
        let object_name = names
            .read_cstr()
            .ok_or_else(|| invalid_pdb!("got partial DBI module info"))?;
        let names_len = names.pos();

        // One entry contains a path with a GUID in its module stream. It is usually
        // the first entry, but finding it by name is safer.
        let is_manifest =
            module_name == ModuleInfo::LINKER_MANIFEST_NAME && object_name.is_empty();
        if is_manifest {
            let module_stream = read_le::<u16>(data, base + ModuleInfo::STREAM_OFFSET)
                .ok_or_else(|| invalid_pdb!("got partial DBI module info"))?;

            if let Some(view) = msf.stream_mut(module_stream as usize) {
                let mut stream = view.materialize()?;
                patch_module_stream(&mut stream)?;
                msf.replace_stream(module_stream as usize, Some(stream));
            }
        }

        // Entries are padded to a 4-byte boundary past both names.
        i += (ModuleInfo::SIZE + names_len + 3) & !3;
        module_count += 1;
    }

    Ok(module_count)
}

/// Zeroes the alignment padding of every section contribution entry. The
/// contributions substream opens with a version word; entries follow.
fn patch_section_contributions(data: &mut [u8], offset: usize, size: usize) -> Result<()> {
    if size == 0 {
        return Ok(());
    }

    let version: u32 = read_le(data, offset)
        .ok_or_else(|| invalid_pdb!("got invalid section contribution substream version"))?;
    if version != SECTION_CONTRIB_V1 && version != SECTION_CONTRIB_V2 {
        return Err(invalid_pdb!(
            "got invalid section contribution substream version"
        ));
    }

    let count = (size - 4) / SectionContribution::SIZE;
    for i in 0..count {
        let base = offset + 4 + i * SectionContribution::SIZE;
        let _ = write_le::<u16>(data, base + SectionContribution::PADDING1_OFFSET, 0);
        let _ = write_le::<u16>(data, base + SectionContribution::PADDING2_OFFSET, 0);
    }

    Ok(())
}

/// Normalises GUIDs in the file info substream's name blob.
///
/// The substream header does not always carry correct counts, so it is skipped and
/// the module count observed during the module info walk is used: two parallel
/// `u16` arrays of that length (file indices, file counts), then the offsets array
/// whose length is the sum of the counts, then the names.
fn patch_file_info(sub: &mut [u8], module_count: usize) -> Result<()> {
    let length = sub.len();
    let mut p = FileInfoHeader::SIZE;

    // File indices are not needed.
    p += module_count * 2;

    let counts_start = p;
    p += module_count * 2;
    if p >= length {
        return Err(invalid_pdb!("got partial file info in DBI stream"));
    }

    let mut offset_count: usize = 0;
    for i in 0..module_count {
        let count: u16 = read_le(sub, counts_start + i * 2)
            .ok_or_else(|| invalid_pdb!("got partial file info in DBI stream"))?;
        offset_count += count as usize;
    }

    let offsets_start = p;
    p += offset_count * 4;
    if p >= length {
        return Err(invalid_pdb!("got partial file info in DBI stream"));
    }

    let names_start = p;

    for i in 0..offset_count {
        let offset = read_le::<u32>(sub, offsets_start + i * 4)
            .ok_or_else(|| invalid_pdb!("got partial file info in DBI stream"))?
            as usize;

        let name_start = names_start
            .checked_add(offset)
            .filter(|&start| start < length)
            .ok_or_else(|| invalid_pdb!("invalid offset for file info name"))?;

        let name_len = sub[name_start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid_pdb!("file name exceeds file info section size"))?;

        normalize_guid(&mut sub[name_start..name_start + name_len]);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdb::format::{CV_SIGNATURE_C13, NULL_GUID_NAME, S_OBJNAME};
    use crate::pdb::test_support::{module_info_entry, FakeMsf};

    fn dbi_with(
        modules: &[(&[u8], &[u8], u16)],
        contributions: usize,
        file_names: &[&[u8]],
    ) -> Vec<u8> {
        let mut mod_info = Vec::new();
        for &(module, object, stream) in modules {
            mod_info.extend(module_info_entry(module, object, stream));
        }

        let mut contrib = Vec::new();
        if contributions > 0 {
            contrib.extend_from_slice(&SECTION_CONTRIB_V1.to_le_bytes());
            for _ in 0..contributions {
                contrib.extend_from_slice(&[0xEE; SectionContribution::SIZE]);
            }
        }

        // One file per module, then names.
        let mut file_info = Vec::new();
        if !file_names.is_empty() {
            assert_eq!(file_names.len(), modules.len());
            file_info.extend_from_slice(&[0u8; FileInfoHeader::SIZE]);
            for i in 0..modules.len() {
                file_info.extend_from_slice(&(i as u16).to_le_bytes());
            }
            for _ in 0..modules.len() {
                file_info.extend_from_slice(&1u16.to_le_bytes());
            }
            let mut names = Vec::new();
            for name in file_names {
                file_info.extend_from_slice(&(names.len() as u32).to_le_bytes());
                names.extend_from_slice(name);
                names.push(0);
            }
            file_info.extend_from_slice(&names);
        }

        let mut data = vec![0u8; DbiHeader::SIZE];
        data[0..4].copy_from_slice(&DBI_SIGNATURE.to_le_bytes());
        data[4..8].copy_from_slice(&DBI_VERSION_V70.to_le_bytes());
        data[8..12].copy_from_slice(&9u32.to_le_bytes()); // age
        data[24..28].copy_from_slice(&(mod_info.len() as u32).to_le_bytes());
        data[28..32].copy_from_slice(&(contrib.len() as u32).to_le_bytes());
        data[36..40].copy_from_slice(&(file_info.len() as u32).to_le_bytes());

        data.extend(mod_info);
        data.extend(contrib);
        data.extend(file_info);
        data
    }

    #[test]
    fn patches_age_padding_and_file_names() {
        let data = dbi_with(
            &[(b"a.obj", b"a.obj", 11), (b"b.obj", b"b.obj", 12)],
            2,
            &[
                b"c:\\x\\{12345678-90AB-CDEF-1234-567890ABCDEF}\\y.res",
                b"plain.cpp",
            ],
        );

        let mut msf = FakeMsf::empty(4);
        let mut stream = MemoryStream::new(data);
        let header = patch_dbi_stream(&mut msf.0, &mut stream).unwrap();

        assert_eq!(header.mod_info_size as usize % 4, 0);

        let out = stream.data();
        assert_eq!(read_le::<u32>(out, DbiHeader::AGE_OFFSET), Some(1));

        // First module entry: paddings and scratch field zeroed.
        let base = DbiHeader::SIZE;
        assert_eq!(read_le::<u16>(out, base + ModuleInfo::SC_PADDING1_OFFSET), Some(0));
        assert_eq!(read_le::<u16>(out, base + ModuleInfo::SC_PADDING2_OFFSET), Some(0));
        assert_eq!(read_le::<u32>(out, base + ModuleInfo::OFFSETS_OFFSET), Some(0));

        // Section contributions: paddings zeroed, the rest untouched.
        let contrib = DbiHeader::SIZE + header.mod_info_size as usize + 4;
        for i in 0..2 {
            let entry = contrib + i * SectionContribution::SIZE;
            assert_eq!(
                read_le::<u16>(out, entry + SectionContribution::PADDING1_OFFSET),
                Some(0)
            );
            assert_eq!(
                read_le::<u16>(out, entry + SectionContribution::PADDING2_OFFSET),
                Some(0)
            );
            assert_eq!(read_le::<u16>(out, entry), Some(0xEEEE));
        }

        // File info name GUID normalised.
        let window = out.windows(38).any(|w| w == &NULL_GUID_NAME[..]);
        assert!(window, "file info GUID should have been normalised");
    }

    #[test]
    fn manifest_module_stream_is_patched() {
        let mut manifest_stream = Vec::new();
        manifest_stream.extend_from_slice(&CV_SIGNATURE_C13.to_le_bytes());
        let path = b"p\\{AAAAAAAA-0000-0000-0000-000000000000}\\m.res\0\0";
        manifest_stream.extend_from_slice(&((4 + path.len() + 2) as u16).to_le_bytes());
        manifest_stream.extend_from_slice(&S_OBJNAME.to_le_bytes());
        manifest_stream.extend_from_slice(&0u32.to_le_bytes());
        manifest_stream.extend_from_slice(path);

        let mut msf = FakeMsf::with_stream(5, 4, manifest_stream);

        let data = dbi_with(
            &[(ModuleInfo::LINKER_MANIFEST_NAME, b"", 4)],
            0,
            &[],
        );
        let mut stream = MemoryStream::new(data);
        patch_dbi_stream(&mut msf.0, &mut stream).unwrap();

        let patched = msf.stream_data(4);
        assert!(
            patched
                .windows(38)
                .any(|window| window == &NULL_GUID_NAME[..]),
            "manifest module GUID should have been normalised"
        );
    }

    #[test]
    fn rejects_wrong_signature() {
        let mut data = dbi_with(&[], 0, &[]);
        data[0] = 0;
        let mut msf = FakeMsf::empty(1);
        let mut stream = MemoryStream::new(data);

        let error = patch_dbi_stream(&mut msf.0, &mut stream).unwrap_err();
        assert_eq!(error.to_string(), "Invalid PDB (invalid DBI header signature)");
    }

    #[test]
    fn rejects_wrong_version() {
        let mut data = dbi_with(&[], 0, &[]);
        data[4..8].copy_from_slice(&19960307u32.to_le_bytes());
        let mut msf = FakeMsf::empty(1);
        let mut stream = MemoryStream::new(data);

        let error = patch_dbi_stream(&mut msf.0, &mut stream).unwrap_err();
        assert_eq!(error.to_string(), "Invalid PDB (Unsupported DBI stream version)");
    }

    #[test]
    fn rejects_oversized_module_info() {
        let mut data = dbi_with(&[(b"a", b"", 0)], 0, &[]);
        data[24..28].copy_from_slice(&0xFFFFu32.to_le_bytes());
        let mut msf = FakeMsf::empty(1);
        let mut stream = MemoryStream::new(data);

        let error = patch_dbi_stream(&mut msf.0, &mut stream).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid PDB (DBI module info size exceeds stream length)"
        );
    }

    #[test]
    fn rejects_bad_contribution_version() {
        let mut data = dbi_with(&[], 1, &[]);
        let contrib = DbiHeader::SIZE;
        data[contrib..contrib + 4].copy_from_slice(&1u32.to_le_bytes());
        let mut msf = FakeMsf::empty(1);
        let mut stream = MemoryStream::new(data);

        let error = patch_dbi_stream(&mut msf.0, &mut stream).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid PDB (got invalid section contribution substream version)"
        );
    }
}
