//! Patchers for the named streams (`/names`, `/LinkInfo`) and GUID normalisation.
//!
//! Temporary files created during linking carry randomly generated GUIDs in their
//! paths, and those paths end up in several PDB substreams. [`normalize_guid`]
//! rewrites such a GUID to the all-zero GUID in place; since the replacement has the
//! exact same length, surrounding data is untouched.

use crate::{
    file::io::{read_le, write_le},
    msf::MemoryStream,
    pdb::format::{LinkInfo, StringTableHeader, HASH_TABLE_SIGNATURE, NULL_GUID_NAME},
    Result,
};

/// Overwrites the first `{8-4-4-4-12}` hex GUID found in `name` with the null GUID.
///
/// The pattern is fixed-width (38 bytes), so a simple scan suffices. Only the first
/// occurrence is rewritten; linker-generated temp paths carry exactly one.
pub fn normalize_guid(name: &mut [u8]) {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

    let len = NULL_GUID_NAME.len();
    if name.len() < len {
        return;
    }

    'scan: for start in 0..=name.len() - len {
        if name[start] != b'{' || name[start + len - 1] != b'}' {
            continue;
        }

        let mut pos = start + 1;
        for (i, &group) in GROUPS.iter().enumerate() {
            if !name[pos..pos + group].iter().all(u8::is_ascii_hexdigit) {
                continue 'scan;
            }
            pos += group;

            if i + 1 < GROUPS.len() {
                if name[pos] != b'-' {
                    continue 'scan;
                }
                pos += 1;
            }
        }

        name[start..start + len].copy_from_slice(NULL_GUID_NAME);
        return;
    }
}

/// Patches the `/LinkInfo` stream.
///
/// The on-disk `size` field is the true length; the rest of the stream appears to be
/// garbage and is truncated away.
///
/// # Errors
/// Returns [`crate::Error::InvalidPdb`] for a header that is cut short or a size
/// larger than the stream.
pub fn patch_link_info_stream(stream: &mut MemoryStream) -> Result<()> {
    let length = stream.len();
    if length == 0 {
        return Ok(());
    }

    if length < LinkInfo::SIZE {
        return Err(invalid_pdb!("got partial LinkInfo stream"));
    }

    let size: u32 = read_le(stream.data(), LinkInfo::SIZE_OFFSET)
        .ok_or_else(|| invalid_pdb!("got partial LinkInfo stream"))?;

    if size as usize > length {
        return Err(invalid_pdb!("LinkInfo size too large for stream"));
    }

    stream.resize(size as usize);
    Ok(())
}

/// Patches the `/names` stream.
///
/// Two sources of non-determinism live here: the trailing offsets array is emitted
/// in nondeterministic order by the producer (it gets sorted), and the file names
/// the offsets point into may carry temp-file GUIDs (they get normalised).
///
/// # Errors
/// Returns [`crate::Error::InvalidPdb`] for a bad signature or version, or any
/// truncated table piece.
pub fn patch_names_stream(stream: &mut MemoryStream) -> Result<()> {
    let data = stream.data_mut();

    if data.len() < StringTableHeader::SIZE {
        return Err(invalid_pdb!("missing string table header"));
    }

    let signature: u32 = read_le(data, StringTableHeader::SIGNATURE_OFFSET)
        .ok_or_else(|| invalid_pdb!("missing string table header"))?;
    if signature != HASH_TABLE_SIGNATURE {
        return Err(invalid_pdb!("got invalid string table signature"));
    }

    let version: u32 = read_le(data, StringTableHeader::VERSION_OFFSET)
        .ok_or_else(|| invalid_pdb!("missing string table header"))?;
    if version != 1 && version != 2 {
        return Err(invalid_pdb!(
            "got invalid or unsupported string table version"
        ));
    }

    let strings_size = read_le::<u32>(data, StringTableHeader::STRINGS_SIZE_OFFSET)
        .ok_or_else(|| invalid_pdb!("missing string table header"))?
        as usize;

    let strings_start = StringTableHeader::SIZE;
    let strings_end = strings_start
        .checked_add(strings_size)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| invalid_pdb!("got partial string table data"))?;

    let count_offset = strings_end;
    let offsets_start = count_offset + 4;
    let offsets_count = read_le::<u32>(data, count_offset)
        .ok_or_else(|| invalid_pdb!("missing string table offset array length"))?
        as usize;

    let offsets_end = offsets_count
        .checked_mul(4)
        .and_then(|bytes| offsets_start.checked_add(bytes))
        .filter(|&end| end <= data.len())
        .ok_or_else(|| invalid_pdb!("got partial string table offsets array"))?;

    // Sort the offsets; some non-determinism creeps into their order in the
    // producer even for identical string sets.
    let mut offsets: Vec<u32> = data[offsets_start..offsets_end]
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    offsets.sort_unstable();

    for (i, &offset) in offsets.iter().enumerate() {
        let _ = write_le(data, offsets_start + i * 4, offset);
    }

    for &offset in &offsets {
        let offset = offset as usize;
        if offset == 0 {
            continue;
        }

        if offset >= strings_size {
            return Err(invalid_pdb!("got invalid offset into string table"));
        }

        let string_start = strings_start + offset;
        let string_len = data[string_start..strings_end]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid_pdb!("got invalid offset into string table"))?;

        normalize_guid(&mut data[string_start..string_start + string_len]);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_a_guid_in_place() {
        let mut name = b"C:\\tmp\\{12345678-90AB-CDEF-1234-567890ABCDEF}\\foo.obj".to_vec();
        normalize_guid(&mut name);
        assert_eq!(
            name,
            b"C:\\tmp\\{00000000-0000-0000-0000-000000000000}\\foo.obj"
        );
    }

    #[test]
    fn leaves_non_guids_alone() {
        let cases: &[&[u8]] = &[
            b"no guid here at all, not even close to one.......",
            b"{12345678-90AB-CDEF-1234-567890ABCDE}",  // group too short
            b"{12345678+90AB-CDEF-1234-567890ABCDEF}", // wrong separator
            b"{1234567G-90AB-CDEF-1234-567890ABCDEF}", // not hex
            b"{1234}",
        ];

        for case in cases {
            let mut name = case.to_vec();
            normalize_guid(&mut name);
            assert_eq!(&name, case);
        }
    }

    #[test]
    fn normalizes_only_the_first_guid() {
        let mut name =
            b"{AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE}{AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE}"
                .to_vec();
        normalize_guid(&mut name);
        assert_eq!(
            name,
            b"{00000000-0000-0000-0000-000000000000}{AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE}"
                .to_vec()
        );
    }

    #[test]
    fn link_info_truncates_trailing_garbage() {
        let mut data = vec![0u8; 64];
        data[0..4].copy_from_slice(&40u32.to_le_bytes());
        let mut stream = MemoryStream::new(data);

        patch_link_info_stream(&mut stream).unwrap();
        assert_eq!(stream.len(), 40);
    }

    #[test]
    fn link_info_empty_stream_is_fine() {
        let mut stream = MemoryStream::new(Vec::new());
        patch_link_info_stream(&mut stream).unwrap();
        assert_eq!(stream.len(), 0);
    }

    #[test]
    fn link_info_rejects_oversized_size() {
        let mut data = vec![0u8; 32];
        data[0..4].copy_from_slice(&100u32.to_le_bytes());
        let mut stream = MemoryStream::new(data);

        let error = patch_link_info_stream(&mut stream).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid PDB (LinkInfo size too large for stream)"
        );
    }

    fn names_stream(strings: &[u8], offsets: &[u32]) -> MemoryStream {
        let mut data = Vec::new();
        data.extend_from_slice(&HASH_TABLE_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&(strings.len() as u32).to_le_bytes());
        data.extend_from_slice(strings);
        data.extend_from_slice(&(offsets.len() as u32).to_le_bytes());
        for &offset in offsets {
            data.extend_from_slice(&offset.to_le_bytes());
        }
        MemoryStream::new(data)
    }

    #[test]
    fn names_offsets_get_sorted_and_guids_cleared() {
        let mut strings = vec![0u8];
        let first = strings.len() as u32;
        strings.extend_from_slice(b"plain.obj\0");
        let second = strings.len() as u32;
        strings.extend_from_slice(b"x\\{12345678-90AB-CDEF-1234-567890ABCDEF}\\a.obj\0");

        let mut stream = names_stream(&strings, &[second, 0, first]);
        patch_names_stream(&mut stream).unwrap();

        let data = stream.data();
        let offsets_start = StringTableHeader::SIZE + strings.len() + 4;
        let sorted: Vec<u32> = data[offsets_start..offsets_start + 12]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        assert_eq!(sorted, vec![0, first, second]);

        let patched = &data[StringTableHeader::SIZE + second as usize..];
        assert!(patched.starts_with(b"x\\{00000000-0000-0000-0000-000000000000}\\a.obj"));
    }

    #[test]
    fn names_rejects_bad_signature() {
        let mut stream = names_stream(b"\0", &[0]);
        stream.data_mut()[0] = 0;

        let error = patch_names_stream(&mut stream).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid PDB (got invalid string table signature)"
        );
    }

    #[test]
    fn names_rejects_bad_version() {
        let mut stream = names_stream(b"\0", &[0]);
        stream.data_mut()[4] = 3;

        assert!(patch_names_stream(&mut stream).is_err());
    }

    #[test]
    fn names_rejects_offset_past_strings() {
        let mut stream = names_stream(b"\0ab\0", &[100]);
        let error = patch_names_stream(&mut stream).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid PDB (got invalid offset into string table)"
        );
    }
}
