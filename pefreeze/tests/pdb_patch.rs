//! End-to-end PDB rewriting: a paired synthetic image and PDB run through the
//! whole pipeline, then the rewritten container is reopened and inspected.

mod common;

use std::fs;

use pefreeze::msf::MsfFile;
use tempfile::tempdir;

use common::{
    build_pdb, build_pe64, get_u16, get_u32, pe64_cv_offset, FIXTURE_AGE, FIXTURE_GUID,
    LINK_INFO_SIZE, LINK_INFO_STREAM, MANIFEST_MODULE_STREAM, NAMES_GUID_OFFSET, NAMES_STREAM,
    PUBLIC_SYMBOLS_STREAM, REPRO_TIMESTAMP, SYMBOL_RECORDS_STREAM,
};

const NULL_GUID: &[u8] = b"{00000000-0000-0000-0000-000000000000}";

struct Patched {
    image: Vec<u8>,
    streams: Vec<Vec<u8>>,
}

/// Runs the full pipeline over a fresh fixture pair and returns the patched image
/// plus every stream of the rewritten PDB.
fn run_pipeline() -> Patched {
    let dir = tempdir().unwrap();
    let image_path = dir.path().join("app.exe");
    let pdb_path = dir.path().join("app.pdb");

    fs::write(&image_path, build_pe64(FIXTURE_GUID, FIXTURE_AGE, 1)).unwrap();
    fs::write(&pdb_path, build_pdb(FIXTURE_GUID, FIXTURE_AGE)).unwrap();

    pefreeze::patch_image(&image_path, Some(&pdb_path), false).unwrap();

    assert!(
        !dir.path().join("app.pdb.tmp").exists(),
        "temp PDB must not survive a successful run"
    );

    let mut msf = MsfFile::open(fs::File::open(&pdb_path).unwrap()).unwrap();
    let streams = (0..msf.stream_count())
        .map(|i| match msf.stream_mut(i) {
            Some(view) => view.materialize().unwrap().data().to_vec(),
            None => Vec::new(),
        })
        .collect();

    Patched {
        image: fs::read(&image_path).unwrap(),
        streams,
    }
}

#[test]
fn header_stream_matches_patched_image() {
    let result = run_pipeline();

    let cv = pe64_cv_offset(1);
    let image_signature = &result.image[cv + 4..cv + 20];

    let header = &result.streams[1];
    assert_eq!(get_u32(header, 0), 20000404); // version untouched
    assert_eq!(get_u32(header, 4), REPRO_TIMESTAMP);
    assert_eq!(get_u32(header, 8), 1);
    assert_eq!(&header[12..28], image_signature);
}

#[test]
fn old_stream_table_is_discarded() {
    let result = run_pipeline();
    assert!(result.streams[0].is_empty());
}

#[test]
fn unknown_streams_pass_through() {
    let result = run_pipeline();
    assert_eq!(result.streams[2], vec![0x71; 40]);
    assert_eq!(result.streams[4], vec![0x72; 24]);
}

#[test]
fn dbi_stream_is_normalised() {
    let result = run_pipeline();
    let dbi = &result.streams[3];

    assert_eq!(get_u32(dbi, 8), 1); // age

    // Module entries: paddings and the offsets scratch field zeroed.
    let mod_info_size = get_u32(dbi, 24) as usize;
    let mut entry = 64;
    while entry < 64 + mod_info_size {
        assert_eq!(get_u16(dbi, entry + 6), 0, "sc.padding1 at {entry}");
        assert_eq!(get_u16(dbi, entry + 22), 0, "sc.padding2 at {entry}");
        assert_eq!(get_u32(dbi, entry + 52), 0, "offsets at {entry}");

        let names_start = entry + 64;
        let module_len = dbi[names_start..].iter().position(|&b| b == 0).unwrap();
        let object_len = dbi[names_start + module_len + 1..]
            .iter()
            .position(|&b| b == 0)
            .unwrap();
        entry += (64 + module_len + 1 + object_len + 1 + 3) & !3;
    }

    // Section contributions: paddings zeroed, payload bytes untouched.
    let contrib = 64 + mod_info_size + 4;
    for i in 0..2 {
        let base = contrib + i * 28;
        assert_eq!(get_u16(dbi, base + 2), 0);
        assert_eq!(get_u16(dbi, base + 18), 0);
        assert_eq!(get_u16(dbi, base), 0xEEEE);
    }

    // File info: the GUID-bearing file name was normalised.
    assert!(
        dbi.windows(NULL_GUID.len()).any(|w| w == NULL_GUID),
        "file info GUID not normalised"
    );
    // And the section map between them kept its bytes.
    let section_map = contrib - 4 + get_u32(dbi, 28) as usize;
    assert_eq!(&dbi[section_map..section_map + 8], &[0x5A; 8]);
}

#[test]
fn names_stream_is_sorted_and_normalised() {
    let result = run_pipeline();
    let names = &result.streams[NAMES_STREAM];

    let strings_size = get_u32(names, 8) as usize;
    let offsets_start = 12 + strings_size + 4;
    let offsets: Vec<u32> = names[offsets_start..offsets_start + 12]
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    assert_eq!(offsets, vec![0, 1, NAMES_GUID_OFFSET]);

    let guid_string = &names[12 + NAMES_GUID_OFFSET as usize..];
    assert!(guid_string.starts_with(b"C:\\x\\{00000000-0000-0000-0000-000000000000}\\y.obj"));
}

#[test]
fn link_info_is_truncated_to_its_size() {
    let result = run_pipeline();
    let link_info = &result.streams[LINK_INFO_STREAM];

    assert_eq!(link_info.len(), LINK_INFO_SIZE as usize);
    assert_eq!(get_u32(link_info, 0), LINK_INFO_SIZE);
    assert!(!link_info.contains(&0xEE));
}

#[test]
fn symbol_record_padding_is_zeroed() {
    let result = run_pipeline();
    let records = &result.streams[SYMBOL_RECORDS_STREAM];

    assert!(!records.contains(&0xCC));
    assert!(!records.contains(&0xDD));
    assert!(records.windows(6).any(|w| w == b"alpha\0"));
    assert!(records.windows(5).any(|w| w == b"beta\0"));
}

#[test]
fn public_symbol_header_fields_are_zeroed() {
    let result = run_pipeline();
    let publics = &result.streams[PUBLIC_SYMBOLS_STREAM];

    assert_eq!(get_u16(publics, 18), 0);
    assert_eq!(get_u32(publics, 24), 0);
    // Every other header byte and the trailing GSI data survive.
    assert_eq!(&publics[..18], &[0x21; 18][..]);
    assert_eq!(&publics[20..24], &[0x21; 4][..]);
    assert_eq!(&publics[28..], &[0x42; 12][..]);
}

#[test]
fn manifest_module_guid_is_normalised() {
    let result = run_pipeline();
    let module = &result.streams[MANIFEST_MODULE_STREAM];

    assert!(module.windows(NULL_GUID.len()).any(|w| w == NULL_GUID));
    assert!(module.windows(6).any(|w| w == b"\\m.res"));
}

#[test]
fn whole_pipeline_is_idempotent_and_deterministic() {
    let dir = tempdir().unwrap();
    let image_path = dir.path().join("app.exe");
    let pdb_path = dir.path().join("app.pdb");

    fs::write(&image_path, build_pe64(FIXTURE_GUID, FIXTURE_AGE, 1)).unwrap();
    fs::write(&pdb_path, build_pdb(FIXTURE_GUID, FIXTURE_AGE)).unwrap();

    pefreeze::patch_image(&image_path, Some(&pdb_path), false).unwrap();
    let image_once = fs::read(&image_path).unwrap();
    let pdb_once = fs::read(&pdb_path).unwrap();

    // Second run over the tool's own output: both files byte-identical.
    pefreeze::patch_image(&image_path, Some(&pdb_path), false).unwrap();
    assert_eq!(fs::read(&image_path).unwrap(), image_once);
    assert_eq!(fs::read(&pdb_path).unwrap(), pdb_once);

    // And a separate identical input pair converges to the same bytes.
    let image2 = dir.path().join("b.exe");
    let pdb2 = dir.path().join("b.pdb");
    fs::write(&image2, build_pe64(FIXTURE_GUID, FIXTURE_AGE, 1)).unwrap();
    fs::write(&pdb2, build_pdb(FIXTURE_GUID, FIXTURE_AGE)).unwrap();
    pefreeze::patch_image(&image2, Some(&pdb2), false).unwrap();
    assert_eq!(fs::read(&pdb2).unwrap(), pdb_once);
}

#[test]
fn mismatched_identities_abort_with_both_files_untouched() {
    let dir = tempdir().unwrap();
    let image_path = dir.path().join("app.exe");
    let pdb_path = dir.path().join("app.pdb");

    let image = build_pe64(FIXTURE_GUID, FIXTURE_AGE, 1);
    let pdb = build_pdb([0x99; 16], FIXTURE_AGE); // same age, different GUID
    fs::write(&image_path, &image).unwrap();
    fs::write(&pdb_path, &pdb).unwrap();

    let error = pefreeze::patch_image(&image_path, Some(&pdb_path), false).unwrap_err();
    assert_eq!(
        error.to_string(),
        "Invalid PDB (PE and PDB signatures do not match)"
    );

    assert_eq!(fs::read(&image_path).unwrap(), image);
    assert_eq!(fs::read(&pdb_path).unwrap(), pdb);
    assert!(!dir.path().join("app.pdb.tmp").exists());
}

#[test]
fn dry_run_leaves_every_file_untouched() {
    let dir = tempdir().unwrap();
    let image_path = dir.path().join("app.exe");
    let pdb_path = dir.path().join("app.pdb");

    let image = build_pe64(FIXTURE_GUID, FIXTURE_AGE, 1);
    let pdb = build_pdb(FIXTURE_GUID, FIXTURE_AGE);
    fs::write(&image_path, &image).unwrap();
    fs::write(&pdb_path, &pdb).unwrap();

    pefreeze::patch_image(&image_path, Some(&pdb_path), true).unwrap();

    assert_eq!(fs::read(&image_path).unwrap(), image);
    assert_eq!(fs::read(&pdb_path).unwrap(), pdb);
    assert!(!dir.path().join("app.pdb.tmp").exists());
}
