//! Incremental link database (`.ilk`) signature rewrite.
//!
//! The linker keeps a copy of the PDB signature inside the `.ilk` file it writes
//! next to the image. After the image and PDB are given their deterministic
//! signature, the copy in the `.ilk` would no longer match and the next incremental
//! link would fail; so the helper rewrites the first occurrence opportunistically.
//! The format is otherwise opaque and a missing `.ilk` is simply ignored.

use std::path::Path;

use crate::file::FileMap;

/// Rewrites the first occurrence of `old_signature` in the `.ilk` next to
/// `image_path` with `new_signature`.
///
/// The `.ilk` path is derived by replacing the image's extension. The file not
/// existing (or not being mappable at all) is not an error; an image without
/// incremental link state is the common case.
pub fn patch_ilk(
    image_path: &Path,
    old_signature: &[u8; 16],
    new_signature: &[u8; 16],
    dry_run: bool,
) {
    let ilk_path = image_path.with_extension("ilk");

    let Ok(mut ilk) = FileMap::open(&ilk_path) else {
        return;
    };

    let data = ilk.data_mut();
    let Some(position) = data
        .windows(old_signature.len())
        .position(|window| window == old_signature)
    else {
        return;
    };

    log::info!("Replacing old PDB signature in ILK file");

    if !dry_run {
        data[position..position + new_signature.len()].copy_from_slice(new_signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const OLD: [u8; 16] = [0xAB; 16];
    const NEW: [u8; 16] = *b"0123456789ABCDEF";

    #[test]
    fn replaces_first_occurrence_only() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("app.exe");

        let mut contents = vec![0u8; 8];
        contents.extend_from_slice(&OLD);
        contents.extend_from_slice(b"middle");
        contents.extend_from_slice(&OLD);
        fs::write(dir.path().join("app.ilk"), &contents).unwrap();

        patch_ilk(&image, &OLD, &NEW, false);

        let patched = fs::read(dir.path().join("app.ilk")).unwrap();
        assert_eq!(&patched[8..24], &NEW);
        assert_eq!(&patched[30..46], &OLD);
    }

    #[test]
    fn missing_ilk_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        patch_ilk(&dir.path().join("app.exe"), &OLD, &NEW, false);
    }

    #[test]
    fn dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("app.exe");

        let mut contents = vec![0u8; 4];
        contents.extend_from_slice(&OLD);
        fs::write(dir.path().join("app.ilk"), &contents).unwrap();

        patch_ilk(&image, &OLD, &NEW, true);

        assert_eq!(fs::read(dir.path().join("app.ilk")).unwrap(), contents);
    }

    #[test]
    fn absent_signature_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("app.exe");

        let contents = vec![0x11u8; 64];
        fs::write(dir.path().join("app.ilk"), &contents).unwrap();

        patch_ilk(&image, &OLD, &NEW, false);

        assert_eq!(fs::read(dir.path().join("app.ilk")).unwrap(), contents);
    }
}
