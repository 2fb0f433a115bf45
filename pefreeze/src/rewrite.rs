//! The driver: sequences one `(image, pdb?)` rewrite.
//!
//! In order:
//!
//! 1. Map the image and parse its headers. Since no file sizes change, patching a
//!    shared mapping in place beats copying the file through memory.
//! 2. Enumerate patch locations without writing anything; a parse failure part-way
//!    through must not leave a half-patched image.
//! 3. Sort the patches and compute the gap checksum, which becomes the
//!    deterministic PDB signature on both sides of the pairing.
//! 4. Rewrite the PDB into `<pdb>.tmp`.
//! 5. Apply the image patches, then rename the temp PDB over the original. The
//!    rename is the single commit point: any failure before it leaves the original
//!    PDB untouched on disk.
//! 6. Opportunistically rewrite the signature copy in the `.ilk`.
//!
//! Re-running the tool on its own output is a no-op: every patch compares current
//! bytes first and the signature is a function of only the unpatched regions.

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use uguid::Guid;

use crate::{
    file::{self, FileMap},
    ilk,
    msf::MsfFile,
    patches::PatchSet,
    pdb,
    pe::{CodeViewInfo, PeFile, PDB_SIGNATURE_LABEL, REPRO_TIMESTAMP},
    Result,
};

/// Rewrites `image_path` (and `pdb_path`, when given) to be byte-for-byte
/// reproducible.
///
/// With `dry_run` set, everything is computed and reported but nothing is written:
/// the image stays untouched and the temporary PDB is deleted instead of renamed
/// into place.
///
/// # Errors
/// Returns [`crate::Error::InvalidImage`], [`crate::Error::InvalidMsf`] or
/// [`crate::Error::InvalidPdb`] for malformed inputs or a PE/PDB pair that does not
/// belong together, and [`crate::Error::FileError`] for I/O failures. On error the
/// PDB on disk is always left in its original state.
///
/// # Examples
///
/// ```rust,no_run
/// use std::path::Path;
///
/// pefreeze::patch_image(Path::new("app.exe"), Some(Path::new("app.pdb")), false)?;
/// # Ok::<(), pefreeze::Error>(())
/// ```
pub fn patch_image(image_path: &Path, pdb_path: Option<&Path>, dry_run: bool) -> Result<()> {
    let mut image = FileMap::open(image_path)?;

    let (patches, codeview, signature) = {
        let data = image.data();
        let pe = PeFile::parse(data)?;

        let mut patches = PatchSet::new();
        let codeview = pe.collect_patches(&mut patches)?;
        patches.sort();

        // The checksum is stored as the PDB signature. It hashes only the regions
        // between the patches, so it is already the value the image will have once
        // they are applied.
        let signature = patches.gap_checksum(data);
        if codeview.is_some() {
            patches.set_bytes(PDB_SIGNATURE_LABEL, &signature);
        }

        (patches, codeview, signature)
    };

    log::debug!("deterministic PDB signature: {}", Guid::from_bytes(signature));

    // The PDB temp file must be complete before the first byte of the image
    // changes, so a PDB-side failure aborts with both files intact.
    let temp_pdb = match pdb_path {
        Some(pdb_path) => Some(write_patched_pdb(
            pdb_path,
            codeview.as_ref(),
            Guid::from_bytes(signature),
        )?),
        None => None,
    };

    patches.apply(image.data_mut(), dry_run);

    if let (Some(temp), Some(pdb_path)) = (temp_pdb, pdb_path) {
        if dry_run {
            fs::remove_file(&temp)?;
        } else if let Err(error) = file::replace_file(&temp, pdb_path) {
            let _ = fs::remove_file(&temp);
            return Err(error);
        }
    }

    // Without this, the next incremental link would fail on a signature mismatch.
    if let Some(cv) = &codeview {
        ilk::patch_ilk(image_path, &cv.signature.to_bytes(), &signature, dry_run);
    }

    Ok(())
}

/// Rewrites the PDB into `<pdb>.tmp` and returns that path. The temp file is
/// removed again if anything fails after it was created.
fn write_patched_pdb(
    pdb_path: &Path,
    codeview: Option<&CodeViewInfo>,
    signature: Guid,
) -> Result<PathBuf> {
    let mut msf = MsfFile::open(fs::File::open(pdb_path)?)?;
    pdb::patch_pdb(&mut msf, codeview, REPRO_TIMESTAMP, signature)?;

    let temp_path = temp_pdb_path(pdb_path);
    let result = fs::File::create(&temp_path)
        .map_err(Into::into)
        .and_then(|mut temp| msf.write(&mut temp));

    if let Err(error) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(error);
    }

    Ok(temp_path)
}

/// `<pdb>.tmp`, next to the original so the final rename stays on one filesystem.
fn temp_pdb_path(pdb_path: &Path) -> PathBuf {
    let mut path = OsString::from(pdb_path.as_os_str());
    path.push(".tmp");
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_appends_suffix() {
        assert_eq!(
            temp_pdb_path(Path::new("out/app.pdb")),
            PathBuf::from("out/app.pdb.tmp")
        );
    }
}
