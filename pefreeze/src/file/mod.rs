//! File access primitives shared by the PE rewriter and the ILK helper.
//!
//! # Key Components
//!
//! - [`FileMap`] - A writable memory map of an existing file. The PE image is patched
//!   through this map; changes hit the disk when the map is flushed on drop.
//! - [`replace_file`] - Atomic rename used to commit the rewritten PDB over the
//!   original. The rename is the single commit point of a run.
//! - [`crate::file::Parser`] / [`crate::file::io`] - Bounds-checked binary decoding
//!   used by every parser in the crate.
//!
//! The map is intentionally minimal: the rewriter never changes a file's size, so
//! "give me a writable byte buffer of length N backed by the file" is the whole
//! contract.

pub mod io;
mod parser;

pub use parser::Parser;

use std::{fs, path::Path};

use memmap2::MmapMut;

use crate::Result;

/// A file mapped read-write into memory.
///
/// The mapping is shared, so stores into [`FileMap::data_mut`] reach the file itself.
/// Dirty pages are flushed when the map is dropped; an explicit earlier flush is not
/// needed for correctness, only for error reporting.
///
/// # Examples
///
/// ```rust,no_run
/// use pefreeze::file::FileMap;
/// use std::path::Path;
///
/// let mut map = FileMap::open(Path::new("app.exe"))?;
/// println!("mapped {} bytes", map.len());
/// # Ok::<(), pefreeze::Error>(())
/// ```
#[derive(Debug)]
pub struct FileMap {
    data: MmapMut,
}

impl FileMap {
    /// Map an existing file read-write.
    ///
    /// ## Arguments
    /// * 'path' - The file to map
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened for writing or the mapping fails
    /// (for example, an empty file cannot be mapped on all platforms).
    pub fn open(path: &Path) -> Result<FileMap> {
        let file = fs::OpenOptions::new().read(true).write(true).open(path)?;
        let data = unsafe { MmapMut::map_mut(&file) }?;

        Ok(FileMap { data })
    }

    /// Returns the length of the mapped file in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the mapped file is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the mapped bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the mapped bytes for mutation. Stores are visible in the file once the
    /// map is flushed.
    #[must_use]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for FileMap {
    fn drop(&mut self) {
        // Commit on drop. A failed flush here has no channel to report through; the
        // OS will still write dirty pages back on unmap.
        let _ = self.data.flush();
    }
}

/// Rename `src` over `dest`, replacing it.
///
/// On Unix `rename(2)` already replaces the destination atomically. On Windows the
/// destination has to be removed first.
///
/// # Errors
/// Returns an error if the rename (or, on Windows, the removal) fails.
pub fn replace_file(src: &Path, dest: &Path) -> Result<()> {
    #[cfg(windows)]
    match fs::remove_file(dest) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => return Err(error.into()),
    }

    fs::rename(src, dest)?;
    Ok(())
}
