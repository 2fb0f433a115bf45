#![deny(missing_docs)]

//! # pefreeze
//!
//! A library for making Windows PE/PE+ executables and their PDB debug databases
//! **byte-for-byte reproducible**: two otherwise-identical builds of the same source
//! produce identical output files after a pass through this tool.
//!
//! Linkers embed wall-clock timestamps, memory addresses, uninitialised struct
//! padding and randomly generated GUIDs throughout both file formats. `pefreeze`
//! rewrites those fields with deterministic substitutes while preserving every
//! relationship the loader, the debugger and the incremental linker depend on, in
//! particular the `(GUID, age)` pairing between an image's CodeView record and its
//! PDB.
//!
//! # Architecture
//!
//! - [`crate::pe`] - parses the PE/PE+ header chain and enumerates the
//!   non-deterministic fields into a [`crate::patches::PatchSet`].
//! - [`crate::patches`] - deferred in-place patches, plus the MD5 *gap checksum*
//!   over the unpatched regions that serves as the deterministic PDB signature.
//! - [`crate::msf`] - the MultiStream File container engine: reads the
//!   page-indirected container every PDB lives in, and writes a fresh one with a
//!   rebuilt stream table and free page map.
//! - [`crate::pdb`] - walks the versioned PDB substreams (header, DBI, symbol
//!   records, public symbols, `/names`, `/LinkInfo`, module streams) and normalises
//!   every known source of non-determinism. Unknown streams pass through unchanged.
//! - [`patch_image`] - the driver sequencing one `(image, pdb?)` invocation with a
//!   single commit point.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! // Rewrite an image and its PDB in place.
//! pefreeze::patch_image(Path::new("app.exe"), Some(Path::new("app.pdb")), false)?;
//!
//! // Report what would change without writing anything.
//! pefreeze::patch_image(Path::new("app.exe"), None, true)?;
//! # Ok::<(), pefreeze::Error>(())
//! ```
//!
//! Running the tool on its own output changes nothing; determinism is the whole
//! point, and idempotence falls out of it.
//!
//! # What gets rewritten
//!
//! | Location | Field | Replacement |
//! |---|---|---|
//! | `IMAGE_FILE_HEADER` | `TimeDateStamp` | fixed epoch ([`pe::REPRO_TIMESTAMP`]) |
//! | Optional header | `CheckSum` | fixed epoch |
//! | Export / resource / debug directories | `TimeDateStamp` | fixed epoch |
//! | CodeView record | `Signature`, `Age` | gap checksum, 1 |
//! | PDB header stream | timestamp, age, GUID | fixed epoch, 1, gap checksum |
//! | DBI stream | age, struct padding, scratch fields | 1, zeros |
//! | Symbol records | trailing padding | zeros |
//! | `/names`, file info, manifest module | temp-path GUIDs, offset order | null GUID, sorted |
//! | `.ilk` | stored signature copy | gap checksum |
//!
//! # Limitations
//!
//! Only MSF 7.00 containers are understood (no PDB 2.0), TPI/IPI type streams pass
//! through untouched, and nothing here loads or relocates the image. Rewrites of
//! the same file pair are not safe to run concurrently.
//!
//! # Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Parsing fails fast on the
//! first inconsistency; the PDB on disk is never clobbered by a failed run, because
//! the rewritten PDB is renamed into place only after everything else succeeded.

#[macro_use]
mod error;

mod ilk;
mod rewrite;

pub mod file;
pub mod msf;
pub mod patches;
pub mod pdb;
pub mod pe;

pub use error::Error;
pub use rewrite::patch_image;

/// Convenience alias for this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
