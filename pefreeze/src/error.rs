use thiserror::Error;

macro_rules! invalid_image {
    ($msg:expr) => {
        crate::Error::InvalidImage($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidImage(format!($fmt, $($arg)*))
    };
}

macro_rules! invalid_msf {
    ($msg:expr) => {
        crate::Error::InvalidMsf($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidMsf(format!($fmt, $($arg)*))
    };
}

macro_rules! invalid_pdb {
    ($msg:expr) => {
        crate::Error::InvalidPdb($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidPdb(format!($fmt, $($arg)*))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Three of the variants correspond to the three file formats the rewriter touches; each
/// carries a short human-readable cause. I/O errors from the filesystem are surfaced
/// unchanged through [`Error::FileError`].
///
/// No error is recovered inside the library. Every parsing function fails fast on the
/// first inconsistency and the failure propagates to the driver, which aborts the run
/// with the original PDB untouched on disk.
#[derive(Error, Debug)]
pub enum Error {
    /// The PE image is malformed or uses an unsupported variant.
    #[error("Invalid image ({0})")]
    InvalidImage(String),

    /// The MSF container is malformed.
    #[error("Invalid MSF ({0})")]
    InvalidMsf(String),

    /// A PDB substream is malformed, or the PDB does not belong to the PE being patched.
    #[error("Invalid PDB ({0})")]
    InvalidPdb(String),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations
    /// such as reading from disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}
