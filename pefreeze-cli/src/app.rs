use std::path::PathBuf;

use clap::Parser;

/// pefreeze - make PE/PE+ images and PDBs byte-for-byte reproducible
#[derive(Debug, Parser)]
#[command(name = "pefreeze", version, about, long_about = None)]
pub struct Cli {
    /// Path to the PE or PE+ image to rewrite in place.
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Path to the matching PDB. When given, the PDB is rewritten through a
    /// temporary file and renamed into place after the image succeeds.
    #[arg(value_name = "PDB")]
    pub pdb: Option<PathBuf>,

    /// Compute and report every patch without writing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long)]
    pub verbose: bool,
}
