mod app;

use clap::Parser;

use crate::app::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Patch reports go to stderr at info+; --verbose enables debug; RUST_LOG overrides
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    if cli.dry_run {
        log::info!("Dry run: no files will be modified");
    }

    pefreeze::patch_image(&cli.image, cli.pdb.as_deref(), cli.dry_run)?;

    Ok(())
}
