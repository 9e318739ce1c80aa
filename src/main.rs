use std::process::ExitCode;

use clap::Parser;
use paintfe_transform::{cli, i18n, logger};

fn main() -> ExitCode {
    // Initialize session log (overwrites previous session log)
    logger::init();

    // Resolve t!() lookups in the user's language
    i18n::init();
    i18n::set_language(&i18n::detect_system_language());

    let args = cli::CliArgs::parse();
    cli::run(args)
}
