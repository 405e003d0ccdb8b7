use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for `kosh`.
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "kosh",
    version,
    about = "A small POSIX-like shell.",
    long_about = None
)]
pub struct Cli {
    /// Run COMMAND instead of reading a script or standard input.
    #[arg(short = 'c', value_name = "COMMAND", conflicts_with = "script")]
    pub command: Option<String>,

    /// Print a prompt before each statement.
    #[arg(short = 'i')]
    pub interactive: bool,

    /// Script file to run.
    #[arg(value_name = "SCRIPT")]
    pub script: Option<PathBuf>,
}
