use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_name, crate_version};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputModeCli {
    Text,
    Cfg,
    Yaml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecodeModeCli {
    WholeFile,
    PerFunction,
}

#[derive(Parser)]
#[command(name = crate_name!(),
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Decompiles a SIR script image
    Decompile {
        #[command(subcommand)]
        command: DecompileCommand,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum DecompileCommand {
    /// Decompiles a SIR script image (.fsb)
    File {
        /// Path to the script image
        path: PathBuf,

        /// Output mode
        #[arg(long, value_enum, default_value_t = OutputModeCli::Text)]
        mode: OutputModeCli,

        /// Decode the whole instruction stream, or each entrypoint separately
        #[arg(long, value_enum, default_value_t = DecodeModeCli::WholeFile)]
        decode: DecodeModeCli,

        /// Mark operators whose meaning is a best guess with a trailing '?'
        #[arg(long, default_value_t = false)]
        mark_guesses: bool,

        /// Output file ('-' for stdout). Defaults to the script's own name
        #[arg(short, long)]
        output: Option<PathBuf>,
    }
}
