use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, DecodeModeCli, DecompileCommand, OutputModeCli, TopLevel};

mod cli;

fn write_output(path: &Path, text: &str) -> std::io::Result<()> {
    if path == Path::new("-") {
        print!("{text}");
        Ok(())
    } else {
        std::fs::write(path, text)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Some(TopLevel::Decompile { command }) => match command {
            DecompileCommand::File {
                path,
                mode,
                decode,
                mark_guesses,
                output,
            } => {
                let mode = match mode {
                    OutputModeCli::Text => desir_lib::OutputMode::Text,
                    OutputModeCli::Cfg => desir_lib::OutputMode::Cfg,
                    OutputModeCli::Yaml => desir_lib::OutputMode::Yaml,
                };
                let decode = match decode {
                    DecodeModeCli::WholeFile => desir_lib::DecodeMode::WholeFile,
                    DecodeModeCli::PerFunction => desir_lib::DecodeMode::PerFunction,
                };
                let options = desir_lib::DecompileOptions {
                    mode,
                    decode,
                    mark_guesses,
                };
                let bytes = match std::fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::error!("failed to read {path:?}: {e}");
                        return ExitCode::FAILURE;
                    }
                };
                let rendered = desir_lib::decompile_image(&bytes, options)
                    .and_then(|d| Ok((d.output_file_name(mode), desir_lib::render_with_options(&d, options)?)));
                let (default_name, text) = match rendered {
                    Ok(v) => v,
                    Err(e) => {
                        log::error!("decompile error: {e}");
                        return ExitCode::FAILURE;
                    }
                };
                let out_path = output.unwrap_or_else(|| PathBuf::from(default_name));
                if let Err(e) = write_output(&out_path, &text) {
                    log::error!("failed to write {out_path:?}: {e}");
                    return ExitCode::FAILURE;
                }
                if out_path != Path::new("-") {
                    log::info!("wrote {}", out_path.display());
                }
            }
        },
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                log::error!("{e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
