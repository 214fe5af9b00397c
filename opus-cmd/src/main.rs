mod detect;
mod info;

use std::io::stderr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use opus::{InterferogramMode, TimestampMode};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about an OPUS interferogram file.
    Info {
        /// Input OPUS file
        input: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,

        /// Whether measurement times refer to the start or the end of a scan.
        #[arg(short, long, default_value = "start", value_name = "start|end")]
        timestamp: TimestampMode,

        /// What to do with the interferogram blocks.
        ///
        /// skip never touches the interferogram blocks, validate reads them to make
        /// sure they are complete, and read decodes the samples and shows a summary
        /// of each channel.
        #[arg(
            short,
            long,
            default_value = "read",
            value_name = "skip|validate|read"
        )]
        interferogram: InterferogramMode,

        /// Only read the first channel.
        #[arg(long, action)]
        first_channel_only: bool,
    },
    /// Find corrupt OPUS files in a directory.
    ///
    /// Every regular file in the directory is checked with the OPUS file validator
    /// from the PROFFAST 2 preprocessor. The validator is compiled with gfortran on
    /// first use; its directory must contain the Fortran sources and the manifest
    /// template. Any number of invocations may share a validator directory.
    Detect {
        /// Directory with the files to check
        directory: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,

        /// Compile the validator even if a binary already exists.
        #[arg(long, action)]
        force_recompile: bool,

        /// Validator working directory. Defaults to $OPUS_VALIDATOR_DIR.
        #[arg(long, value_name = "path")]
        validator_dir: Option<PathBuf>,

        /// Fortran compiler used to build the validator. Defaults to
        /// $OPUS_VALIDATOR_COMPILER or gfortran.
        #[arg(long, value_name = "name")]
        compiler: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("OPUS_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Info {
            input,
            format,
            timestamp,
            interferogram,
            first_channel_only,
        } => info::info(
            input,
            format,
            *timestamp,
            *interferogram,
            !first_channel_only,
        ),
        Commands::Detect {
            directory,
            format,
            force_recompile,
            validator_dir,
            compiler,
        } => detect::detect(
            directory,
            format,
            *force_recompile,
            validator_dir.as_deref(),
            compiler.as_deref(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_info_args() {
        let cli = Cli::try_parse_from([
            "opus",
            "info",
            "ma20220409.ifg.0001",
            "--timestamp",
            "end",
            "-i",
            "skip",
            "--first-channel-only",
        ])
        .unwrap();

        match cli.command {
            Commands::Info {
                timestamp,
                interferogram,
                first_channel_only,
                ..
            } => {
                assert_eq!(timestamp, TimestampMode::End);
                assert_eq!(interferogram, InterferogramMode::Skip);
                assert!(first_channel_only);
            }
            Commands::Detect { .. } => panic!("expected info command"),
        }
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let zult = Cli::try_parse_from(["opus", "info", "x", "--interferogram", "load"]);
        assert!(zult.is_err());
    }
}
