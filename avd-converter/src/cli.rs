//! Command-line argument model

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::job::TransformOptions;

#[derive(Debug, Parser)]
#[command(name = "avd-converter")]
#[command(about = "Temperature-aware batch video converter built on ffmpeg", long_about = None)]
#[command(version)]
pub struct Cli {
    /// KEY=VALUE configuration file; process environment overrides it
    #[arg(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// The requested command; `info` when none is given
    pub fn subcommand_or_default(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Info)
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Log name and size of every file in the import directory
    Info,
    /// Convert every file in the import directory while watching temperatures
    Convert(ConvertArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ConvertArgs {
    /// Target video bitrate, e.g. 800k
    #[arg(long)]
    pub bitrate: Option<String>,

    /// Video codec, e.g. libx264
    #[arg(long)]
    pub codec: Option<String>,

    /// Output container (file extension), e.g. mkv
    #[arg(long)]
    pub container: Option<String>,

    /// Strip metadata
    #[arg(long)]
    pub remove_meta: bool,

    /// Drop the audio track
    #[arg(long)]
    pub remove_audio: bool,

    /// Save the audio track to <name>_audio.aac
    #[arg(long)]
    pub extract_audio: bool,

    /// Output resolution, e.g. 1280:720
    #[arg(long)]
    pub resolution: Option<String>,

    /// Rotation in degrees (90, 180, 270)
    #[arg(long)]
    pub orientation: Option<String>,

    /// Output file name template; {name} is replaced by the input base name
    #[arg(long)]
    pub file_mask: Option<String>,

    /// Seconds between temperature checks (overrides POLL_INTERVAL_SECS)
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Write the batch result as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl ConvertArgs {
    pub fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            bitrate: self.bitrate.clone(),
            codec: self.codec.clone(),
            container: self.container.clone(),
            remove_metadata: self.remove_meta,
            remove_audio: self.remove_audio,
            extract_audio: self.extract_audio,
            resolution: self.resolution.clone(),
            orientation: self.orientation.clone(),
            file_mask: self.file_mask.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_info() {
        let cli = Cli::try_parse_from(["avd-converter"]).unwrap();
        assert!(matches!(cli.subcommand_or_default(), Commands::Info));
        assert_eq!(cli.env_file, PathBuf::from(".env"));
    }

    #[test]
    fn test_convert_flags_map_to_options() {
        let cli = Cli::try_parse_from([
            "avd-converter",
            "convert",
            "--bitrate",
            "800k",
            "--container",
            "mkv",
            "--remove-meta",
            "--extract-audio",
            "--orientation",
            "270",
            "--file-mask",
            "{name}_v2",
            "--poll-interval",
            "5",
            "--env-file",
            "custom.env",
        ])
        .unwrap();

        assert_eq!(cli.env_file, PathBuf::from("custom.env"));
        let Commands::Convert(args) = cli.subcommand_or_default() else {
            panic!("expected convert");
        };
        assert_eq!(args.poll_interval, Some(5));

        let options = args.transform_options();
        assert_eq!(options.bitrate.as_deref(), Some("800k"));
        assert_eq!(options.container.as_deref(), Some("mkv"));
        assert!(options.remove_metadata);
        assert!(options.extract_audio);
        assert!(!options.remove_audio);
        assert_eq!(options.orientation.as_deref(), Some("270"));
        assert_eq!(options.file_mask.as_deref(), Some("{name}_v2"));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
