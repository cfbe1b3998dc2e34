//! AVD Converter CLI
//!
//! - `info` (default): log every file found in the import directory
//! - `convert`: temperature-gated batch conversion
//! - `config`: print the effective configuration

use anyhow::{Context, Result};
use clap::Parser;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use avd_converter::capabilities::CapabilityDetector;
use avd_converter::cli::{Cli, Commands, ConvertArgs};
use avd_converter::discovery;
use avd_converter::logging::{self, StructuredSink, TracingSink};
use avd_converter::{ConvertSession, ConverterConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConverterConfig::load(&cli.env_file)
        .with_context(|| format!("Failed to load configuration from {}", cli.env_file.display()))?;

    let command = cli.subcommand_or_default();
    if let Commands::Config = command {
        print!("{}", config.to_toml().context("Failed to render configuration")?);
        return Ok(());
    }

    logging::init(&config.log_file, &config.info_log_file, &cli.log_level)
        .context("Failed to initialize logging")?;

    let code = match command {
        Commands::Info => run_info(&config),
        Commands::Convert(args) => run_convert(config, args).await?,
        Commands::Config => 0,
    };

    if code != 0 {
        process::exit(code);
    }
    Ok(())
}

fn run_info(config: &ConverterConfig) -> i32 {
    let sink = TracingSink::main();
    let info_sink = TracingSink::info();
    info_sink.emit(avd_converter::LogRecord::info("Running info command..."));

    for capability in CapabilityDetector::detect_all(&config.ffmpeg_bin, config.telemetry_source) {
        match (&capability.location, &capability.reason) {
            (_, Some(reason)) => println!("{:?}: unavailable ({})", capability.capability_type, reason),
            (Some(location), None) => {
                println!("{:?}: {}", capability.capability_type, location.display())
            }
            (None, None) => println!("{:?}: available", capability.capability_type),
        }
    }

    let count = discovery::report_inventory(&config.import_dir, &sink, &info_sink);
    println!(
        "Info command finished: {} file(s) in {}. Check the info log for details.",
        count,
        config.import_dir.display()
    );
    0
}

async fn run_convert(mut config: ConverterConfig, args: ConvertArgs) -> Result<i32> {
    if let Some(secs) = args.poll_interval {
        config.poll_interval_secs = secs;
        config.validate().context("Invalid --poll-interval")?;
    }

    let transcoding = CapabilityDetector::detect_transcoding(&config.ffmpeg_bin);
    if !transcoding.available {
        warn!(
            "{}; every conversion will fail",
            transcoding.reason.unwrap_or_default()
        );
    }

    info!(
        "Starting conversion: {} -> {} (limits CPU {} / GPU {}, every {:?})",
        config.import_dir.display(),
        config.export_dir.display(),
        config.max_cpu_temp,
        config.max_gpu_temp,
        Duration::from_secs(config.poll_interval_secs)
    );

    let sink: Arc<dyn StructuredSink> = Arc::new(TracingSink::main());
    let report = ConvertSession::new(config, args.transform_options(), sink)
        .run()
        .await
        .context("Conversion session failed")?;

    let result = &report.result;
    println!("{}", result.summary());

    if let Some(path) = &args.report {
        let json = result.to_report_json().context("Failed to serialize report")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    Ok(result.exit_code())
}
