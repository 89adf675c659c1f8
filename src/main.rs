use clap::Parser;
use ftm_multilateration::api::{ApiError, OutputFormat, PositionFormatter, PositioningEngine, SubmitStatus};
use ftm_multilateration::processing::{ReportParser, StopMode};
use ftm_multilateration::utils::SystemConfig;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

/// Multilaterate tag positions from a stream of FTM range reports
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// JSON system configuration (anchors, thresholds, solver tuning)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Range reports, one JSON object per line; stdin when omitted
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output format for the position log: json, csv or text
    #[arg(long, default_value = "json")]
    format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,

    /// Stop without solving sets still queued at end of input
    #[arg(long, default_value_t = false)]
    abandon: bool,

    /// Accept numeric fields given as strings
    #[arg(long, default_value_t = false)]
    lenient: bool,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SystemConfig::from_file(path)?,
        None => SystemConfig::default(),
    };

    if let Some(path) = &args.dump_config {
        config.save_to_file(path)?;
        log::info!("Configuration written to {}", path.display());
        return Ok(());
    }

    let engine = PositioningEngine::new(config)?;
    engine.start()?;

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let parser = if args.lenient { ReportParser::lenient() } else { ReportParser::new() };

    let mut malformed = 0usize;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let measurement = match parser.parse_measurement(&line) {
            Ok(m) => m,
            Err(e) => {
                malformed += 1;
                log::warn!("Skipping line {}: {}", idx + 1, e);
                continue;
            }
        };

        match engine.submit_measurement(measurement) {
            Ok(SubmitStatus::Dropped { sequence }) => {
                log::warn!("Set #{} dropped by the full work queue", sequence)
            }
            Ok(status) => log::debug!("Line {}: {:?}", idx + 1, status),
            Err(e @ ApiError::UnknownAnchor { .. }) => log::warn!("Line {}: {}", idx + 1, e),
            Err(e) => return Err(e.into()),
        }
    }

    let mode = if args.abandon { StopMode::Abandon } else { StopMode::Drain };
    let report = engine.stop(mode)?;
    log::info!(
        "Done: {} solved, {} invalid, {} diverged, {} abandoned, {} malformed line(s)",
        report.solved,
        report.invalid,
        report.diverged,
        report.abandoned,
        malformed
    );

    let mut formatter = PositionFormatter::new().with_format(args.format);
    if args.pretty {
        formatter = formatter.pretty();
    }
    let output = formatter.format_log(&engine.read_log())?;
    print!("{}", output);
    if args.format == OutputFormat::Json {
        println!();
    }

    Ok(())
}
