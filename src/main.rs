use std::io::IsTerminal;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use iotawatt_access::data::store::default_file_name;
use iotawatt_access::device::{StatusType, WindowProgress};
use iotawatt_access::timestamp::timestamp_to_string;
use iotawatt_access::{table, Config, FetchOptions, IotaWattClient};
use tracing::{debug, info, warn};

/// IoTaWatt Access - Query status and download recorded data from an IoTaWatt
#[derive(Parser)]
#[command(name = "iotawatt")]
#[command(version)]
#[command(about = "IoTaWatt Access - Query status and download recorded data from an IoTaWatt", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show device status
    Status {
        /// Status section: inputs, outputs, wifi, stats, datalogs
        #[arg(short = 't', long = "type", default_value = "inputs")]
        stype: StatusType,
    },
    /// List device channels
    Channels,
    /// Download recorded data and save it in the data store
    Download {
        /// Start date/time (e.g. "2024-01-02 00:00")
        #[arg(short, long)]
        begin: String,

        /// End date/time
        #[arg(short, long)]
        end: String,

        /// Comma separated current/power channels (default: all)
        #[arg(long, value_delimiter = ',')]
        channels: Option<Vec<String>>,

        /// Sampling interval in seconds (multiple of 5)
        #[arg(short, long, default_value_t = 5)]
        interval: i64,

        /// Fractional digits of downloaded values
        #[arg(short, long, default_value_t = 3)]
        digits: u32,

        /// Interpret begin/end as UTC instead of local time
        #[arg(long)]
        utc: bool,

        /// Output file (default: derived from begin/end, inside the data path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn describe_window(progress: &WindowProgress, utc: bool) -> String {
    let fmt = |ts: i64| timestamp_to_string(ts, utc, true).unwrap_or_else(|_| ts.to_string());
    format!(
        "{} .. {} ({:.0}%)",
        fmt(progress.window.start),
        fmt(progress.window.end),
        100.0 * progress.fraction()
    )
}

/// Steps of the download progress bar
const PROGRESS_STEPS: u64 = 1000;

fn download_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(PROGRESS_STEPS);
    if std::io::stderr().is_terminal() {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
    } else {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    pb
}

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration first (to get log level)
    let config = Config::load(&cli.config)?;

    // Initialize tracing with log level from config
    let app_log_level = config.default.log_level.as_str();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("iotawatt_access={}", app_log_level).parse()?)
                .add_directive(format!("iotawatt={}", app_log_level).parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .init();

    info!("Log level: {}", config.default.log_level);
    debug!("Configuration: {:?}", config);

    let mut client = IotaWattClient::new(&config.device)?;

    match cli.command {
        Command::Status { stype } => {
            let status = client.status(stype)?;
            print!("{}", table::value_to_table(&status));
        }
        Command::Channels => {
            let channels = client.channels();
            println!("Voltage: {}", channels.voltage.join(", "));
            println!("Current/power: {}", channels.current.join(", "));
            println!("Outputs: {}", channels.output.join(", "));
        }
        Command::Download {
            begin,
            end,
            channels,
            interval,
            digits,
            utc,
            output,
        } => {
            // Stop between windows on Ctrl-C
            let stop = Arc::new(AtomicBool::new(false));
            let handler_stop = stop.clone();
            ctrlc::set_handler(move || {
                warn!("Interrupt received, stopping after the current window");
                handler_stop.store(true, Ordering::SeqCst);
            })?;

            let options = FetchOptions {
                channels,
                interval,
                frac_digits: digits,
                retry: config.device.retry,
                utc,
            };
            let pb = download_progress_bar();
            let fetched = client.channel_data_with_progress(&begin, &end, &options, |progress| {
                let position = progress.fraction() * PROGRESS_STEPS as f64;
                pb.set_position(position as u64);
                pb.set_message(describe_window(progress, utc));
                debug!("Downloading {}", describe_window(progress, utc));
                if stop.load(Ordering::SeqCst) {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            });
            let dataset = match fetched {
                Ok(dataset) => {
                    pb.finish_and_clear();
                    dataset
                }
                Err(e) => {
                    pb.abandon();
                    return Err(e.into());
                }
            };

            let path = output.unwrap_or_else(|| {
                config
                    .storage
                    .resolved_data_path()
                    .join(default_file_name(&dataset))
            });
            dataset.save(&path)?;
            println!("{} rows saved to {}", dataset.len(), path.display());
        }
    }

    Ok(())
}
