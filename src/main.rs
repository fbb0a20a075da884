use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sharespeed::config::Config;
use sharespeed::drain::{AddressRange, CandidateSet, DrainBarrier};
use sharespeed::report::{self, format_elapsed};
use sharespeed::sample::RunMode;
use sharespeed::unc::UncPath;

#[derive(Parser)]
#[command(
    name = "sharespeed",
    about = "Cold/warm file-share throughput tester",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $SHARESPEED_CONFIG, then ./sharespeed.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure every configured target: cold and warm, for every pass
    Run {
        /// Override the configured number of passes
        #[arg(long)]
        passes: Option<u32>,

        /// Override the pause between probe pairs, in seconds
        #[arg(long)]
        delay_secs: Option<u64>,

        /// Skip waiting for SMB sessions to close between phases
        #[arg(long)]
        no_drain: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run a single probe against one target
    Probe {
        /// UNC path, e.g. \\fs01\data
        #[arg(long)]
        target: String,

        /// cold or warm
        #[arg(long, default_value = "cold")]
        mode: RunMode,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Wait until no established session to the candidate addresses remains
    Drain {
        /// Give up after this many seconds (default: drain.timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,

        /// Remote port (default: drain.remote_port)
        #[arg(long)]
        port: Option<u16>,

        /// Extra candidate address, CIDR block or a-b span (repeatable)
        #[arg(long = "address")]
        addresses: Vec<String>,
    },

    /// Fill each target's read pool with random files
    Seed {
        /// Files per target
        #[arg(long, default_value = "1")]
        count: usize,

        /// File size in bytes (default: run.payload_size_bytes)
        #[arg(long)]
        size: Option<u64>,

        /// Back-date files by up to this many hours (default: run.timestamp_jitter_hours)
        #[arg(long)]
        jitter_hours: Option<f64>,
    },

    /// Remove a lock marker left behind by a crashed run on this host
    Unlock,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The configured log level is not known yet; report config loading at
    // the default level through a scoped subscriber.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || {
        Config::load_layered(cli.config.as_deref())
    })?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Dropping the command future on Ctrl-C releases any lock it holds.
    let interrupted = tokio::select! {
        res = dispatch(cli.command, config) => {
            res?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        tracing::warn!("interrupted, run abandoned");
        std::process::exit(130);
    }

    Ok(())
}

async fn dispatch(command: Commands, mut config: Config) -> Result<()> {
    match command {
        Commands::Run {
            passes,
            delay_secs,
            no_drain,
            json,
        } => {
            if let Some(passes) = passes {
                config.run.passes = passes;
            }
            if let Some(delay) = delay_secs {
                config.run.inter_pass_delay_secs = delay;
            }
            if no_drain {
                config.drain.enabled = false;
            }

            let outcome = sharespeed::run_measurement(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.samples)?);
            } else {
                println!("\nsharespeed run {}", outcome.summary.run_id);
                println!(
                    "Source: {}   Elapsed: {}",
                    outcome.summary.source_host,
                    format_elapsed(outcome.summary.elapsed)
                );
                println!("{:-<100}", "");
                for sample in &outcome.samples {
                    println!("{}", report::format_sample(sample));
                }
                println!("{:-<100}", "");
                println!("Samples: {}", outcome.csv_path.display());
                if let Some(path) = &outcome.report_path {
                    println!("Report:  {}", path.display());
                }
            }
        }
        Commands::Probe { target, mode, json } => {
            let sample = sharespeed::probe_once(&config, &target, mode).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sample)?);
            } else {
                println!("{}", report::format_sample(&sample));
            }
        }
        Commands::Drain {
            timeout,
            port,
            addresses,
        } => {
            let ranges = config
                .drain
                .candidate_ranges
                .iter()
                .chain(&addresses)
                .map(|r| r.parse::<AddressRange>())
                .collect::<Result<Vec<_>, _>>()?;
            let mut candidates = CandidateSet::new(ranges);
            if config.drain.resolve_targets {
                let targets = config
                    .run
                    .targets
                    .iter()
                    .map(|t| UncPath::parse(t))
                    .collect::<Result<Vec<_>, _>>()?;
                candidates.resolve_targets(&targets).await;
            }
            if candidates.is_empty() {
                println!("No candidate addresses; nothing to wait for.");
                return Ok(());
            }

            let timeout = Duration::from_secs(timeout.unwrap_or(config.drain.timeout_secs));
            let port = port.unwrap_or(config.drain.remote_port);
            let outcome = DrainBarrier::system()
                .await_drain(timeout, port, &candidates)
                .await;
            if outcome.drained {
                println!("Drained after {:.1}s", outcome.elapsed.as_secs_f64());
            } else {
                println!(
                    "Connections still established after {:.1}s",
                    outcome.elapsed.as_secs_f64()
                );
            }
        }
        Commands::Seed {
            count,
            size,
            jitter_hours,
        } => {
            let size = size.unwrap_or(config.run.payload_size_bytes);
            let jitter = jitter_hours.unwrap_or(config.run.timestamp_jitter_hours);
            let files = sharespeed::seed_read_pools(&config, count, size, jitter).await?;
            for file in &files {
                println!("{}", file.display());
            }
            println!("Seeded {} file(s).", files.len());
        }
        Commands::Unlock => {
            if sharespeed::unlock(&config)? {
                println!("Lock removed.");
            } else {
                println!("No lock held by this host.");
            }
        }
    }

    Ok(())
}
