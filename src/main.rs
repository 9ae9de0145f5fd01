use std::path::PathBuf;
use std::process::ExitCode;

use airwall_bundler::{Collector, Config, Error, run_until_signal};
use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "airwall-bundler",
    about = "Periodically collect diagnostic bundles from Airwall devices",
    version,
    long_about = None
)]
struct Cli {
    /// Path to JSON config file
    #[arg(value_name = "CONFIG", required_unless_present = "config_file")]
    config: Option<PathBuf>,

    /// Path to JSON config file
    #[arg(short = 'c', long = "config-file", value_name = "CONFIG", conflicts_with = "config")]
    config_file: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn config_path(&self) -> Option<&PathBuf> {
        self.config_file.as_ref().or(self.config.as_ref())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<Error>()
                .map(Error::exit_code)
                .unwrap_or(1);
            tracing::error!(error = %format!("{e:#}"), "airwall-bundler stopped");
            eprintln!("ERROR: {e:#}");
            ExitCode::from(code)
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let path = cli
        .config_path()
        .context("a config file is required")?;
    let config = Config::from_file(path)?;
    let collector = Collector::new(config).await?;

    if cli.once {
        let report = collector.run_cycle(&CancellationToken::new()).await?;
        tracing::info!(
            saved = report.saved(),
            failed = report.failed(),
            pruned = report.pruned.len(),
            "Single cycle finished"
        );
        return Ok(());
    }

    run_until_signal(&collector).await?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
