//! `as7263` command-line entry point.
//!
//! Reads one or more spectra and prints each as a JSON line on stdout. Logs go
//! to stderr, filtered by `RUST_LOG` or, when unset, the configured level.
//!
//! ```bash
//! as7263 --simulate --count 3
//! as7263 --config config/as7263.toml --split
//! AS7263_BUS__MUX_PORT=2 as7263 --print-config
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use as7263::adapters::{RegisterChannel, SimulatedAs7263};
use as7263::config::Settings;
use as7263::As7263;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about = "Read spectra from an AS7263 NIR sensor")]
struct Cli {
    /// Path to the TOML configuration file (skipped if missing)
    #[arg(short, long, default_value = "config/as7263.toml")]
    config: PathBuf,

    /// Use the in-memory simulated sensor instead of the I2C bus
    #[arg(long)]
    simulate: bool,

    /// Number of spectra to read
    #[arg(short = 'n', long, default_value_t = 1)]
    count: u32,

    /// Trigger, sleep through the expected conversion time, then collect
    #[arg(long)]
    split: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Log every virtual-register transaction
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if cli.debug {
        settings.application.debug = true;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.print_config {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    if cli.simulate {
        let sim = SimulatedAs7263::new().with_latency(Duration::from_micros(200));
        run(sim, &settings, &cli).await
    } else {
        run_on_bus(&settings, &cli).await
    }
}

#[cfg(feature = "linux_i2c")]
async fn run_on_bus(settings: &Settings, cli: &Cli) -> Result<()> {
    use as7263::adapters::MuxedI2cChannel;

    let channel = MuxedI2cChannel::open_linux(&settings.bus.device, settings.channel_address())
        .await?;
    run(channel, settings, cli).await
}

#[cfg(not(feature = "linux_i2c"))]
async fn run_on_bus(_settings: &Settings, _cli: &Cli) -> Result<()> {
    anyhow::bail!(
        "built without I2C support; rebuild with `--features linux_i2c` or pass --simulate"
    )
}

async fn run<C: RegisterChannel>(channel: C, settings: &Settings, cli: &Cli) -> Result<()> {
    let mut sensor = As7263::open(channel, settings.device_options()).await?;
    let acquired = acquire(&mut sensor, settings, cli).await;
    let closed = sensor.close().await;

    acquired?;
    closed?;
    Ok(())
}

async fn acquire<C: RegisterChannel>(
    sensor: &mut As7263<C>,
    settings: &Settings,
    cli: &Cli,
) -> Result<()> {
    info!(gain = %sensor.gain().await?, "sensor ready");

    for index in 1..=cli.count {
        let spectrum = if cli.split {
            let latency = sensor.request().await?;
            tokio::time::sleep(latency).await;
            sensor.collect().await?
        } else if let Some(budget) = settings.acquisition_timeout() {
            sensor.acquire_within(budget).await?
        } else {
            sensor.read_all().await?
        };

        info!(
            index,
            count = cli.count,
            temperature_c = spectrum.temperature_c,
            "spectrum acquired"
        );
        println!("{}", serde_json::to_string(&spectrum)?);
    }
    Ok(())
}
