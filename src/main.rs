//! HAB Logger - High-Altitude Balloon Telemetry Binary
//!
//! Runs the flight logging loop or exercises one sensor at a time on the bench.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use hab_logger::{
    open_barometer, Barometer, Camera, ClimateReading, Dht22, GpsPoller, GpsdClient, Mission,
    MissionConfig, Sampler, SensorReading, SerialGps,
};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "hab_logger")]
#[command(about = "High-altitude balloon telemetry logger")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    long_about = "Logs GPS, temperature, humidity and pressure from a Raspberry Pi balloon payload"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full logging mission (default)
    Run(RunArgs),

    /// Print live DHT22 readings
    Dht(DhtArgs),

    /// Print fixes from gpsd
    Gps(GpsArgs),

    /// Read one fix from the serial NMEA stream
    Nmea(NmeaArgs),

    /// Take one barometer reading
    Baro,

    /// Print the effective configuration as JSON
    Config(RunArgs),
}

#[derive(Args, Default)]
struct RunArgs {
    /// Seconds between telemetry rows
    #[arg(short, long)]
    interval: Option<u64>,

    /// Append rows to this file instead of standard output
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// gpsd address
    #[arg(long)]
    gpsd: Option<String>,

    /// Sea-level reference pressure in hPa
    #[arg(long)]
    sea_level: Option<f64>,

    /// Do not take photos
    #[arg(long)]
    no_photos: bool,
}

#[derive(Args)]
struct DhtArgs {
    /// BCM pin of the data line
    #[arg(short, long)]
    pin: Option<u8>,

    /// Poll from this loop instead of a background thread
    #[arg(long)]
    pull: bool,
}

#[derive(Args)]
struct GpsArgs {
    /// Stop after this many fixes
    #[arg(short = 'n', long)]
    count: Option<usize>,
}

#[derive(Args)]
struct NmeaArgs {
    /// Serial device
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,
}

impl RunArgs {
    /// Flags given on the command line win over the file.
    fn apply(&self, mut config: MissionConfig) -> MissionConfig {
        if let Some(interval) = self.interval {
            config = config.with_log_interval(interval);
        }
        if let Some(output) = &self.output {
            config = config.with_output_path(Some(output.clone()));
        }
        if let Some(gpsd) = &self.gpsd {
            config = config.with_gpsd_address(gpsd.clone());
        }
        if let Some(pressure) = self.sea_level {
            config = config.with_sea_level_pressure(pressure);
        }
        if self.no_photos {
            config = config.with_photos(false);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    init_logging(&cli)?;

    let config = load_config(&cli)?;

    match &cli.command {
        Some(Commands::Run(args)) => run_command(args.apply(config)).await?,
        Some(Commands::Dht(args)) => dht_command(&config, args).await?,
        Some(Commands::Gps(args)) => gps_command(&config, args).await?,
        Some(Commands::Nmea(args)) => nmea_command(&config, args).await?,
        Some(Commands::Baro) => baro_command(&config)?,
        Some(Commands::Config(args)) => {
            let config = args.apply(config);
            config.validate()?;
            println!("{}", config.to_json_pretty()?);
        }
        None => run_command(config).await?,
    }

    Ok(())
}

fn log_level(cli: &Cli) -> Level {
    if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    }
}

/// The flags set the global level; `RUST_LOG` target directives refine it.
fn log_filter(level: Level, directives: &str) -> EnvFilter {
    EnvFilter::builder()
        .parse_lossy(directives)
        .add_directive(LevelFilter::from_level(level).into())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();

    // Standard output may carry the CSV log.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(log_level(cli), &directives))
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<MissionConfig> {
    match &cli.config {
        Some(path) => {
            let config = MissionConfig::from_json_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(MissionConfig::default()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

fn open_sink(config: &MissionConfig) -> anyhow::Result<(Box<dyn Write + Send>, bool)> {
    match &config.output_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let fresh = file.metadata()?.len() == 0;
            info!("Writing telemetry to {}", path.display());
            Ok((Box::new(file), fresh))
        }
        None => Ok((Box::new(io::stdout()), true)),
    }
}

async fn run_command(config: MissionConfig) -> anyhow::Result<()> {
    config.validate()?;
    eprintln!("HAB Logger {}", env!("CARGO_PKG_VERSION"));

    // Any sensor that cannot be initialized aborts the flight before logging starts.
    let dht = Dht22::new(config.dht_pin)?;
    let climate = Sampler::with_interval(dht, config.dht_interval())?.spawn("dht22")?;

    let client = GpsdClient::connect(&config.gpsd_address).await?;
    let gps = GpsPoller::spawn(client, config.gps_poll_delay());

    let barometer = open_barometer(
        config.i2c_bus,
        config.baro_address,
        config.sea_level_pressure_hpa,
    )?;

    let (sink, fresh) = open_sink(&config)?;
    let mut mission = Mission::new(sink, config.log_interval())
        .with_climate(climate.reader())
        .with_gps(gps.reader())
        .with_barometer(Box::new(barometer));
    if !fresh {
        mission = mission.without_header();
    }
    if config.capture_photos {
        mission = mission.with_camera(Camera::new(config.camera.clone()));
    }

    let result = mission.run(shutdown_signal()).await;

    if let Err(e) = gps.stop().await {
        error!("GPS poller: {}", e);
    }
    if let Err(e) = climate.stop() {
        error!("DHT22 sampler: {}", e);
    }

    let rows = result?;
    info!("Mission ended after {} rows", rows);
    Ok(())
}

fn print_climate(reading: &SensorReading<ClimateReading>) {
    println!(
        "{}  {:.1}°C ({:.1}°F)  {:.1}% humidity",
        reading.measured_at.format("%H:%M:%S"),
        reading.fields.temperature_c,
        reading.fields.temperature_f(),
        reading.fields.humidity
    );
}

async fn dht_command(config: &MissionConfig, args: &DhtArgs) -> anyhow::Result<()> {
    let pin = args.pin.unwrap_or(config.dht_pin);
    let interval = config.dht_interval();
    let sampler = Sampler::with_interval(Dht22::new(pin)?, interval)?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    if args.pull {
        info!("Pulling DHT22 readings every {:?}", interval);
        let mut sampler = sampler;
        let mut last = None;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(Duration::from_millis(250)) => {
                    if let Some(reading) = sampler.poll_if_due(interval)? {
                        if last != Some(reading.measured_at) {
                            last = Some(reading.measured_at);
                            print_climate(&reading);
                        }
                    }
                }
            }
        }
        return Ok(());
    }

    let handle = sampler.spawn("dht22")?;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(interval) => {
                if !handle.is_running() {
                    break;
                }
                match handle.latest() {
                    Some(reading) => print_climate(&reading),
                    None => println!("Waiting for first reading..."),
                }
            }
        }
    }
    handle.stop()?;
    Ok(())
}

async fn gps_command(config: &MissionConfig, args: &GpsArgs) -> anyhow::Result<()> {
    let client = GpsdClient::connect(&config.gpsd_address).await?;
    let mut fixes = client.into_stream();
    let limit = args.count.unwrap_or(usize::MAX);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut seen = 0;
    while seen < limit {
        tokio::select! {
            _ = &mut shutdown => break,
            next = fixes.next() => match next {
                Some(fix) => {
                    let fix = fix?;
                    println!("{}", serde_json::to_string(&fix)?);
                    seen += 1;
                }
                None => break,
            },
        }
    }

    Ok(())
}

async fn nmea_command(config: &MissionConfig, args: &NmeaArgs) -> anyhow::Result<()> {
    let mut serial = config.serial_gps.clone();
    if let Some(port) = &args.port {
        serial.path = port.clone();
    }
    if let Some(baud) = args.baud {
        serial.baud_rate = baud;
    }

    let fix = tokio::task::spawn_blocking(move || {
        let mut gps = SerialGps::open(&serial)?;
        gps.read_fix()
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&fix)?);
    Ok(())
}

fn baro_command(config: &MissionConfig) -> anyhow::Result<()> {
    let mut barometer = open_barometer(
        config.i2c_bus,
        config.baro_address,
        config.sea_level_pressure_hpa,
    )?;
    let reading = barometer.read()?;

    println!("Pressure:    {:.2} hPa", reading.pressure_hpa);
    println!("Temperature: {:.2} °C", reading.temperature_c);
    println!("Altitude:    {:.2} m", reading.altitude_m);
    Ok(())
}
