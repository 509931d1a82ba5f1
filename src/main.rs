//! Sense HAT telemetry display
//!
//! Samples the Sense HAT sensors into rolling buffers and shows them on the
//! 8x8 LED matrix, one metric at a time. The joystick flips pages, rotates
//! the display, cycles metrics and turns the screen off; an optional HTTP API
//! does the same remotely.
//!
//! ## Architecture
//! - **Main thread**: the orchestrator loop; owns sensors, store and display
//! - **Joystick thread**: blocking evdev reads, sends input via channel
//! - **HTTP thread** (tokio/axum, optional): status + input via channel
//!
//! ## Rust concepts
//! - `clap` derive for the command line
//! - `std::sync::mpsc` channel between the input threads and the loop
//! - `Box<dyn Trait>` to pick sensors and display at runtime
//!
//! ## Usage
//! ```sh
//! sudo ./target/release/sense-matrix --config settings.toml --port 8080
//! ./target/release/sense-matrix --demo --output none --uploads 5
//! ```

use clap::{Parser, ValueEnum};
use sense_matrix::config::{AppConfig, Overrides, Settings};
use sense_matrix::input::{self, ChannelInput};
use sense_matrix::orchestrator::{DemoOrchestrator, StatusSnapshot};
use sense_matrix::render::{HeadlessDriver, LedDriver, SenseHatFramebuffer};
use sense_matrix::sensors::{IioSensorSource, SensorSource, SyntheticSensorSource};
use sense_matrix::server::{self, AppState};
use sense_matrix::setup_signal_handler;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Output {
    /// The Sense HAT's own 8x8 matrix
    SenseHat,
    /// A HUB75 panel (needs the `hardware` feature)
    Matrix,
    /// No display
    None,
}

/// Sense HAT telemetry on an LED matrix
#[derive(Parser)]
#[command(name = "sense-matrix")]
#[command(about = "Show Sense HAT sensor history on an LED matrix")]
#[command(version)]
struct Args {
    /// Settings file
    #[arg(long, default_value = "settings.toml")]
    config: PathBuf,

    /// Stop after this many uploads
    #[arg(long)]
    uploads: Option<u32>,

    /// Enable the progress page and bar regardless of settings
    #[arg(long)]
    progress: bool,

    /// Start with the LED display off
    #[arg(long)]
    no_led: bool,

    /// Seconds between loop iterations (overrides WAIT)
    #[arg(long)]
    wait: Option<f64>,

    /// Use synthetic sensor data even if sensors are present
    #[arg(long)]
    demo: bool,

    /// Display to draw on
    #[arg(long, value_enum, default_value = "sense-hat")]
    output: Output,

    /// Number of rows on a HUB75 panel
    #[arg(long, default_value = "64")]
    rows: u32,

    /// Number of columns on a HUB75 panel
    #[arg(long, default_value = "64")]
    cols: u32,

    /// Serve the remote-control API on this port
    #[arg(long)]
    port: Option<u16>,

    /// sysfs mount point (for sensors, framebuffer and joystick discovery)
    #[arg(long, default_value = "/sys")]
    sysfs: PathBuf,

    /// Log at debug level
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    tracing::info!("Sense Matrix v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load_or_default(&args.config)?;
    let overrides = Overrides {
        uploads: args.uploads,
        progress: args.progress,
        no_led: args.no_led,
        wait: args.wait,
    };
    let config = AppConfig::from_settings(&settings, &overrides)?;
    tracing::info!(
        "Metrics: {:?}, sleep {}s, uploads every {:?} after {:?}",
        config.metrics,
        config.sleep_secs,
        config.upload_frequency,
        config.upload_delay
    );

    let sensors = open_sensors(&args, &config);
    let driver = open_display(&args)?;
    tracing::info!("Sensors: {}", sensors.describe());
    tracing::info!("Display: {}", driver.describe());

    let running = setup_signal_handler()?;
    let (tx, rx) = mpsc::channel();

    match input::find_joystick(&args.sysfs, Path::new("/dev")) {
        Some(path) => match input::spawn_joystick_reader(&path, tx.clone()) {
            Ok(_) => tracing::info!("Joystick: {}", path.display()),
            Err(e) => tracing::warn!("Joystick {} unavailable: {}", path.display(), e),
        },
        None => tracing::info!("No Sense HAT joystick found"),
    }

    let status = Arc::new(Mutex::new(StatusSnapshot::new()));
    if let Some(port) = args.port {
        let state = AppState {
            input_tx: tx.clone(),
            status: status.clone(),
        };
        server::spawn_server(port, state)?;
    }
    // the loop sees a disconnect once every input thread has gone
    drop(tx);

    let mut orchestrator =
        DemoOrchestrator::new(&config, sensors, driver, ChannelInput::new(rx), Instant::now())
            .with_status(status);
    orchestrator.run(&running)?;

    Ok(())
}

fn open_sensors(args: &Args, config: &AppConfig) -> Box<dyn SensorSource> {
    if args.demo {
        return Box::new(SyntheticSensorSource::from_clock());
    }
    match IioSensorSource::discover(&args.sysfs, &config.metrics) {
        Some(iio) => Box::new(iio),
        None => {
            tracing::warn!("No IIO sensors found, using synthetic data");
            Box::new(SyntheticSensorSource::from_clock())
        }
    }
}

fn open_display(args: &Args) -> Result<Box<dyn LedDriver>, Box<dyn Error>> {
    match args.output {
        Output::SenseHat => Ok(Box::new(SenseHatFramebuffer::discover(
            &args.sysfs,
            Path::new("/dev"),
        )?)),
        Output::Matrix => open_matrix(args),
        Output::None => Ok(Box::new(HeadlessDriver::new())),
    }
}

#[cfg(feature = "hardware")]
fn open_matrix(args: &Args) -> Result<Box<dyn LedDriver>, Box<dyn Error>> {
    use sense_matrix::PanelConfig;
    use sense_matrix::render::MatrixDriver;

    let panel = PanelConfig::new(args.rows, args.cols);
    Ok(Box::new(MatrixDriver::new(panel, 75)?))
}

#[cfg(not(feature = "hardware"))]
fn open_matrix(args: &Args) -> Result<Box<dyn LedDriver>, Box<dyn Error>> {
    Err(format!(
        "a {}x{} HUB75 panel needs the 'hardware' feature (cargo build --features hardware)",
        args.cols, args.rows
    )
    .into())
}
