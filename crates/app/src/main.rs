mod toolkit;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pcmscope_core::{
    device::{cpal_backend::EndpointInfo, SimSignal},
    AppConfig, AudioSession, CpalBackend, PcmBackend, SimBackend,
};
use tracing_subscriber::EnvFilter;

use crate::toolkit::HeadlessToolkit;

fn main() -> pcmscope_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Live(args) => run_live(args),
        Commands::Devices => list_devices(),
    }
}

fn run_live(args: LiveArgs) -> pcmscope_core::Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_json_file(path)?,
        None => AppConfig::live_defaults(),
    };
    if let Some(rate) = args.rate {
        config.audio.sample_rate = rate;
    }
    tracing::info!(backend = ?args.backend, config = ?args.config, "starting live mode");

    let backend: Box<dyn PcmBackend> = match args.backend {
        BackendKind::Cpal => Box::new(match args.device {
            Some(name) => CpalBackend::with_device(name),
            None => CpalBackend::new(),
        }),
        BackendKind::Sim => Box::new(
            SimBackend::new()
                .realtime(true)
                .record_writes(false)
                .with_signal(SimSignal::Sine {
                    hz: 440.0,
                    amplitude: 4_000,
                }),
        ),
    };

    let period = config.audio.update_period();
    let mut session = AudioSession::start(backend.as_ref(), config)?;
    tracing::info!(
        "keys: 1-9, 0, - hold tones; p pauses; click X Y marks; q quits"
    );

    let events = toolkit::spawn_stdin_reader()?;
    let mut toolkit = HeadlessToolkit::new(args.width, args.height);
    toolkit.run(&mut session, period, &events);

    session.shutdown()
}

fn list_devices() -> pcmscope_core::Result<()> {
    let endpoints = CpalBackend::list_endpoints()?;
    if endpoints.is_empty() {
        println!("no audio devices found");
    }

    for EndpointInfo {
        name,
        direction,
        is_default,
    } in endpoints
    {
        let marker = if is_default { "*" } else { " " };
        println!("{marker} {direction:<8} {name}");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio oscilloscope, spectrum view and tone generator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture, visualise and play tones until `q` is entered.
    Live(LiveArgs),
    /// List capture and playback devices of the default host.
    Devices,
}

#[derive(clap::Args, Debug)]
struct LiveArgs {
    /// Audio backend to use.
    #[arg(short, long, value_enum, default_value_t = BackendKind::Cpal)]
    backend: BackendKind,
    /// Device name for both directions (cpal backend only).
    #[arg(short, long)]
    device: Option<String>,
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Requested sample rate in Hz, overriding the configuration.
    #[arg(short, long)]
    rate: Option<u32>,
    /// Canvas width in pixels.
    #[arg(long, default_value_t = 800)]
    width: i32,
    /// Canvas height in pixels.
    #[arg(long, default_value_t = 600)]
    height: i32,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BackendKind {
    /// Host audio devices.
    Cpal,
    /// Built-in simulated devices with a test tone.
    Sim,
}
