use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use modbus_transport::{TcpBus, TransportError};
use poll_engine::{
    EnvFailurePolicy, GathererConfig, InfluxSink, LogSink, MeasurementSink, MetricsHub,
    OpenWeatherSource, PollLoop,
};
use register_map::{
    decode, load_register_maps_dir, DeviceReader, Encoding, RegisterMapRegistry, ScalingFormat,
    SweepOutcome,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "gatherd",
    version,
    about = "Solar inverter register gatherer",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll every configured array until interrupted
    Run {
        /// Top-level JSON config
        #[arg(long)]
        config: PathBuf,
        /// Directory of register maps (modbus-<model>.json|yaml)
        #[arg(long)]
        maps_dir: PathBuf,
        /// Override poll.interval_secs
        #[arg(long)]
        interval_secs: Option<u64>,
        /// Override poll.on_weather_failure (abandon|terminate)
        #[arg(long)]
        on_weather_failure: Option<EnvFailurePolicy>,
        /// Write Prometheus text metrics here after every interval
        #[arg(long)]
        metrics_file: Option<PathBuf>,
        /// Log merged records as JSON instead of writing to InfluxDB
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Sweep one array once and print the decoded fields as JSON
    Sweep {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        maps_dir: PathBuf,
        /// Array name as it appears in the config
        #[arg(long)]
        array: String,
    },
    /// Decode raw register words offline
    Decode {
        /// Register encoding (S16, U16, S32, U32, U64, STR16, STR32)
        #[arg(long = "type")]
        encoding: Encoding,
        /// Scaling format (FIX1, FIX2, FIX3, UTF8; omit for raw)
        #[arg(long, default_value = "NONE")]
        format: ScalingFormat,
        /// Register words, hex (0x0A4D) or decimal
        #[arg(value_parser = parse_word, required = true)]
        words: Vec<u16>,
    },
    /// List the register maps found in a directory
    Maps {
        #[arg(long)]
        maps_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            maps_dir,
            interval_secs,
            on_weather_failure,
            metrics_file,
            dry_run,
        } => {
            run(
                &config,
                &maps_dir,
                interval_secs,
                on_weather_failure,
                metrics_file,
                dry_run,
            )
            .await
        }
        Commands::Sweep {
            config,
            maps_dir,
            array,
        } => sweep_once(&config, &maps_dir, &array).await,
        Commands::Decode {
            encoding,
            format,
            words,
        } => decode_words(encoding, format, &words),
        Commands::Maps { maps_dir } => list_maps(&maps_dir),
    }
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn parse_word(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid register word '{s}': {e}"))
}

/// Connect every array and pair it with its register map. A missing map is fatal;
/// an unreachable inverter is kept and fails its own sweeps.
async fn connect_devices(
    cfg: &GathererConfig,
    registry: &RegisterMapRegistry,
    hub: Option<&MetricsHub>,
    only: Option<&str>,
) -> Result<Vec<DeviceReader>> {
    let stamp_offset = cfg.poll.stamp_offset()?;
    let mut devices = Vec::new();
    for array in &cfg.arrays {
        if only.is_some_and(|name| name != array.name) {
            continue;
        }
        let inv = &array.inverter;
        let map = registry.get(&inv.config_model).ok_or_else(|| {
            anyhow!(
                "array '{}': no register map for model '{}' (have: {})",
                array.name,
                inv.config_model,
                registry.models().join(", ")
            )
        })?;
        let endpoint = inv.endpoint();
        let bus = match TcpBus::connect(&endpoint, cfg.poll.transport()).await {
            Ok(bus) => {
                info!(
                    "{}: connected to {} ({}, {} registers)",
                    array.name,
                    endpoint,
                    inv.config_model,
                    map.len()
                );
                bus
            }
            Err(e) => {
                warn!("{}: {}; its sweeps will fail until restart", array.name, e);
                let reason = match e {
                    TransportError::Connect { reason, .. } => reason,
                    other => other.to_string(),
                };
                TcpBus::offline(&endpoint, cfg.poll.transport(), reason)
            }
        };
        let mut reader = DeviceReader::new(&array.name, Box::new(bus), inv.unit(), map)
            .with_utc_offset(stamp_offset);
        if let Some(hub) = hub {
            reader = reader.with_metrics(hub.sweep.clone());
        }
        devices.push(reader);
    }
    Ok(devices)
}

async fn run(
    config: &Path,
    maps_dir: &Path,
    interval_secs: Option<u64>,
    on_weather_failure: Option<EnvFailurePolicy>,
    metrics_file: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let mut cfg = GathererConfig::load(config)?;
    if let Some(secs) = interval_secs {
        cfg.poll.interval_secs = secs;
    }
    if let Some(policy) = on_weather_failure {
        cfg.poll.on_weather_failure = policy;
    }
    cfg.validate()?;

    let registry = load_register_maps_dir(maps_dir)?;
    let hub = MetricsHub::new().map_err(|e| anyhow!("Failed to create metrics: {}", e))?;
    hub.sweep.maps_loaded.set(registry.len() as i64);

    let devices = connect_devices(&cfg, &registry, Some(&hub), None).await?;
    let environment = OpenWeatherSource::new(
        &cfg.location,
        &cfg.weather_api_key,
        cfg.weather_url.as_deref(),
        cfg.poll.http_timeout(),
    )
    .context("building weather client")?;

    info!(
        "gatherd starting: {} arrays, every {}s, on weather failure: {:?}",
        devices.len(),
        cfg.poll.interval_secs,
        cfg.poll.on_weather_failure
    );

    if let Some(path) = metrics_file {
        spawn_metrics_writer(hub.clone(), path, cfg.poll.interval());
    }

    if dry_run {
        drive(&cfg, devices, environment, LogSink, &hub).await
    } else {
        let sink = InfluxSink::new(&cfg.influx, cfg.poll.http_timeout())
            .context("building InfluxDB client")?;
        drive(&cfg, devices, environment, sink, &hub).await
    }
}

async fn drive<S: MeasurementSink>(
    cfg: &GathererConfig,
    devices: Vec<DeviceReader>,
    environment: OpenWeatherSource,
    sink: S,
    hub: &MetricsHub,
) -> Result<()> {
    let mut poller = PollLoop::new(devices, environment, sink, cfg.location.clone())
        .with_interval(cfg.poll.interval())
        .with_policy(cfg.poll.on_weather_failure)
        .with_metrics(hub.poll.clone());

    poller
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("poll loop stopped")?;
    info!("gatherd stopped");
    Ok(())
}

fn spawn_metrics_writer(hub: MetricsHub, path: PathBuf, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = tokio::fs::write(&path, hub.encode_text()).await {
                warn!("writing metrics to {}: {}", path.display(), e);
            }
        }
    });
}

async fn sweep_once(config: &Path, maps_dir: &Path, array: &str) -> Result<()> {
    let cfg = GathererConfig::load(config)?;
    if cfg.array(array).is_none() {
        return Err(anyhow!("no array named '{}' in {}", array, config.display()));
    }
    let registry = load_register_maps_dir(maps_dir)?;
    let mut devices = connect_devices(&cfg, &registry, None, Some(array)).await?;

    for reader in devices.iter_mut() {
        let result = reader.sweep().await;
        for skip in &result.skipped {
            warn!(
                "register {} ({}) skipped: {}",
                skip.address, skip.display_name, skip.error
            );
        }
        if let SweepOutcome::Aborted { address, error } = &result.outcome {
            error!("sweep aborted at register {}: {}", address, error);
        }
        println!("{}", serde_json::to_string_pretty(&result.fields)?);
    }
    Ok(())
}

fn decode_words(encoding: Encoding, format: ScalingFormat, words: &[u16]) -> Result<()> {
    let value = decode(words, encoding, format)
        .with_context(|| format!("decoding {} words as {}", words.len(), encoding))?;
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

fn list_maps(maps_dir: &Path) -> Result<()> {
    let registry = load_register_maps_dir(maps_dir)?;
    if registry.is_empty() {
        println!("no register maps in {}", maps_dir.display());
        return Ok(());
    }
    for model in registry.models() {
        if let Some(map) = registry.get(model) {
            println!(
                "{:<24} {:>4} registers {:>5} words",
                model,
                map.len(),
                map.total_words()
            );
        }
    }
    Ok(())
}
