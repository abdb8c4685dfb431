use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use sensorwatch::runtime::{BridgeRuntime, ModelRuntime};
use sensorwatch::simulate::Simulator;
use sensorwatch::state::StateFile;
use sensorwatch::{EngineConfig, Sample, Session};

#[derive(Parser)]
#[command(
    name = "sensorwatch",
    about = "Streaming anomaly detection for industrial sensor telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score NDJSON samples and write one NDJSON record per output
    Run {
        /// Config file (defaults to $SENSORWATCH_CONFIG, then the system path)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Input file, or "-" for stdin
        #[arg(long, default_value = "-")]
        input: String,

        /// State file restored on start and written on shutdown
        #[arg(long)]
        state: Option<PathBuf>,

        /// Command line of the model bridge process (method "ml")
        #[arg(long)]
        bridge: Option<String>,
    },

    /// Generate synthetic sensor samples as NDJSON
    Simulate {
        /// Comma-separated sensor names
        #[arg(long, value_delimiter = ',', default_value = "temperature,pressure")]
        sensors: Vec<String>,

        /// Number of samples to emit
        #[arg(long, default_value = "100")]
        samples: usize,

        /// Probability that a sample carries an injected spike
        #[arg(long, default_value = "0.02")]
        anomaly_ratio: f64,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Milliseconds between samples
        #[arg(long, default_value = "1000")]
        interval_ms: i64,

        /// Timestamp of the first sample (defaults to now)
        #[arg(long)]
        start_ms: Option<i64>,
    },

    /// Validate and print the effective configuration
    CheckConfig {
        /// Config file (defaults to $SENSORWATCH_CONFIG, then the system path)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load(p),
        None => Ok(EngineConfig::load_or_default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Run {
            config,
            input,
            state,
            bridge,
        } => {
            let config = load_config(config.as_deref())?;
            run(config, &input, state, bridge).await?;
        }
        Commands::Simulate {
            sensors,
            samples,
            anomaly_ratio,
            seed,
            interval_ms,
            start_ms,
        } => {
            let start = start_ms.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            let sim = Simulator::new(&sensors, anomaly_ratio, seed, start, interval_ms);
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for sample in sim.take(samples) {
                if let Err(e) = writeln!(out, "{sample}") {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        break;
                    }
                    return Err(e).context("failed to write sample");
                }
            }
        }
        Commands::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            config.validate()?;
            let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
            println!("{rendered}");
            info!(method = %config.method, "configuration is valid");
        }
    }

    Ok(())
}

async fn run(
    config: EngineConfig,
    input: &str,
    state: Option<PathBuf>,
    bridge: Option<String>,
) -> Result<()> {
    let grace = Duration::from_millis(config.model.timeout_ms);
    let bridge_command: Vec<String> = match bridge {
        Some(cmd) => cmd.split_whitespace().map(str::to_string).collect(),
        None => config.model.bridge_command.clone(),
    };
    let mut session = Session::new(config)?;

    let state_file = state.map(StateFile::new);
    if let Some(file) = &state_file {
        if let Some(bytes) = file.load()? {
            // A rejected snapshot leaves the session empty; keep going.
            if session.load_state(&bytes).is_ok() {
                info!(path = %file.path().display(), "resumed from state file");
            }
        }
    }

    if !bridge_command.is_empty() {
        let runtime = start_bridge(&bridge_command, session.config()).await?;
        session.attach_runtime(runtime);
    }

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if input == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(input)
            .await
            .with_context(|| format!("failed to open input {input}"))?;
        Box::new(BufReader::new(file))
    };
    let mut lines = reader.lines();
    let mut stdout = tokio::io::stdout();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut emitted = 0u64;
    let mut anomalies = 0u64;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read input")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let sample = match Sample::parse(&line) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "skipping unparseable sample");
                        continue;
                    }
                };
                let output = match session.ingest_async(&sample).await {
                    Ok(Some(output)) => output,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, timestamp = sample.timestamp, "sample rejected");
                        continue;
                    }
                };

                let sink = output.sink();
                let mut record = serde_json::to_value(&output).context("failed to encode output")?;
                record["sink"] = serde_json::to_value(sink)?;
                let mut line = serde_json::to_vec(&record)?;
                line.push(b'\n');
                stdout.write_all(&line).await.context("failed to write output")?;
                stdout.flush().await?;

                emitted += 1;
                if output.is_anomaly {
                    anomalies += 1;
                }
            }
            _ = &mut shutdown => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }
    info!(emitted, anomalies, "input finished");

    if let Some(file) = &state_file {
        let bytes = session.save_state()?;
        file.save(&bytes)?;
    }
    if let Err(e) = session.close(grace).await {
        warn!(error = %e, "model bridge did not shut down cleanly");
    }
    Ok(())
}

async fn start_bridge(command: &[String], config: &EngineConfig) -> Result<Arc<dyn ModelRuntime>> {
    let timeout = Duration::from_millis(config.model.timeout_ms);
    let runtime = BridgeRuntime::spawn(command, timeout)
        .await
        .context("failed to start model bridge")?;
    if let Some(path) = &config.model.model_path {
        runtime
            .load_model(path, &config.model.model_id)
            .await
            .with_context(|| format!("failed to load model {}", path.display()))?;
        info!(model_id = %config.model.model_id, path = %path.display(), "model loaded");
    }
    Ok(Arc::new(runtime))
}
