use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use camwatch::chat::{ChatConfig, DispatchMode, HttpBootstrap, ProtocolConnection, WsConnector};
use camwatch::client::{BoaEvaluator, RecorderConfig, RecordingOrchestrator, RtmpTarget, TcpDialer};
use camwatch::media::FlvFileSink;
use camwatch::presence::{extract_model, Extraction, ModelState};
use camwatch::watcher::{FileLauncher, Watcher, WatcherConfig};
use camwatch::{Error, Result};

/// How long to wait for the broadcaster's presence line
const MODEL_WAIT: Duration = Duration::from_secs(60);

const STREAMS_DIR: &str = "streams";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Record one session and exit
    Record,
    /// Record every time the broadcaster comes online
    Watch,
    /// Print the broadcaster's uid
    Info,
}

#[derive(Debug, Parser)]
#[command(name = "camwatch", version, about = "Broadcaster presence watcher and RTMP recorder")]
struct Args {
    /// Broadcaster name, prompted for when omitted
    name: Option<String>,

    /// Output file (record) or directory (watch); defaults to `streams/`
    /// next to the executable
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Mode::Record)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camwatch=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let interactive = args.name.is_none();

    let code = match resolve_name(args.name) {
        Ok(name) => match run(args.mode, &name, args.output.as_deref()).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e @ (Error::NotFound(_) | Error::NoPublicStreams(_))) => {
                println!("{}", e);
                ExitCode::SUCCESS
            }
            Err(e) => {
                println!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            println!("Error: {}", e);
            ExitCode::FAILURE
        }
    };

    if interactive {
        print!("Press enter to continue... ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
    }
    code
}

fn resolve_name(name: Option<String>) -> Result<String> {
    if let Some(name) = name {
        return Ok(name);
    }
    print!("Enter model name: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn run(mode: Mode, name: &str, output: Option<&Path>) -> Result<()> {
    match mode {
        Mode::Info => info(name).await,
        Mode::Record => record(name, output).await,
        Mode::Watch => watch(name, output).await,
    }
}

async fn open_chat(name: &str, mode: DispatchMode) -> Result<ProtocolConnection> {
    let config = ChatConfig::default();
    let bootstrap = Arc::new(HttpBootstrap::new(config.clone())?);
    ProtocolConnection::connect(config, bootstrap, Arc::new(WsConnector), Some(name), mode).await
}

/// Wait for the broadcaster's presence line on a single-mode connection
async fn lookup(conn: &mut ProtocolConnection, name: &str) -> Result<ModelState> {
    let raw = conn.read_single(MODEL_WAIT).await?;
    if raw.is_empty() {
        return Err(Error::NotFound(name.to_string()));
    }
    match extract_model(&raw)? {
        Extraction::Model(model) if model.exists => Ok(model),
        _ => Err(Error::NotFound(name.to_string())),
    }
}

async fn info(name: &str) -> Result<()> {
    let mut conn = open_chat(name, DispatchMode::Single).await?;
    let found = lookup(&mut conn, name).await;
    conn.close().await;

    match found {
        Ok(model) => println!("Model uid: {}", model.uid),
        Err(Error::NotFound(_)) => println!("Can't find model"),
        Err(e) => return Err(e),
    }
    Ok(())
}

fn orchestrator() -> RecordingOrchestrator {
    RecordingOrchestrator::new(
        RecorderConfig::default(),
        Arc::new(TcpDialer::default()),
        Arc::new(BoaEvaluator),
    )
}

/// `streams/` next to the executable
fn streams_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_default()
        .join(STREAMS_DIR)
}

async fn record(name: &str, output: Option<&Path>) -> Result<()> {
    let mut conn = open_chat(name, DispatchMode::Single).await?;
    let result = record_with(&mut conn, name, output).await;
    conn.close().await;
    result
}

async fn record_with(
    conn: &mut ProtocolConnection,
    name: &str,
    output: Option<&Path>,
) -> Result<()> {
    let model = lookup(conn, name).await?;
    if !model.is_recordable() {
        return Err(Error::NoPublicStreams(name.to_string()));
    }

    let path = match output {
        Some(path) => path.to_path_buf(),
        None => streams_dir().join(format!("{}_{}.flv", model.name, Utc::now().timestamp())),
    };
    let sink = FlvFileSink::create(&path)?;
    println!("Start record {:?} into file {}", name, path.display());

    let orchestrator = orchestrator();
    let target = RtmpTarget::resolve(&model, orchestrator.config());
    let report = orchestrator
        .record(&target, conn.token(), Some(Box::new(sink)))
        .await?;

    println!(
        "Recording finished ({:?}): {:.2} MB in {}s",
        report.outcome,
        report.bytes_received as f64 / (1024.0 * 1024.0),
        report.duration.as_secs()
    );
    Ok(())
}

async fn watch(name: &str, output: Option<&Path>) -> Result<()> {
    let output_dir = output.map(Path::to_path_buf).unwrap_or_else(streams_dir);
    std::fs::create_dir_all(&output_dir)?;

    let mut conn = open_chat(name, DispatchMode::Feed).await?;
    let launcher = FileLauncher::new(orchestrator(), conn.token(), output_dir);
    let watcher = Watcher::new(WatcherConfig::default(), Arc::new(launcher));

    let result = watcher.run(&mut conn, name).await;
    conn.close().await;
    result
}
