// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use fileconsumer::bounded_channel::bounded;
use fileconsumer::encoding::Encoding;
use fileconsumer::split::MultilineConfig;
use fileconsumer::{ChannelConsumer, FileConsumer, FileConsumerConfig, StartAt};

type BoxError = Box<dyn Error + Send + Sync>;

const SENDING_QUEUE_SIZE: usize = 1_000;

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

/// Where to start reading files found on startup
#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum StartAtArg {
    /// Start at the beginning of the file
    Beginning,
    /// Start at the end of the file (tail mode)
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(s: StartAtArg) -> Self {
        match s {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

/// Tail files and print their records to stdout as JSON lines
#[derive(Debug, Parser)]
#[command(name = "fileconsumer")]
#[command(bin_name = "fileconsumer")]
#[command(version, about, long_about = None)]
struct Arguments {
    #[arg(value_enum, long, env = "FILECONSUMER_LOG_FORMAT", default_value = "text")]
    /// Log format
    log_format: LogFormatArg,

    /// JSON configuration file. Command line options override its values.
    #[arg(long, env = "FILECONSUMER_CONFIG")]
    config: Option<PathBuf>,

    /// File paths to include (glob patterns, comma-separated)
    #[arg(long, env = "FILECONSUMER_INCLUDE", value_delimiter = ',')]
    include: Vec<String>,

    /// File paths to exclude (glob patterns, comma-separated)
    #[arg(long, env = "FILECONSUMER_EXCLUDE", value_delimiter = ',')]
    exclude: Vec<String>,

    /// Where to start reading files found on startup
    #[arg(value_enum, long, env = "FILECONSUMER_START_AT")]
    start_at: Option<StartAtArg>,

    /// Poll interval in milliseconds
    #[arg(long, env = "FILECONSUMER_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Bytes used to fingerprint a file
    #[arg(long, env = "FILECONSUMER_FINGERPRINT_SIZE")]
    fingerprint_size: Option<usize>,

    /// Maximum record size in bytes
    #[arg(long, env = "FILECONSUMER_MAX_LOG_SIZE")]
    max_log_size: Option<usize>,

    /// Maximum files read concurrently
    #[arg(long, env = "FILECONSUMER_MAX_CONCURRENT_FILES")]
    max_concurrent_files: Option<usize>,

    /// Maximum file handles kept open between polls
    #[arg(long, env = "FILECONSUMER_MAX_OPEN_FILES")]
    max_open_files: Option<usize>,

    /// Add the file path as a record attribute
    #[arg(long, env = "FILECONSUMER_INCLUDE_FILE_PATH")]
    include_file_path: bool,

    /// Add the symlink-resolved file path as a record attribute
    #[arg(long, env = "FILECONSUMER_INCLUDE_FILE_PATH_RESOLVED")]
    include_file_path_resolved: bool,

    /// Record encoding (utf-8, utf-8-lossy)
    #[arg(long, env = "FILECONSUMER_ENCODING")]
    encoding: Option<Encoding>,

    /// Regex matching the first line of a multiline record
    #[arg(long, env = "FILECONSUMER_LINE_START_PATTERN")]
    line_start_pattern: Option<String>,

    /// Regex matching the last line of a multiline record
    #[arg(long, env = "FILECONSUMER_LINE_END_PATTERN")]
    line_end_pattern: Option<String>,

    /// Path to store offsets for resuming after restart
    #[arg(long, env = "FILECONSUMER_OFFSETS_PATH")]
    offsets_path: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Arguments::parse();

    let _guard = match setup_logging(&args.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    let config = match build_config(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = e, "Invalid configuration.");
            return ExitCode::from(2);
        }
    };

    match run(config) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e, "File consumer failed.");
            ExitCode::from(1)
        }
    }
}

fn build_config(args: Arguments) -> Result<FileConsumerConfig, BoxError> {
    let mut config: FileConsumerConfig = match &args.config {
        Some(path) => serde_json::from_reader(std::fs::File::open(path)?)?,
        None => FileConsumerConfig::default(),
    };

    if !args.include.is_empty() {
        config.include = args.include;
    }
    if !args.exclude.is_empty() {
        config.exclude = args.exclude;
    }
    if let Some(start_at) = args.start_at {
        config.start_at = start_at.into();
    }
    if let Some(v) = args.poll_interval_ms {
        config.poll_interval_ms = v;
    }
    if let Some(v) = args.fingerprint_size {
        config.fingerprint_size = v;
    }
    if let Some(v) = args.max_log_size {
        config.max_log_size = v;
    }
    if let Some(v) = args.max_concurrent_files {
        config.max_concurrent_files = v;
    }
    if let Some(v) = args.max_open_files {
        config.max_open_files = v;
    }
    if let Some(v) = args.encoding {
        config.encoding = v;
    }
    config.include_file_path |= args.include_file_path;
    config.include_file_path_resolved |= args.include_file_path_resolved;

    if args.line_start_pattern.is_some() || args.line_end_pattern.is_some() {
        config.multiline = Some(MultilineConfig {
            line_start_pattern: args.line_start_pattern,
            line_end_pattern: args.line_end_pattern,
        });
    }
    if args.offsets_path.is_some() {
        config.offsets_path = args.offsets_path;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn run(config: FileConsumerConfig) -> Result<(), BoxError> {
    let (tx, mut rx) = bounded(SENDING_QUEUE_SIZE);
    let file_consumer = FileConsumer::from_config(config, Arc::new(ChannelConsumer::new(tx)))?;

    let cancel = CancellationToken::new();
    let mut consumer_task = tokio::spawn(file_consumer.run(cancel.clone()));

    let printer = tokio::spawn(async move {
        let stdout = std::io::stdout();
        while let Some(entry) = rx.next().await {
            let line = match serde_json::to_string(&entry) {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to serialize entry: {}", e);
                    continue;
                }
            };
            let mut out = stdout.lock();
            if writeln!(out, "{}", line).is_err() {
                break;
            }
        }
    });

    select! {
        _ = signal_wait() => {
            info!("Shutdown signal received.");
            cancel.cancel();
            consumer_task.await??;
        }
        res = &mut consumer_task => {
            res??;
        }
    }

    // The consumer owned the last sender, so the printer ends once it drains
    printer.await?;
    Ok(())
}

#[cfg(unix)]
async fn signal_wait() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut sig_term), Ok(mut sig_int)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        let _ = tokio::signal::ctrl_c().await;
        return;
    };

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

#[cfg(not(unix))]
async fn signal_wait() {
    let _ = tokio::signal::ctrl_c().await;
}

fn setup_logging(log_format: &LogFormatArg) -> Result<WorkerGuard, BoxError> {
    LogTracer::init()?;

    // Records go to stdout, so logs go to stderr
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("opentelemetry=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io::IsTerminal;

        let use_ansi = std::io::stderr().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}
