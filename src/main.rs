//! relay-transcode
//!
//! Command-line host for the transcode sessions: encodes raw PCM files to
//! MP3 or Ogg/Vorbis and decodes any audio file to canonical PCM. Each job
//! runs on its own blocking worker, the way a relay runs one worker per
//! stream.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_transcode::config::{HostConfig, LoggingConfig};
use relay_transcode::session::{DecodeStats, EncodeSession, Termination};
use relay_transcode::transcode::PCM_FRAME_BYTES;
use relay_transcode::{ffmpeg, DecodeSession, OutputFormat, Result, TranscodeConfig, TranscodeError};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "relay-transcode";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults apply when absent
    #[arg(short, long, default_value = "relay-transcode.toml")]
    config: PathBuf,

    /// Log output format, overriding the config file (json, pretty)
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode raw S16LE stereo PCM to MP3 or Ogg/Vorbis
    Encode {
        /// Output format
        #[arg(short, long, default_value = "mp3")]
        format: OutputFormat,

        /// Sample rate of the input PCM, overriding the config file
        #[arg(short, long)]
        sample_rate: Option<u32>,

        /// Raw PCM input file
        input: PathBuf,

        /// Encoded output file
        output: PathBuf,
    },
    /// Decode any audio file to 48 kHz S16LE stereo PCM
    Decode {
        /// Compressed input file
        input: PathBuf,

        /// Raw PCM output file
        output: PathBuf,
    },
    /// Print the default configuration as TOML
    Config,
}

/// Per-job summary printed as JSON
#[derive(Debug, Serialize)]
struct JobSummary {
    job: &'static str,
    session: String,
    input: PathBuf,
    output: PathBuf,
    bytes_in: u64,
    bytes_out: u64,
    elapsed_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    granule: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<DecodeStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    termination: Option<Termination>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let (mut config, config_error) = load_config(&cli.config);
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }
    init_logging(&config.logging);
    if let Some(e) = config_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            cli.config.display(),
            e
        );
    }

    match run(cli.command, config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, mut config: TranscodeConfig) -> Result<()> {
    if let Command::Config = command {
        print!("{}", TranscodeConfig::default().to_toml()?);
        return Ok(());
    }

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    ffmpeg::init()?;
    if config.logging.ffmpeg_logs {
        ffmpeg::install_log_filter();
    }
    tracing::info!("FFmpeg version: {}", ffmpeg::version_info());

    let host = config.host.clone();
    let summary = match command {
        Command::Encode {
            format,
            sample_rate,
            input,
            output,
        } => {
            if let Some(rate) = sample_rate {
                config.encode.sample_rate = rate;
            }
            config.validate()?;
            let encode = config.encode.clone();
            let chunk = host.chunk_bytes;
            run_job(&host, move || {
                let session = EncodeSession::start(format, &encode)?;
                encode_file(session, &input, &output, chunk)
            })
            .await?
        }
        Command::Decode { input, output } => {
            config.validate()?;
            let decode = config.decode.clone();
            let chunk = host.chunk_bytes;
            run_job(&host, move || {
                let source = File::open(&input)?;
                let session = DecodeSession::open(Box::new(source), &decode)?;
                decode_file(session, &input, &output, chunk)
            })
            .await?
        }
        Command::Config => return Ok(()),
    };

    let json = serde_json::to_string_pretty(&summary)
        .map_err(|e| TranscodeError::Config(format!("summary: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// Run one session to completion on a dedicated blocking worker.
///
/// The session is created inside the worker and never crosses threads.
async fn run_job<F>(host: &HostConfig, job: F) -> Result<JobSummary>
where
    F: FnOnce() -> Result<JobSummary> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(job);
    let joined = match host.job_timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), handle)
            .await
            .map_err(|_| {
                TranscodeError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("job did not finish within {}s", secs),
                ))
            })?,
        None => handle.await,
    };
    joined.map_err(|e| TranscodeError::Io(std::io::Error::other(format!("worker failed: {}", e))))?
}

fn encode_file(
    mut session: EncodeSession,
    input: &Path,
    output: &Path,
    chunk: usize,
) -> Result<JobSummary> {
    let started = Instant::now();
    let mut reader = File::open(input)?;
    let mut writer = BufWriter::new(File::create(output)?);

    // Whole sample frames only; a ragged tail is carried to the next read
    let chunk = (chunk / PCM_FRAME_BYTES).max(1) * PCM_FRAME_BYTES;
    let mut pcm = vec![0u8; chunk];
    let mut out = vec![0u8; chunk];
    let mut carry = 0usize;
    let mut bytes_in = 0u64;
    let mut bytes_out = 0u64;

    loop {
        let n = reader.read(&mut pcm[carry..])?;
        if n == 0 {
            break;
        }
        bytes_in += n as u64;
        let filled = carry + n;
        let aligned = filled - filled % PCM_FRAME_BYTES;

        let written = session.encode(&pcm[..aligned], &mut out)?;
        writer.write_all(&out[..written])?;
        bytes_out += written as u64;

        pcm.copy_within(aligned..filled, 0);
        carry = filled - aligned;
    }
    if carry > 0 {
        tracing::warn!(bytes = carry, "dropping trailing partial sample frame");
    }

    // Anything still staged from the last encode call
    loop {
        let written = session.encode(&[], &mut out)?;
        if written == 0 {
            break;
        }
        writer.write_all(&out[..written])?;
        bytes_out += written as u64;
    }
    loop {
        let written = session.finish(&mut out)?;
        if written == 0 {
            break;
        }
        writer.write_all(&out[..written])?;
        bytes_out += written as u64;
    }
    writer.flush()?;

    Ok(JobSummary {
        job: "encode",
        session: session.id().to_string(),
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        bytes_in,
        bytes_out,
        elapsed_ms: started.elapsed().as_millis(),
        content_type: Some(session.format().content_type()),
        granule: Some(session.granule_position()),
        stats: None,
        termination: None,
    })
}

fn decode_file(
    mut session: DecodeSession,
    input: &Path,
    output: &Path,
    chunk: usize,
) -> Result<JobSummary> {
    let started = Instant::now();
    let mut writer = BufWriter::new(File::create(output)?);
    let mut out = vec![0u8; chunk];

    loop {
        let status = session.read(&mut out)?;
        writer.write_all(&out[..status.written])?;
        if status.eos {
            break;
        }
        if status.written == 0 {
            // Starved: the source has nothing right now
            std::thread::sleep(Duration::from_millis(10));
        }
    }
    writer.flush()?;

    let summary = JobSummary {
        job: "decode",
        session: session.id().to_string(),
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        bytes_in: session.bytes_read(),
        bytes_out: session.stats().bytes_out,
        elapsed_ms: started.elapsed().as_millis(),
        content_type: None,
        granule: None,
        stats: Some(session.stats()),
        termination: session.termination().cloned(),
    };
    session.close();
    Ok(summary)
}

/// Load the config file, falling back to defaults when it is missing or bad.
fn load_config(path: &Path) -> (TranscodeConfig, Option<TranscodeError>) {
    if !path.exists() {
        return (TranscodeConfig::default(), None);
    }
    match TranscodeConfig::from_file(path) {
        Ok(config) => (config, None),
        Err(e) => (TranscodeConfig::default(), Some(e)),
    }
}

/// Initialize logging with tracing
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("relay_transcode={0},ffmpeg={0}", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_cli_parses_encode() {
        let cli = Cli::try_parse_from([
            APP_NAME, "encode", "--format", "vorbis", "in.pcm", "out.ogg",
        ])
        .unwrap();
        match cli.command {
            Command::Encode { format, input, .. } => {
                assert_eq!(format, OutputFormat::Vorbis);
                assert_eq!(input, PathBuf::from("in.pcm"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let (config, err) = load_config(Path::new("/nonexistent/relay-transcode.toml"));
        assert!(err.is_none());
        assert_eq!(config.host.chunk_bytes, 64 * 1024);
    }
}
