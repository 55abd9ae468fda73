//! `bgremove-server` command line entry point

use crate::backends::DefaultExtractorFactory;
use crate::cli::config::CliConfigBuilder;
use crate::server::{shutdown_signal, Server, TcpBroker};
use crate::tracing_config::{TracingConfig, TracingFormat, TracingGuard};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Background removal worker server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file; flags and environment variables override it
    #[arg(long, env = "BGREMOVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Upper bound on worker threads (default: all cores)
    #[arg(short, long, env = "BGREMOVE_WORKERS")]
    pub workers: Option<usize>,

    /// Consecutive extraction failures before the server exits unhealthy
    #[arg(long, env = "BGREMOVE_MAX_FAILURES")]
    pub max_failures: Option<u32>,

    /// Directory for the startup and per-worker processing markers
    #[arg(long, env = "BGREMOVE_MARKER_DIR")]
    pub marker_dir: Option<PathBuf>,

    /// Address of the framed TCP listener
    #[arg(short, long, env = "BGREMOVE_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// ONNX segmentation model; without it the deterministic mock extractor is used
    #[arg(short, long, env = "BGREMOVE_MODEL")]
    pub model: Option<PathBuf>,

    /// Answer every job with a constant half-transparent matte
    #[arg(long, env = "MOCK_RESPONSE")]
    pub mock_response: bool,

    /// Translucency refinement strategy
    #[arg(long, value_enum)]
    pub semitransparency: Option<CliStrategy>,

    /// JPEG quality (1-100)
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Log line format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Enable verbose output (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliStrategy {
    /// Hole filling after extraction
    Legacy,
    /// Refinement pass inside the extractor
    Experimental,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliLogFormat {
    Console,
    /// No colors, one line per event
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Main entry point; exits with status 1 when the pool became unhealthy
pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let code = {
        let _guard = init_tracing(&cli)?;
        run(&cli).await?
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<i32> {
    let config = CliConfigBuilder::from_cli(cli)?;
    log::info!(
        "📋 Extractor {}, semitransparency {:?}, jpeg quality {}, markers in {}",
        config.extractor,
        config.semitransparency,
        config.encode.jpeg_quality,
        config.marker_dir.display()
    );

    let factory = Arc::new(DefaultExtractorFactory::new(config.extractor.clone()));
    let server = Server::start(&config, factory).context("Failed to start the worker pool")?;
    let broker = TcpBroker::bind(config.listen, server.pool().subscribe(), server.pool().api())
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen))?;

    let reason = server
        .serve(broker, shutdown_signal())
        .await
        .context("Worker pool did not shut down cleanly")?;
    log::info!("✅ Server stopped: {reason:?}");
    Ok(reason.exit_code())
}

fn init_tracing(cli: &Cli) -> Result<TracingGuard> {
    let format = match cli.log_format {
        CliLogFormat::Console => TracingFormat::Console,
        CliLogFormat::Compact => TracingFormat::Compact,
        #[cfg(feature = "tracing-json")]
        CliLogFormat::Json => TracingFormat::Json,
    };
    TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format)
        .with_instance_id(uuid::Uuid::new_v4().to_string())
        .init()
        .context("Failed to initialize logging")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "bgremove-server",
            "--workers",
            "2",
            "--max-failures",
            "3",
            "--listen",
            "0.0.0.0:9000",
            "--semitransparency",
            "experimental",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.workers, Some(2));
        assert_eq!(cli.max_failures, Some(3));
        assert_eq!(cli.listen, Some("0.0.0.0:9000".parse().unwrap()));
        assert_eq!(cli.semitransparency, Some(CliStrategy::Experimental));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_rejects_bad_listen_address() {
        assert!(Cli::try_parse_from(["bgremove-server", "--listen", "nowhere"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
