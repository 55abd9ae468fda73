//! Turn parsed CLI arguments into a `ServerConfig`

use crate::cli::main_impl::{Cli, CliStrategy};
use crate::config::{ExtractorKind, SemitransparencyStrategy, ServerConfig};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Start from the JSON file (or defaults) and apply every explicit flag on top
    pub(crate) fn from_cli(cli: &Cli) -> Result<ServerConfig> {
        let base = match &cli.config {
            Some(path) => ServerConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ServerConfig::default(),
        };

        let mut builder = ServerConfig::builder()
            .workers(cli.workers.or(base.workers))
            .max_consecutive_failures(cli.max_failures.unwrap_or(base.max_consecutive_failures))
            .marker_dir(cli.marker_dir.clone().unwrap_or(base.marker_dir))
            .listen(cli.listen.unwrap_or(base.listen))
            .semitransparency(
                cli.semitransparency
                    .map_or(base.semitransparency, Self::strategy),
            )
            .jpeg_quality(cli.jpeg_quality.unwrap_or(base.encode.jpeg_quality));

        builder = match &cli.model {
            Some(model_path) => builder.extractor(ExtractorKind::Onnx {
                model_path: model_path.clone(),
            }),
            None => builder.extractor(base.extractor),
        };

        // Mock mode replaces whatever extractor was chosen above
        if cli.mock_response || base.mock_response {
            builder = builder.mock_response(true);
        }

        builder.build().context("Invalid server configuration")
    }

    fn strategy(strategy: CliStrategy) -> SemitransparencyStrategy {
        match strategy {
            CliStrategy::Legacy => SemitransparencyStrategy::Legacy,
            CliStrategy::Experimental => SemitransparencyStrategy::Experimental,
        }
    }
}
