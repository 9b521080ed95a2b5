//! CLI commands.

mod images;
mod manifest;
mod stats;
mod tags;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;

use regstat_registry::{
    HttpRegistryClient, HttpRegistryConfig, MetadataSource, StorageConfig, StorageRegistryClient,
    DEFAULT_PAGE_SIZE,
};

use crate::config::Config;
use crate::error::CliError;
use crate::output::OutputFormat;

/// regstat - Measure deduplicated blob storage in a container registry.
#[derive(Debug, Parser)]
#[command(name = "regstat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Registry API URL.
    #[arg(long, global = true, env = "REGSTAT_REGISTRY_URL", conflicts_with = "storage_root")]
    registry_url: Option<String>,

    /// Root of the registry storage layout (mounted bucket or filesystem driver root).
    #[arg(long, global = true, env = "REGSTAT_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Bucket name reported in blob locations when reading the storage layout.
    #[arg(long, global = true, env = "REGSTAT_STORAGE_BUCKET")]
    storage_bucket: Option<String>,

    /// Bearer token for the registry API.
    #[arg(long, global = true, env = "REGSTAT_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Log format (logs are written to stderr).
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Config file (defaults to the platform config directory).
    #[arg(long, global = true, env = "REGSTAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List repositories in the registry catalog.
    Images(images::ImagesCommand),

    /// List tags of a repository.
    Tags(tags::TagsCommand),

    /// Show the layers of a tag, base layer first.
    Manifest(manifest::ManifestCommand),

    /// Scan the registry and report deduplicated storage per image.
    Stats(stats::StatsCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        let ctx = CommandContext {
            source: SourceSpec::resolve(&self, &config),
            format: self.format,
            config,
        };

        match self.command {
            Commands::Images(cmd) => cmd.run(ctx).await,
            Commands::Tags(cmd) => cmd.run(ctx).await,
            Commands::Manifest(cmd) => cmd.run(ctx).await,
            Commands::Stats(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("regstat {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Which metadata source to build.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Http(HttpRegistryConfig),
    Storage(StorageConfig),
    Unconfigured,
}

impl SourceSpec {
    /// Pick a source from flags first, then the config file. A storage root
    /// takes precedence over a URL given at the same level.
    fn resolve(cli: &Cli, config: &Config) -> Self {
        let storage = |root: PathBuf| {
            Self::Storage(StorageConfig {
                root,
                bucket: cli
                    .storage_bucket
                    .clone()
                    .or_else(|| config.storage_bucket.clone()),
            })
        };
        let http = |registry_url: String| {
            let defaults = HttpRegistryConfig::default();
            Self::Http(HttpRegistryConfig {
                registry_url,
                auth_token: cli.auth_token.clone().or_else(|| config.auth_token.clone()),
                timeout: config
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeout),
                ..defaults
            })
        };

        if let Some(root) = &cli.storage_root {
            return storage(root.clone());
        }
        if let Some(url) = &cli.registry_url {
            return http(url.clone());
        }
        if let Some(root) = &config.storage_root {
            return storage(root.clone());
        }
        if let Some(url) = &config.registry_url {
            return http(url.clone());
        }
        Self::Unconfigured
    }

    fn build(&self) -> Result<Arc<dyn MetadataSource>, CliError> {
        match self {
            Self::Http(config) => {
                debug!(registry_url = %config.registry_url, "Using registry API");
                Ok(Arc::new(HttpRegistryClient::new(config.clone())?))
            }
            Self::Storage(config) => {
                debug!(root = %config.root.display(), "Using registry storage layout");
                Ok(Arc::new(StorageRegistryClient::new(config.clone())))
            }
            Self::Unconfigured => Err(CliError::NoSource),
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
    source: SourceSpec,
}

impl CommandContext {
    /// Build the configured metadata source.
    pub fn source(&self) -> Result<Arc<dyn MetadataSource>> {
        Ok(self.source.build()?)
    }

    /// Page size for listings, preferring the config file over the default.
    pub fn page_size(&self) -> usize {
        self.config.stats.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("regstat").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_config_file() {
        let cli = parse(&["--registry-url", "https://flag.example.com", "images"]);
        let config = Config {
            storage_root: Some(PathBuf::from("/mnt/registry")),
            auth_token: Some("from-file".to_string()),
            timeout_secs: Some(3),
            ..Config::default()
        };

        match SourceSpec::resolve(&cli, &config) {
            SourceSpec::Http(http) => {
                assert_eq!(http.registry_url, "https://flag.example.com");
                assert_eq!(http.auth_token.as_deref(), Some("from-file"));
                assert_eq!(http.timeout, Duration::from_secs(3));
            }
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn config_file_supplies_storage_root() {
        let cli = parse(&["images"]);
        let config = Config {
            storage_root: Some(PathBuf::from("/mnt/registry")),
            storage_bucket: Some("bucket".to_string()),
            ..Config::default()
        };

        match SourceSpec::resolve(&cli, &config) {
            SourceSpec::Storage(storage) => {
                assert_eq!(storage.root, PathBuf::from("/mnt/registry"));
                assert_eq!(storage.bucket.as_deref(), Some("bucket"));
            }
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn url_and_storage_root_conflict() {
        let result = Cli::try_parse_from([
            "regstat",
            "--registry-url",
            "https://r.example.com",
            "--storage-root",
            "/mnt",
            "images",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn stats_flags_parse() {
        let cli = parse(&[
            "stats",
            "--max-images",
            "5",
            "--graph-path",
            "out.html",
            "--format",
            "json",
        ]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Stats(_)));
    }
}
