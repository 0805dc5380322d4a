use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use signed_url_cache::{Config, UrlKind};
use tracing::level_filters::LevelFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    /// URLs for displaying documents inline.
    Preview,
    /// URLs that make browsers save the document.
    Download,
}

impl From<Kind> for UrlKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Preview => UrlKind::Preview,
            Kind::Download => UrlKind::Download,
        }
    }
}

/// Prints signed URLs for documents in object storage.
///
/// All keys are resolved concurrently through one cache, so keys naming the same object
/// (like `insurance-documents/policy.pdf` and `policy.pdf`) are signed only once.
///
/// The storage API is configured in the `storage` section of the configuration file,
/// or via the `STORAGE_URL` and `STORAGE_TOKEN` environment variables.
#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about)]
pub struct Cli {
    /// The kind of URL to create.
    #[arg(value_enum)]
    pub kind: Kind,

    /// The object keys, with or without the bucket prefix.
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// The severity level of logging output.
    ///
    /// Overrides the level from the configuration file.
    /// Possible values: off, error, warn, info, debug, trace
    #[arg(long)]
    pub log_level: Option<LevelFilter>,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub kind: UrlKind,
    pub keys: Vec<String>,
    pub config: Config,
}

impl Settings {
    pub fn get() -> Result<Self> {
        Self::from_cli(Cli::parse())
    }

    fn from_cli(cli: Cli) -> Result<Self> {
        let mut config = Config::get(cli.config.as_deref()).context("failed loading config")?;
        if let Some(level) = cli.log_level {
            config.logging.level = level;
        }

        Ok(Self {
            kind: cli.kind.into(),
            keys: cli.keys,
            config,
        })
    }
}
