use std::process::ExitCode;

use anyhow::{Context, Result};
use signed_url_cache::logging::{ensure_log_error, init_logging};
use signed_url_cache::{SignError, SignedUrlCache, StorageSigner, UrlKind, metrics};

use settings::Settings;

mod settings;

/// Signs all `keys` concurrently, returning the outcomes in the order of `keys`.
async fn resolve(
    cache: &SignedUrlCache,
    kind: UrlKind,
    keys: &[String],
) -> Vec<Result<String, SignError>> {
    futures::future::join_all(keys.iter().map(|key| cache.get_url(kind, key))).await
}

fn format_line(key: &str, result: &Result<String, SignError>) -> String {
    match result {
        Ok(url) => format!("{key}\t{url}"),
        Err(err) => format!("{key}\terror: {err}"),
    }
}

async fn execute(settings: Settings) -> Result<bool> {
    let config = &settings.config;
    if let Some(ref statsd) = config.metrics.statsd {
        let tags = config.metrics.custom_tags.clone();
        metrics::configure_statsd(&config.metrics.prefix, statsd, tags)
            .context("failed to configure metrics")?;
    }

    let signer = StorageSigner::from_config(config).context("invalid storage configuration")?;
    let cache = SignedUrlCache::new(signer, config);

    tracing::debug!(
        kind = %settings.kind,
        keys = settings.keys.len(),
        "resolving signed URLs"
    );
    let results = resolve(&cache, settings.kind, &settings.keys).await;

    let mut success = true;
    for (key, result) in settings.keys.iter().zip(&results) {
        if let Err(err) = result {
            tracing::warn!(key, error = %err, "failed to sign URL");
            success = false;
        }
        println!("{}", format_line(key, result));
    }

    Ok(success)
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::get() {
        Ok(settings) => settings,
        Err(err) => {
            ensure_log_error(&err);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&settings.config.logging);

    match execute(settings).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            ensure_log_error(&err);
            ExitCode::FAILURE
        }
    }
}
