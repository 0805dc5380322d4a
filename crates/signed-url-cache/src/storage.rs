//! Signs URLs through the object storage REST API.

use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Config;
use crate::error::SignError;
use crate::key::NormalizedKey;
use crate::signer::{UrlKind, UrlSigner};

/// The User-Agent string to use when talking to the storage API.
const USER_AGENT: &str = concat!("signed-url-cache/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    expires_in: u64,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

/// A [`UrlSigner`] talking to the object storage signing endpoint.
///
/// Objects are signed with `POST {url}/object/sign/{bucket}/{key}`. The requested lifetime is
/// the nominal `expires_in` of the respective URL kind. The cache hands URLs out for a shorter
/// time than that, so a URL is never served close to its real expiry.
#[derive(Debug, Clone)]
pub struct StorageSigner {
    client: Client,
    base_url: Url,
    token: String,
    bucket: String,
    preview_expires_in: u64,
    download_expires_in: u64,
    download_filename: Option<String>,
    timeout: Duration,
}

impl StorageSigner {
    pub fn new(client: Client, base_url: Url, token: String, config: &Config) -> Self {
        Self {
            client,
            base_url,
            token,
            bucket: config.bucket.trim_matches('/').to_owned(),
            preview_expires_in: config.preview.expires_in,
            download_expires_in: config.download.expires_in,
            download_filename: config.storage.download_filename.clone(),
            timeout: config.storage.timeout,
        }
    }

    /// Creates a signer from the `storage` section of the configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let base_url = config
            .storage
            .url
            .clone()
            .context("missing storage url")?;
        let token = config
            .storage
            .token
            .clone()
            .context("missing storage token")?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.storage.timeout)
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self::new(client, base_url, token, config))
    }

    /// The signing endpoint for `key`.
    fn sign_url(&self, key: &NormalizedKey) -> Result<Url, SignError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SignError::Malformed(format!("invalid base url {}", self.base_url)))?;
            segments
                .pop_if_empty()
                .extend(["object", "sign", self.bucket.as_str()])
                .extend(key.as_str().split('/'));
        }
        Ok(url)
    }

    async fn request_signed_url(
        &self,
        kind: UrlKind,
        key: &NormalizedKey,
    ) -> Result<Url, SignError> {
        let expires_in = match kind {
            UrlKind::Preview => self.preview_expires_in,
            UrlKind::Download => self.download_expires_in,
        };
        let endpoint = self.sign_url(key)?;
        tracing::trace!(%endpoint, expires_in, "requesting signature");

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.token)
            .header("apikey", &self.token)
            .header(header::USER_AGENT, USER_AGENT)
            .json(&SignRequest { expires_in })
            .send()
            .await
            .map_err(|err| self.request_error(err))?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::NOT_FOUND => SignError::NotFound,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    SignError::PermissionDenied(details)
                }
                _ => SignError::Upstream(format!("{status}: {details}")),
            });
        }

        let body: SignResponse = response.json().await.map_err(|err| self.request_error(err))?;
        // The API answers with a path relative to the storage root.
        Ok(self.base_url_dir().join(body.signed_url.trim_start_matches('/'))?)
    }

    /// The base URL with a trailing slash, so relative paths are joined below it.
    fn base_url_dir(&self) -> Url {
        let mut url = self.base_url.clone();
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url
    }

    fn request_error(&self, err: reqwest::Error) -> SignError {
        if err.is_timeout() {
            SignError::Timeout(self.timeout)
        } else {
            err.into()
        }
    }
}

#[async_trait::async_trait]
impl UrlSigner for StorageSigner {
    async fn preview(&self, key: &NormalizedKey) -> Result<String, SignError> {
        let url = self.request_signed_url(UrlKind::Preview, key).await?;
        Ok(url.into())
    }

    async fn download(&self, key: &NormalizedKey) -> Result<String, SignError> {
        let mut url = self.request_signed_url(UrlKind::Download, key).await?;
        let filename = self.download_filename.as_deref().unwrap_or_default();
        url.query_pairs_mut().append_pair("download", filename);
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyNormalizer;

    fn signer(base_url: &str) -> StorageSigner {
        StorageSigner::new(
            Client::new(),
            base_url.parse().unwrap(),
            "token".into(),
            &Config::default(),
        )
    }

    #[test]
    fn test_sign_url() {
        let key = KeyNormalizer::new("insurance-documents").normalize("claims/2024/a b.pdf");

        let url = signer("https://storage.test/storage/v1").sign_url(&key).unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.test/storage/v1/object/sign/insurance-documents/claims/2024/a%20b.pdf"
        );

        let url = signer("https://storage.test/storage/v1/").sign_url(&key).unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.test/storage/v1/object/sign/insurance-documents/claims/2024/a%20b.pdf"
        );
    }

    #[test]
    fn test_base_url_dir() {
        let dir = signer("https://storage.test/storage/v1").base_url_dir();
        assert_eq!(
            dir.join("object/sign/b/a.pdf?token=x").unwrap().as_str(),
            "https://storage.test/storage/v1/object/sign/b/a.pdf?token=x"
        );
    }

    #[test]
    fn test_from_config_requires_storage() {
        let mut config = Config::default();
        config.storage.url = None;
        config.storage.token = None;
        assert!(StorageSigner::from_config(&config).is_err());

        config.storage.url = Some("https://storage.test/storage/v1".parse().unwrap());
        config.storage.token = Some("token".into());
        assert!(StorageSigner::from_config(&config).is_ok());
    }
}
