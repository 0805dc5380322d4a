use std::time::Duration;

use thiserror::Error;

/// An error that happens when requesting a signed URL from the upstream signer.
///
/// The cache never creates, wraps or translates these. Whatever a [`UrlSigner`](crate::UrlSigner)
/// returns is handed as-is to every caller waiting on that request, which is why the error
/// has to be [`Clone`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignError {
    /// The object does not exist in the storage bucket.
    #[error("not found")]
    NotFound,
    /// The signer refused to sign the object.
    ///
    /// The attached string contains the upstream response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The signing request did not complete in time.
    #[error("signing timed out after {0:?}")]
    Timeout(Duration),
    /// The signing request failed for another reason, like connection loss or a 5xx response.
    ///
    /// The attached string contains the upstream response.
    #[error("signing failed: {0}")]
    Upstream(String),
    /// The signer answered, but the answer did not contain a usable URL.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The signing task went away without producing a result.
    ///
    /// This only happens when the runtime shuts down while a request is in flight.
    #[error("signing request interrupted")]
    Interrupted,
}

impl From<reqwest::Error> for SignError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

impl From<url::ParseError> for SignError {
    fn from(err: url::ParseError) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl SignError {
    /// A short tag describing the error, used for metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "notfound",
            Self::PermissionDenied(_) => "permissiondenied",
            Self::Timeout(_) => "timeout",
            Self::Upstream(_) => "upstream",
            Self::Malformed(_) => "malformed",
            Self::Interrupted => "interrupted",
        }
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn test_display() {
        assert_snapshot!(SignError::NotFound.to_string(), @"not found");
        assert_snapshot!(
            SignError::PermissionDenied("invalid signature".into()).to_string(),
            @"permission denied: invalid signature"
        );
        assert_snapshot!(
            SignError::Timeout(Duration::from_secs(10)).to_string(),
            @"signing timed out after 10s"
        );
    }

    #[test]
    fn test_from_url_error() {
        let err: SignError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, SignError::Malformed(_)));
        assert_eq!(err.metrics_tag(), "malformed");
    }
}
