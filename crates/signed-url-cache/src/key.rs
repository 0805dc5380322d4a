use std::fmt;

/// A storage object key with the bucket prefix removed.
///
/// Different spellings of the same object, like `insurance-documents/policy.pdf` and
/// `policy.pdf`, normalize to the same key and thus share one cache slot.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Turns raw object keys into [`NormalizedKey`]s.
#[derive(Clone, Debug)]
pub struct KeyNormalizer {
    /// The bucket prefix including its trailing `/`.
    prefix: String,
}

impl KeyNormalizer {
    pub fn new(bucket: &str) -> Self {
        let bucket = bucket.trim_matches('/');
        let prefix = if bucket.is_empty() {
            String::new()
        } else {
            format!("{bucket}/")
        };
        Self { prefix }
    }

    /// Normalizes `raw_key`.
    ///
    /// Leading slashes and all leading repetitions of the bucket prefix are removed, which makes
    /// this idempotent. Anything else, including an empty key, is passed through untouched.
    pub fn normalize(&self, raw_key: &str) -> NormalizedKey {
        let mut key = raw_key;
        loop {
            let trimmed = key.trim_start_matches('/');
            let stripped = if self.prefix.is_empty() {
                trimmed
            } else {
                trimmed.strip_prefix(self.prefix.as_str()).unwrap_or(trimmed)
            };
            if stripped.len() == key.len() {
                break;
            }
            key = stripped;
        }
        NormalizedKey(key.to_owned())
    }
}
