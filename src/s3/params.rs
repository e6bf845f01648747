use std::collections::HashMap;
use std::sync::Mutex;

/// The endpoint parameters last negotiated for a bucket.
///
/// Redirect responses teach a handle where a bucket really lives; recording
/// the answer here primes every future handle for the same bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketParams {
    /// Signing region.
    pub region: String,
    /// Endpoint host, without any `{bucket}.` prefix.
    pub endpoint: String,
    /// Whether the bucket is addressed as `{bucket}.{endpoint}`.
    pub use_virtual_hosting: bool,
}

/// Process-wide map from bucket name to its negotiated parameters.
///
/// Guarded by its own mutex, independent of the credential cache.
#[derive(Debug, Default)]
pub struct BucketParamsMap {
    map: Mutex<HashMap<String, BucketParams>>,
}

impl BucketParamsMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the recorded parameters for `bucket`.
    pub fn get(&self, bucket: &str) -> Option<BucketParams> {
        self.map.lock().expect("lock poisoned").get(bucket).cloned()
    }

    /// Record the parameters for `bucket`, replacing any previous entry.
    pub fn update(&self, bucket: &str, params: BucketParams) {
        self.map
            .lock()
            .expect("lock poisoned")
            .insert(bucket.to_string(), params);
    }

    /// Drop every recorded entry. Intended for test isolation.
    pub fn clear(&self) {
        self.map.lock().expect("lock poisoned").clear();
    }
}
