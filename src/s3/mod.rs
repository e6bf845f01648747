//! The S3 request helper: endpoint binding, signing, redirect recovery.

mod error;

mod handle;
pub use handle::{ErrorRecovery, PresignOptions, S3Handle};

mod params;
pub use params::{BucketParams, BucketParamsMap};
