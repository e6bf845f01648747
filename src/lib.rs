//! AWS credential resolution and SigV4 request signing for S3-compatible
//! object stores.
//!
//! This crate answers two coupled questions for every outbound request a
//! virtual filesystem layer makes against S3: which credentials
//! authenticate it, and what authorization material must be attached so the
//! store accepts it.
//!
//! ## Overview
//!
//! - [`Context`] bundles the externals: file reading, http sending,
//!   environment access. All three are traits so everything can run
//!   hermetically in tests.
//! - The credential providers ([`EnvCredentialProvider`],
//!   [`ProfileCredentialProvider`], [`WebIdentityCredentialProvider`],
//!   [`EcsCredentialProvider`], [`ImdsCredentialProvider`]) each speak one
//!   credential source; [`DefaultCredentialProvider`] chains them in
//!   priority order.
//! - [`CredentialBroker`] is the process-wide cache on top of the chain:
//!   credentials are shared across handles and refreshed before expiry.
//! - [`RequestSigner`] implements Signature Version 4, emitting either an
//!   `Authorization` header or presigned query parameters.
//! - [`S3Handle`] binds a bucket/object to a signable request state and
//!   recovers from S3's region and endpoint redirects, priming the shared
//!   [`BucketParamsMap`] for future handles.
//!
//! ## Example
//!
//! ```no_run
//! use credsign::{
//!     BucketParamsMap, Context, CredentialBroker, ErrorRecovery, ReqwestHttpSend, S3Handle,
//!     TokioFileRead,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> credsign::Result<()> {
//! let ctx = Context::new(TokioFileRead, ReqwestHttpSend::default());
//! let broker = CredentialBroker::new();
//! let bucket_params = Arc::new(BucketParamsMap::new());
//!
//! let mut handle = S3Handle::from_env(
//!     &ctx,
//!     broker.clone(),
//!     bucket_params.clone(),
//!     "my-bucket",
//!     "path/to/object",
//! )
//! .await?;
//!
//! loop {
//!     let url = handle.url();
//!     let headers = handle.sign_request(http::Method::GET, b"").await?;
//!     // ... send the request over the transport of your choice ...
//!     # let (status, resp_headers, body) = (http::StatusCode::OK, http::HeaderMap::new(), String::new());
//!     if status.is_success() {
//!         break;
//!     }
//!     match handle.recover_from_error(&resp_headers, &body) {
//!         ErrorRecovery::Retry => continue,
//!         ErrorRecovery::Fatal(err) => return Err(err),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// Make sure all our public APIs have docs.
#![warn(missing_docs)]

/// Error types for credential resolution and signing.
pub mod error;
pub use error::{Error, ErrorKind, Result};

mod context;
pub use context::Context;

mod env;
pub use env::{Env, OsEnv, StaticEnv};

mod fs;
pub use fs::{FileRead, TokioFileRead};

mod http;
pub use crate::http::{HttpSend, ReqwestHttpSend};

pub(crate) mod constants;
pub mod hash;
pub mod time;

mod credential;
pub use credential::{Credential, CredentialSource};

pub mod profile;

mod provide;
pub use provide::{ProvideCredential, ProvideCredentialChain};

mod provide_credential;
pub use provide_credential::{
    AssumeRoleCredentialProvider, DefaultCredentialProvider, EcsCredentialProvider,
    EnvCredentialProvider, ImdsCredentialProvider, ProfileCredentialProvider,
    WebIdentityCredentialProvider,
};

mod broker;
pub use broker::{AssumeRoleState, AssumeRoleStore, CredentialBroker, WebIdentitySource};

pub mod sign;
pub use sign::{aws_uri_encode, RequestSigner, SigningMethod};

mod s3;
pub use s3::{BucketParams, BucketParamsMap, ErrorRecovery, PresignOptions, S3Handle};
