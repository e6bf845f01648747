use std::fmt;
use thiserror::Error;

/// The error type for credential resolution and request signing.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Vec<String>,
    retryable: bool,
    #[source]
    source: Option<anyhow::Error>,
}

/// The kind of error that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The provider chain was exhausted without yielding credentials.
    CredentialsNotFound,

    /// Credentials exist but could not be parsed or are incomplete.
    CredentialsMalformed,

    /// An STS AssumeRole/AssumeRoleWithWebIdentity call failed.
    AssumeRoleFailed,

    /// The instance metadata service could not be reached.
    ImdsUnavailable,

    /// A network-level failure; retrying may succeed.
    Transient,

    /// Caller-supplied input was invalid (bad timestamp, bad configuration).
    InvalidArgument,

    /// S3 answered with AccessDenied.
    AwsAccessDenied,

    /// S3 answered with NoSuchBucket.
    AwsBucketNotFound,

    /// S3 answered with NoSuchKey.
    AwsObjectNotFound,

    /// S3 answered with SignatureDoesNotMatch.
    AwsSignatureDoesNotMatch,

    /// A redirect-class error that the request helper can recover from.
    AwsRedirectRetryable,

    /// Any other AWS error response.
    AwsError,

    /// Unexpected errors (I/O, malformed responses, internal failures).
    Unexpected,
}

impl Error {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
            retryable: matches!(kind, ErrorKind::Transient),
            source: None,
        }
    }

    /// Add a source error.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach a context line shown alongside the message.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Mark the error as retryable (or not).
    pub fn set_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// The context lines attached with [`with_context`](Self::with_context).
    pub fn context(&self) -> &[String] {
        &self.context
    }
}

// Convenience constructors.
impl Error {
    /// The provider chain yielded nothing.
    pub fn credentials_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CredentialsNotFound, message)
    }

    /// Credentials were present but unusable.
    pub fn credentials_malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CredentialsMalformed, message)
    }

    /// STS refused or returned an unusable response.
    pub fn assume_role_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AssumeRoleFailed, message)
    }

    /// IMDS did not answer.
    pub fn imds_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ImdsUnavailable, message)
    }

    /// Network failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Invalid caller input.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Catch-all for unexpected failures.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::CredentialsNotFound => write!(f, "credentials not found"),
            ErrorKind::CredentialsMalformed => write!(f, "credentials malformed"),
            ErrorKind::AssumeRoleFailed => write!(f, "assume role failed"),
            ErrorKind::ImdsUnavailable => write!(f, "instance metadata unavailable"),
            ErrorKind::Transient => write!(f, "transient network failure"),
            ErrorKind::InvalidArgument => write!(f, "invalid argument"),
            ErrorKind::AwsAccessDenied => write!(f, "access denied"),
            ErrorKind::AwsBucketNotFound => write!(f, "bucket not found"),
            ErrorKind::AwsObjectNotFound => write!(f, "object not found"),
            ErrorKind::AwsSignatureDoesNotMatch => write!(f, "signature does not match"),
            ErrorKind::AwsRedirectRetryable => write!(f, "redirected"),
            ErrorKind::AwsError => write!(f, "aws error"),
            ErrorKind::Unexpected => write!(f, "unexpected error"),
        }
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, Error>;

// Common From implementations.
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::unexpected(err.to_string()).with_source(err)
    }
}

impl From<std::fmt::Error> for Error {
    fn from(err: std::fmt::Error) -> Self {
        Self::unexpected(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Self::invalid_argument(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::invalid_argument(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<http::uri::InvalidUri> for Error {
    fn from(err: http::uri::InvalidUri) -> Self {
        Self::invalid_argument(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<http::uri::InvalidUriParts> for Error {
    fn from(err: http::uri::InvalidUriParts) -> Self {
        Self::invalid_argument(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::unexpected(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::unexpected(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<http::header::ToStrError> for Error {
    fn from(err: http::header::ToStrError) -> Self {
        Self::invalid_argument(err.to_string()).with_source(anyhow::Error::from(err))
    }
}
