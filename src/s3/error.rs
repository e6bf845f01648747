use crate::{Error, ErrorKind};
use serde::Deserialize;

/// The `<Error>` document S3 returns on failures.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub(crate) struct S3ErrorResponse {
    pub code: String,
    pub message: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

/// Parse an S3 error body, if it looks like one.
pub(crate) fn parse_error_body(body: &str) -> Option<S3ErrorResponse> {
    let trimmed = body.trim_start();
    if !trimmed.starts_with("<?xml") && !trimmed.starts_with("<Error>") {
        return None;
    }
    quick_xml::de::from_str(trimmed).ok()
}

/// Map a non-recoverable S3 error code to its typed error.
pub(crate) fn typed_error(code: &str, message: &str) -> Error {
    let kind = match code {
        "AccessDenied" => ErrorKind::AwsAccessDenied,
        "NoSuchBucket" => ErrorKind::AwsBucketNotFound,
        "NoSuchKey" => ErrorKind::AwsObjectNotFound,
        "SignatureDoesNotMatch" => ErrorKind::AwsSignatureDoesNotMatch,
        _ => ErrorKind::AwsError,
    };
    let message = if message.is_empty() { code } else { message };
    Error::new(kind, message).with_context(format!("code: {code}"))
}
