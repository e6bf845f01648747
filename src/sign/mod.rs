//! The Signature V4 engine: canonicalization and signing.

mod signer;
pub use signer::{RequestSigner, SigningMethod};

use crate::constants::{AWS_QUERY_ENCODE_SET, AWS_URI_ENCODE_SET};
use percent_encoding::utf8_percent_encode;

/// AWS-flavored percent encoding.
///
/// Unreserved characters (`A-Z a-z 0-9 _ - ~ .`) pass through; slash passes
/// through iff `encode_slash` is false; everything else becomes `%XX` with
/// uppercase hex. Object keys are encoded with the slash preserved, query
/// components with the slash encoded.
pub fn aws_uri_encode(s: &str, encode_slash: bool) -> String {
    if encode_slash {
        utf8_percent_encode(s, &AWS_QUERY_ENCODE_SET).to_string()
    } else {
        utf8_percent_encode(s, &AWS_URI_ENCODE_SET).to_string()
    }
}
