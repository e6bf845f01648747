use crate::broker::CredentialBroker;
use crate::constants::*;
use crate::hash::hex_sha256;
use crate::s3::error::{parse_error_body, typed_error};
use crate::s3::params::{BucketParams, BucketParamsMap};
use crate::sign::{aws_uri_encode, RequestSigner, SigningMethod};
use crate::time::{now, parse_amz_timestamp, DateTime};
use crate::{Context, Error, ErrorKind, Result};
use bytes::Bytes;
use chrono::TimeDelta;
use http::{HeaderMap, Method};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Options for building a presigned URL.
#[derive(Debug, Clone)]
pub struct PresignOptions {
    /// HTTP verb the URL is valid for.
    pub verb: Method,
    /// Validity window, from the start time.
    pub expires_in: Duration,
    /// Explicit start time; defaults to the `AWS_TIMESTAMP` hook or the
    /// current time.
    pub start_time: Option<DateTime>,
}

impl Default for PresignOptions {
    fn default() -> Self {
        Self {
            verb: Method::GET,
            expires_in: Duration::from_secs(3600),
            start_time: None,
        }
    }
}

impl PresignOptions {
    /// Set the HTTP verb.
    pub fn with_verb(mut self, verb: Method) -> Self {
        self.verb = verb;
        self
    }

    /// Set the validity window.
    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Pin the start time.
    pub fn with_start_time(mut self, start_time: DateTime) -> Self {
        self.start_time = Some(start_time);
        self
    }
}

/// The outcome of classifying an S3 error response.
#[derive(Debug)]
pub enum ErrorRecovery {
    /// The handle adopted a new region/endpoint; rebuild the URL, re-sign
    /// and resend.
    Retry,
    /// Not recoverable; surface this error.
    Fatal(Error),
}

/// S3Handle binds a bucket and object key to a signable request state.
///
/// A handle resolves its endpoint, region and addressing style from the
/// environment (primed by earlier redirects through the shared
/// [`BucketParamsMap`]), signs outgoing requests with credentials from the
/// shared [`CredentialBroker`], and digests S3 error responses to recover
/// from region and endpoint redirects.
#[derive(Debug)]
pub struct S3Handle {
    ctx: Context,
    broker: CredentialBroker,
    bucket_params: Arc<BucketParamsMap>,

    bucket: String,
    object_key: String,
    endpoint: String,
    region: String,
    request_payer: Option<String>,
    use_https: bool,
    use_virtual_hosting: bool,
    query: BTreeMap<String, String>,
}

impl S3Handle {
    /// Bind `bucket`/`object_key` using configuration from the environment.
    ///
    /// Region precedence: `AWS_DEFAULT_REGION`, then the profile `region`
    /// key, then `AWS_REGION`, then `us-east-1`. Virtual hosting defaults to
    /// on for bucket names without a dot (a dotted bucket cannot appear in a
    /// TLS host name). Parameters recorded by earlier redirects for the same
    /// bucket override all of the above.
    pub async fn from_env(
        ctx: &Context,
        broker: CredentialBroker,
        bucket_params: Arc<BucketParamsMap>,
        bucket: &str,
        object_key: &str,
    ) -> Result<Self> {
        let mut region = ctx
            .env_var(AWS_REGION)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "us-east-1".to_string());
        if let Ok(profile) = crate::profile::load_profile(ctx, None, None, None).await {
            if let Some(profile_region) = profile.region.filter(|v| !v.is_empty()) {
                region = profile_region;
            }
        }
        if let Some(default_region) = ctx.env_var(AWS_DEFAULT_REGION).filter(|v| !v.is_empty()) {
            region = default_region;
        }

        let endpoint = ctx
            .env_var(AWS_S3_ENDPOINT)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "s3.amazonaws.com".to_string());

        let hostable = !bucket.contains('.');
        let use_virtual_hosting = match ctx.env_var(AWS_VIRTUAL_HOSTING) {
            Some(v) => crate::env::truthy(&v),
            None => hostable,
        };

        let mut handle = Self {
            ctx: ctx.clone(),
            broker,
            bucket_params,
            bucket: bucket.to_string(),
            object_key: object_key.to_string(),
            endpoint,
            region,
            request_payer: ctx.env_var(AWS_REQUEST_PAYER).filter(|v| !v.is_empty()),
            use_https: ctx.env_bool(AWS_HTTPS, true),
            use_virtual_hosting,
            query: BTreeMap::new(),
        };

        if let Some(params) = handle.bucket_params.get(bucket) {
            debug!("priming handle for {bucket} from recorded params: {params:?}");
            handle.region = params.region;
            handle.endpoint = params.endpoint;
            handle.use_virtual_hosting = params.use_virtual_hosting;
        }

        Ok(handle)
    }

    /// The bucket this handle addresses.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The object key this handle addresses.
    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    /// The current signing region.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The current endpoint host, without any bucket prefix.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the bucket is addressed as `{bucket}.{endpoint}`.
    pub fn use_virtual_hosting(&self) -> bool {
        self.use_virtual_hosting
    }

    /// The host requests are sent to.
    pub fn host(&self) -> String {
        if self.use_virtual_hosting && !self.bucket.is_empty() {
            format!("{}.{}", self.bucket, self.endpoint)
        } else {
            self.endpoint.clone()
        }
    }

    fn path(&self) -> String {
        let key = aws_uri_encode(&self.object_key, false);
        if self.bucket.is_empty() || self.use_virtual_hosting {
            format!("/{key}")
        } else {
            format!("/{}/{key}", self.bucket)
        }
    }

    fn query_string(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.query {
            out.push(if out.is_empty() { '?' } else { '&' });
            out.push_str(key);
            if !value.is_empty() {
                out.push('=');
                out.push_str(&aws_uri_encode(value, true));
            }
        }
        out
    }

    /// The effective URL, including any query parameters.
    pub fn url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!(
            "{scheme}://{}{}{}",
            self.host(),
            self.path(),
            self.query_string()
        )
    }

    /// Add a query parameter (a subresource such as `uploads`, or a listing
    /// parameter). Parameters are kept sorted by key.
    pub fn add_query_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query.insert(key.into(), value.into());
    }

    /// Drop all query parameters.
    pub fn reset_query_parameters(&mut self) {
        self.query.clear();
    }

    /// Produce the headers that authenticate a request for `payload`.
    ///
    /// Consults the credential broker (refreshing credentials within 60s of
    /// expiry), hashes the payload, and emits `x-amz-date`,
    /// `x-amz-content-sha256`, the optional session token and request payer
    /// headers, and the `Authorization` header. With anonymous credentials
    /// only the payload hash header is returned.
    pub async fn sign_request(&self, verb: Method, payload: &[u8]) -> Result<HeaderMap> {
        let cred = self.broker.get(&self.ctx).await?;

        let req = http::Request::builder()
            .method(verb)
            .uri(self.url())
            .header(X_AMZ_CONTENT_SHA_256, hex_sha256(payload))
            .body(Bytes::new())
            .map_err(|e| Error::unexpected("failed to build request").with_source(e))?;
        let (mut parts, _) = req.into_parts();

        let mut signer = RequestSigner::new("s3", &self.region);
        if let Some(payer) = &self.request_payer {
            signer = signer.with_request_payer(payer);
        }
        signer.sign(&self.ctx, &mut parts, &cred, SigningMethod::Header)?;

        Ok(parts.headers)
    }

    /// Build a presigned URL for this handle's object.
    ///
    /// Query parameters previously added to the handle are not carried
    /// over; the URL addresses the bare object. When the credential expires
    /// before the URL would, a forced refresh fetches a longer-lived one
    /// first (the effective expiry of a presigned URL is capped by its
    /// credential's).
    pub async fn presigned_url(&self, options: PresignOptions) -> Result<String> {
        let start = match options.start_time {
            Some(t) => t,
            None => match self.ctx.env_var(AWS_TIMESTAMP) {
                Some(fixed) => parse_amz_timestamp(&fixed)
                    .map_err(|e| e.with_context(format!("{AWS_TIMESTAMP}: {fixed}")))?,
                None => now(),
            },
        };

        let mut cred = self.broker.get(&self.ctx).await?;
        if let Some(expires_at) = cred.expires_in {
            let url_end = start
                + TimeDelta::from_std(options.expires_in)
                    .map_err(|e| Error::invalid_argument("expiry out of range").with_source(e))?;
            if url_end >= expires_at - TimeDelta::seconds(60) {
                cred = self.broker.refresh(&self.ctx).await?;
            }
        }

        let scheme = if self.use_https { "https" } else { "http" };
        let req = http::Request::builder()
            .method(options.verb)
            .uri(format!("{scheme}://{}{}", self.host(), self.path()))
            .body(Bytes::new())
            .map_err(|e| Error::unexpected("failed to build request").with_source(e))?;
        let (mut parts, _) = req.into_parts();

        RequestSigner::new("s3", &self.region).with_time(start).sign(
            &self.ctx,
            &mut parts,
            &cred,
            SigningMethod::Query(options.expires_in),
        )?;

        Ok(parts.uri.to_string())
    }

    /// Digest an S3 error response, adopting new endpoint/region state when
    /// the error is a redirect the handle can recover from.
    ///
    /// Region switches and permanent redirects are recorded in the shared
    /// bucket map so future handles for this bucket start out right;
    /// temporary redirects adjust only this handle.
    pub fn recover_from_error(
        &mut self,
        response_headers: &HeaderMap,
        body: &str,
    ) -> ErrorRecovery {
        let Some(parsed) = parse_error_body(body) else {
            return ErrorRecovery::Fatal(Error::new(
                ErrorKind::AwsError,
                format!("invalid AWS response: {body}"),
            ));
        };
        if parsed.code.is_empty() {
            return ErrorRecovery::Fatal(Error::new(
                ErrorKind::AwsError,
                format!("malformed AWS error response: {body}"),
            ));
        }

        match parsed.code.as_str() {
            "AuthorizationHeaderMalformed" => {
                let Some(region) = parsed.region else {
                    return ErrorRecovery::Fatal(Error::new(
                        ErrorKind::AwsError,
                        "AuthorizationHeaderMalformed without a Region node",
                    ));
                };
                debug!("switching to region {region}");
                self.region = region;
                self.record_bucket_params();
                ErrorRecovery::Retry
            }
            code @ ("PermanentRedirect" | "TemporaryRedirect") => {
                let is_temporary = code == "TemporaryRedirect";
                let Some(endpoint) = parsed.endpoint else {
                    return ErrorRecovery::Fatal(Error::new(
                        ErrorKind::AwsError,
                        format!("{code} without an Endpoint node"),
                    ));
                };

                let bucket_prefix = format!("{}.", self.bucket);
                if self.use_virtual_hosting && !endpoint.starts_with(&bucket_prefix) {
                    return ErrorRecovery::Fatal(Error::new(
                        ErrorKind::AwsError,
                        format!("unexpected redirect endpoint {endpoint}"),
                    ));
                }

                if !self.use_virtual_hosting && endpoint.starts_with(&bucket_prefix) {
                    // A path-style request redirected to a virtual-hosted
                    // endpoint. A dotted bucket cannot be part of a TLS
                    // host name, so when S3 also reports the bucket region
                    // we stay path-style against the regional endpoint.
                    let bucket_region = response_headers
                        .get(X_AMZ_BUCKET_REGION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    if self.bucket.contains('.') {
                        if let Some(region) = bucket_region {
                            debug!("switching to endpoint s3.{region}.amazonaws.com, path-style");
                            self.endpoint = format!("s3.{region}.amazonaws.com");
                            self.region = region;
                            self.use_virtual_hosting = false;
                            if !is_temporary {
                                self.record_bucket_params();
                            }
                            return ErrorRecovery::Retry;
                        }
                    }
                    debug!("switching to virtual hosting");
                    self.use_virtual_hosting = true;
                }

                self.endpoint = if self.use_virtual_hosting {
                    endpoint[bucket_prefix.len()..].to_string()
                } else {
                    endpoint
                };
                debug!("switching to endpoint {}", self.endpoint);

                if !is_temporary {
                    self.record_bucket_params();
                }
                ErrorRecovery::Retry
            }
            code => ErrorRecovery::Fatal(typed_error(code, &parsed.message)),
        }
    }

    fn record_bucket_params(&self) {
        if self.bucket.is_empty() {
            return;
        }
        self.bucket_params.update(
            &self.bucket,
            BucketParams {
                region: self.region.clone(),
                endpoint: self.endpoint.clone(),
                use_virtual_hosting: self.use_virtual_hosting,
            },
        );
    }
}
