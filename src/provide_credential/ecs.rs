use crate::constants::*;
use crate::{Context, Credential, CredentialSource, Error, ProvideCredential, Result};
use bytes::Bytes;
use log::debug;
use serde::Deserialize;

/// EcsCredentialProvider fetches task-role credentials from the ECS
/// credential endpoint.
///
/// Engages when `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` (ECS) or
/// `AWS_CONTAINER_CREDENTIALS_FULL_URI` (Fargate) is set. When the EC2
/// metadata endpoint has been pointed somewhere non-default the container
/// path is skipped so the override stays authoritative.
#[derive(Debug, Default, Clone)]
pub struct EcsCredentialProvider;

impl EcsCredentialProvider {
    /// Create a new EcsCredentialProvider.
    pub fn new() -> Self {
        Self
    }

    fn endpoint(&self, ctx: &Context) -> Option<String> {
        // A redirected IMDS endpoint means credentials are expected from
        // there, not from the container endpoint.
        if ctx
            .env_var(AWS_EC2_METADATA_SERVICE_ENDPOINT)
            .is_some_and(|v| v != EC2_METADATA_ENDPOINT)
        {
            return None;
        }

        if let Some(full_uri) = ctx
            .env_var(AWS_CONTAINER_CREDENTIALS_FULL_URI)
            .filter(|v| !v.is_empty())
        {
            return Some(full_uri);
        }

        ctx.env_var(AWS_CONTAINER_CREDENTIALS_RELATIVE_URI)
            .filter(|v| !v.is_empty())
            .map(|relative| format!("{ECS_METADATA_ENDPOINT}{relative}"))
    }
}

#[async_trait::async_trait]
impl ProvideCredential for EcsCredentialProvider {
    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Credential>> {
        let Some(endpoint) = self.endpoint(ctx) else {
            return Ok(None);
        };

        debug!("fetching container credentials from {endpoint}");

        let req = http::Request::builder()
            .method(http::Method::GET)
            .uri(&endpoint)
            .body(Bytes::new())
            .map_err(|e| {
                Error::unexpected("failed to build container credentials request").with_source(e)
            })?;

        let resp = ctx
            .http_send_as_string(req)
            .await
            .map_err(|e| Error::transient("failed to reach container endpoint").with_source(e))?;
        if resp.status() != http::StatusCode::OK {
            return Err(Error::imds_unavailable(format!(
                "container credentials endpoint answered {}: {}",
                resp.status(),
                resp.body()
            )));
        }

        let creds: EcsCredentialResponse = serde_json::from_str(resp.body()).map_err(|e| {
            Error::credentials_malformed("failed to parse container credentials").with_source(e)
        })?;

        let expires_in = crate::time::parse_rfc3339(&creds.expiration)
            .map_err(|e| e.with_context(format!("expiration: {}", creds.expiration)))?;

        Ok(Some(Credential {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: Some(creds.token),
            expires_in: Some(expires_in),
            source: CredentialSource::Ecs,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EcsCredentialResponse {
    access_key_id: String,
    secret_access_key: String,
    token: String,
    expiration: String,
}
