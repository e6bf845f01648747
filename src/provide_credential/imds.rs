use crate::constants::*;
use crate::{Context, Credential, CredentialSource, Error, ProvideCredential, Result};
use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use log::debug;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Probe timeout: absence of IMDS on a non-EC2 host must not stall requests.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// ImdsCredentialProvider fetches instance-role credentials from the EC2
/// instance metadata service.
///
/// The provider speaks IMDSv2 (token handshake) and falls back to IMDSv1
/// when the token endpoint does not answer. Before any network traffic it
/// checks the hypervisor markers in `/sys` so that non-EC2 hosts skip the
/// probe entirely; `AWS_EC2_AUTODETECT=NO` bypasses that check and
/// `AWS_EC2_METADATA_DISABLED=true` turns the provider off.
#[derive(Debug, Clone)]
pub struct ImdsCredentialProvider {
    disabled: Option<bool>,
    // The discovered IAM role name, kept across refreshes.
    role_name: Arc<Mutex<Option<String>>>,
}

impl Default for ImdsCredentialProvider {
    fn default() -> Self {
        Self {
            disabled: None,
            role_name: Arc::new(Mutex::new(None)),
        }
    }
}

impl ImdsCredentialProvider {
    /// Create a new ImdsCredentialProvider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable the provider.
    pub fn disabled(mut self) -> Self {
        self.disabled = Some(true);
        self
    }

    fn endpoint(&self, ctx: &Context) -> String {
        ctx.env_var(AWS_EC2_METADATA_SERVICE_ENDPOINT)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| EC2_METADATA_ENDPOINT.to_string())
    }

    /// Whether this machine could plausibly be an EC2 instance.
    ///
    /// Xen-generation instances expose `/sys/hypervisor/uuid` starting with
    /// `ec2`; Nitro-generation instances report `Amazon EC2` as the DMI
    /// system vendor. When a marker file exists but names another vendor the
    /// probe is skipped; when neither file is readable the network probe
    /// decides.
    async fn is_potentially_ec2(&self, ctx: &Context) -> bool {
        if !ctx.env_bool(AWS_EC2_AUTODETECT, true) {
            return true;
        }

        if let Ok(uuid) = ctx.file_read("/sys/hypervisor/uuid").await {
            return uuid.len() >= 3 && uuid[..3].eq_ignore_ascii_case(b"ec2");
        }

        if let Ok(vendor) = ctx.file_read("/sys/devices/virtual/dmi/id/sys_vendor").await {
            return vendor.len() >= 10 && vendor[..10].eq_ignore_ascii_case(b"Amazon EC2");
        }

        true
    }

    /// Fetch an IMDSv2 session token; `None` means fall back to IMDSv1.
    async fn fetch_imdsv2_token(&self, ctx: &Context, endpoint: &str) -> Option<String> {
        let req = http::Request::builder()
            .method(http::Method::PUT)
            .uri(format!("{endpoint}/latest/api/token"))
            .header(CONTENT_LENGTH, "0")
            .header("x-aws-ec2-metadata-token-ttl-seconds", "10")
            .body(Bytes::new())
            .ok()?;

        match tokio::time::timeout(PROBE_TIMEOUT, ctx.http_send_as_string(req)).await {
            Ok(Ok(resp)) if resp.status() == http::StatusCode::OK => Some(resp.into_body()),
            Ok(Ok(resp)) => {
                debug!("IMDSv2 token request answered {}, using IMDSv1", resp.status());
                None
            }
            Ok(Err(err)) => {
                debug!("IMDSv2 token request failed ({err:?}), using IMDSv1");
                None
            }
            Err(_) => {
                debug!("IMDSv2 token request timed out, using IMDSv1");
                None
            }
        }
    }

    async fn metadata_get(
        &self,
        ctx: &Context,
        url: &str,
        token: Option<&str>,
    ) -> Result<http::Response<String>> {
        let mut builder = http::Request::builder().method(http::Method::GET).uri(url);
        if let Some(token) = token {
            builder = builder.header("x-aws-ec2-metadata-token", token);
        }
        let req = builder
            .body(Bytes::new())
            .map_err(|e| Error::unexpected("failed to build metadata request").with_source(e))?;

        match tokio::time::timeout(PROBE_TIMEOUT, ctx.http_send_as_string(req)).await {
            Ok(resp) => resp,
            Err(_) => Err(Error::imds_unavailable(format!(
                "metadata request to {url} timed out"
            ))),
        }
    }

    /// Learn (or recall) the IAM role attached to this instance.
    async fn role_name(
        &self,
        ctx: &Context,
        endpoint: &str,
        token: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(name) = self.role_name.lock().expect("lock poisoned").clone() {
            return Ok(Some(name));
        }

        let url = format!("{endpoint}/latest/meta-data/iam/security-credentials/");
        let resp = match self.metadata_get(ctx, &url, token).await {
            Ok(resp) => resp,
            Err(err) => {
                debug!("no IAM role discovered, not an EC2 instance? {err:?}");
                return Ok(None);
            }
        };
        if resp.status() != http::StatusCode::OK {
            debug!("IAM role listing answered {}", resp.status());
            return Ok(None);
        }

        let name = resp.into_body().trim().to_string();
        if name.is_empty() {
            return Ok(None);
        }

        *self.role_name.lock().expect("lock poisoned") = Some(name.clone());
        Ok(Some(name))
    }
}

#[async_trait::async_trait]
impl ProvideCredential for ImdsCredentialProvider {
    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Credential>> {
        let disabled = self
            .disabled
            .unwrap_or_else(|| ctx.env_bool(AWS_EC2_METADATA_DISABLED, false));
        if disabled {
            return Ok(None);
        }

        let endpoint = self.endpoint(ctx);
        if endpoint == EC2_METADATA_ENDPOINT && !self.is_potentially_ec2(ctx).await {
            debug!("host does not look like an EC2 instance, skipping IMDS");
            return Ok(None);
        }

        let token = self.fetch_imdsv2_token(ctx, &endpoint).await;

        let Some(role) = self.role_name(ctx, &endpoint, token.as_deref()).await? else {
            return Ok(None);
        };

        let url = format!("{endpoint}/latest/meta-data/iam/security-credentials/{role}");
        let resp = self.metadata_get(ctx, &url, token.as_deref()).await?;
        if resp.status() != http::StatusCode::OK {
            return Err(Error::imds_unavailable(format!(
                "credential fetch for role {role} answered {}",
                resp.status()
            )));
        }

        let body = resp.into_body();
        let resp: InstanceSecurityCredentials = serde_json::from_str(&body)
            .map_err(|e| Error::credentials_malformed("failed to parse IMDS response").with_source(e))?;
        if !resp.code.is_empty() && resp.code != "Success" {
            return Err(Error::credentials_malformed(format!(
                "IMDS refused to hand out credentials: [{}] {}",
                resp.code, resp.message
            )));
        }

        let expires_in = crate::time::parse_rfc3339(&resp.expiration)
            .map_err(|e| e.with_context(format!("expiration: {}", resp.expiration)))?;

        Ok(Some(Credential {
            access_key_id: resp.access_key_id,
            secret_access_key: resp.secret_access_key,
            session_token: Some(resp.token),
            expires_in: Some(expires_in),
            source: CredentialSource::Ec2,
        }))
    }
}

/// The flat JSON document IMDS returns for a role.
#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct InstanceSecurityCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: String,
    expiration: String,

    code: String,
    message: String,
}
