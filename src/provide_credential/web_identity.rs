use crate::constants::*;
use crate::provide_credential::utils::{sts_target, StsCredentials};
use crate::{Context, Credential, CredentialSource, Error, ProvideCredential, Result};
use bytes::Bytes;
use percent_encoding::utf8_percent_encode;
use serde::Deserialize;

/// WebIdentityCredentialProvider exchanges an OIDC token for temporary
/// credentials via STS `AssumeRoleWithWebIdentity`.
///
/// The STS call is deliberately unsigned: federation requests authenticate
/// through the token itself.
#[derive(Debug, Default, Clone)]
pub struct WebIdentityCredentialProvider {
    role_arn: Option<String>,
    token_file: Option<String>,
    role_session_name: Option<String>,
    region: Option<String>,
}

impl WebIdentityCredentialProvider {
    /// Create a provider that reads its settings from the environment
    /// (`AWS_ROLE_ARN`, `AWS_WEB_IDENTITY_TOKEN_FILE`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider with explicit role and token file, as found in a
    /// config-file profile.
    pub fn from_profile(role_arn: &str, token_file: &str) -> Self {
        Self {
            role_arn: Some(role_arn.to_string()),
            token_file: Some(token_file.to_string()),
            role_session_name: None,
            region: None,
        }
    }

    /// Set the role session name.
    pub fn with_role_session_name(mut self, name: &str) -> Self {
        self.role_session_name = Some(name.to_string());
        self
    }

    /// Set the region used for the regional STS endpoint.
    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    fn session_name(&self, ctx: &Context) -> String {
        self.role_session_name
            .clone()
            .or_else(|| ctx.env_var(AWS_ROLE_SESSION_NAME))
            .unwrap_or_else(|| "credsign".to_string())
    }
}

#[async_trait::async_trait]
impl ProvideCredential for WebIdentityCredentialProvider {
    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Credential>> {
        let role_arn = match self.role_arn.clone().or_else(|| ctx.env_var(AWS_ROLE_ARN)) {
            Some(v) if !v.is_empty() => v,
            _ => return Ok(None),
        };
        let token_file = match self
            .token_file
            .clone()
            .or_else(|| ctx.env_var(AWS_WEB_IDENTITY_TOKEN_FILE))
        {
            Some(v) if !v.is_empty() => v,
            _ => return Ok(None),
        };

        let mut token = ctx.file_read_as_string(&token_file).await.map_err(|e| {
            Error::credentials_malformed(format!("failed to read token file {token_file}"))
                .with_source(anyhow::Error::new(e))
        })?;
        // Token files commonly end with a newline the issuer did not sign.
        if token.ends_with('\n') {
            token.pop();
        }
        if token.is_empty() {
            return Err(Error::credentials_malformed(format!(
                "web identity token file {token_file} is empty"
            )));
        }

        let endpoint = sts_target(ctx, self.region.as_deref()).endpoint;
        let url = format!(
            "https://{endpoint}/?Action=AssumeRoleWithWebIdentity&Version=2011-06-15\
             &RoleArn={}&RoleSessionName={}&WebIdentityToken={}",
            utf8_percent_encode(&role_arn, &AWS_QUERY_ENCODE_SET),
            utf8_percent_encode(&self.session_name(ctx), &AWS_QUERY_ENCODE_SET),
            utf8_percent_encode(&token, &AWS_QUERY_ENCODE_SET),
        );

        let req = http::Request::builder()
            .method(http::Method::GET)
            .uri(url)
            .header(
                http::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(Bytes::new())
            .map_err(|e| Error::unexpected("failed to build STS request").with_source(e))?;

        let resp = ctx
            .http_send_as_string(req)
            .await
            .map_err(|e| Error::transient("failed to reach STS").with_source(anyhow::Error::new(e)))?;
        if resp.status() != http::StatusCode::OK {
            return Err(Error::assume_role_failed(format!(
                "AssumeRoleWithWebIdentity failed: {}",
                resp.into_body()
            )));
        }

        let resp: AssumeRoleWithWebIdentityResponse = quick_xml::de::from_str(&resp.into_body())
            .map_err(|e| Error::assume_role_failed("failed to parse STS response").with_source(e))?;

        resp.result
            .credentials
            .into_credential(CredentialSource::WebIdentity)
            .map(Some)
    }
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct AssumeRoleWithWebIdentityResponse {
    #[serde(rename = "AssumeRoleWithWebIdentityResult")]
    result: AssumeRoleWithWebIdentityResult,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct AssumeRoleWithWebIdentityResult {
    credentials: StsCredentials,
}
