use crate::constants::{AWS_STS_ENDPOINT, AWS_STS_REGION, AWS_STS_REGIONAL_ENDPOINTS};
use crate::time::parse_rfc3339;
use crate::{Context, Credential, CredentialSource, Error, Result};
use serde::Deserialize;

/// The STS endpoint and the region requests against it are signed with.
///
/// Resolved together so that a regional endpoint is always signed with its
/// own region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StsTarget {
    /// Host name, no scheme.
    pub endpoint: String,
    /// Signing region.
    pub region: String,
}

/// Resolve the STS endpoint and signing region.
///
/// Precedence:
///
/// 1. `AWS_STS_ENDPOINT` is used verbatim when set.
/// 2. `AWS_STS_REGIONAL_ENDPOINTS=legacy` selects the global
///    `sts.amazonaws.com` endpoint, signed as `us-east-1`.
/// 3. Otherwise (`regional`, the default) the endpoint is
///    `sts.{region}.amazonaws.com`.
///
/// The region is `AWS_STS_REGION` when set, then the caller hint, then
/// `us-east-1`. The STS region never mirrors the effective S3 region
/// implicitly; `AWS_STS_REGION` is the explicit override. `cn-` regions
/// live in the `.amazonaws.com.cn` partition.
pub fn sts_target(ctx: &Context, region_hint: Option<&str>) -> StsTarget {
    let region = ctx
        .env_var(AWS_STS_REGION)
        .filter(|v| !v.is_empty())
        .or_else(|| region_hint.map(str::to_string))
        .unwrap_or_else(|| "us-east-1".to_string());

    if let Some(endpoint) = ctx.env_var(AWS_STS_ENDPOINT).filter(|v| !v.is_empty()) {
        return StsTarget { endpoint, region };
    }

    let regional = ctx
        .env_var(AWS_STS_REGIONAL_ENDPOINTS)
        .map(|v| v != "legacy")
        .unwrap_or(true);

    if regional {
        let endpoint = if region.starts_with("cn-") {
            format!("sts.{region}.amazonaws.com.cn")
        } else {
            format!("sts.{region}.amazonaws.com")
        };
        StsTarget { endpoint, region }
    } else {
        let region = ctx
            .env_var(AWS_STS_REGION)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "us-east-1".to_string());
        let endpoint = if region.starts_with("cn-") {
            "sts.amazonaws.com.cn".to_string()
        } else {
            "sts.amazonaws.com".to_string()
        };
        StsTarget { endpoint, region }
    }
}

/// `<Credentials>` node shared by the AssumeRole responses.
#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct StsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: String,
}

impl StsCredentials {
    /// Convert into a [`Credential`], validating completeness.
    pub fn into_credential(self, source: CredentialSource) -> Result<Credential> {
        if self.access_key_id.is_empty() || self.secret_access_key.is_empty() {
            return Err(Error::assume_role_failed(
                "STS response carried no Credentials node",
            ));
        }

        let expires_in = parse_rfc3339(&self.expiration)
            .map_err(|e| e.with_context(format!("expiration: {}", self.expiration)))?;

        Ok(Credential {
            access_key_id: self.access_key_id,
            secret_access_key: self.secret_access_key,
            session_token: Some(self.session_token),
            expires_in: Some(expires_in),
            source,
        })
    }
}
