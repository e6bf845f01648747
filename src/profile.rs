//! Reader for the `~/.aws/credentials` and `~/.aws/config` INI files.

use crate::constants::*;
use crate::{Context, Error, Result};
use ini::Ini;
use log::{debug, warn};

/// Everything a profile section may carry.
///
/// The credentials file only ever contributes the three `aws_*` keys; the
/// config file may also carry the region and the assume-role settings.
#[derive(Debug, Default, Clone)]
pub struct ProfileConfig {
    /// `aws_access_key_id`.
    pub access_key_id: Option<String>,
    /// `aws_secret_access_key`.
    pub secret_access_key: Option<String>,
    /// `aws_session_token`.
    pub session_token: Option<String>,
    /// `region`.
    pub region: Option<String>,
    /// `role_arn`, the role to assume.
    pub role_arn: Option<String>,
    /// `source_profile`, whose credentials sign the AssumeRole call.
    pub source_profile: Option<String>,
    /// `external_id` forwarded to STS.
    pub external_id: Option<String>,
    /// `mfa_serial` forwarded to STS as SerialNumber.
    pub mfa_serial: Option<String>,
    /// `role_session_name`.
    pub role_session_name: Option<String>,
    /// `web_identity_token_file` for federated roles.
    pub web_identity_token_file: Option<String>,
}

impl ProfileConfig {
    /// Whether the profile carries a complete static key pair.
    pub fn has_static_keys(&self) -> bool {
        self.access_key_id.as_deref().is_some_and(|v| !v.is_empty())
            && self
                .secret_access_key
                .as_deref()
                .is_some_and(|v| !v.is_empty())
    }
}

/// Resolve the profile name to read.
///
/// Priority: explicit argument, then `AWS_DEFAULT_PROFILE`, then
/// `AWS_PROFILE`, then `"default"`.
pub fn resolve_profile_name(ctx: &Context, explicit: Option<&str>) -> String {
    if let Some(name) = explicit.filter(|v| !v.is_empty()) {
        return name.to_string();
    }
    if let Some(name) = ctx.env_var(AWS_DEFAULT_PROFILE).filter(|v| !v.is_empty()) {
        return name;
    }
    if let Some(name) = ctx.env_var(AWS_PROFILE).filter(|v| !v.is_empty()) {
        return name;
    }
    "default".to_string()
}

fn credentials_file_path(ctx: &Context, explicit: Option<&str>) -> Option<String> {
    let path = match explicit {
        Some(p) => p.to_string(),
        None => ctx
            .env_var(AWS_SHARED_CREDENTIALS_FILE)
            .unwrap_or_else(|| "~/.aws/credentials".to_string()),
    };
    ctx.expand_home_dir(&path)
}

fn config_file_path(ctx: &Context, explicit: Option<&str>) -> Option<String> {
    let path = match explicit {
        Some(p) => p.to_string(),
        None => ctx
            .env_var(AWS_CONFIG_FILE)
            .unwrap_or_else(|| "~/.aws/config".to_string()),
    };
    ctx.expand_home_dir(&path)
}

async fn load_ini(ctx: &Context, path: &str) -> Result<Option<Ini>> {
    let content = match ctx.file_read(path).await {
        Ok(content) => content,
        Err(err) => {
            debug!("skipping unreadable profile file {path}: {err:?}");
            return Ok(None);
        }
    };

    Ini::load_from_str(&String::from_utf8_lossy(&content))
        .map(Some)
        .map_err(|e| {
            Error::credentials_malformed(format!("failed to parse {path}"))
                .with_source(anyhow::Error::new(e))
        })
}

/// Keep the credentials-file value on conflict, surfacing a warning.
fn merge_preferring_existing(
    key: &str,
    existing: &mut Option<String>,
    incoming: &str,
    credentials_path: &str,
    config_path: &str,
) {
    match existing {
        None => *existing = Some(incoming.to_string()),
        Some(current) if current != incoming => {
            warn!(
                "{key} defined in both {credentials_path} and {config_path}, \
                 the value from {credentials_path} wins"
            );
        }
        Some(_) => {}
    }
}

/// Read the credentials and config files and merge them into one profile
/// record.
///
/// The credentials file names sections `[profile]`; the config file accepts
/// both `[profile]` and `[profile profile]` for non-default profiles. When
/// both files define the same key the credentials value wins and a warning
/// is emitted.
pub async fn load_profile(
    ctx: &Context,
    profile: Option<&str>,
    credentials_file: Option<&str>,
    config_file: Option<&str>,
) -> Result<ProfileConfig> {
    let profile = resolve_profile_name(ctx, profile);
    let mut out = ProfileConfig::default();

    let credentials_path = credentials_file_path(ctx, credentials_file).unwrap_or_default();
    let config_path = config_file_path(ctx, config_file).unwrap_or_default();

    if !credentials_path.is_empty() {
        if let Some(conf) = load_ini(ctx, &credentials_path).await? {
            if let Some(props) = conf.section(Some(profile.as_str())) {
                out.access_key_id = props.get("aws_access_key_id").map(str::to_string);
                out.secret_access_key = props.get("aws_secret_access_key").map(str::to_string);
                out.session_token = props.get("aws_session_token").map(str::to_string);
            } else {
                debug!("profile {profile} not found in {credentials_path}");
            }
        }
    }

    if !config_path.is_empty() {
        if let Some(conf) = load_ini(ctx, &config_path).await? {
            // The config file nominally names non-default sections
            // `[profile foo]`, but the bare form is accepted too.
            let props = conf
                .section(Some(profile.as_str()))
                .or_else(|| conf.section(Some(format!("profile {profile}").as_str())));

            if let Some(props) = props {
                for (key, value) in props.iter() {
                    match key {
                        "aws_access_key_id" => merge_preferring_existing(
                            key,
                            &mut out.access_key_id,
                            value,
                            &credentials_path,
                            &config_path,
                        ),
                        "aws_secret_access_key" => merge_preferring_existing(
                            key,
                            &mut out.secret_access_key,
                            value,
                            &credentials_path,
                            &config_path,
                        ),
                        "aws_session_token" => merge_preferring_existing(
                            key,
                            &mut out.session_token,
                            value,
                            &credentials_path,
                            &config_path,
                        ),
                        "region" => out.region = Some(value.to_string()),
                        "role_arn" => out.role_arn = Some(value.to_string()),
                        "source_profile" => out.source_profile = Some(value.to_string()),
                        "external_id" => out.external_id = Some(value.to_string()),
                        "mfa_serial" => out.mfa_serial = Some(value.to_string()),
                        "role_session_name" => out.role_session_name = Some(value.to_string()),
                        "web_identity_token_file" => {
                            out.web_identity_token_file = Some(value.to_string())
                        }
                        _ => {}
                    }
                }
            } else {
                debug!("profile {profile} not found in {config_path}");
            }
        }
    }

    Ok(out)
}
