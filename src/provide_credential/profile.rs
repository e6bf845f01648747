use crate::broker::{AssumeRoleState, AssumeRoleStore, WebIdentitySource};
use crate::profile::load_profile;
use crate::provide_credential::{AssumeRoleCredentialProvider, WebIdentityCredentialProvider};
use crate::{Context, Credential, CredentialSource, Error, ProvideCredential, Result};
use log::debug;

/// ProfileCredentialProvider derives credentials from the AWS config files.
///
/// Resolution order inside the profile:
///
/// 1. static `aws_access_key_id` / `aws_secret_access_key`;
/// 2. `role_arn` + `source_profile`: resolve the source profile, then call
///    STS AssumeRole with it;
/// 3. `role_arn` + `web_identity_token_file`: call
///    AssumeRoleWithWebIdentity.
///
/// One level of indirection only: a source profile must resolve to static
/// keys or a web identity, never to another assumed role.
#[derive(Debug, Default)]
pub struct ProfileCredentialProvider {
    profile: Option<String>,
    credentials_file: Option<String>,
    config_file: Option<String>,
    role_store: Option<AssumeRoleStore>,
}

impl ProfileCredentialProvider {
    /// Create a new ProfileCredentialProvider with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the profile name to use.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Set the path to the credentials file.
    pub fn with_credentials_file(mut self, path: impl Into<String>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    /// Set the path to the config file.
    pub fn with_config_file(mut self, path: impl Into<String>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Record successful assume-role resolutions into `store`, so the
    /// broker can refresh them without re-reading the config files.
    pub fn with_role_store(mut self, store: AssumeRoleStore) -> Self {
        self.role_store = Some(store);
        self
    }
}

#[async_trait::async_trait]
impl ProvideCredential for ProfileCredentialProvider {
    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Credential>> {
        let profile = load_profile(
            ctx,
            self.profile.as_deref(),
            self.credentials_file.as_deref(),
            self.config_file.as_deref(),
        )
        .await?;

        if profile.has_static_keys() {
            return Ok(Some(Credential {
                access_key_id: profile.access_key_id.unwrap_or_default(),
                secret_access_key: profile.secret_access_key.unwrap_or_default(),
                session_token: profile.session_token,
                expires_in: None,
                source: CredentialSource::Profile,
            }));
        }

        let Some(role_arn) = profile.role_arn.as_deref() else {
            return Ok(None);
        };

        if let Some(source_profile) = profile.source_profile.as_deref() {
            let source = load_profile(
                ctx,
                Some(source_profile),
                self.credentials_file.as_deref(),
                self.config_file.as_deref(),
            )
            .await?;

            let (source_credential, web_identity) = if let (Some(src_role), Some(token_file)) =
                (source.role_arn.as_deref(), source.web_identity_token_file.as_deref())
            {
                // The source profile itself federates through web identity.
                let cred = WebIdentityCredentialProvider::from_profile(src_role, token_file)
                    .provide_credential(ctx)
                    .await?
                    .ok_or_else(|| {
                        Error::assume_role_failed(format!(
                            "source profile {source_profile} yielded no web identity credential"
                        ))
                    })?;
                (
                    cred,
                    Some(WebIdentitySource {
                        role_arn: src_role.to_string(),
                        token_file: token_file.to_string(),
                    }),
                )
            } else if source.has_static_keys() {
                (
                    Credential {
                        access_key_id: source.access_key_id.unwrap_or_default(),
                        secret_access_key: source.secret_access_key.unwrap_or_default(),
                        session_token: source.session_token,
                        expires_in: None,
                        source: CredentialSource::Profile,
                    },
                    None,
                )
            } else {
                return Err(Error::credentials_malformed(format!(
                    "cannot resolve credentials for source profile {source_profile}"
                )));
            };

            let mut provider =
                AssumeRoleCredentialProvider::new(role_arn, source_credential.clone());
            if let Some(name) = &profile.role_session_name {
                provider = provider.with_role_session_name(name);
            }
            if let Some(id) = &profile.external_id {
                provider = provider.with_external_id(id);
            }
            if let Some(serial) = &profile.mfa_serial {
                provider = provider.with_mfa_serial(serial);
            }

            let cred = provider.provide_credential(ctx).await?;

            if cred.is_some() {
                if let Some(store) = &self.role_store {
                    *store.lock().expect("lock poisoned") = Some(AssumeRoleState {
                        role_arn: role_arn.to_string(),
                        external_id: profile.external_id.clone(),
                        mfa_serial: profile.mfa_serial.clone(),
                        role_session_name: profile.role_session_name.clone(),
                        source_credential,
                        web_identity,
                    });
                }
            }

            return Ok(cred);
        }

        if let Some(token_file) = profile.web_identity_token_file.as_deref() {
            let mut provider = WebIdentityCredentialProvider::from_profile(role_arn, token_file);
            if let Some(name) = &profile.role_session_name {
                provider = provider.with_role_session_name(name);
            }
            return provider.provide_credential(ctx).await;
        }

        debug!("profile has role_arn but neither source_profile nor web_identity_token_file");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReqwestHttpSend, StaticEnv, TokioFileRead};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn ctx_with_env(envs: HashMap<String, String>) -> Context {
        Context::new(TokioFileRead, ReqwestHttpSend::default()).with_env(StaticEnv {
            home_dir: None,
            envs,
        })
    }

    #[tokio::test]
    async fn test_static_keys_from_credentials_file() -> anyhow::Result<()> {
        let _ = env_logger::builder().is_test(true).try_init();

        let tmp_dir = tempdir()?;
        let file_path = tmp_dir.path().join("credentials");
        let mut f = File::create(&file_path)?;
        writeln!(f, "[default]")?;
        writeln!(f, "aws_access_key_id = DEFAULTACCESSKEYID")?;
        writeln!(f, "aws_secret_access_key = DEFAULTSECRETACCESSKEY")?;
        writeln!(f, "aws_session_token = DEFAULTSESSIONTOKEN")?;
        writeln!(f)?;
        writeln!(f, "[profile1]")?;
        writeln!(f, "aws_access_key_id = PROFILE1ACCESSKEYID")?;
        writeln!(f, "aws_secret_access_key = PROFILE1SECRETACCESSKEY")?;

        let ctx = ctx_with_env(HashMap::new());

        let cred = ProfileCredentialProvider::new()
            .with_credentials_file(file_path.to_str().unwrap())
            .with_config_file("/non/existent")
            .provide_credential(&ctx)
            .await?
            .expect("credential must exist");
        assert_eq!(cred.access_key_id, "DEFAULTACCESSKEYID");
        assert_eq!(cred.secret_access_key, "DEFAULTSECRETACCESSKEY");
        assert_eq!(cred.session_token.as_deref(), Some("DEFAULTSESSIONTOKEN"));
        assert_eq!(cred.source, CredentialSource::Profile);

        let cred = ProfileCredentialProvider::new()
            .with_profile("profile1")
            .with_credentials_file(file_path.to_str().unwrap())
            .with_config_file("/non/existent")
            .provide_credential(&ctx)
            .await?
            .expect("credential must exist");
        assert_eq!(cred.access_key_id, "PROFILE1ACCESSKEYID");
        Ok(())
    }

    #[tokio::test]
    async fn test_profile_env_selection() -> anyhow::Result<()> {
        let tmp_dir = tempdir()?;
        let file_path = tmp_dir.path().join("credentials");
        let mut f = File::create(&file_path)?;
        writeln!(f, "[default]")?;
        writeln!(f, "aws_access_key_id = DEFAULTACCESSKEYID")?;
        writeln!(f, "aws_secret_access_key = DEFAULTSECRETACCESSKEY")?;
        writeln!(f)?;
        writeln!(f, "[other]")?;
        writeln!(f, "aws_access_key_id = OTHERACCESSKEYID")?;
        writeln!(f, "aws_secret_access_key = OTHERSECRETACCESSKEY")?;

        let ctx = ctx_with_env(HashMap::from([(
            crate::constants::AWS_PROFILE.to_string(),
            "other".to_string(),
        )]));

        let cred = ProfileCredentialProvider::new()
            .with_credentials_file(file_path.to_str().unwrap())
            .with_config_file("/non/existent")
            .provide_credential(&ctx)
            .await?
            .expect("credential must exist");
        assert_eq!(cred.access_key_id, "OTHERACCESSKEYID");
        Ok(())
    }

    #[tokio::test]
    async fn test_unresolvable_source_profile_is_malformed() -> anyhow::Result<()> {
        let tmp_dir = tempdir()?;
        let config_path = tmp_dir.path().join("config");
        let mut f = File::create(&config_path)?;
        writeln!(f, "[default]")?;
        writeln!(f, "role_arn = arn:aws:iam::123456789012:role/target")?;
        writeln!(f, "source_profile = missing")?;

        let ctx = ctx_with_env(HashMap::new());

        let err = ProfileCredentialProvider::new()
            .with_credentials_file("/non/existent")
            .with_config_file(config_path.to_str().unwrap())
            .provide_credential(&ctx)
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), crate::ErrorKind::CredentialsMalformed);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_profile_yields_none() -> anyhow::Result<()> {
        let ctx = ctx_with_env(HashMap::new());
        let cred = ProfileCredentialProvider::new()
            .with_credentials_file("/non/existent")
            .with_config_file("/non/existent")
            .provide_credential(&ctx)
            .await?;
        assert!(cred.is_none());
        Ok(())
    }
}
