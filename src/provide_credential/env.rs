use crate::constants::*;
use crate::{Context, Credential, CredentialSource, Error, ProvideCredential, Result};

/// EnvCredentialProvider loads AWS credentials from environment variables.
///
/// `AWS_NO_SIGN_REQUEST` short-circuits the whole chain with an anonymous
/// credential. Otherwise a set `AWS_SECRET_ACCESS_KEY` requires
/// `AWS_ACCESS_KEY_ID` alongside it; `AWS_SESSION_TOKEN` is optional.
#[derive(Debug, Default, Clone)]
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    /// Create a new EnvCredentialProvider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ProvideCredential for EnvCredentialProvider {
    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Credential>> {
        if ctx.env_bool(AWS_NO_SIGN_REQUEST, false) {
            return Ok(Some(Credential::anonymous()));
        }

        let Some(secret_access_key) = ctx.env_var(AWS_SECRET_ACCESS_KEY).filter(|v| !v.is_empty())
        else {
            return Ok(None);
        };

        let access_key_id = ctx
            .env_var(AWS_ACCESS_KEY_ID)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::credentials_malformed(format!(
                    "{AWS_SECRET_ACCESS_KEY} is set but {AWS_ACCESS_KEY_ID} is not"
                ))
            })?;

        Ok(Some(Credential {
            access_key_id,
            secret_access_key,
            session_token: ctx.env_var(AWS_SESSION_TOKEN).filter(|v| !v.is_empty()),
            expires_in: None,
            source: CredentialSource::Static,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReqwestHttpSend, StaticEnv, TokioFileRead};
    use std::collections::HashMap;

    fn ctx_with_env(envs: HashMap<String, String>) -> Context {
        Context::new(TokioFileRead, ReqwestHttpSend::default()).with_env(StaticEnv {
            home_dir: None,
            envs,
        })
    }

    #[tokio::test]
    async fn test_env_credentials() -> anyhow::Result<()> {
        let ctx = ctx_with_env(HashMap::from([
            (AWS_ACCESS_KEY_ID.to_string(), "access_key_id".to_string()),
            (
                AWS_SECRET_ACCESS_KEY.to_string(),
                "secret_access_key".to_string(),
            ),
        ]));

        let cred = EnvCredentialProvider::new()
            .provide_credential(&ctx)
            .await?
            .expect("credential must exist");
        assert_eq!(cred.access_key_id, "access_key_id");
        assert_eq!(cred.secret_access_key, "secret_access_key");
        assert!(cred.session_token.is_none());
        assert_eq!(cred.source, CredentialSource::Static);
        Ok(())
    }

    #[tokio::test]
    async fn test_env_credentials_with_session_token() -> anyhow::Result<()> {
        let ctx = ctx_with_env(HashMap::from([
            (AWS_ACCESS_KEY_ID.to_string(), "access_key_id".to_string()),
            (
                AWS_SECRET_ACCESS_KEY.to_string(),
                "secret_access_key".to_string(),
            ),
            (AWS_SESSION_TOKEN.to_string(), "session_token".to_string()),
        ]));

        let cred = EnvCredentialProvider::new()
            .provide_credential(&ctx)
            .await?
            .expect("credential must exist");
        assert_eq!(cred.session_token.as_deref(), Some("session_token"));
        Ok(())
    }

    #[tokio::test]
    async fn test_no_sign_request_yields_anonymous() -> anyhow::Result<()> {
        let ctx = ctx_with_env(HashMap::from([
            (AWS_NO_SIGN_REQUEST.to_string(), "YES".to_string()),
            // Keys present but ignored: anonymous wins.
            (AWS_ACCESS_KEY_ID.to_string(), "access_key_id".to_string()),
            (
                AWS_SECRET_ACCESS_KEY.to_string(),
                "secret_access_key".to_string(),
            ),
        ]));

        let cred = EnvCredentialProvider::new()
            .provide_credential(&ctx)
            .await?
            .expect("credential must exist");
        assert!(cred.is_anonymous());
        Ok(())
    }

    #[tokio::test]
    async fn test_secret_without_key_id_is_malformed() {
        let ctx = ctx_with_env(HashMap::from([(
            AWS_SECRET_ACCESS_KEY.to_string(),
            "secret_access_key".to_string(),
        )]));

        let err = EnvCredentialProvider::new()
            .provide_credential(&ctx)
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), crate::ErrorKind::CredentialsMalformed);
    }

    #[tokio::test]
    async fn test_missing_env_yields_none() -> anyhow::Result<()> {
        let ctx = ctx_with_env(HashMap::new());
        let cred = EnvCredentialProvider::new().provide_credential(&ctx).await?;
        assert!(cred.is_none());
        Ok(())
    }
}
