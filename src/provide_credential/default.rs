use crate::broker::AssumeRoleStore;
use crate::provide_credential::{
    EcsCredentialProvider, EnvCredentialProvider, ImdsCredentialProvider,
    ProfileCredentialProvider, WebIdentityCredentialProvider,
};
use crate::{Context, Credential, ProvideCredential, ProvideCredentialChain, Result};

/// DefaultCredentialProvider tries every standard credential source in
/// priority order:
///
/// 1. Environment variables (including `AWS_NO_SIGN_REQUEST`)
/// 2. Config files (static keys, assume-role, web identity)
/// 3. Web identity from the environment
/// 4. ECS task-role endpoint
/// 5. EC2 instance metadata
///
/// Environment credentials always shadow config-file credentials, which in
/// turn shadow the metadata services.
#[derive(Debug)]
pub struct DefaultCredentialProvider {
    chain: ProvideCredentialChain,
}

impl Default for DefaultCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultCredentialProvider {
    /// Create a new `DefaultCredentialProvider` using the default chain.
    pub fn new() -> Self {
        Self::with_role_store(None)
    }

    /// Create the default chain, letting the profile provider record
    /// assume-role parameters into `store` for later refreshes.
    pub fn with_role_store(store: Option<AssumeRoleStore>) -> Self {
        let mut profile = ProfileCredentialProvider::new();
        if let Some(store) = store {
            profile = profile.with_role_store(store);
        }

        let chain = ProvideCredentialChain::new()
            .push(EnvCredentialProvider::new())
            .push(profile)
            .push(WebIdentityCredentialProvider::new())
            .push(EcsCredentialProvider::new())
            .push(ImdsCredentialProvider::new());

        Self { chain }
    }

    /// Create with a custom credential chain.
    pub fn with_chain(chain: ProvideCredentialChain) -> Self {
        Self { chain }
    }

    /// Add a credential provider in front of the chain.
    pub fn push_front(mut self, provider: impl ProvideCredential + 'static) -> Self {
        self.chain = self.chain.push_front(provider);
        self
    }
}

#[async_trait::async_trait]
impl ProvideCredential for DefaultCredentialProvider {
    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Credential>> {
        self.chain.provide_credential(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::{ReqwestHttpSend, StaticEnv, TokioFileRead};
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
    async fn test_env_shadows_profile() -> anyhow::Result<()> {
        let _ = env_logger::builder().is_test(true).try_init();

        let tmp_dir = tempdir()?;
        let file_path = tmp_dir.path().join("credentials");
        let mut f = File::create(&file_path)?;
        writeln!(f, "[default]")?;
        writeln!(f, "aws_access_key_id = FILEACCESSKEYID")?;
        writeln!(f, "aws_secret_access_key = FILESECRETACCESSKEY")?;

        let ctx = ctx_with_env(HashMap::from([
            (AWS_ACCESS_KEY_ID.to_string(), "env_access_key".to_string()),
            (
                AWS_SECRET_ACCESS_KEY.to_string(),
                "env_secret_key".to_string(),
            ),
            (
                AWS_SHARED_CREDENTIALS_FILE.to_string(),
                file_path.to_string_lossy().to_string(),
            ),
            (AWS_CONFIG_FILE.to_string(), "/non/existent".to_string()),
            (AWS_EC2_METADATA_DISABLED.to_string(), "true".to_string()),
        ]));

        let cred = DefaultCredentialProvider::new()
            .provide_credential(&ctx)
            .await?
            .expect("credential must exist");
        assert_eq!(cred.access_key_id, "env_access_key");
        Ok(())
    }

    #[tokio::test]
    async fn test_profile_when_env_empty() -> anyhow::Result<()> {
        let tmp_dir = tempdir()?;
        let file_path = tmp_dir.path().join("credentials");
        let mut f = File::create(&file_path)?;
        writeln!(f, "[default]")?;
        writeln!(f, "aws_access_key_id = FILEACCESSKEYID")?;
        writeln!(f, "aws_secret_access_key = FILESECRETACCESSKEY")?;

        let ctx = ctx_with_env(HashMap::from([
            (
                AWS_SHARED_CREDENTIALS_FILE.to_string(),
                file_path.to_string_lossy().to_string(),
            ),
            (AWS_CONFIG_FILE.to_string(), "/non/existent".to_string()),
            (AWS_EC2_METADATA_DISABLED.to_string(), "true".to_string()),
        ]));

        let cred = DefaultCredentialProvider::new()
            .provide_credential(&ctx)
            .await?
            .expect("credential must exist");
        assert_eq!(cred.access_key_id, "FILEACCESSKEYID");
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausted_chain_yields_none() -> anyhow::Result<()> {
        let ctx = ctx_with_env(HashMap::from([
            (AWS_CONFIG_FILE.to_string(), "/non/existent".to_string()),
            (
                AWS_SHARED_CREDENTIALS_FILE.to_string(),
                "/non/existent".to_string(),
            ),
            (AWS_EC2_METADATA_DISABLED.to_string(), "true".to_string()),
        ]));

        let cred = DefaultCredentialProvider::new().provide_credential(&ctx).await?;
        assert!(cred.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_anonymous_mode_wins_over_everything() -> anyhow::Result<()> {
        let ctx = ctx_with_env(HashMap::from([
            (AWS_NO_SIGN_REQUEST.to_string(), "YES".to_string()),
            (AWS_ACCESS_KEY_ID.to_string(), "env_access_key".to_string()),
            (
                AWS_SECRET_ACCESS_KEY.to_string(),
                "env_secret_key".to_string(),
            ),
        ]));

        let cred = DefaultCredentialProvider::new()
            .provide_credential(&ctx)
            .await?
            .expect("credential must exist");
        assert!(cred.is_anonymous());
        Ok(())
    }
}
