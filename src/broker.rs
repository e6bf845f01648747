use crate::provide_credential::{
    AssumeRoleCredentialProvider, DefaultCredentialProvider, WebIdentityCredentialProvider,
};
use crate::{Context, Credential, Error, ProvideCredential, Result};
use log::debug;
use std::sync::{Arc, Mutex};

/// How a previously assumed role gets refreshed.
#[derive(Debug, Clone)]
pub struct WebIdentitySource {
    /// Role assumed through the web identity federation.
    pub role_arn: String,
    /// Path of the OIDC token file.
    pub token_file: String,
}

/// The parameters of an assumed role, recorded at first resolution so that
/// refreshes can go straight to STS without re-reading the config files.
#[derive(Debug, Clone)]
pub struct AssumeRoleState {
    /// The assumed role.
    pub role_arn: String,
    /// Optional ExternalId forwarded to STS.
    pub external_id: Option<String>,
    /// Optional MFA device serial forwarded to STS.
    pub mfa_serial: Option<String>,
    /// Session name for the assumed role.
    pub role_session_name: Option<String>,
    /// The credential that signs the AssumeRole request.
    pub source_credential: Credential,
    /// Set when the source credential itself refreshes through web
    /// identity federation.
    pub web_identity: Option<WebIdentitySource>,
}

/// Shared slot the profile provider records assume-role parameters into.
pub type AssumeRoleStore = Arc<Mutex<Option<AssumeRoleState>>>;

/// CredentialBroker is the process-wide credential cache.
///
/// Any number of request helpers share one broker, so a credential resolved
/// for one S3 handle serves them all until it nears expiry. All cache state
/// sits behind mutexes; network calls (STS, IMDS) never run while a lock is
/// held. Two refreshers may race, in which case the slower one wins the
/// final write; both results are valid, and the next expiry check sorts it
/// out.
#[derive(Debug, Clone)]
pub struct CredentialBroker {
    cached: Arc<Mutex<Option<Credential>>>,
    assume_role: AssumeRoleStore,
    chain: Arc<dyn ProvideCredential>,
}

impl Default for CredentialBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialBroker {
    /// Create a broker backed by the default provider chain.
    pub fn new() -> Self {
        let assume_role: AssumeRoleStore = Arc::new(Mutex::new(None));
        let chain = DefaultCredentialProvider::with_role_store(Some(assume_role.clone()));
        Self {
            cached: Arc::new(Mutex::new(None)),
            assume_role,
            chain: Arc::new(chain),
        }
    }

    /// Create a broker backed by a custom provider (or chain).
    pub fn with_provider(provider: impl ProvideCredential + 'static) -> Self {
        Self {
            cached: Arc::new(Mutex::new(None)),
            assume_role: Arc::new(Mutex::new(None)),
            chain: Arc::new(provider),
        }
    }

    /// Get a usable credential, resolving or refreshing as needed.
    ///
    /// The cached credential is reused while it has more than 60s of
    /// validity left; expired credentials never escape this function.
    pub async fn get(&self, ctx: &Context) -> Result<Credential> {
        {
            let cached = self.cached.lock().expect("lock poisoned");
            if let Some(cred) = cached.as_ref() {
                if cred.is_valid() {
                    return Ok(cred.clone());
                }
            }
        }

        // Snapshot the assumed-role parameters, then resolve without
        // holding any lock.
        let assume_role = self.assume_role.lock().expect("lock poisoned").clone();

        if let Some(state) = assume_role {
            match self.refresh_assumed_role(ctx, &state).await {
                Ok(cred) => {
                    *self.cached.lock().expect("lock poisoned") = Some(cred.clone());
                    return Ok(cred);
                }
                Err(err) => {
                    debug!("assumed-role refresh failed, rewalking the chain: {err:?}");
                }
            }
        }

        match self.chain.provide_credential(ctx).await? {
            Some(cred) => {
                *self.cached.lock().expect("lock poisoned") = Some(cred.clone());
                Ok(cred)
            }
            None => Err(Error::credentials_not_found(
                "no credential source yielded credentials",
            )),
        }
    }

    /// Drop the cached credential and resolve afresh.
    pub async fn refresh(&self, ctx: &Context) -> Result<Credential> {
        *self.cached.lock().expect("lock poisoned") = None;
        self.get(ctx).await
    }

    /// Reset all cached state. Intended for test isolation.
    pub fn clear(&self) {
        *self.cached.lock().expect("lock poisoned") = None;
        *self.assume_role.lock().expect("lock poisoned") = None;
    }

    async fn refresh_assumed_role(
        &self,
        ctx: &Context,
        state: &AssumeRoleState,
    ) -> Result<Credential> {
        let source_credential = match &state.web_identity {
            Some(wi) => {
                let cred = WebIdentityCredentialProvider::from_profile(&wi.role_arn, &wi.token_file)
                    .provide_credential(ctx)
                    .await?
                    .ok_or_else(|| {
                        Error::assume_role_failed("web identity source yielded no credential")
                    })?;
                // Remember the refreshed source for the next round.
                if let Some(recorded) = self.assume_role.lock().expect("lock poisoned").as_mut() {
                    recorded.source_credential = cred.clone();
                }
                cred
            }
            None => state.source_credential.clone(),
        };

        let mut provider = AssumeRoleCredentialProvider::new(&state.role_arn, source_credential);
        if let Some(name) = &state.role_session_name {
            provider = provider.with_role_session_name(name);
        }
        if let Some(id) = &state.external_id {
            provider = provider.with_external_id(id);
        }
        if let Some(serial) = &state.mfa_serial {
            provider = provider.with_mfa_serial(serial);
        }

        provider
            .provide_credential(ctx)
            .await?
            .ok_or_else(|| Error::assume_role_failed("AssumeRole yielded no credential"))
    }
}
