//! Provider-chain behavior driven through a mock transport: chain order,
//! STS exchanges, IMDS fallback, broker refresh rules.

use bytes::Bytes;
use credsign::{
    Context, CredentialBroker, CredentialSource, HttpSend, ProvideCredential,
    ProvideCredentialChain, StaticEnv, TokioFileRead, WebIdentityCredentialProvider,
};
use credsign::{DefaultCredentialProvider, ProfileCredentialProvider};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

/// Serves canned responses by URL substring; records every request.
#[derive(Debug, Default)]
struct MockHttpSend {
    // (method, uri substring) -> (status, body)
    routes: Vec<(http::Method, String, u16, String)>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: http::Method,
    uri: String,
    has_authorization: bool,
    has_imds_token: bool,
}

impl MockHttpSend {
    fn route(mut self, method: http::Method, uri_part: &str, status: u16, body: &str) -> Self {
        self.routes
            .push((method, uri_part.to_string(), status, body.to_string()));
        self
    }

    fn requests(&self) -> Arc<Mutex<Vec<RecordedRequest>>> {
        self.requests.clone()
    }
}

#[async_trait::async_trait]
impl HttpSend for MockHttpSend {
    async fn http_send(
        &self,
        req: http::Request<Bytes>,
    ) -> credsign::Result<http::Response<Bytes>> {
        let uri = req.uri().to_string();
        self.requests.lock().unwrap().push(RecordedRequest {
            method: req.method().clone(),
            uri: uri.clone(),
            has_authorization: req.headers().contains_key(http::header::AUTHORIZATION),
            has_imds_token: req.headers().contains_key("x-aws-ec2-metadata-token"),
        });

        for (method, uri_part, status, body) in &self.routes {
            if req.method() == method && uri.contains(uri_part.as_str()) {
                return Ok(http::Response::builder()
                    .status(*status)
                    .body(Bytes::from(body.clone()))
                    .expect("response must build"));
            }
        }
        Err(credsign::Error::transient(format!("no route for {uri}")))
    }
}

fn ctx_with(http: MockHttpSend, envs: HashMap<String, String>) -> Context {
    Context::new(TokioFileRead, http).with_env(StaticEnv {
        home_dir: None,
        envs,
    })
}

fn sts_assume_role_body() -> String {
    r#"<AssumeRoleResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <AssumeRoleResult>
    <Credentials>
      <AccessKeyId>ASIAASSUMEDROLEKEY</AccessKeyId>
      <SecretAccessKey>assumed_role_secret</SecretAccessKey>
      <SessionToken>assumed_role_token</SessionToken>
      <Expiration>2100-01-01T00:00:00Z</Expiration>
    </Credentials>
  </AssumeRoleResult>
</AssumeRoleResponse>"#
        .to_string()
}

fn sts_web_identity_body() -> String {
    r#"<AssumeRoleWithWebIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <AssumeRoleWithWebIdentityResult>
    <Credentials>
      <AccessKeyId>ASIAWEBIDENTITYKEY</AccessKeyId>
      <SecretAccessKey>web_identity_secret</SecretAccessKey>
      <SessionToken>web_identity_token</SessionToken>
      <Expiration>2100-01-01T00:00:00Z</Expiration>
    </Credentials>
  </AssumeRoleWithWebIdentityResult>
</AssumeRoleWithWebIdentityResponse>"#
        .to_string()
}

const IMDS_CREDENTIALS: &str = r#"{
  "Code" : "Success",
  "LastUpdated" : "2017-07-03T16:20:17Z",
  "Type" : "AWS-HMAC",
  "AccessKeyId" : "ASIAINSTANCEKEY",
  "SecretAccessKey" : "instance_secret",
  "Token" : "instance_token",
  "Expiration" : "2100-01-01T00:00:00Z"
}"#;

#[tokio::test]
async fn test_assume_role_from_profile() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let tmp_dir = tempdir()?;
    let creds_path = tmp_dir.path().join("credentials");
    let mut f = File::create(&creds_path)?;
    writeln!(f, "[base]")?;
    writeln!(f, "aws_access_key_id = BASEACCESSKEYID")?;
    writeln!(f, "aws_secret_access_key = base_secret")?;

    let config_path = tmp_dir.path().join("config");
    let mut f = File::create(&config_path)?;
    writeln!(f, "[profile ci]")?;
    writeln!(f, "role_arn = arn:aws:iam::123456789012:role/ci")?;
    writeln!(f, "source_profile = base")?;
    writeln!(f, "external_id = xid")?;

    let http = MockHttpSend::default().route(
        http::Method::GET,
        "Action=AssumeRole&",
        200,
        &sts_assume_role_body(),
    );
    let requests = http.requests();
    let ctx = ctx_with(http, HashMap::new());

    let cred = ProfileCredentialProvider::new()
        .with_profile("ci")
        .with_credentials_file(creds_path.to_string_lossy())
        .with_config_file(config_path.to_string_lossy())
        .provide_credential(&ctx)
        .await?
        .expect("credential must exist");

    assert_eq!(cred.access_key_id, "ASIAASSUMEDROLEKEY");
    assert_eq!(cred.session_token.as_deref(), Some("assumed_role_token"));
    assert_eq!(cred.source, CredentialSource::AssumedRole);
    assert!(cred.expires_in.is_some());

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let sts_call = &requests[0];
    assert!(sts_call.uri.contains("Action=AssumeRole"));
    assert!(sts_call.uri.contains("ExternalId=xid"));
    assert!(
        sts_call.has_authorization,
        "AssumeRole must be signed with the source profile credentials"
    );
    Ok(())
}

#[tokio::test]
async fn test_web_identity_from_env_trims_token_newline() -> anyhow::Result<()> {
    let tmp_dir = tempdir()?;
    let token_path = tmp_dir.path().join("token");
    std::fs::write(&token_path, "oidc-token-value\n")?;

    let http = MockHttpSend::default().route(
        http::Method::GET,
        "Action=AssumeRoleWithWebIdentity",
        200,
        &sts_web_identity_body(),
    );
    let requests = http.requests();
    let ctx = ctx_with(
        http,
        HashMap::from([
            (
                "AWS_ROLE_ARN".to_string(),
                "arn:aws:iam::123456789012:role/web".to_string(),
            ),
            (
                "AWS_WEB_IDENTITY_TOKEN_FILE".to_string(),
                token_path.to_string_lossy().to_string(),
            ),
        ]),
    );

    let cred = WebIdentityCredentialProvider::new()
        .provide_credential(&ctx)
        .await?
        .expect("credential must exist");

    assert_eq!(cred.access_key_id, "ASIAWEBIDENTITYKEY");
    assert_eq!(cred.source, CredentialSource::WebIdentity);

    let requests = requests.lock().unwrap();
    let sts_call = &requests[0];
    assert!(sts_call.uri.contains("WebIdentityToken=oidc-token-value"));
    assert!(
        !sts_call.uri.contains("%0A"),
        "trailing newline must be trimmed from the token"
    );
    assert!(
        !sts_call.has_authorization,
        "federation requests are unsigned"
    );
    Ok(())
}

#[tokio::test]
async fn test_imdsv2_token_failure_falls_back_to_v1() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    // No route for the token PUT: the probe fails and the provider retries
    // without a token, IMDSv1 style.
    let http = MockHttpSend::default()
        .route(
            http::Method::GET,
            "/latest/meta-data/iam/security-credentials/instance-role",
            200,
            IMDS_CREDENTIALS,
        )
        .route(
            http::Method::GET,
            "/latest/meta-data/iam/security-credentials/",
            200,
            "instance-role",
        );
    let requests = http.requests();
    let ctx = ctx_with(
        http,
        HashMap::from([("AWS_EC2_AUTODETECT".to_string(), "NO".to_string())]),
    );

    let cred = DefaultCredentialProvider::new()
        .provide_credential(&ctx)
        .await?
        .expect("credential must exist");

    assert_eq!(cred.access_key_id, "ASIAINSTANCEKEY");
    assert_eq!(cred.session_token.as_deref(), Some("instance_token"));
    assert_eq!(cred.source, CredentialSource::Ec2);

    let requests = requests.lock().unwrap();
    let token_put = requests
        .iter()
        .find(|r| r.method == http::Method::PUT && r.uri.contains("/latest/api/token"))
        .expect("IMDSv2 token probe must happen first");
    assert!(!token_put.has_imds_token);
    let creds_get = requests
        .iter()
        .find(|r| r.uri.contains("security-credentials/instance-role"))
        .expect("credential fetch must happen");
    assert!(
        !creds_get.has_imds_token,
        "IMDSv1 fallback must not carry a token header"
    );
    Ok(())
}

#[tokio::test]
async fn test_imdsv2_token_is_used_when_available() -> anyhow::Result<()> {
    let http = MockHttpSend::default()
        .route(http::Method::PUT, "/latest/api/token", 200, "imds-token")
        .route(
            http::Method::GET,
            "/latest/meta-data/iam/security-credentials/instance-role",
            200,
            IMDS_CREDENTIALS,
        )
        .route(
            http::Method::GET,
            "/latest/meta-data/iam/security-credentials/",
            200,
            "instance-role",
        );
    let requests = http.requests();
    let ctx = ctx_with(
        http,
        HashMap::from([("AWS_EC2_AUTODETECT".to_string(), "NO".to_string())]),
    );

    let cred = DefaultCredentialProvider::new()
        .provide_credential(&ctx)
        .await?
        .expect("credential must exist");
    assert_eq!(cred.access_key_id, "ASIAINSTANCEKEY");

    let requests = requests.lock().unwrap();
    let creds_get = requests
        .iter()
        .find(|r| r.uri.contains("security-credentials/instance-role"))
        .expect("credential fetch must happen");
    assert!(creds_get.has_imds_token, "IMDSv2 requests carry the token");
    Ok(())
}

#[tokio::test]
async fn test_provider_failure_advances_the_chain() -> anyhow::Result<()> {
    // A provider that always errors, chained before a working one: the
    // chain logs and moves on.
    #[derive(Debug)]
    struct FailingProvider;

    #[async_trait::async_trait]
    impl ProvideCredential for FailingProvider {
        async fn provide_credential(
            &self,
            _: &Context,
        ) -> credsign::Result<Option<credsign::Credential>> {
            Err(credsign::Error::transient("flaky source"))
        }
    }

    #[derive(Debug)]
    struct WorkingProvider;

    #[async_trait::async_trait]
    impl ProvideCredential for WorkingProvider {
        async fn provide_credential(
            &self,
            _: &Context,
        ) -> credsign::Result<Option<credsign::Credential>> {
            Ok(Some(credsign::Credential {
                access_key_id: "working".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
                expires_in: None,
                source: CredentialSource::Static,
            }))
        }
    }

    let chain = ProvideCredentialChain::new()
        .push(FailingProvider)
        .push(WorkingProvider);
    let ctx = ctx_with(MockHttpSend::default(), HashMap::new());

    let cred = chain
        .provide_credential(&ctx)
        .await?
        .expect("credential must exist");
    assert_eq!(cred.access_key_id, "working");
    Ok(())
}

#[tokio::test]
async fn test_broker_refreshes_assumed_role_without_rereading_config() -> anyhow::Result<()> {
    let tmp_dir = tempdir()?;
    let creds_path = tmp_dir.path().join("credentials");
    let mut f = File::create(&creds_path)?;
    writeln!(f, "[base]")?;
    writeln!(f, "aws_access_key_id = BASEACCESSKEYID")?;
    writeln!(f, "aws_secret_access_key = base_secret")?;

    let config_path = tmp_dir.path().join("config");
    let mut f = File::create(&config_path)?;
    writeln!(f, "[profile default]")?;
    writeln!(f, "role_arn = arn:aws:iam::123456789012:role/ci")?;
    writeln!(f, "source_profile = base")?;

    // STS hands out a credential that is already inside the 60s refresh
    // margin, so every broker.get() goes back to STS.
    let soon = (credsign::time::now() + chrono::TimeDelta::seconds(30))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let body = sts_assume_role_body().replace("2100-01-01T00:00:00Z", &soon);

    let http = MockHttpSend::default().route(http::Method::GET, "Action=AssumeRole&", 200, &body);
    let requests = http.requests();
    let ctx = ctx_with(
        http,
        HashMap::from([
            (
                "AWS_SHARED_CREDENTIALS_FILE".to_string(),
                creds_path.to_string_lossy().to_string(),
            ),
            (
                "AWS_CONFIG_FILE".to_string(),
                config_path.to_string_lossy().to_string(),
            ),
            ("AWS_EC2_METADATA_DISABLED".to_string(), "true".to_string()),
        ]),
    );

    let broker = CredentialBroker::new();
    let first = broker.get(&ctx).await?;
    assert_eq!(first.access_key_id, "ASIAASSUMEDROLEKEY");

    let second = broker.get(&ctx).await?;
    assert_eq!(second.access_key_id, "ASIAASSUMEDROLEKEY");

    let requests = requests.lock().unwrap();
    let sts_calls = requests
        .iter()
        .filter(|r| r.uri.contains("Action=AssumeRole"))
        .count();
    assert_eq!(
        sts_calls, 2,
        "the near-expiry credential must be refreshed through STS"
    );
    Ok(())
}

#[tokio::test]
async fn test_presign_refreshes_credential_that_expires_before_url() -> anyhow::Result<()> {
    use credsign::{BucketParamsMap, PresignOptions, S3Handle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Yields a credential valid for one hour, counting resolutions.
    #[derive(Debug)]
    struct HourlyProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ProvideCredential for HourlyProvider {
        async fn provide_credential(
            &self,
            _: &Context,
        ) -> credsign::Result<Option<credsign::Credential>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(credsign::Credential {
                access_key_id: "access_key_id".to_string(),
                secret_access_key: "secret_access_key".to_string(),
                session_token: Some("token".to_string()),
                expires_in: Some(credsign::time::now() + chrono::TimeDelta::seconds(3600)),
                source: CredentialSource::Ec2,
            }))
        }
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let broker = CredentialBroker::with_provider(HourlyProvider {
        calls: calls.clone(),
    });
    let ctx = ctx_with(MockHttpSend::default(), HashMap::new());
    let handle = S3Handle::from_env(
        &ctx,
        broker,
        Arc::new(BucketParamsMap::new()),
        "bucket",
        "key",
    )
    .await?;

    // The URL outlives the credential: a forced refresh happens.
    let url = handle
        .presigned_url(PresignOptions::default().with_expires_in(Duration::from_secs(7200)))
        .await?;
    assert!(url.contains("X-Amz-Signature="));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // The URL expires well before the credential: the cache is reused.
    handle
        .presigned_url(PresignOptions::default().with_expires_in(Duration::from_secs(600)))
        .await?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}
