use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use http::StatusCode;

use gcp_oidc::{
    AccessToken, AccessTokenIssuer, Artifact, Config, Error, ExternalAccountParams,
    FederatedToken, OutputMode, RequestError, TokenExchanger, TokenLifetime,
    WorkloadIdentityProvider,
};

#[derive(Default)]
struct StubExchanger {
    calls: AtomicUsize,
    seen: Mutex<Option<(String, WorkloadIdentityProvider)>>,
}

#[async_trait]
impl TokenExchanger for StubExchanger {
    async fn exchange(
        &self,
        oidc_token: &str,
        provider: &WorkloadIdentityProvider,
    ) -> Result<FederatedToken, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen.lock().unwrap() = Some((oidc_token.to_owned(), provider.clone()));
        Ok(FederatedToken::new("F"))
    }
}

struct StubIssuer {
    reject: bool,
    calls: AtomicUsize,
    seen: Mutex<Option<(FederatedToken, String, TokenLifetime)>>,
}

impl StubIssuer {
    fn new(reject: bool) -> Self {
        Self {
            reject,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AccessTokenIssuer for StubIssuer {
    async fn impersonate(
        &self,
        federated: FederatedToken,
        service_account: &str,
        lifetime: &TokenLifetime,
    ) -> Result<AccessToken, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen.lock().unwrap() =
            Some((federated, service_account.to_owned(), lifetime.clone()));

        if self.reject {
            return Err(Error::Impersonation(RequestError::Status {
                status: StatusCode::FORBIDDEN,
                body: "PERMISSION_DENIED".to_owned(),
            }));
        }
        Ok(AccessToken::new("A"))
    }
}

fn config(dir: &Path) -> Config {
    Config {
        oidc_token: "T".into(),
        project_id: "123".into(),
        pool_id: "p".into(),
        provider_id: "v".into(),
        service_account_email: "sa@x.iam.gserviceaccount.com".into(),
        output_file: Some(dir.join("output.env")),
        ..Config::default()
    }
}

fn output(dir: &Path) -> String {
    std::fs::read_to_string(dir.join("output.env")).unwrap_or_default()
}

#[tokio::test]
async fn env_only_success() {
    let dir = tempfile::tempdir().unwrap();
    let exchanger = StubExchanger::default();
    let issuer = StubIssuer::new(false);

    let artifact = gcp_oidc::run(&config(dir.path()), &exchanger, &issuer)
        .await
        .unwrap();

    assert_eq!(artifact, Artifact::EnvLine { key: "GCLOUD_ACCESS_TOKEN" });
    assert_eq!(output(dir.path()), "GCLOUD_ACCESS_TOKEN=A\n");

    let (oidc_token, provider) = exchanger.seen.lock().unwrap().clone().unwrap();
    assert_eq!(oidc_token, "T");
    assert_eq!(
        provider.audience(),
        "//iam.googleapis.com/projects/123/locations/global/workloadIdentityPools/p/providers/v"
    );

    let (federated, service_account, lifetime) = issuer.seen.lock().unwrap().clone().unwrap();
    assert_eq!(federated.as_str(), "F");
    assert_eq!(service_account, "sa@x.iam.gserviceaccount.com");
    assert_eq!(lifetime.as_str(), "3600s");
}

#[tokio::test]
async fn lifetime_override_reaches_issuer() {
    let dir = tempfile::tempdir().unwrap();
    let issuer = StubIssuer::new(false);
    let config = Config {
        duration: "120".into(),
        ..config(dir.path())
    };

    gcp_oidc::run(&config, &StubExchanger::default(), &issuer)
        .await
        .unwrap();

    let (_, _, lifetime) = issuer.seen.lock().unwrap().clone().unwrap();
    assert_eq!(lifetime.as_str(), "120s");
}

#[tokio::test]
async fn impersonation_rejection_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let issuer = StubIssuer::new(true);

    let err = gcp_oidc::run(&config(dir.path()), &StubExchanger::default(), &issuer)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Impersonation(RequestError::Status { status, .. }) if status == StatusCode::FORBIDDEN
    ));
    assert_eq!(output(dir.path()), "");
}

#[tokio::test]
async fn missing_input_stops_before_network() {
    let dir = tempfile::tempdir().unwrap();
    let exchanger = StubExchanger::default();
    let issuer = StubIssuer::new(false);
    let config = Config {
        service_account_email: String::new(),
        ..config(dir.path())
    };

    let err = gcp_oidc::run(&config, &exchanger, &issuer).await.unwrap_err();

    assert!(matches!(err, Error::Config(msg) if msg == "service account email is not provided"));
    assert_eq!(exchanger.calls.load(Ordering::SeqCst), 0);
    assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(output(dir.path()), "");
}

#[tokio::test]
async fn credentials_file_mode_skips_access_token_line() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        create_credentials_file: true,
        credentials_file_path: Some(dir.path().join("creds")),
        ..config(dir.path())
    };

    let artifact = gcp_oidc::run(&config, &StubExchanger::default(), &StubIssuer::new(false))
        .await
        .unwrap();

    let path = dir.path().join("creds").join("credentials.json");
    assert_eq!(artifact, Artifact::StructuredCredentialFile { path: path.clone() });
    let output = output(dir.path());
    assert!(!output.contains("GCLOUD_ACCESS_TOKEN="));
    assert_eq!(output, format!("GCLOUD_CREDENTIALS_FILE={}\n", path.display()));
}

#[tokio::test]
async fn malformed_lifetime_stops_before_network() {
    let dir = tempfile::tempdir().unwrap();
    let exchanger = StubExchanger::default();
    let issuer = StubIssuer::new(false);
    let config = Config {
        duration: "ten".into(),
        create_credentials_file: true,
        credentials_file_path: Some(dir.path().join("creds")),
        ..config(dir.path())
    };

    let err = gcp_oidc::run(&config, &exchanger, &issuer).await.unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert_eq!(exchanger.calls.load(Ordering::SeqCst), 0);
    assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("creds").exists());
    assert_eq!(output(dir.path()), "");
}

#[tokio::test]
async fn default_credentials_file_mode() {
    let dir = tempfile::tempdir().unwrap();
    let params = ExternalAccountParams {
        token_path: dir.path().join("id_token.txt"),
        config_dir: dir.path().join("home").join(".config").join("gcloud"),
    };
    let mode = OutputMode::ExternalAccountFile(params.clone());
    let config = Config {
        create_credentials_file: true,
        ..config(dir.path())
    };

    let artifact =
        gcp_oidc::run_with_mode(&config, &mode, &StubExchanger::default(), &StubIssuer::new(false))
            .await
            .unwrap();

    let path = params.path();
    assert_eq!(artifact, Artifact::ExternalAccountFile { path: path.clone() });
    assert_eq!(std::fs::read_to_string(&params.token_path).unwrap(), "T");

    let credentials: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(credentials["type"], "external_account");
    assert!(credentials["audience"]
        .as_str()
        .unwrap()
        .ends_with("/projects/123/locations/global/workloadIdentityPools/p/providers/v"));
    assert_eq!(
        credentials["credential_source"]["file"],
        params.token_path.to_str().unwrap()
    );

    let output = output(dir.path());
    assert!(!output.contains("GCLOUD_ACCESS_TOKEN="));
    assert_eq!(
        output,
        format!("GOOGLE_APPLICATION_CREDENTIALS={}\n", path.display())
    );
}
