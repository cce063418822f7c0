//! Publishing the obtained credentials
//!
//! Exactly one [`OutputMode`] is used per invocation. Every mode ends with a single line
//! appended to the pipeline output file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, instrument, Level};

use crate::config::Config;
use crate::output::OutputFile;
use crate::types::{AccessToken, WorkloadIdentityProvider};
use crate::Error;

/// How the credentials are handed to later pipeline steps
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Append `GCLOUD_ACCESS_TOKEN=<token>` to the output file
    EnvOnly,
    /// Write an `external_account` application default credentials file
    ExternalAccountFile(ExternalAccountParams),
    /// Write a `{"credential": {...}}` file into a chosen directory
    StructuredCredentialFile(StructuredCredentialParams),
}

/// What was written, and where
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Artifact {
    EnvLine { key: &'static str },
    ExternalAccountFile { path: PathBuf },
    StructuredCredentialFile { path: PathBuf },
}

/// Locations used by [`OutputMode::ExternalAccountFile`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalAccountParams {
    /// File receiving the subject token referenced by `credential_source.file`
    pub token_path: PathBuf,
    /// Directory holding the credentials file, created when missing
    pub config_dir: PathBuf,
}

impl ExternalAccountParams {
    const TOKEN_FILE: &'static str = "id_token.txt";
    const CONFIG_DIR: &'static str = ".config/gcloud";
    const CREDENTIALS_FILE: &'static str = "application_default_credentials.json";

    /// The temp directory for the token, `~/.config/gcloud` for the credentials
    pub fn well_known() -> Result<Self, Error> {
        let home = home::home_dir().ok_or_else(|| {
            Error::Io(
                "failed to get home directory",
                std::io::Error::new(std::io::ErrorKind::NotFound, "home directory not found"),
            )
        })?;

        Ok(Self {
            token_path: std::env::temp_dir().join(Self::TOKEN_FILE),
            config_dir: home.join(Self::CONFIG_DIR),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.config_dir.join(Self::CREDENTIALS_FILE)
    }
}

/// Location used by [`OutputMode::StructuredCredentialFile`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructuredCredentialParams {
    dir: PathBuf,
}

impl StructuredCredentialParams {
    const FILE_NAME: &'static str = "credentials.json";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/credentials.json`; a trailing separator on `dir` is dropped
    pub fn path(&self) -> PathBuf {
        self.dir.join(Self::FILE_NAME)
    }
}

/// Application default credentials for Workload Identity Federation
///
/// Field order matters to consumers that compare files textually.
///
/// See: https://google.aip.dev/auth/4117
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ExternalAccountCredentials {
    #[serde(rename = "type")]
    pub credential_type: String,
    pub audience: String,
    pub subject_token_type: String,
    pub token_url: String,
    pub service_account_impersonation_url: String,
    pub credential_source: CredentialSource,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CredentialSource {
    pub file: String,
}

impl ExternalAccountCredentials {
    pub fn new(
        provider: &WorkloadIdentityProvider,
        service_account: &str,
        token_path: &Path,
    ) -> Self {
        Self {
            credential_type: "external_account".to_owned(),
            audience: provider.https_audience(),
            subject_token_type: "urn:ietf:params:oauth:token-type:id_token".to_owned(),
            token_url: "https://sts.googleapis.com/v1/token".to_owned(),
            service_account_impersonation_url: format!(
                "https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts/{service_account}:generateAccessToken"
            ),
            credential_source: CredentialSource {
                file: token_path.to_string_lossy().into_owned(),
            },
        }
    }
}

/// Access token with its expiry, as consumed by tools reading `credentials.json`
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct StructuredCredentials {
    pub credential: StructuredCredential,
}

#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct StructuredCredential {
    pub access_token: String,
    pub id_token: Option<String>,
    /// RFC 3339, UTC, second precision
    pub token_expiry: String,
}

impl std::fmt::Debug for StructuredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredCredential")
            .field("access_token", &"****")
            .field("id_token", &self.id_token.as_ref().map(|_| "****"))
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

const ACCESS_TOKEN_ENV: &str = "GCLOUD_ACCESS_TOKEN";
const APPLICATION_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const CREDENTIALS_FILE_ENV: &str = "GCLOUD_CREDENTIALS_FILE";

/// Publish the credentials in the shape selected by `mode`
///
/// Files are created or overwritten; the output file is only appended to. Nothing written
/// before a failure is removed.
#[instrument(level = Level::DEBUG, skip(config, access_token))]
pub async fn materialize(
    mode: &OutputMode,
    config: &Config,
    access_token: &AccessToken,
) -> Result<Artifact, Error> {
    match mode {
        OutputMode::EnvOnly => {
            let output = OutputFile::from_config(config.output_file.as_deref())?;
            output.write_env(ACCESS_TOKEN_ENV, access_token.as_str()).await?;
            info!("access token written to {ACCESS_TOKEN_ENV}");
            Ok(Artifact::EnvLine {
                key: ACCESS_TOKEN_ENV,
            })
        }
        OutputMode::ExternalAccountFile(params) => {
            let output = OutputFile::from_config(config.output_file.as_deref())?;
            let path = write_external_account(params, config).await?;
            output
                .write_env(APPLICATION_CREDENTIALS_ENV, &path.to_string_lossy())
                .await?;
            info!(path = %path.display(), "credentials file written");
            Ok(Artifact::ExternalAccountFile { path })
        }
        OutputMode::StructuredCredentialFile(params) => {
            let expiry = config.lifetime().expiry_from(Utc::now())?;
            let output = OutputFile::from_config(config.output_file.as_deref())?;
            let path = write_structured(params, access_token, expiry).await?;
            output
                .write_env(CREDENTIALS_FILE_ENV, &path.to_string_lossy())
                .await?;
            info!(path = %path.display(), "credentials file written");
            Ok(Artifact::StructuredCredentialFile { path })
        }
    }
}

async fn write_external_account(
    params: &ExternalAccountParams,
    config: &Config,
) -> Result<PathBuf, Error> {
    fs::write(&params.token_path, config.oidc_token.as_bytes())
        .await
        .map_err(|err| Error::Io("failed to write token file", err))?;
    debug!(path = ?params.token_path, "wrote subject token file");

    create_private_dir(&params.config_dir)
        .await
        .map_err(|err| Error::Io("failed to create directory", err))?;

    let credentials = ExternalAccountCredentials::new(
        &config.workload_identity_provider(),
        &config.service_account_email,
        &params.token_path,
    );
    let json = serde_json::to_vec_pretty(&credentials)
        .map_err(|err| Error::Json("failed to serialize credentials", err))?;

    let path = params.path();
    fs::write(&path, json)
        .await
        .map_err(|err| Error::Io("failed to write credentials file", err))?;
    Ok(path)
}

async fn write_structured(
    params: &StructuredCredentialParams,
    access_token: &AccessToken,
    expiry: DateTime<Utc>,
) -> Result<PathBuf, Error> {
    let credentials = StructuredCredentials {
        credential: StructuredCredential {
            access_token: access_token.as_str().to_owned(),
            id_token: None,
            token_expiry: expiry.to_rfc3339_opts(SecondsFormat::Secs, true),
        },
    };
    let json = serde_json::to_vec_pretty(&credentials)
        .map_err(|err| Error::Json("failed to serialize credentials", err))?;

    fs::create_dir_all(params.dir())
        .await
        .map_err(|err| Error::Io("failed to create directory", err))?;

    let path = params.path();
    fs::write(&path, json)
        .await
        .map_err(|err| Error::Io("failed to write credentials file", err))?;
    Ok(path)
}

async fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(path).await
}
