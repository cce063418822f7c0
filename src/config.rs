use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};

use crate::credentials::{ExternalAccountParams, OutputMode, StructuredCredentialParams};
use crate::types::{TokenLifetime, WorkloadIdentityProvider};
use crate::Error;

/// Inputs of a single invocation
///
/// Every field can be set through its environment variable, which is how the CI system
/// passes plugin settings, or through the matching long flag.
#[derive(Clone, Debug, Default, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// OIDC token issued to the workload
    #[arg(long, env = "PLUGIN_OIDC_TOKEN_ID", default_value = "", hide_env_values = true)]
    pub oidc_token: String,

    /// Google Cloud project number or ID hosting the workload identity pool
    #[arg(long, env = "PLUGIN_PROJECT_ID", default_value = "")]
    pub project_id: String,

    /// Workload identity pool ID
    #[arg(long, env = "PLUGIN_POOL_ID", default_value = "")]
    pub pool_id: String,

    /// Workload identity pool provider ID
    #[arg(long, env = "PLUGIN_PROVIDER_ID", default_value = "")]
    pub provider_id: String,

    /// Email of the service account to impersonate
    #[arg(long, env = "PLUGIN_SERVICE_ACCOUNT_EMAIL_ID", default_value = "")]
    pub service_account_email: String,

    /// Lifetime of the access token in seconds (defaults to 3600)
    #[arg(long, env = "PLUGIN_DURATION", default_value = "")]
    pub duration: String,

    /// Write a credentials file instead of exporting the access token
    #[arg(
        long,
        env = "PLUGIN_CREATE_DEFAULT_CREDENTIALS_FILE",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        default_value = "false",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub create_credentials_file: bool,

    /// Directory for `credentials.json`; without it the gcloud default credentials file is written
    #[arg(long, env = "PLUGIN_CREDENTIALS_FILE_PATH")]
    pub credentials_file_path: Option<PathBuf>,

    /// File that receives `KEY=value` lines for later pipeline steps
    #[arg(long, env = "DRONE_OUTPUT")]
    pub output_file: Option<PathBuf>,

    /// Log filter, e.g. `info` or `gcp_oidc=debug`
    #[arg(long, env = "PLUGIN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Read the configuration from environment variables only, ignoring command-line arguments
    pub fn from_env() -> Self {
        Self::parse_from([env!("CARGO_PKG_NAME")])
    }

    /// Check that every required input is present
    ///
    /// Fields are checked in a fixed order and the first missing one is reported.
    pub fn validate(&self) -> Result<(), Error> {
        let required = [
            (&self.oidc_token, "oidc-token"),
            (&self.project_id, "project-id"),
            (&self.pool_id, "pool-id"),
            (&self.provider_id, "provider-id"),
            (&self.service_account_email, "service account email"),
        ];

        match required.iter().find(|(value, _)| value.trim().is_empty()) {
            Some((_, name)) => Err(Error::Config(format!("{name} is not provided"))),
            None => Ok(()),
        }
    }

    pub fn workload_identity_provider(&self) -> WorkloadIdentityProvider {
        WorkloadIdentityProvider {
            project: self.project_id.clone(),
            pool: self.pool_id.clone(),
            provider: self.provider_id.clone(),
        }
    }

    pub fn lifetime(&self) -> TokenLifetime {
        TokenLifetime::from_input(&self.duration)
    }

    /// Select how the credentials are published
    ///
    /// Without the create flag only the access token is exported. With it, a structured
    /// `credentials.json` is written into `credentials_file_path` when that is set, otherwise
    /// the gcloud application default credentials file is written.
    pub fn output_mode(&self) -> Result<OutputMode, Error> {
        if !self.create_credentials_file {
            return Ok(OutputMode::EnvOnly);
        }

        match &self.credentials_file_path {
            Some(dir) if !dir.as_os_str().is_empty() => Ok(OutputMode::StructuredCredentialFile(
                StructuredCredentialParams::new(dir),
            )),
            _ => Ok(OutputMode::ExternalAccountFile(
                ExternalAccountParams::well_known()?,
            )),
        }
    }
}
