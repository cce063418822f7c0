//! Exchange a CI workload OIDC token for Google Cloud credentials
//!
//! This crate implements a pipeline step that turns the short-lived OIDC token issued to a CI
//! job into Google Cloud credentials using Workload Identity Federation:
//!
//! 1. The OIDC token is exchanged at the Security Token Service for a federated token
//!    ([`StsExchanger`]).
//! 2. The federated token is used to impersonate a service account through the IAM
//!    Credentials `generateAccessToken` API ([`IamCredentials`]).
//! 3. The result is published in exactly one of three shapes ([`OutputMode`]):
//!    - a `GCLOUD_ACCESS_TOKEN=<token>` line appended to the pipeline output file;
//!    - an `external_account` Application Default Credentials file at the well-known gcloud
//!      location, plus a `GOOGLE_APPLICATION_CREDENTIALS=<path>` line;
//!    - a `{"credential": {...}}` file in a chosen directory, plus a
//!      `GCLOUD_CREDENTIALS_FILE=<path>` line.
//!
//! Every invocation performs a fresh exchange. Nothing is cached, refreshed or retried.
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), gcp_oidc::Error> {
//! use gcp_oidc::{Config, HttpClient, IamCredentials, StsExchanger};
//!
//! let config = Config::from_env();
//! let client = HttpClient::new()?;
//! let exchanger = StsExchanger::new(client.clone());
//! let issuer = IamCredentials::new(client);
//! gcp_oidc::run(&config, &exchanger, &issuer).await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

use async_trait::async_trait;
use thiserror::Error;

mod config;
pub use config::Config;

mod credentials;
pub use credentials::{
    materialize, Artifact, CredentialSource, ExternalAccountCredentials, ExternalAccountParams,
    OutputMode, StructuredCredential, StructuredCredentialParams, StructuredCredentials,
};

mod iam;
pub use iam::{BearerTokenSource, IamCredentials, StaticTokenSource};

mod output;
pub use output::OutputFile;

mod pipeline;
pub use pipeline::{run, run_with_mode};

mod sts;
pub use sts::StsExchanger;

mod types;
pub use types::{
    AccessToken, FederatedToken, HttpClient, RequestError, TokenLifetime,
    WorkloadIdentityProvider, CLOUD_PLATFORM_SCOPE,
};

/// Exchanges a workload OIDC token for a federated access token
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchange `oidc_token` for a federated token scoped to `cloud-platform`
    ///
    /// Failures are reported as [`Error::Exchange`].
    async fn exchange(
        &self,
        oidc_token: &str,
        provider: &WorkloadIdentityProvider,
    ) -> Result<FederatedToken, Error>;
}

/// Issues an access token for a service account on behalf of a federated identity
#[async_trait]
pub trait AccessTokenIssuer: Send + Sync {
    /// Impersonate `service_account` using `federated` as the caller's credential
    ///
    /// The federated token is consumed. Failures are reported as [`Error::Impersonation`].
    async fn impersonate(
        &self,
        federated: FederatedToken,
        service_account: &str,
        lifetime: &TokenLifetime,
    ) -> Result<AccessToken, Error>;
}

/// Enumerates all possible errors returned by this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A required input is missing or malformed
    ///
    /// Always detected before any network call.
    #[error("{0}")]
    Config(String),

    /// The token exchange call failed or was rejected by the Security Token Service
    #[error("failed to exchange token")]
    Exchange(#[source] RequestError),

    /// The service account impersonation call failed or was rejected
    #[error("failed to generate access token")]
    Impersonation(#[source] RequestError),

    /// Creating, reading or writing a file or directory failed
    #[error("{0}")]
    Io(&'static str, #[source] std::io::Error),

    /// Encoding a credentials document failed
    #[error("{0}")]
    Json(&'static str, #[source] serde_json::Error),
}
