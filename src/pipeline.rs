use chrono::Utc;
use tracing::{info, instrument, Level};

use crate::config::Config;
use crate::credentials::{materialize, Artifact, OutputMode};
use crate::{AccessTokenIssuer, Error, TokenExchanger};

/// Run one invocation: validate, exchange, impersonate, publish
///
/// Stages run strictly in order and the first error ends the run, unchanged. Files written
/// by a stage that later fails are left in place and should not be trusted.
#[instrument(level = Level::DEBUG, skip_all)]
pub async fn run(
    config: &Config,
    exchanger: &dyn TokenExchanger,
    issuer: &dyn AccessTokenIssuer,
) -> Result<Artifact, Error> {
    config.validate()?;
    let mode = config.output_mode()?;
    execute(config, &mode, exchanger, issuer).await
}

/// Like [`run`], with the output mode chosen by the caller instead of the configuration
#[instrument(level = Level::DEBUG, skip(config, exchanger, issuer))]
pub async fn run_with_mode(
    config: &Config,
    mode: &OutputMode,
    exchanger: &dyn TokenExchanger,
    issuer: &dyn AccessTokenIssuer,
) -> Result<Artifact, Error> {
    config.validate()?;
    execute(config, mode, exchanger, issuer).await
}

async fn execute(
    config: &Config,
    mode: &OutputMode,
    exchanger: &dyn TokenExchanger,
    issuer: &dyn AccessTokenIssuer,
) -> Result<Artifact, Error> {
    let lifetime = config.lifetime();
    if let OutputMode::StructuredCredentialFile(_) = mode {
        // Must fail before any network call.
        lifetime.expiry_from(Utc::now())?;
    }
    let provider = config.workload_identity_provider();

    let federated = exchanger.exchange(&config.oidc_token, &provider).await?;
    info!("federated token retrieved");

    let access_token = issuer
        .impersonate(federated, &config.service_account_email, &lifetime)
        .await?;
    info!(expires_at = ?access_token.expires_at(), "access token retrieved");

    materialize(mode, config, &access_token).await
}
