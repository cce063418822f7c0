//! Token exchange at the Security Token Service
//!
//! See: https://cloud.google.com/iam/docs/reference/sts/rest/v1/TopLevel/token

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::CONTENT_TYPE;
use hyper::Request;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, Level};

use crate::types::{
    FederatedToken, HttpClient, RequestError, WorkloadIdentityProvider, CLOUD_PLATFORM_SCOPE,
};
use crate::{Error, TokenExchanger};

/// Exchanges OIDC tokens for federated tokens at the Security Token Service
///
/// The exchange request is unauthenticated: the subject token is the only credential.
#[derive(Clone, Debug)]
pub struct StsExchanger {
    client: HttpClient,
    token_url: String,
}

impl StsExchanger {
    pub const TOKEN_URL: &'static str = "https://sts.googleapis.com/v1/token";

    pub fn new(client: HttpClient) -> Self {
        Self::with_token_url(client, Self::TOKEN_URL)
    }

    /// Use a different token endpoint, e.g. a regional or mock one
    pub fn with_token_url(client: HttpClient, token_url: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
        }
    }

    fn build_request(
        &self,
        oidc_token: &str,
        provider: &WorkloadIdentityProvider,
    ) -> Result<Request<Full<Bytes>>, RequestError> {
        let audience = provider.audience();
        let body = serde_json::to_vec(&ExchangeTokenRequest {
            grant_type: "urn:ietf:params:oauth:grant-type:token-exchange",
            subject_token: oidc_token,
            audience: &audience,
            scope: CLOUD_PLATFORM_SCOPE,
            requested_token_type: "urn:ietf:params:oauth:token-type:access_token",
            subject_token_type: "urn:ietf:params:oauth:token-type:id_token",
        })
        .map_err(RequestError::Encode)?;

        Request::post(self.token_url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::from(Bytes::from(body)))
            .map_err(RequestError::Build)
    }
}

#[async_trait]
impl TokenExchanger for StsExchanger {
    #[instrument(level = Level::DEBUG, skip(self, oidc_token), fields(audience = %provider.audience()))]
    async fn exchange(
        &self,
        oidc_token: &str,
        provider: &WorkloadIdentityProvider,
    ) -> Result<FederatedToken, Error> {
        let request = self
            .build_request(oidc_token, provider)
            .map_err(Error::Exchange)?;

        let response: ExchangeTokenResponse = self
            .client
            .json(request, "sts")
            .await
            .map_err(Error::Exchange)?;

        debug!(
            token_type = ?response.token_type,
            expires_in = ?response.expires_in,
            "received federated token"
        );
        Ok(FederatedToken::new(response.access_token))
    }
}

#[derive(Serialize)]
struct ExchangeTokenRequest<'a> {
    grant_type: &'a str,
    subject_token: &'a str,
    audience: &'a str,
    scope: &'a str,
    requested_token_type: &'a str,
    subject_token_type: &'a str,
}

/// Response from STS token exchange
#[derive(Deserialize)]
struct ExchangeTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}
