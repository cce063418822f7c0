use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::Request;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, Level};
use url::Url;

use crate::types::{
    AccessToken, FederatedToken, HttpClient, RequestError, TokenLifetime, CLOUD_PLATFORM_SCOPE,
};
use crate::{AccessTokenIssuer, Error};

/// Supplies the bearer token for an outgoing request
pub trait BearerTokenSource {
    fn bearer_token(&self) -> &str;
}

/// A bearer token source that always returns the same token
///
/// It is never refreshed; it lives for exactly one impersonation call.
#[derive(Debug)]
pub struct StaticTokenSource(FederatedToken);

impl StaticTokenSource {
    pub fn new(token: FederatedToken) -> Self {
        Self(token)
    }
}

impl BearerTokenSource for StaticTokenSource {
    fn bearer_token(&self) -> &str {
        self.0.as_str()
    }
}

// The API behind `service_account_impersonation_url`:
// https://cloud.google.com/iam/docs/reference/credentials/rest/v1/projects.serviceAccounts/generateAccessToken
/// Generates service account access tokens through the IAM Service Account Credentials API
#[derive(Clone, Debug)]
pub struct IamCredentials {
    client: HttpClient,
    base_url: String,
}

impl IamCredentials {
    pub const BASE_URL: &'static str = "https://iamcredentials.googleapis.com/v1/";

    pub fn new(client: HttpClient) -> Self {
        Self::with_base_url(client, Self::BASE_URL)
    }

    /// Use a different API root; it must end with a `/`
    pub fn with_base_url(client: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// `generateAccessToken` URL for the given service account
    pub fn generate_access_token_url(
        base_url: &str,
        service_account: &str,
    ) -> Result<Url, RequestError> {
        Url::parse(base_url)
            .and_then(|base| {
                base.join(&format!(
                    "projects/-/serviceAccounts/{service_account}:generateAccessToken"
                ))
            })
            .map_err(RequestError::Url)
    }

    fn build_request(
        &self,
        source: &impl BearerTokenSource,
        service_account: &str,
        lifetime: &TokenLifetime,
    ) -> Result<Request<Full<Bytes>>, RequestError> {
        let url = Self::generate_access_token_url(&self.base_url, service_account)?;
        let body = serde_json::to_vec(&GenerateAccessTokenRequest {
            scope: &[CLOUD_PLATFORM_SCOPE],
            lifetime: lifetime.as_str(),
        })
        .map_err(RequestError::Encode)?;

        Request::post(url.as_str())
            .header(AUTHORIZATION, format!("Bearer {}", source.bearer_token()))
            .header(CONTENT_TYPE, "application/json")
            .body(Full::from(Bytes::from(body)))
            .map_err(RequestError::Build)
    }
}

#[async_trait]
impl AccessTokenIssuer for IamCredentials {
    #[instrument(level = Level::DEBUG, skip(self, federated))]
    async fn impersonate(
        &self,
        federated: FederatedToken,
        service_account: &str,
        lifetime: &TokenLifetime,
    ) -> Result<AccessToken, Error> {
        let source = StaticTokenSource::new(federated);
        let request = self
            .build_request(&source, service_account, lifetime)
            .map_err(Error::Impersonation)?;
        drop(source);

        let response: GenerateAccessTokenResponse = self
            .client
            .json(request, "iamcredentials")
            .await
            .map_err(Error::Impersonation)?;

        debug!(expire_time = %response.expire_time, "received impersonated access token");
        Ok(AccessToken::new(response.access_token).with_expiry(response.expire_time))
    }
}

#[derive(Serialize)]
struct GenerateAccessTokenRequest<'a> {
    scope: &'a [&'a str],
    lifetime: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenResponse {
    access_token: String,
    expire_time: DateTime<Utc>,
}
