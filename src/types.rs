use std::fmt;

use bytes::Buf;
use chrono::{DateTime, TimeDelta, Utc};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::Error;

/// OAuth scope requested for both the federated and the impersonated token
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client<
        hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
        Full<Bytes>,
    >,
}

impl HttpClient {
    pub fn new() -> Result<Self, Error> {
        #[cfg(feature = "webpki-roots")]
        let https = HttpsConnectorBuilder::new().with_webpki_roots();
        #[cfg(not(feature = "webpki-roots"))]
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|err| {
                Error::Io("failed to load native TLS root certificates for HTTPS", err)
            })?;

        Ok(Self {
            inner: Client::builder(TokioExecutor::new())
                .build(https.https_or_http().enable_http2().build()),
        })
    }

    /// Send a single request and deserialize a successful JSON response
    ///
    /// There is exactly one attempt: any failure is returned to the caller.
    pub(crate) async fn json<T: DeserializeOwned>(
        &self,
        req: Request<Full<Bytes>>,
        target: &'static str,
    ) -> Result<T, RequestError> {
        let body = self.request(req, target).await?;
        serde_json::from_slice(&body).map_err(RequestError::Json)
    }

    pub(crate) async fn request(
        &self,
        req: Request<Full<Bytes>>,
        target: &'static str,
    ) -> Result<Bytes, RequestError> {
        debug!(url = ?req.uri(), target, "sending request");
        let (parts, body) = self
            .inner
            .request(req)
            .await
            .map_err(RequestError::Transport)?
            .into_parts();

        let mut body = body.collect().await.map_err(RequestError::Body)?.aggregate();

        let body = body.copy_to_bytes(body.remaining());
        if !parts.status.is_success() {
            let body = String::from_utf8_lossy(body.as_ref()).into_owned();
            warn!(%body, status = ?parts.status, target, "request rejected");
            return Err(RequestError::Status {
                status: parts.status,
                body,
            });
        }

        Ok(body)
    }
}

/// Failure of a single outbound call, kept verbatim for diagnosis
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("invalid endpoint URL")]
    Url(#[source] url::ParseError),
    #[error("failed to build HTTP request")]
    Build(#[source] http::Error),
    #[error("failed to encode request body")]
    Encode(#[source] serde_json::Error),
    #[error("HTTP request failed")]
    Transport(#[source] hyper_util::client::legacy::Error),
    #[error("failed to read HTTP response body")]
    Body(#[source] hyper::Error),
    #[error("server responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to parse response")]
    Json(#[source] serde_json::Error),
}

/// Coordinates of a workload identity pool provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadIdentityProvider {
    pub project: String,
    pub pool: String,
    pub provider: String,
}

impl WorkloadIdentityProvider {
    /// Resource name of the provider, without scheme
    ///
    /// `//iam.googleapis.com/projects/<project>/locations/global/workloadIdentityPools/<pool>/providers/<provider>`
    pub fn audience(&self) -> String {
        format!(
            "//iam.googleapis.com/projects/{}/locations/global/workloadIdentityPools/{}/providers/{}",
            self.project, self.pool, self.provider
        )
    }

    /// The audience as written into `external_account` credential files
    pub fn https_audience(&self) -> String {
        format!("https:{}", self.audience())
    }
}

/// Requested token lifetime in the `"<seconds>s"` form used by the IAM APIs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenLifetime(String);

impl TokenLifetime {
    pub const DEFAULT_SECONDS: u64 = 3600;

    /// Normalize the raw lifetime input
    ///
    /// An empty input yields the default; anything else is taken as a
    /// number of seconds and suffixed with `s`. The numeric part is not
    /// checked here, see [`TokenLifetime::seconds`].
    pub fn from_input(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            Self(format!("{}s", Self::DEFAULT_SECONDS))
        } else {
            Self(format!("{input}s"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the number of seconds back out of the lifetime string
    pub fn seconds(&self) -> Result<u64, Error> {
        self.0
            .strip_suffix('s')
            .and_then(|secs| secs.parse().ok())
            .ok_or_else(|| Error::Config(format!("invalid token lifetime {:?}", self.0)))
    }

    /// The point in time `now + lifetime`
    ///
    /// Fails with [`Error::Config`] when the lifetime is not a number of seconds or does not
    /// fit in a timestamp.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, Error> {
        let out_of_range =
            || Error::Config(format!("token lifetime {:?} is out of range", self.0));
        let seconds = i64::try_from(self.seconds()?).map_err(|_| out_of_range())?;
        TimeDelta::try_seconds(seconds)
            .and_then(|delta| now.checked_add_signed(delta))
            .ok_or_else(out_of_range)
    }
}

impl Default for TokenLifetime {
    fn default() -> Self {
        Self::from_input("")
    }
}

/// Short-lived token returned by the STS token exchange
///
/// Like the other token types, this does not implement [`Display`] and its
/// [`Debug`] output hides the token value.
///
/// [`Display`]: fmt::Display
#[derive(Clone, PartialEq, Eq)]
pub struct FederatedToken(String);

impl FederatedToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FederatedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FederatedToken").field(&"****").finish()
    }
}

/// Access token for the impersonated service account
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub(crate) fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Expiry reported by the issuing service, if any
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"****")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
