//! HTTP client for the checkout service's internal endpoints.
//!
//! # Environment Variables
//!
//! - `PAGORA_CHECKOUT_URL` - Base URL of the checkout service
//! - `CHECKOUT_SERVICE_TOKEN` - Bearer token for internal endpoints

use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid service URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{path} returned {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },
}

/// Authenticated client for one checkout service instance.
pub struct ServiceClient {
    http: reqwest::Client,
    base: Url,
    token: SecretString,
}

impl ServiceClient {
    /// Build a client from `PAGORA_CHECKOUT_URL` and `CHECKOUT_SERVICE_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if either variable is missing or invalid.
    pub fn from_env() -> Result<Self, ClientError> {
        let base = std::env::var("PAGORA_CHECKOUT_URL")
            .map_err(|_| ClientError::MissingEnvVar("PAGORA_CHECKOUT_URL"))?;
        let token = std::env::var("CHECKOUT_SERVICE_TOKEN")
            .map_err(|_| ClientError::MissingEnvVar("CHECKOUT_SERVICE_TOKEN"))?;
        Self::new(&base, SecretString::from(token))
    }

    /// # Errors
    ///
    /// Returns `ClientError` if `base` is not a URL or the client cannot be built.
    pub fn new(base: &str, token: SecretString) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base: base_url(base)?,
            token,
        })
    }

    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let url = self.base.join(path.trim_start_matches('/'))?;
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(self.token.expose_secret()))
    }

    /// Send a request and decode a JSON success body.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Status` for non-2xx responses.
    pub async fn send<T: DeserializeOwned>(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

/// Parse a base URL so relative joins keep any path prefix.
fn base_url(raw: &str) -> Result<Url, url::ParseError> {
    let trimmed = raw.trim().trim_end_matches('/');
    Url::parse(&format!("{trimmed}/"))
}
