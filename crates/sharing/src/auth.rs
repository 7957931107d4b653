//! Client for the auth service that resolves access key ids into access
//! grants.

use http::StatusCode;
use serde::Deserialize;

use crate::error::Error;
use crate::utils::ExponentialBackoff;

/// How many times a single request will try the auth service.
const MAX_ATTEMPTS: usize = 3;

/// Configuration for talking to the auth service.
#[derive(Debug, Clone, Default)]
pub struct AuthServiceConfig {
    /// Base URL of the auth service.
    pub base_url: String,
    /// Bearer token authorizing lookups.
    pub token: String,
}

/// Response of a key lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthServiceResponse {
    pub access_grant: String,
    pub secret_key: String,
    pub public: bool,
}

impl AuthServiceConfig {
    /// Resolve an access key id into an access grant.
    ///
    /// Transient failures (connection errors, 5xx) are retried with
    /// exponential backoff within this call; any other non-200 is returned
    /// as an upstream error annotated with the status the service sent.
    pub async fn resolve(
        &self,
        client: &reqwest::Client,
        access_key_id: &str,
    ) -> Result<AuthServiceResponse, Error> {
        let url = self.lookup_url(access_key_id)?;

        let mut backoff = ExponentialBackoff::default();
        for attempt in 1.. {
            let result = client
                .get(url.clone())
                .bearer_auth(&self.token)
                .send()
                .await;

            let retryable = match &result {
                Ok(response) => response.status().is_server_error(),
                Err(_) => true,
            };
            if retryable && attempt < MAX_ATTEMPTS {
                backoff.wait().await;
                continue;
            }

            let response = result.map_err(|err| {
                Error::from(err)
                    .with_action("auth service")
                    .with_status(StatusCode::BAD_GATEWAY)
            })?;
            let status = response.status();
            if status != StatusCode::OK {
                return Err(Error::msg(format!(
                    "auth service: unexpected status {status}"
                ))
                .with_action("auth service")
                .with_status(status));
            }
            return response
                .json::<AuthServiceResponse>()
                .await
                .map_err(|err| Error::from(err).with_action("auth service"));
        }
        unreachable!("retry loop returns within MAX_ATTEMPTS")
    }

    fn lookup_url(&self, access_key_id: &str) -> Result<url::Url, Error> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|err| Error::msg(format!("invalid auth service URL: {err}")))?;
        let path = format!(
            "{}/v1/access/{}",
            url.path().trim_end_matches('/'),
            access_key_id
        );
        url.set_path(&path);
        Ok(url)
    }
}
