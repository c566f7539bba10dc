//! EdgeLB API client
//!
//! Implements the EdgeLB pool manager REST API (V2 pools).
//! Routes: `/version`, `/v2/pools`, `/v2/pools/{name}` and
//! `/v2/pools/{name}/metadata`.

use crate::edgelb_trait::EdgeLBClientTrait;
use crate::error::EdgeLBError;
use crate::models::{Pool, PoolMetadata};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection options for [`EdgeLBClient`]
#[derive(Debug, Clone)]
pub struct EdgeLBClientOptions {
    /// EdgeLB API base URL (e.g. "http://edgelb-api.marathon.l4lb.thisdcos.directory")
    pub base_url: String,
    /// Bearer token (DC/OS ACS token); requests are unauthenticated if `None`
    pub token: Option<String>,
    /// Skip TLS certificate verification
    pub insecure_skip_tls_verify: bool,
    /// Upper bound for every single request
    pub timeout: Duration,
}

impl Default for EdgeLBClientOptions {
    fn default() -> Self {
        Self {
            base_url: "http://edgelb-api.marathon.l4lb.thisdcos.directory".to_string(),
            token: None,
            insecure_skip_tls_verify: false,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// EdgeLB API client
#[derive(Debug, Clone)]
pub struct EdgeLBClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl EdgeLBClient {
    /// Create a new EdgeLB client
    pub fn new(options: EdgeLBClientOptions) -> Result<Self, EdgeLBError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.insecure_skip_tls_verify)
            .build()?;

        Ok(Self {
            client,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            token: options.token,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("EdgeLB request: {} {}", method, url);

        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Map a non-success response to an error.
    ///
    /// `not_found` lists the statuses that mean "does not exist (yet)" for
    /// the endpoint being called.
    async fn check(
        response: Response,
        what: &str,
        not_found: &[StatusCode],
    ) -> Result<Response, EdgeLBError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if not_found.contains(&status) {
            return Err(EdgeLBError::NotFound(what.to_string()));
        }
        Err(EdgeLBError::unknown(format!(
            "Failed to access {}: {} - {}",
            what, status, body
        )))
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, EdgeLBError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            EdgeLBError::unknown(format!(
                "error decoding {}: {} - Response (first 500 chars): {}",
                what,
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }
}

fn pool_path(name: &str) -> String {
    format!("/v2/pools/{}", name)
}

#[async_trait::async_trait]
impl EdgeLBClientTrait for EdgeLBClient {
    async fn get_version(&self) -> Result<String, EdgeLBError> {
        let response = self.request(Method::GET, "/version").send().await?;
        let response = Self::check(response, "version", &[]).await?;
        Ok(response.text().await?.trim().to_string())
    }

    async fn get_pools(&self) -> Result<Vec<Pool>, EdgeLBError> {
        let response = self.request(Method::GET, "/v2/pools").send().await?;
        let response = Self::check(response, "pools", &[]).await?;
        Self::decode(response, "pools").await
    }

    async fn get_pool(&self, name: &str) -> Result<Pool, EdgeLBError> {
        let what = format!("pool {}", name);
        let response = self.request(Method::GET, &pool_path(name)).send().await?;
        let response = Self::check(response, &what, &[StatusCode::NOT_FOUND]).await?;
        Self::decode(response, &what).await
    }

    async fn create_pool(&self, pool: &Pool) -> Result<Pool, EdgeLBError> {
        let what = format!("pool {}", pool.name);
        debug!("Creating EdgeLB pool {}", pool.name);
        let response = self
            .request(Method::POST, "/v2/pools")
            .json(pool)
            .send()
            .await?;
        let response = Self::check(response, &what, &[]).await?;
        Self::decode(response, &what).await
    }

    async fn update_pool(&self, pool: &Pool) -> Result<Pool, EdgeLBError> {
        let what = format!("pool {}", pool.name);
        debug!("Updating EdgeLB pool {}", pool.name);
        let response = self
            .request(Method::PUT, &pool_path(&pool.name))
            .json(pool)
            .send()
            .await?;
        let response = Self::check(response, &what, &[StatusCode::NOT_FOUND]).await?;
        Self::decode(response, &what).await
    }

    async fn delete_pool(&self, name: &str) -> Result<(), EdgeLBError> {
        let what = format!("pool {}", name);
        debug!("Deleting EdgeLB pool {}", name);
        let response = self.request(Method::DELETE, &pool_path(name)).send().await?;
        Self::check(response, &what, &[StatusCode::NOT_FOUND]).await?;
        Ok(())
    }

    async fn get_pool_metadata(&self, name: &str) -> Result<PoolMetadata, EdgeLBError> {
        let what = format!("metadata of pool {}", name);
        let path = format!("{}/metadata", pool_path(name));
        let response = self.request(Method::GET, &path).send().await?;
        // EdgeLB answers 504 while the pool's load balancers are still starting.
        let response = Self::check(
            response,
            &what,
            &[StatusCode::NOT_FOUND, StatusCode::GATEWAY_TIMEOUT],
        )
        .await?;
        Self::decode(response, &what).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_trimmed() {
        let client = EdgeLBClient::new(EdgeLBClientOptions {
            base_url: "http://edgelb:8080/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://edgelb:8080");
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(EdgeLBClientOptions::default().timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unknown() {
        let client = EdgeLBClient::new(EdgeLBClientOptions {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap();

        let err = client.get_pool("foo").await.unwrap_err();
        assert!(!err.is_not_found());
    }
}
