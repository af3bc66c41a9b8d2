//! HTTP client for the Datadog monitor API.

use std::sync::Arc;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::DatadogConfig;
use crate::error::{Error, Result};
use crate::monitor::Monitor;

const API_KEY_HEADER: &str = "DD-API-KEY";
const APP_KEY_HEADER: &str = "DD-APPLICATION-KEY";

/// Client for the Datadog v1 monitor endpoints.
#[derive(Debug, Clone)]
pub struct DatadogClient {
    config: Arc<DatadogConfig>,
    base_url: Url,
    http_client: reqwest::Client,
}

impl DatadogClient {
    /// Create a client from configuration.
    ///
    /// Both credentials must be present.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation or the HTTP
    /// client cannot be built.
    pub fn with_config(config: DatadogConfig) -> Result<Self> {
        config.validate()?;
        let base_url = config.parsed_base_url()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            base_url,
            http_client,
        })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &DatadogConfig {
        &self.config
    }

    /// Create a monitor and return it as stored by Datadog.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] for a non-success response and [`Error::Http`]
    /// when the request cannot be sent.
    pub async fn create_monitor(&self, monitor: &Monitor) -> Result<Monitor> {
        let url = self.url("api/v1/monitor")?;
        debug!(name = ?monitor.name, "Creating Datadog monitor");

        let response = self
            .request(Method::POST, url)
            .json(&monitor.writable())
            .send()
            .await?;

        parse_json(response).await
    }

    /// Fetch a monitor by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] with status 404 when the monitor does not exist,
    /// and [`Error::Http`] when the request cannot be sent.
    pub async fn get_monitor(&self, id: i64) -> Result<Monitor> {
        let url = self.monitor_url(id)?;
        debug!(monitor_id = id, "Fetching Datadog monitor");

        let response = self.request(Method::GET, url).send().await?;

        parse_json(response).await
    }

    /// Replace a monitor's writable fields.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `monitor.id` is unset
    /// - Datadog answers with a non-success status
    /// - The request cannot be sent
    pub async fn update_monitor(&self, monitor: &Monitor) -> Result<Monitor> {
        let id = monitor
            .id
            .ok_or_else(|| Error::config_error("cannot update a monitor without an id"))?;
        let url = self.monitor_url(id)?;
        debug!(monitor_id = id, "Updating Datadog monitor");

        let response = self
            .request(Method::PUT, url)
            .json(&monitor.writable())
            .send()
            .await?;

        parse_json(response).await
    }

    /// Delete a monitor by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] for a non-success response, including 404 for a
    /// monitor that is already gone.
    pub async fn delete_monitor(&self, id: i64) -> Result<()> {
        let url = self.monitor_url(id)?;
        debug!(monitor_id = id, "Deleting Datadog monitor");

        let response = self.request(Method::DELETE, url).send().await?;

        check_status(response).await.map(|_| ())
    }

    /// Check whether the configured API key is accepted.
    ///
    /// Returns `Ok(false)` for a rejected key and `Err` for transport failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or Datadog answers with
    /// an unexpected status.
    pub async fn validate_credentials(&self) -> Result<bool> {
        let url = self.url("api/v1/validate")?;

        let response = self.request(Method::GET, url).send().await?;

        match check_status(response).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_forbidden() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header(API_KEY_HEADER, self.config.api_key.expose())
            .header(APP_KEY_HEADER, self.config.app_key.expose())
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn monitor_url(&self, id: i64) -> Result<Url> {
        self.url(&format!("api/v1/monitor/{id}"))
    }
}

/// Turn a non-success response into an `Error::Api`.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::api(status, body))
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;

    serde_json::from_slice(&bytes)
        .map_err(|e| Error::invalid_response(format!("failed to decode monitor: {e}")))
}
