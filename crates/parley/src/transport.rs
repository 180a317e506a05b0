use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};

use crate::config::ClientConfig;
use crate::errors::{ApiErrorKind, ConfigError, ParleyResult, TransportError};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const MESSAGES_PATH: &str = "/v1/messages";

/// HTTP access to the Messages endpoint. Cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    url: String,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> ParleyResult<Self> {
        let mut headers = HeaderMap::new();
        let mut api_key =
            HeaderValue::from_str(config.api_key()).map_err(|_| ConfigError::InvalidApiKey)?;
        api_key.set_sensitive(true);
        headers.insert("x-api-key", api_key);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(TransportError::Network)?;

        Ok(Self {
            client,
            url: format!("{}{}", config.host(), MESSAGES_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a request body and read the full reply
    pub async fn post(&self, body: Vec<u8>) -> Result<Bytes, TransportError> {
        tracing::debug!(url = %self.url, bytes = body.len(), "posting message request");
        let response = self.client.post(&self.url).body(body).send().await?;
        let response = self.check(response).await?;
        Ok(response.bytes().await?)
    }

    /// Send a streaming request and hand back the open response. Dropping the
    /// response closes the connection.
    pub async fn open_stream(&self, body: Vec<u8>) -> Result<Response, TransportError> {
        tracing::debug!(url = %self.url, bytes = body.len(), "opening message stream");
        let response = self
            .client
            .post(&self.url)
            .header(ACCEPT, "text/event-stream")
            .body(body)
            .send()
            .await?;
        self.check(response).await
    }

    async fn check(&self, response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let kind = ApiErrorKind::from_status(status);
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!("failed to read error body: {}", err);
                String::new()
            }
        };
        tracing::warn!(%status, error_type = kind.error_type(), "request failed");
        Err(TransportError::Status {
            status,
            kind,
            url: self.url.clone(),
            body,
        })
    }
}
