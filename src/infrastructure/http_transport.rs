use crate::domain::errors::TransportError;
use crate::domain::ports::{Transport, TransportResponse};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::time::Duration;
use tracing::trace;

pub const KEY_HEADER: &str = "Insight-Key";

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Creates the HTTP client shared by all ingest calls.
    ///
    /// No retry middleware: a failed cycle is simply retried on the next tick.
    pub fn create_client(timeout: Duration) -> Client {
        Client::builder()
            .pool_max_idle_per_host(2)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new())
    }
}

/// reqwest-backed transport to the remote collector
pub struct HttpTransport {
    client: Client,
    key: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: HttpClientFactory::create_client(timeout),
            key: key.into(),
            timeout,
        }
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else if e.is_connect() {
            TransportError::Connection {
                reason: e.to_string(),
            }
        } else {
            TransportError::Request {
                reason: e.to_string(),
            }
        }
    }

    async fn into_response(
        &self,
        response: reqwest::Response,
    ) -> Result<TransportResponse, TransportError> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_error(e))?;
        trace!("HttpTransport: status={} body={}", status, body);
        Ok(TransportResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        gzipped: bool,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(KEY_HEADER, &self.key)
            .body(body);
        if gzipped {
            request = request.header(CONTENT_ENCODING, "gzip");
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;
        self.into_response(response).await
    }

    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .header(KEY_HEADER, &self.key)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        self.into_response(response).await
    }
}
