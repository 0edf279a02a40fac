//! Transport to enrichment sources
//!
//! [`EnrichmentTransport`] is the seam between the bridge and the network;
//! [`HttpTransport`] POSTs JSON to `base_url + source.path` and classifies
//! failures into [`SourceError`].

use crate::config::SourceConfig;
use crate::error::{BridgeError, SourceError};
use crate::protocol::{EnrichmentRequest, EnrichmentResponse};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use std::time::Duration;

const USER_AGENT: &str = concat!("dossier/", env!("CARGO_PKG_VERSION"));

/// One request/response exchange with a source
#[async_trait]
pub trait EnrichmentTransport: Send + Sync {
    /// Send `request` to `source`
    async fn send(
        &self,
        source: &SourceConfig,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentResponse, SourceError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Client with the given per-request timeout
    ///
    /// # Errors
    /// [`BridgeError::Client`] if the TLS backend cannot be initialised.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
        })
    }

    fn url(&self, source: &SourceConfig) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            source.path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl EnrichmentTransport for HttpTransport {
    async fn send(
        &self,
        source: &SourceConfig,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentResponse, SourceError> {
        let url = self.url(source);
        tracing::debug!(source = %source.name, url = %url, query = %request.query, "sending enrichment request");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e, self.timeout))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(SourceError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), message));
        }

        response
            .json::<EnrichmentResponse>()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))
    }
}

fn classify_transport_error(e: &reqwest::Error, timeout: Duration) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(timeout)
    } else if e.is_decode() {
        SourceError::InvalidResponse(e.to_string())
    } else {
        SourceError::Connect(e.to_string())
    }
}

/// Map a non-success HTTP status to a source error
pub(crate) fn classify_status(status: u16, message: String) -> SourceError {
    match status {
        429 => SourceError::RateLimited { retry_after: None },
        500..=599 => SourceError::Server { status, message },
        _ => SourceError::Client { status, message },
    }
}

/// `Retry-After` in delta-seconds; HTTP-date values are ignored
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(503, "busy".into()),
            SourceError::Server { status: 503, .. }
        ));
        assert!(matches!(
            classify_status(404, String::new()),
            SourceError::Client { status: 404, .. }
        ));
        assert!(classify_status(502, String::new()).is_transient());
        assert!(!classify_status(400, String::new()).is_transient());
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn url_joins_without_double_slash() {
        let t = HttpTransport::new("http://svc:8787/", Duration::from_secs(1)).expect("client");
        let src = SourceConfig::new("web", "/research/web");
        assert_eq!(t.url(&src), "http://svc:8787/research/web");
    }
}
