//! Network transport contract and response classification.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use tp_storage::Transmission;

/// Status and optional `Retry-After` hint of a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
}

impl TransportResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Failures before an HTTP status was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("name resolution failed: {0}")]
    Dns(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Other(String),
}

pub type TransportResult = std::result::Result<TransportResponse, TransportError>;

/// Sends one transmission to its endpoint.
pub trait Transport: Send + Sync {
    fn send(&self, transmission: &Transmission) -> TransportResult;
}

/// How the pipeline treats the result of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseClass {
    /// 2xx.
    Success,
    /// 429: back off. A stored record is deleted on retry.
    Throttled,
    /// 503: keep the transmission and retry.
    Unavailable,
    /// 400 and other non-retryable statuses: drop the transmission.
    Rejected,
    /// Network failures, 408, 500, 502, 504: keep the transmission and retry.
    Transient,
}

impl ResponseClass {
    pub fn of(result: &TransportResult) -> Self {
        match result {
            Ok(response) => Self::of_status(response.status),
            Err(_) => ResponseClass::Transient,
        }
    }

    pub fn of_status(status: u16) -> Self {
        match status {
            200..=299 => ResponseClass::Success,
            429 => ResponseClass::Throttled,
            503 => ResponseClass::Unavailable,
            408 | 500 | 502 | 504 => ResponseClass::Transient,
            501 | 505..=599 => ResponseClass::Transient,
            _ => ResponseClass::Rejected,
        }
    }

    /// Whether a stored record survives this result.
    pub fn keeps_transmission(&self) -> bool {
        matches!(self, ResponseClass::Unavailable | ResponseClass::Transient)
    }
}

impl std::fmt::Display for ResponseClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseClass::Success => write!(f, "success"),
            ResponseClass::Throttled => write!(f, "throttled"),
            ResponseClass::Unavailable => write!(f, "unavailable"),
            ResponseClass::Rejected => write!(f, "rejected"),
            ResponseClass::Transient => write!(f, "transient"),
        }
    }
}

/// Parse a `Retry-After` header given in delta-seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Transport that replays a fixed script of results, then a fallback.
///
/// Every sent transmission is recorded for inspection.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<TransportResult>>,
    fallback: TransportResult,
    sent: Mutex<Vec<Transmission>>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = TransportResult>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Ok(TransportResponse::new(200)),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with `status`.
    pub fn always(status: u16) -> Self {
        Self::new([]).with_fallback(Ok(TransportResponse::new(status)))
    }

    pub fn with_fallback(mut self, fallback: TransportResult) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn push(&self, result: TransportResult) {
        lock(&self.script).push_back(result);
    }

    pub fn sent(&self) -> Vec<Transmission> {
        lock(&self.sent).clone()
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.sent).len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, transmission: &Transmission) -> TransportResult {
        lock(&self.sent).push(transmission.clone());
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use tracing::debug;

    use super::{parse_retry_after, Transport, TransportError, TransportResponse, TransportResult};
    use tp_storage::Transmission;

    /// Blocking HTTP transport built on `ureq`.
    pub struct HttpTransport {
        agent: ureq::Agent,
    }

    impl HttpTransport {
        pub fn new(timeout: Duration) -> Self {
            let agent = ureq::AgentBuilder::new().timeout(timeout).build();
            Self { agent }
        }
    }

    impl Default for HttpTransport {
        fn default() -> Self {
            Self::new(Duration::from_secs(100))
        }
    }

    fn response_of(response: &ureq::Response) -> TransportResponse {
        TransportResponse {
            status: response.status(),
            retry_after: response.header("Retry-After").and_then(parse_retry_after),
        }
    }

    impl Transport for HttpTransport {
        fn send(&self, transmission: &Transmission) -> TransportResult {
            let mut request = self
                .agent
                .post(&transmission.endpoint)
                .set("Content-Type", &transmission.content_type);
            if let Some(encoding) = &transmission.content_encoding {
                request = request.set("Content-Encoding", encoding);
            }

            match request.send_bytes(&transmission.payload) {
                Ok(response) => Ok(response_of(&response)),
                Err(ureq::Error::Status(_, response)) => Ok(response_of(&response)),
                Err(ureq::Error::Transport(transport)) => {
                    debug!(error = %transport, endpoint = %transmission.endpoint, "transport failure");
                    let message = transport.to_string();
                    Err(match transport.kind() {
                        ureq::ErrorKind::Dns => TransportError::Dns(message),
                        ureq::ErrorKind::ConnectionFailed
                        | ureq::ErrorKind::Io
                        | ureq::ErrorKind::ProxyConnect => {
                            if message.contains("timed out") {
                                TransportError::Timeout(message)
                            } else {
                                TransportError::Network(message)
                            }
                        }
                        _ => TransportError::Other(message),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(ResponseClass::of_status(200), ResponseClass::Success);
        assert_eq!(ResponseClass::of_status(206), ResponseClass::Success);
        assert_eq!(ResponseClass::of_status(429), ResponseClass::Throttled);
        assert_eq!(ResponseClass::of_status(503), ResponseClass::Unavailable);
        assert_eq!(ResponseClass::of_status(400), ResponseClass::Rejected);
        assert_eq!(ResponseClass::of_status(404), ResponseClass::Rejected);
        for status in [408, 500, 502, 504] {
            assert_eq!(ResponseClass::of_status(status), ResponseClass::Transient);
        }
        let dns: TransportResult = Err(TransportError::Dns("no such host".into()));
        assert_eq!(ResponseClass::of(&dns), ResponseClass::Transient);
    }

    #[test]
    fn test_keeps_transmission() {
        assert!(ResponseClass::Unavailable.keeps_transmission());
        assert!(ResponseClass::Transient.keeps_transmission());
        assert!(!ResponseClass::Throttled.keeps_transmission());
        assert!(!ResponseClass::Rejected.keeps_transmission());
        assert!(!ResponseClass::Success.keeps_transmission());
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_scripted_transport() {
        let t = ScriptedTransport::new([Ok(TransportResponse::new(503))]);
        let tx = Transmission::new("http://localhost/track", "text/plain", None, b"x".to_vec());
        assert_eq!(t.send(&tx).unwrap().status, 503);
        assert_eq!(t.send(&tx).unwrap().status, 200);
        assert_eq!(t.sent_count(), 2);
    }
}
