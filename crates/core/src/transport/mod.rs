//! Transport layer for remote-function and HTTP operations.

pub mod http;

pub use http::HttpTransport;

use crate::error::FlowResult;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Request an operation hands to its transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    /// Header names are lower-case.
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Bytes,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>, body: Bytes) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body,
        }
    }

    pub fn header(&mut self, key: &str, value: impl Into<String>) {
        self.headers.insert(key.to_lowercase(), value.into());
    }
}

/// Raw response of an outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl InboundResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs one outbound call.
///
/// Implementations do not enforce the run deadline; the calling operation does.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> FlowResult<InboundResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_names_are_lowercased() {
        let mut request = OutboundRequest::new("POST", "http://localhost", Bytes::new());
        request.header("X-Call-Id", "abc");

        assert_eq!(request.headers.get("x-call-id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_success_range() {
        let response = |status| InboundResponse {
            status,
            headers: BTreeMap::new(),
            body: Bytes::new(),
        };
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(302).is_success());
        assert!(!response(500).is_success());
    }
}
