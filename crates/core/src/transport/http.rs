//! HTTP transport backed by `reqwest`.

use super::{InboundResponse, OutboundRequest, Transport};
use crate::error::{FlowError, FlowResult};
use reqwest::{header, Client, Method};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// Transport that performs real HTTP calls.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> FlowResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> FlowResult<InboundResponse> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| FlowError::InvalidRequest(format!("invalid method {}", request.method)))?;
        let url = Url::parse(&request.url)
            .map_err(|e| FlowError::InvalidRequest(format!("invalid url {}: {}", request.url, e)))?;

        let mut headers = header::HeaderMap::new();
        for (key, value) in &request.headers {
            let name = header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| FlowError::InvalidRequest(format!("invalid header name {}", key)))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|_| FlowError::InvalidRequest(format!("invalid value for header {}", key)))?;
            headers.insert(name, value);
        }

        debug!(method = %method, url = %url, "outbound request");

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .query(&request.query)
            .body(request.body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect::<BTreeMap<_, _>>();
        let body = response.bytes().await?;

        Ok(InboundResponse {
            status,
            headers,
            body,
        })
    }
}

/// Build the invocation URL of a function behind a gateway.
///
/// A gateway without a scheme is reached over plain `http`.
pub fn function_url(gateway: &str, function: &str) -> FlowResult<String> {
    let base = if gateway.contains("://") {
        gateway.to_string()
    } else {
        format!("http://{}", gateway)
    };
    let mut url = Url::parse(&base)
        .map_err(|e| FlowError::InvalidRequest(format!("invalid gateway {}: {}", gateway, e)))?;
    let path = format!("{}/function/{}", url.path().trim_end_matches('/'), function);
    url.set_path(&path);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use wiremock::matchers::{body_string, header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_function_url() {
        assert_eq!(
            function_url("gateway:8080", "echo").unwrap(),
            "http://gateway:8080/function/echo"
        );
        assert_eq!(
            function_url("https://faas.example.com/base/", "echo").unwrap(),
            "https://faas.example.com/base/function/echo"
        );
    }

    #[tokio::test]
    async fn test_send_forwards_method_headers_query_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/items"))
            .and(header_is("x-trace", "t-1"))
            .and(query_param("filter", "a b"))
            .and(body_string("{\"k\":1}"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let mut request = OutboundRequest::new(
            "put",
            format!("{}/api/items", server.uri()),
            Bytes::from_static(b"{\"k\":1}"),
        );
        request.header("X-Trace", "t-1");
        request.query.push(("filter".to_string(), "a b".to_string()));

        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_send_returns_error_statuses_as_responses() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let request = OutboundRequest::new("POST", server.uri(), Bytes::new());

        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status, 503);
        assert!(!response.is_success());
        assert_eq!(&response.body[..], b"unavailable");
    }

    #[tokio::test]
    async fn test_send_rejects_bad_url() {
        let transport = HttpTransport::new().unwrap();
        let request = OutboundRequest::new("POST", "not a url", Bytes::new());

        let err = transport.send(request).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidRequest(_)));
    }
}
