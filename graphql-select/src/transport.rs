//! Transports carry a serialized request to a GraphQL server and bring back
//! the raw response text.
//!
//! Any `tower::Service<String, Response = String, Error = TransportError>`
//! can be used; [`HttpTransport`] posts to an HTTP endpoint with reqwest.

use std::task::Poll;

use futures::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use reqwest::header::CONTENT_TYPE;
use tower::util::BoxCloneService;
use tower::Service;
use url::Url;

use crate::configuration::Configuration;
use crate::error::ConfigurationError;
use crate::error::TransportError;

/// A type-erased transport: request text in, response text out.
pub type Transport = BoxCloneService<String, String, TransportError>;

/// Posts requests as `application/json` to a GraphQL endpoint.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: Url,
    authorization: Option<String>,
    headers: HeaderMap,
}

impl HttpTransport {
    /// Builds a transport with no credentials or extra headers.
    pub fn new(endpoint: Url) -> Result<Self, ConfigurationError> {
        Ok(Self {
            http_client: http_client()?,
            endpoint,
            authorization: None,
            headers: HeaderMap::new(),
        })
    }

    /// Builds a transport for the configured endpoint, token and headers.
    pub fn from_configuration(configuration: &Configuration) -> Result<Self, ConfigurationError> {
        let endpoint = configuration.require_endpoint()?.clone();
        let mut headers = HeaderMap::with_capacity(configuration.headers.len());
        for (name, value) in &configuration.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                ConfigurationError::InvalidHeader {
                    name: name.clone(),
                    reason: err.to_string(),
                }
            })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|err| ConfigurationError::InvalidHeader {
                    name: name.clone(),
                    reason: err.to_string(),
                })?;
            headers.insert(header_name, header_value);
        }
        Ok(Self {
            http_client: http_client()?,
            endpoint,
            authorization: configuration.authorization.clone(),
            headers,
        })
    }

    pub fn boxed(self) -> Transport {
        BoxCloneService::new(self)
    }
}

fn http_client() -> Result<reqwest::Client, ConfigurationError> {
    reqwest::Client::builder()
        .build()
        .map_err(|err| ConfigurationError::HttpClient {
            reason: err.to_string(),
        })
}

impl Service<String> for HttpTransport {
    type Response = String;
    type Error = TransportError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, body: String) -> Self::Future {
        let mut request = self
            .http_client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = &self.authorization {
            request = request.bearer_auth(token);
        }
        let endpoint = self.endpoint.clone();

        Box::pin(async move {
            tracing::trace!("posting to {endpoint}: {body}");
            let response = request
                .body(body)
                .send()
                .await
                .map_err(TransportError::failed)?;
            let status = response.status();
            let text = response.text().await.map_err(TransportError::failed)?;
            if !status.is_success() {
                return Err(TransportError::Failed {
                    reason: format!("{endpoint} answered with {status}: {text}"),
                });
            }
            Ok(text)
        })
    }
}
