//! Client configuration.

use std::time::Duration;

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::compiler::OperationKind;
use crate::error::ConfigurationError;

/// Configuration of a client session.
///
/// ```yaml
/// endpoint: https://api.example.com/graphql
/// authorization: ${TOKEN}
/// operation: query
/// timeout: 30s
/// headers:
///   x-client-name: dashboard
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct Configuration {
    /// The GraphQL endpoint queries are posted to.
    pub endpoint: Option<Url>,

    /// Bearer token sent in the `Authorization` header.
    pub authorization: Option<String>,

    /// Root keyword of every document; defaults to `query`.
    pub operation: OperationKind,

    /// Bound on a single round trip in human-readable format, such as `30s`.
    /// Unbounded when omitted.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>", default)]
    pub timeout: Option<Duration>,

    /// Extra headers sent with every request.
    pub headers: IndexMap<String, String>,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub fn new(
        endpoint: Option<Url>,
        authorization: Option<String>,
        operation: Option<OperationKind>,
        timeout: Option<Duration>,
        headers: Option<IndexMap<String, String>>,
    ) -> Self {
        Self {
            endpoint,
            authorization,
            operation: operation.unwrap_or_default(),
            timeout,
            headers: headers.unwrap_or_default(),
        }
    }

    /// Parses a YAML configuration document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// The configured endpoint, which an HTTP client cannot do without.
    pub fn require_endpoint(&self) -> Result<&Url, ConfigurationError> {
        self.endpoint
            .as_ref()
            .ok_or(ConfigurationError::MissingEndpoint)
    }
}
