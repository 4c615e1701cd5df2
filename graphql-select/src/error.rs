//! Error taxonomy for compiling, executing and mapping queries.

use std::fmt;

use displaydoc::Display;
use thiserror::Error;

use crate::graphql::Error;
use crate::json_ext::Value;

const SEPARATOR_WIDTH: usize = 50;

/// Errors raised while turning a selection into a query document.
///
/// These are reported before anything is sent over the transport.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum CompileError {
    /// selection kind '{kind}' is not supported
    UnsupportedSelectionKind {
        /// The kind of the offending expression node.
        kind: String,
    },

    /// type '{type_name}' has no field '{field}'
    FieldResolution {
        /// The type the field was looked up on.
        type_name: String,
        /// The field that could not be found.
        field: String,
    },

    /// type '{type_name}' has no method '{method}' matching the include
    MethodResolution {
        /// The type the method was looked up on.
        type_name: String,
        /// The method that could not be matched.
        method: String,
    },

    /// type '{type_name}' is not declared in the schema
    UnknownType {
        /// The undeclared type.
        type_name: String,
    },

    /// no declared type for argument '{argument}' of query '{query}'
    UnknownArgumentType {
        /// The root query.
        query: String,
        /// The argument without a declared type.
        argument: String,
    },

    /// could not serialize the request: {reason}
    Serialization {
        /// The serializer failure.
        reason: String,
    },
}

/// Errors returned by a transport.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
pub enum TransportError {
    /// transport failed: {reason}
    Failed {
        /// The reason the round trip failed.
        reason: String,
    },

    /// the request was cancelled
    Cancelled,
}

impl TransportError {
    pub fn failed(reason: impl ToString) -> Self {
        TransportError::Failed {
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by the identity map and entity deserialization.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum EntityError {
    /// entity payload has no 'id' field
    MissingEntityId,

    /// entity 'id' must be a string, found {found}
    InvalidEntityIdType {
        /// The kind of value found instead.
        found: String,
    },

    /// a manager for '{type_name}' is already registered
    DuplicateManagerRegistration {
        /// The type that already has a manager.
        type_name: String,
    },

    /// entity references can only be deserialized while an identity map is in scope
    NoIdentityMap,

    /// could not deserialize entity '{type_name}': {reason}
    Deserialization {
        /// The entity type.
        type_name: String,
        /// The deserializer failure.
        reason: String,
    },
}

/// The server answered, but not with a usable `data.result`.
///
/// Either `errors` is non-empty, or the envelope is missing the result node.
/// The query text is kept for diagnostics, along with the raw response in the
/// malformed case.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct QueryExecutionError {
    /// The errors the server returned. Empty for a malformed envelope.
    pub errors: Vec<Error>,
    /// The query document that was sent.
    pub query: String,
    /// The raw response text, when the envelope itself was malformed.
    pub response: Option<String>,
}

impl QueryExecutionError {
    pub(crate) fn with_errors(errors: Vec<Error>, query: impl Into<String>) -> Self {
        Self {
            errors,
            query: query.into(),
            response: None,
        }
    }

    pub(crate) fn malformed(query: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            errors: Vec::new(),
            query: query.into(),
            response: Some(response.into()),
        }
    }
}

impl fmt::Display for QueryExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(SEPARATOR_WIDTH);
        let heavy = "=".repeat(SEPARATOR_WIDTH);

        if self.errors.is_empty() {
            writeln!(f, "Failed to parse response")?;
        } else {
            writeln!(f, "One or more errors occurred during query execution")?;
        }
        writeln!(f, "{heavy}")?;

        for error in &self.errors {
            writeln!(f, "Message: {}", error.message)?;
            if let Some(path) = &error.path {
                writeln!(f, "Path:")?;
                for element in path.iter() {
                    writeln!(f, "  {element}")?;
                }
            }
            for location in &error.locations {
                writeln!(f, "Location: {}:{}", location.line, location.column)?;
            }
            if let Some(code) = error.extensions.get("code").and_then(Value::as_str) {
                writeln!(f, "Code: {code}")?;
            }
            if let Some(stacktrace) = error
                .extensions
                .get("exception")
                .and_then(Value::as_object)
                .and_then(|exception| exception.get("stacktrace"))
                .and_then(Value::as_array)
            {
                writeln!(f, "Server stack trace:")?;
                for line in stacktrace.iter().filter_map(Value::as_str) {
                    writeln!(f, "  {line}")?;
                }
            }
            writeln!(f, "{rule}")?;
        }

        writeln!(f, "Query:")?;
        writeln!(f, "{}", self.query)?;
        if let Some(response) = &self.response {
            writeln!(f, "{rule}")?;
            writeln!(f, "Response:")?;
            writeln!(f, "{response}")?;
        }
        write!(f, "{heavy}")
    }
}

/// Errors returned when executing a query.
#[derive(Error, Display, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum QueryError {
    /// query compilation failed: {0}
    Compilation(#[from] CompileError),

    /// transport failed: {reason}
    Transport {
        /// The reason the round trip failed.
        reason: String,
        /// The request body that was being sent.
        request: String,
    },

    /// the request was cancelled
    Cancelled,

    /// {0}
    Execution(#[from] QueryExecutionError),

    /// entity mapping failed: {0}
    Entity(#[from] EntityError),

    /// could not deserialize the result: {reason}
    Deserialization {
        /// The deserializer failure.
        reason: String,
    },
}

impl QueryError {
    pub(crate) fn from_transport(error: TransportError, request: &str) -> Self {
        match error {
            TransportError::Cancelled => QueryError::Cancelled,
            TransportError::Failed { reason } => QueryError::Transport {
                reason,
                request: request.to_string(),
            },
        }
    }

    /// The server-side errors, if the query reached the server and failed there.
    pub fn graphql_errors(&self) -> &[Error] {
        match self {
            QueryError::Execution(error) => &error.errors,
            _ => &[],
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// no endpoint configured
    MissingEndpoint,

    /// invalid header '{name}': {reason}
    InvalidHeader {
        /// The configured header name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// could not build the HTTP client: {reason}
    HttpClient {
        /// The reqwest failure.
        reason: String,
    },

    /// could not read configuration: {0}
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use serde_json_bytes::json;

    use super::*;
    use crate::graphql::Location;
    use crate::json_ext::Path;

    #[test]
    fn messages_come_from_doc_comments() {
        assert_eq!(
            CompileError::UnsupportedSelectionKind {
                kind: "call".to_string()
            }
            .to_string(),
            "selection kind 'call' is not supported"
        );
        assert_eq!(
            EntityError::InvalidEntityIdType {
                found: "number".to_string()
            }
            .to_string(),
            "entity 'id' must be a string, found number"
        );
        assert_eq!(
            QueryError::from_transport(TransportError::failed("connection refused"), "{}")
                .to_string(),
            "transport failed: connection refused"
        );
    }

    #[test]
    fn cancellation_is_not_a_transport_failure() {
        assert_eq!(
            QueryError::from_transport(TransportError::Cancelled, "{}"),
            QueryError::Cancelled
        );
    }

    #[test]
    fn error_report() {
        let error = Error::builder()
            .message("not found")
            .path(Path::from("user/0"))
            .location(Location { line: 1, column: 9 })
            .extension("code", "NOT_FOUND")
            .extension("exception", json!({ "stacktrace": ["at resolve", "at run"] }))
            .build();
        let report = QueryExecutionError::with_errors(
            vec![error],
            "query { result: user(id: $id) { name } }",
        );
        assert_snapshot!(report.to_string(), @r###"
        One or more errors occurred during query execution
        ==================================================
        Message: not found
        Path:
          user
          0
        Location: 1:9
        Code: NOT_FOUND
        Server stack trace:
          at resolve
          at run
        --------------------------------------------------
        Query:
        query { result: user(id: $id) { name } }
        ==================================================
        "###);
    }

    #[test]
    fn malformed_report_carries_response() {
        let report = QueryExecutionError::malformed("query { result: ping }", r#"{"data":{}}"#);
        assert_snapshot!(report.to_string(), @r###"
        Failed to parse response
        ==================================================
        Query:
        query { result: ping }
        --------------------------------------------------
        Response:
        {"data":{}}
        ==================================================
        "###);
    }
}
