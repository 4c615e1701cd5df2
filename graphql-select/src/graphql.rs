//! Types related to GraphQL requests, responses, etc.

use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;

use crate::error::QueryExecutionError;
use crate::json_ext::ensure_object;
use crate::json_ext::extract_key_value_from_object;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// The alias every compiled document gives its root field.
pub(crate) const RESULT_ALIAS: &str = "result";

/// A GraphQL request body as sent over the wire.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// The query document.
    pub query: String,

    /// The variables referenced by the document.
    #[serde(default)]
    pub variables: Object,
}

/// The error location
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// The line number
    pub line: u32,
    /// The column number
    pub column: u32,
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as may be found in the `errors` field of a GraphQL response.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error in the query document.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub locations: Vec<Location>,

    /// If this is a field error, the JSON path to that field in the response data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// The optional GraphQL extensions for this error.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Error {
    /// Returns a builder that builds a GraphQL [`Error`] from its components.
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Path>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }

    pub(crate) fn from_value(value: Value) -> Result<Error, String> {
        let mut object = ensure_object!(value)?;

        let extensions =
            extract_key_value_from_object!(object, "extensions", Value::Object(o) => o)?
                .unwrap_or_default();
        let message = extract_key_value_from_object!(object, "message", Value::String(s) => s)?
            .map(|s| s.as_str().to_string())
            .unwrap_or_default();
        let locations = extract_key_value_from_object!(object, "locations")
            .map(serde_json_bytes::from_value)
            .transpose()
            .map_err(|err| err.to_string())?
            .unwrap_or_default();
        let path = extract_key_value_from_object!(object, "path")
            .map(serde_json_bytes::from_value)
            .transpose()
            .map_err(|err| err.to_string())?;

        Ok(Error {
            message,
            locations,
            path,
            extensions,
        })
    }
}

/// Displays (only) the error message.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

/// A GraphQL response envelope.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

impl Response {
    /// Create a [`Response`] from raw response text.
    pub(crate) fn from_bytes(b: Bytes) -> Result<Response, String> {
        let value = Value::from_bytes(b).map_err(|error| error.to_string())?;
        let mut object = ensure_object!(value)?;

        let data = object.remove("data");
        let errors = extract_key_value_from_object!(object, "errors", Value::Array(v) => v)?
            .into_iter()
            .flatten()
            .map(Error::from_value)
            .collect::<Result<Vec<Error>, String>>()?;
        let extensions =
            extract_key_value_from_object!(object, "extensions", Value::Object(o) => o)?
                .unwrap_or_default();

        Ok(Response {
            data,
            errors,
            extensions,
        })
    }

    /// Takes the node aliased `result` out of `data`.
    ///
    /// Errors win over data. A missing `data.result` is a malformed envelope,
    /// but an explicit `null` result is a valid answer.
    pub(crate) fn into_result(self) -> Result<Value, Vec<Error>> {
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        match self.data {
            Some(Value::Object(mut data)) => data.remove(RESULT_ALIAS).ok_or_else(Vec::new),
            _ => Err(Vec::new()),
        }
    }
}

/// Parses a raw response and extracts the root result node.
pub(crate) fn extract_result(query: &str, raw: &str) -> Result<Value, QueryExecutionError> {
    let response = Response::from_bytes(Bytes::copy_from_slice(raw.as_bytes()))
        .map_err(|_| QueryExecutionError::malformed(query, raw))?;
    response.into_result().map_err(|errors| {
        if errors.is_empty() {
            QueryExecutionError::malformed(query, raw)
        } else {
            QueryExecutionError::with_errors(errors, query)
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;
    use test_log::test;

    use super::*;

    #[test]
    fn request_always_carries_variables() {
        let request = Request {
            query: "query { result: ping }".to_string(),
            variables: Object::new(),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"query":"query { result: ping }","variables":{}}"#
        );
    }

    #[test]
    fn errors_take_precedence_over_data() {
        let raw = r#"{"data":{"result":{"name":"Ada"}},"errors":[{"message":"not found","path":["user"]}]}"#;
        let error = extract_result("query", raw).unwrap_err();
        assert_eq!(error.errors.len(), 1);
        assert_eq!(error.errors[0].message, "not found");
        assert_eq!(error.errors[0].path, Some(Path::from("user")));
        assert_eq!(error.response, None);
    }

    #[test]
    fn empty_errors_array_is_ignored() {
        let raw = r#"{"data":{"result":{"name":"Ada"}},"errors":[]}"#;
        assert_eq!(
            extract_result("query", raw).unwrap(),
            json!({ "name": "Ada" })
        );
    }

    #[test]
    fn null_result_is_present() {
        assert_eq!(
            extract_result("query", r#"{"data":{"result":null}}"#).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn missing_result_is_malformed() {
        for raw in [r#"{"data":{}}"#, r#"{"data":null}"#, "[]", "not json"] {
            let error = extract_result("query", raw).unwrap_err();
            assert!(error.errors.is_empty());
            assert_eq!(error.response.as_deref(), Some(raw));
            assert_eq!(error.query, "query");
        }
    }

    #[test]
    fn error_from_value_is_lenient() {
        let error = Error::from_value(json!({
            "message": "boom",
            "locations": [{ "line": 2, "column": 3 }],
            "extensions": { "code": "INTERNAL" },
            "unknown": true
        }))
        .unwrap();
        assert_eq!(error.message, "boom");
        assert_eq!(error.locations, vec![Location { line: 2, column: 3 }]);
        assert_eq!(error.extensions.get("code"), Some(&Value::from("INTERNAL")));
        assert!(Error::from_value(json!("boom")).is_err());
    }
}
