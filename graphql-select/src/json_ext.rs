//! JSON aliases and helpers shared by the compiler, the executor and the identity map.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;

/// A JSON value as carried through the query pipeline.
pub type Value = serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// Turns a [`Value`] into an [`Object`] or fails with a message naming what it was instead.
macro_rules! ensure_object {
    ($value:expr) => {{
        match $value {
            $crate::json_ext::Value::Object(o) => Ok(o),
            other => Err(format!(
                "invalid type: expected an object, found {}",
                $crate::json_ext::value_kind(&other)
            )),
        }
    }};
}

/// Removes a key from an [`Object`], optionally checking the variant of the removed value.
///
/// Evaluates to `Result<Option<_>, String>`: a missing key is `Ok(None)`.
macro_rules! extract_key_value_from_object {
    ($object:expr, $key:literal, $pattern:pat => $var:ident) => {{
        match $object.remove($key) {
            Some($pattern) => Ok(Some($var)),
            None | Some($crate::json_ext::Value::Null) => Ok(None),
            Some(other) => Err(format!(
                "invalid type for key {}: found {}",
                $key,
                $crate::json_ext::value_kind(&other)
            )),
        }
    }};
    ($object:expr, $key:literal) => {{
        match $object.remove($key) {
            None | Some($crate::json_ext::Value::Null) => None,
            Some(value) => Some(value),
        }
    }};
}

pub(crate) use ensure_object;
pub(crate) use extract_key_value_from_object;

/// A GraphQL path element that is composed of strings or numbers.
/// e.g `/book/3/name`
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => f.write_str(key),
        }
    }
}

/// A path into the `data` of a response, as reported by GraphQL errors.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Self(
            s.split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| match segment.parse::<usize>() {
                    Ok(index) => PathElement::Index(index),
                    Err(_) => PathElement::Key(segment.to_string()),
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

/// Extension methods for JSON objects.
pub(crate) trait ObjectExt {
    /// Looks a key up, preferring an exact match and falling back to an ASCII
    /// case-insensitive one.
    fn get_ignore_case(&self, key: &str) -> Option<&Value>;
}

impl ObjectExt for Object {
    fn get_ignore_case(&self, key: &str) -> Option<&Value> {
        self.get(key).or_else(|| {
            self.iter()
                .find(|(k, _)| k.as_str().eq_ignore_ascii_case(key))
                .map(|(_, value)| value)
        })
    }
}

/// Drops every null-valued entry, keeping the order of the rest.
///
/// Nested input objects are stripped too, including those inside lists. List
/// elements themselves are kept, nulls included, so positions do not shift.
pub(crate) fn strip_nulls(object: &Object) -> Object {
    object
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), strip_nested_nulls(value)))
        .collect()
}

fn strip_nested_nulls(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(strip_nulls(object)),
        Value::Array(items) => Value::Array(items.iter().map(strip_nested_nulls).collect()),
        other => other.clone(),
    }
}

/// Returns a short name for the kind of a JSON value, for error messages.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn path_from_string() {
        let path = Path::from("hero/heroFriends/1/name");
        assert_eq!(
            path,
            Path(vec![
                PathElement::Key("hero".to_string()),
                PathElement::Key("heroFriends".to_string()),
                PathElement::Index(1),
                PathElement::Key("name".to_string()),
            ])
        );
        assert_eq!(path.to_string(), "/hero/heroFriends/1/name");
    }

    #[test]
    fn path_deserializes_mixed_elements() {
        let path: Path = serde_json_bytes::from_value(json!(["user", 0, "name"])).unwrap();
        assert_eq!(path, Path::from("user/0/name"));
    }

    #[test]
    fn strip_nulls_keeps_order() {
        let object = json!({ "b": 1, "a": null, "c": false });
        let stripped = strip_nulls(object.as_object().unwrap());
        assert_eq!(Value::Object(stripped), json!({ "b": 1, "c": false }));
    }

    #[test]
    fn strip_nulls_recurses_into_input_objects() {
        let object = json!({
            "filter": { "name": null, "age": 3, "address": { "zip": null } },
            "ids": [1, null, { "tag": null, "rank": 2 }],
            "limit": null
        });
        let stripped = strip_nulls(object.as_object().unwrap());
        assert_eq!(
            Value::Object(stripped),
            json!({
                "filter": { "age": 3, "address": {} },
                "ids": [1, null, { "rank": 2 }]
            })
        );
    }

    #[test]
    fn extract_checks_variant() {
        let object = json!({ "message": "boom", "path": null, "locations": 3 });
        let mut object = ensure_object!(object).unwrap();
        let message = extract_key_value_from_object!(object, "message", Value::String(s) => s);
        assert_eq!(message.unwrap().unwrap().as_str(), "boom");
        assert!(extract_key_value_from_object!(object, "path").is_none());
        let locations = extract_key_value_from_object!(object, "locations", Value::Array(a) => a);
        assert_eq!(locations.unwrap_err(), "invalid type for key locations: found number");
        assert!(ensure_object!(json!([1])).is_err());
    }

    #[test]
    fn get_ignore_case_prefers_exact_key() {
        let object = json!({ "Id": "upper", "id": "lower" });
        let object = object.as_object().unwrap();
        assert_eq!(object.get_ignore_case("id"), Some(&Value::from("lower")));
        assert_eq!(object.get_ignore_case("ID"), Some(&Value::from("upper")));
        assert_eq!(object.get_ignore_case("name"), None);
    }
}
