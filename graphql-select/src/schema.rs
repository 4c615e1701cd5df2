//! Type metadata produced ahead of time for a generated client.
//!
//! The compiler never inspects Rust types at runtime. Instead every generated
//! client embeds a [`Schema`] describing, for each object type, its fields
//! (with their declared GraphQL type and whether they are ignored), the
//! argument-taking methods that navigation steps may call, and for each root
//! query the declared types of its arguments.

use std::collections::HashMap;
use std::fmt;

use heck::ToLowerCamelCase;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::json_ext::Value;

/// A GraphQL type reference such as `String`, `[Post!]` or `ID!`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    /// A named scalar or object type.
    Named(String),
    /// A list of the inner type.
    List(Box<FieldType>),
    /// The inner type, required to be present.
    NonNull(Box<FieldType>),
}

impl FieldType {
    /// Parses a type reference. Anything that is not a list or non-null
    /// wrapper is taken as a named type.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if let Some(inner) = input.strip_suffix('!') {
            FieldType::NonNull(Box::new(FieldType::parse(inner)))
        } else if let Some(inner) = input
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            FieldType::List(Box::new(FieldType::parse(inner)))
        } else {
            FieldType::Named(input.to_string())
        }
    }

    /// The named type at the bottom of any list or non-null wrappers.
    pub fn inner_named_type(&self) -> &str {
        match self {
            FieldType::Named(name) => name.as_str(),
            FieldType::List(inner) | FieldType::NonNull(inner) => inner.inner_named_type(),
        }
    }

    pub fn is_list(&self) -> bool {
        match self {
            FieldType::List(_) => true,
            FieldType::NonNull(inner) => inner.is_list(),
            FieldType::Named(_) => false,
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, FieldType::NonNull(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Named(ty) => write!(f, "{ty}"),
            FieldType::List(ty) => write!(f, "[{ty}]"),
            FieldType::NonNull(ty) => write!(f, "{ty}!"),
        }
    }
}

impl From<&str> for FieldType {
    fn from(input: &str) -> Self {
        FieldType::parse(input)
    }
}

impl From<String> for FieldType {
    fn from(input: String) -> Self {
        FieldType::parse(&input)
    }
}

impl From<FieldType> for String {
    fn from(ty: FieldType) -> Self {
        ty.to_string()
    }
}

/// A field declared on an object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    /// The declared GraphQL type of the field.
    #[serde(rename = "type")]
    pub ty: FieldType,

    /// Ignored fields are never selected.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
}

/// A navigation method: a field that takes arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDefinition {
    /// Parameter names and their declared GraphQL types, in declaration order.
    #[serde(default)]
    pub arguments: IndexMap<String, FieldType>,

    /// The type the method resolves to.
    pub return_type: FieldType,
}

/// Metadata for one object type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectType {
    #[serde(default)]
    fields: IndexMap<String, FieldDefinition>,

    #[serde(default)]
    methods: IndexMap<String, MethodDefinition>,
}

impl ObjectType {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field.
    pub fn field(mut self, name: impl Into<String>, ty: impl Into<FieldType>) -> Self {
        self.fields.insert(
            name.into(),
            FieldDefinition {
                ty: ty.into(),
                ignored: false,
            },
        );
        self
    }

    /// Declares a field that is never selected.
    pub fn ignored_field(mut self, name: impl Into<String>, ty: impl Into<FieldType>) -> Self {
        self.fields.insert(
            name.into(),
            FieldDefinition {
                ty: ty.into(),
                ignored: true,
            },
        );
        self
    }

    /// Declares a navigation method.
    pub fn method<I, K, V>(
        mut self,
        name: impl Into<String>,
        arguments: I,
        return_type: impl Into<FieldType>,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldType>,
    {
        self.methods.insert(
            name.into(),
            MethodDefinition {
                arguments: arguments
                    .into_iter()
                    .map(|(name, ty)| (name.into(), ty.into()))
                    .collect(),
                return_type: return_type.into(),
            },
        );
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    /// Resolves a member name to a declared field.
    ///
    /// An exact match wins; otherwise the name is compared case-insensitively
    /// against both the declared name and its protocol name.
    pub fn lookup_field(&self, name: &str) -> Option<(&str, &FieldDefinition)> {
        if let Some((key, field)) = self.fields.get_key_value(name) {
            return Some((key.as_str(), field));
        }
        self.fields
            .iter()
            .find(|(key, _)| {
                key.eq_ignore_ascii_case(name) || protocol_name(key).eq_ignore_ascii_case(name)
            })
            .map(|(key, field)| (key.as_str(), field))
    }

    /// Resolves a method by name, case-insensitively.
    pub fn lookup_method(&self, name: &str) -> Option<(&str, &MethodDefinition)> {
        if let Some((key, method)) = self.methods.get_key_value(name) {
            return Some((key.as_str(), method));
        }
        self.methods
            .iter()
            .find(|(key, _)| {
                key.eq_ignore_ascii_case(name) || protocol_name(key).eq_ignore_ascii_case(name)
            })
            .map(|(key, method)| (key.as_str(), method))
    }
}

/// The metadata table for a generated client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default)]
    types: IndexMap<String, ObjectType>,

    /// `queryName -> argumentName -> declared type`
    #[serde(default)]
    query_arguments: HashMap<String, IndexMap<String, String>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a schema table from its JSON encoding.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Merges a JSON document of the shape `{queryName: {argName: type}}`
    /// into the argument table.
    pub fn with_query_arguments_json(mut self, json: &str) -> Result<Self, serde_json::Error> {
        let arguments: HashMap<String, IndexMap<String, String>> = serde_json::from_str(json)?;
        for (query, args) in arguments {
            self.query_arguments.entry(query).or_default().extend(args);
        }
        Ok(self)
    }

    /// Declares an object type.
    pub fn object(mut self, name: impl Into<String>, object: ObjectType) -> Self {
        self.types.insert(name.into(), object);
        self
    }

    /// Declares the type of an argument of a root query.
    pub fn query_argument(
        mut self,
        query: impl Into<String>,
        argument: impl Into<String>,
        ty: impl Into<String>,
    ) -> Self {
        self.query_arguments
            .entry(query.into())
            .or_default()
            .insert(argument.into(), ty.into());
        self
    }

    pub fn object_type(&self, name: &str) -> Option<&ObjectType> {
        self.types.get(name)
    }

    /// Object types have sub-selectable fields; everything else (scalars,
    /// enums, strings) is rendered without a selection set.
    pub fn is_object(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// The declared type of `argument` for the root query `query`.
    pub fn argument_type(&self, query: &str, argument: &str) -> Option<&str> {
        self.query_arguments
            .get(query)
            .and_then(|args| args.get(argument))
            .map(String::as_str)
    }
}

/// A Rust type that maps onto a named GraphQL type.
///
/// Generated client types implement this so that queries know which schema
/// type their result is.
pub trait GraphType {
    const TYPE_NAME: &'static str;
}

impl GraphType for String {
    const TYPE_NAME: &'static str = "String";
}

impl GraphType for bool {
    const TYPE_NAME: &'static str = "Boolean";
}

impl GraphType for i32 {
    const TYPE_NAME: &'static str = "Int";
}

impl GraphType for i64 {
    const TYPE_NAME: &'static str = "Int";
}

impl GraphType for f32 {
    const TYPE_NAME: &'static str = "Float";
}

impl GraphType for f64 {
    const TYPE_NAME: &'static str = "Float";
}

impl GraphType for Value {
    const TYPE_NAME: &'static str = "JSON";
}

impl<T: GraphType> GraphType for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;
}

impl<T: GraphType> GraphType for Vec<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;
}

/// The name a declared member goes by on the wire.
///
/// snake_case members are converted to lowerCamelCase; other names only get
/// their first character lowered so acronyms stay intact.
pub(crate) fn protocol_name(member: &str) -> String {
    if member.contains('_') {
        return member.to_lower_camel_case();
    }
    let mut chars = member.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => first.to_lowercase().chain(chars).collect(),
        _ => member.to_string(),
    }
}
