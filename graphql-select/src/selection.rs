//! Selection expressions: which fields of a result type a query asks for.
//!
//! A caller describes a selection as a small [`Expression`] tree (the same
//! shape a field-access closure would have) which is then normalised into a
//! [`Selector`]. Extra nested fields are requested with [`Include`] paths.

use std::fmt;

use indexmap::IndexMap;

use crate::error::CompileError;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// A field-access expression over the query's result type.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// The value being selected from.
    Parameter,

    /// `target.member`
    Member {
        target: Box<Expression>,
        member: String,
    },

    /// A type conversion wrapping another expression. Transparent to selection.
    Convert(Box<Expression>),

    /// Construction of an anonymous or tuple shape from positional expressions.
    New(Vec<Expression>),

    /// Construction of a named shape from `field = expression` bindings.
    MemberInit(Vec<(String, Expression)>),

    /// A literal value.
    Constant(Value),

    /// `target.method(arguments)`
    Call {
        target: Box<Expression>,
        method: String,
        arguments: Vec<Expression>,
    },
}

impl Expression {
    pub fn parameter() -> Self {
        Expression::Parameter
    }

    pub fn member(self, member: impl Into<String>) -> Self {
        Expression::Member {
            target: Box::new(self),
            member: member.into(),
        }
    }

    pub fn convert(self) -> Self {
        Expression::Convert(Box::new(self))
    }

    pub fn call(self, method: impl Into<String>, arguments: Vec<Expression>) -> Self {
        Expression::Call {
            target: Box::new(self),
            method: method.into(),
            arguments,
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Expression::Constant(value.into())
    }

    pub fn construct(arguments: Vec<Expression>) -> Self {
        Expression::New(arguments)
    }

    pub fn init<I, K>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, Expression)>,
        K: Into<String>,
    {
        Expression::MemberInit(
            bindings
                .into_iter()
                .map(|(name, expression)| (name.into(), expression))
                .collect(),
        )
    }

    /// A short name for the node kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Expression::Parameter => "parameter",
            Expression::Member { .. } => "member access",
            Expression::Convert(_) => "convert",
            Expression::New(_) => "new",
            Expression::MemberInit(_) => "member init",
            Expression::Constant(_) => "constant",
            Expression::Call { .. } => "call",
        }
    }

    fn unwrap_convert(&self) -> &Expression {
        match self {
            Expression::Convert(inner) => inner.unwrap_convert(),
            other => other,
        }
    }

    /// Reads a member chain rooted at the parameter, if this is one.
    fn as_member_path(&self) -> Option<MemberPath> {
        let mut members = Vec::new();
        let mut current = self.unwrap_convert();
        loop {
            match current {
                Expression::Member { target, member } => {
                    members.push(member.clone());
                    current = target.unwrap_convert();
                }
                Expression::Parameter if !members.is_empty() => {
                    members.reverse();
                    return Some(MemberPath(members));
                }
                _ => return None,
            }
        }
    }
}

/// A chain of member names, from the root type to the leaf.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberPath(pub(crate) Vec<String>);

impl MemberPath {
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MemberPath(members.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl From<&str> for MemberPath {
    fn from(path: &str) -> Self {
        MemberPath::new(path.split('.').filter(|segment| !segment.is_empty()))
    }
}

impl fmt::Display for MemberPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A normalised selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// A single member chain.
    Member(MemberPath),

    /// A positional projection: each member chain becomes a sibling field.
    Constructed(Vec<MemberPath>),

    /// A named projection: each binding selects a member chain, aliased to
    /// the binding name when the two differ.
    Initialized(IndexMap<String, MemberPath>),
}

impl Selector {
    /// Normalises an expression.
    ///
    /// Positional arguments that are not member chains (constants, calls) are
    /// skipped since they need nothing from the server.
    pub fn from_expression(expression: &Expression) -> Result<Self, CompileError> {
        let body = expression.unwrap_convert();
        if let Some(path) = body.as_member_path() {
            return Ok(Selector::Member(path));
        }
        match body {
            Expression::New(arguments) => Ok(Selector::Constructed(
                arguments
                    .iter()
                    .filter_map(Expression::as_member_path)
                    .collect(),
            )),
            Expression::MemberInit(bindings) => bindings
                .iter()
                .map(|(name, expression)| {
                    expression
                        .as_member_path()
                        .map(|path| (name.clone(), path))
                        .ok_or_else(|| CompileError::UnsupportedSelectionKind {
                            kind: expression.kind().to_string(),
                        })
                })
                .collect::<Result<IndexMap<_, _>, _>>()
                .map(Selector::Initialized),
            other => Err(CompileError::UnsupportedSelectionKind {
                kind: other.kind().to_string(),
            }),
        }
    }
}

impl TryFrom<Expression> for Selector {
    type Error = CompileError;

    fn try_from(expression: Expression) -> Result<Self, Self::Error> {
        Selector::from_expression(&expression)
    }
}

/// A navigation method call made along an include path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodInclude {
    /// The method name, matched case-insensitively against path segments.
    pub method: String,
    /// Argument values by parameter name. Null values are not sent.
    pub arguments: Object,
}

impl MethodInclude {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            arguments: Object::new(),
        }
    }

    pub fn argument(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(name, value.into());
        self
    }
}

/// An extra nested selection: a dotted path plus the method calls that the
/// path's segments are made through, in path order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Include {
    pub path: String,
    pub methods: Vec<MethodInclude>,
}

impl Include {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: MethodInclude) -> Self {
        self.methods.push(method);
        self
    }

    pub(crate) fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('.').filter(|segment| !segment.is_empty())
    }
}

impl From<&str> for Include {
    fn from(path: &str) -> Self {
        Include::path(path)
    }
}

impl From<String> for Include {
    fn from(path: String) -> Self {
        Include::path(path)
    }
}
