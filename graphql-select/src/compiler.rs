//! Compiles a query definition into a GraphQL document and its variables.
//!
//! Every document has the same outer shape:
//!
//! ```text
//! query ($id: ID!) { result: getUser(id: $id) { name } }
//! ```
//!
//! The root field is always aliased `result`. When the final selection set is
//! empty the query is a scalar query and the root field carries no braces.

use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::error::CompileError;
use crate::graphql::Request;
use crate::graphql::RESULT_ALIAS;
use crate::json_ext::strip_nulls;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::schema::protocol_name;
use crate::schema::FieldType;
use crate::schema::ObjectType;
use crate::schema::Schema;
use crate::selection::Include;
use crate::selection::MemberPath;
use crate::selection::Selector;

/// Nesting limit for the "include everything" selection.
const INCLUDE_ALL_DEPTH_LIMIT: usize = 16;

/// The root keyword of a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Query => f.write_str("query"),
            OperationKind::Mutation => f.write_str("mutation"),
        }
    }
}

/// Everything needed to compile one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryDefinition {
    /// `query` or `mutation`.
    pub operation: OperationKind,
    /// The root field to call.
    pub query_name: String,
    /// The named GraphQL type the root field resolves to (the element type for lists).
    pub root_type: String,
    /// The explicit selection, if any. Without one the default selection is used.
    pub selector: Option<Selector>,
    /// Extra nested selections.
    pub includes: Vec<Include>,
    /// Whether the default selection recurses into object-typed fields.
    pub include_all: bool,
    /// Arguments of the root field. Nulls are not sent.
    pub arguments: Object,
}

/// A compiled query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDocument {
    /// The document text.
    pub query: String,
    /// The variables the document references.
    pub variables: Object,
    /// The serialized request body.
    pub raw: String,
    /// Where the selected values sit in each result node, for selector queries.
    pub(crate) shape: Option<ResultShape>,
}

/// The response keys an explicit selection is read back from.
///
/// The server answers a selector with the selected fields nested as they were
/// requested. Reshaping a result node pulls the values out again so they
/// deserialize into the selection's own type: a member into its value, a
/// construction into a list (a tuple on the client side) and an initializer
/// into an object keyed by binding.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResultShape {
    Member(Vec<String>),
    Constructed(Vec<Vec<String>>),
    Initialized(Vec<(String, Vec<String>)>),
}

impl ResultShape {
    pub(crate) fn reshape(&self, node: Value) -> Value {
        match self {
            ResultShape::Member(keys) => follow(node, keys),
            ResultShape::Constructed(members) => Value::Array(
                members
                    .iter()
                    .map(|keys| follow(node.clone(), keys))
                    .collect(),
            ),
            ResultShape::Initialized(members) => {
                let mut object = Object::new();
                for (binding, keys) in members {
                    object.insert(binding.as_str(), follow(node.clone(), keys));
                }
                Value::Object(object)
            }
        }
    }
}

/// Walks `keys` down from `node`, mapping over lists on the way. A missing or
/// null step yields null.
fn follow(node: Value, keys: &[String]) -> Value {
    let Some((key, rest)) = keys.split_first() else {
        return node;
    };
    match node {
        Value::Object(mut object) => match object.remove(key.as_str()) {
            Some(child) => follow(child, rest),
            None => Value::Null,
        },
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| follow(item, keys))
                .collect(),
        ),
        _ => Value::Null,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    alias: Option<String>,
    name: String,
    /// `(argument, variable)` pairs.
    arguments: Vec<(String, String)>,
    selection_set: SelectionSet,
}

impl Field {
    fn leaf(name: impl Into<String>) -> Self {
        Field {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            selection_set: SelectionSet::default(),
        }
    }

    fn with_selection_set(mut self, selection_set: SelectionSet) -> Self {
        self.selection_set = selection_set;
        self
    }

    fn is_same_field(&self, other: &Field) -> bool {
        self.alias == other.alias && self.name == other.name && self.arguments == other.arguments
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{alias}: ")?;
        }
        f.write_str(&self.name)?;
        if !self.arguments.is_empty() {
            let arguments = self
                .arguments
                .iter()
                .map(|(argument, variable)| format!("{argument}: ${variable}"))
                .collect::<Vec<_>>();
            write!(f, "({})", arguments.join(", "))?;
        }
        if !self.selection_set.is_empty() {
            write!(f, " {{ {} }}", self.selection_set)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SelectionSet(Vec<Field>);

impl SelectionSet {
    /// Adds a field, merging it into an identical sibling if there is one.
    fn add(&mut self, field: Field) {
        match self.0.iter_mut().find(|existing| existing.is_same_field(&field)) {
            Some(existing) => existing.selection_set.extend(field.selection_set),
            None => self.0.push(field),
        }
    }

    fn extend(&mut self, other: SelectionSet) {
        for field in other.0 {
            self.add(field);
        }
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SelectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, field) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

/// A variable introduced by a method include.
struct IncludeVariable {
    name: String,
    ty: FieldType,
    value: Value,
}

/// Compiles [`QueryDefinition`]s against a [`Schema`].
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler<'a> {
    schema: &'a Schema,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    pub fn compile(&self, definition: &QueryDefinition) -> Result<QueryDocument, CompileError> {
        let arguments = strip_nulls(&definition.arguments);
        let root_type = definition.root_type.as_str();

        let mut selection_set = SelectionSet::default();
        let mut shape = None;
        match &definition.selector {
            Some(selector) => {
                let object = self.object_type(root_type)?;
                let (fields, selected) = self.selector_fields(root_type, object, selector)?;
                selection_set.extend(fields);
                shape = Some(selected);
            }
            None => {
                let mut visited = Vec::new();
                selection_set.extend(self.default_selection(
                    root_type,
                    definition.include_all,
                    &mut visited,
                ));
            }
        }

        let mut include_variables = Vec::new();
        for (index, include) in definition.includes.iter().enumerate() {
            let prefix = if definition.includes.len() == 1 {
                String::new()
            } else {
                index.to_string()
            };
            selection_set.extend(self.include_selection(
                root_type,
                include,
                &prefix,
                &mut include_variables,
            )?);
        }

        let mut declarations = Vec::with_capacity(arguments.len() + include_variables.len());
        let mut root_arguments = Vec::with_capacity(arguments.len());
        let mut variables = Object::new();
        for (name, value) in arguments.iter() {
            let name = name.as_str();
            let ty = self
                .schema
                .argument_type(&definition.query_name, name)
                .ok_or_else(|| CompileError::UnknownArgumentType {
                    query: definition.query_name.clone(),
                    argument: name.to_string(),
                })?;
            declarations.push(format!("${name}: {ty}"));
            root_arguments.push((name.to_string(), name.to_string()));
            variables.insert(name, value.clone());
        }
        for variable in include_variables {
            declarations.push(format!("${}: {}", variable.name, variable.ty));
            variables.insert(variable.name.as_str(), variable.value);
        }

        let root = Field {
            alias: Some(RESULT_ALIAS.to_string()),
            name: definition.query_name.clone(),
            arguments: root_arguments,
            selection_set,
        };
        let query = if declarations.is_empty() {
            format!("{} {{ {root} }}", definition.operation)
        } else {
            format!(
                "{} ({}) {{ {root} }}",
                definition.operation,
                declarations.join(", ")
            )
        };

        let request = Request {
            query,
            variables,
        };
        let raw = serde_json::to_string(&request).map_err(|err| CompileError::Serialization {
            reason: err.to_string(),
        })?;

        Ok(QueryDocument {
            query: request.query,
            variables: request.variables,
            raw,
            shape,
        })
    }

    fn object_type(&self, type_name: &str) -> Result<&'a ObjectType, CompileError> {
        self.schema
            .object_type(type_name)
            .ok_or_else(|| CompileError::UnknownType {
                type_name: type_name.to_string(),
            })
    }

    fn selector_fields(
        &self,
        type_name: &str,
        object: &ObjectType,
        selector: &Selector,
    ) -> Result<(SelectionSet, ResultShape), CompileError> {
        let mut selection_set = SelectionSet::default();
        let shape = match selector {
            Selector::Member(path) => {
                let (field, keys) = self.member_field(type_name, object, path)?;
                selection_set.extend(SelectionSet(field.into_iter().collect()));
                ResultShape::Member(keys)
            }
            Selector::Constructed(paths) => {
                let mut members = Vec::with_capacity(paths.len());
                for path in paths {
                    let (field, keys) = self.member_field(type_name, object, path)?;
                    if let Some(field) = field {
                        selection_set.add(field);
                    }
                    members.push(keys);
                }
                ResultShape::Constructed(members)
            }
            Selector::Initialized(bindings) => {
                let mut members = Vec::with_capacity(bindings.len());
                for (binding, path) in bindings {
                    let (field, mut keys) = self.member_field(type_name, object, path)?;
                    if let Some(mut field) = field {
                        // Only a direct member can be renamed to its binding.
                        if path.0.len() == 1 && *binding != field.name {
                            field.alias = Some(binding.clone());
                            keys[0] = binding.clone();
                        }
                        selection_set.add(field);
                    }
                    members.push((binding.clone(), keys));
                }
                ResultShape::Initialized(members)
            }
        };
        Ok((selection_set, shape))
    }

    /// Renders a member chain as nested fields, along with the response keys
    /// its value is found under.
    ///
    /// A leaf of object type selects that type's scalar fields. A chain that
    /// passes through an ignored field selects nothing.
    fn member_field(
        &self,
        type_name: &str,
        object: &ObjectType,
        path: &MemberPath,
    ) -> Result<(Option<Field>, Vec<String>), CompileError> {
        let mut resolved = Vec::with_capacity(path.0.len());
        let mut ignored = false;
        let mut current_name = type_name.to_string();
        let mut current = Some(object);
        for member in path.iter() {
            let object = current.ok_or_else(|| CompileError::FieldResolution {
                type_name: current_name.clone(),
                field: member.to_string(),
            })?;
            let (name, field) =
                object
                    .lookup_field(member)
                    .ok_or_else(|| CompileError::FieldResolution {
                        type_name: current_name.clone(),
                        field: member.to_string(),
                    })?;
            if field.ignored && !ignored {
                tracing::debug!("member path {path} goes through ignored field {current_name}.{name}");
                ignored = true;
            }
            current_name = field.ty.inner_named_type().to_string();
            current = self.schema.object_type(&current_name);
            resolved.push(protocol_name(name));
        }
        if ignored {
            return Ok((None, resolved));
        }

        let mut field: Option<Field> = None;
        for name in resolved.iter().rev() {
            let selection_set = match field.take() {
                Some(child) => SelectionSet(vec![child]),
                None => self.default_selection(&current_name, false, &mut Vec::new()),
            };
            field = Some(Field::leaf(name.clone()).with_selection_set(selection_set));
        }
        Ok((field, resolved))
    }

    /// The selection used when a query has no explicit selector.
    ///
    /// Scalar fields come first. Object-typed fields follow only when
    /// `include_all` is set; a type already on the current path, or nesting
    /// past the depth limit, is cut.
    fn default_selection(
        &self,
        type_name: &str,
        include_all: bool,
        visited: &mut Vec<String>,
    ) -> SelectionSet {
        let Some(object) = self.schema.object_type(type_name) else {
            return SelectionSet::default();
        };
        let mut scalars = SelectionSet::default();
        let mut nested = SelectionSet::default();
        visited.push(type_name.to_string());
        for (name, field) in object.fields().filter(|(_, field)| !field.ignored) {
            let field_type = field.ty.inner_named_type();
            if !self.schema.is_object(field_type) {
                scalars.add(Field::leaf(protocol_name(name)));
                continue;
            }
            if !include_all {
                continue;
            }
            if visited.iter().any(|seen| seen == field_type) {
                tracing::warn!(
                    "not including {type_name}.{name}: {field_type} is already being selected"
                );
                continue;
            }
            if visited.len() >= INCLUDE_ALL_DEPTH_LIMIT {
                tracing::warn!(
                    "not including {type_name}.{name}: nesting limit ({INCLUDE_ALL_DEPTH_LIMIT}) reached"
                );
                continue;
            }
            let selection_set = self.default_selection(field_type, true, visited);
            if !selection_set.is_empty() {
                nested.add(Field::leaf(protocol_name(name)).with_selection_set(selection_set));
            }
        }
        visited.pop();
        scalars.extend(nested);
        scalars
    }

    fn include_selection(
        &self,
        root_type: &str,
        include: &Include,
        prefix: &str,
        variables: &mut Vec<IncludeVariable>,
    ) -> Result<SelectionSet, CompileError> {
        let segments = include.segments().collect::<Vec<_>>();
        if segments.is_empty() {
            let mut visited = Vec::new();
            return Ok(self.default_selection(root_type, false, &mut visited));
        }

        let mut consumed = 0;
        let field = self.include_field(
            root_type,
            &segments,
            include,
            prefix,
            &mut consumed,
            variables,
        )?;
        if let Some(unmatched) = include.methods.get(consumed) {
            return Err(CompileError::MethodResolution {
                type_name: root_type.to_string(),
                method: unmatched.method.clone(),
            });
        }
        Ok(SelectionSet(field.into_iter().collect()))
    }

    /// Renders the remaining include segments below `type_name`.
    ///
    /// A segment goes through the next unconsumed method include when its name
    /// matches, the method exists on the type and it returns the field's type.
    /// Otherwise it is a plain field.
    fn include_field(
        &self,
        type_name: &str,
        segments: &[&str],
        include: &Include,
        prefix: &str,
        consumed: &mut usize,
        variables: &mut Vec<IncludeVariable>,
    ) -> Result<Option<Field>, CompileError> {
        let Some((segment, rest)) = segments.split_first() else {
            return Ok(None);
        };
        let object = self.object_type(type_name)?;
        let declared = object.lookup_field(segment);

        let method = include.methods.get(*consumed).and_then(|method_include| {
            if !method_include.method.eq_ignore_ascii_case(segment) {
                return None;
            }
            let (name, method) = object.lookup_method(&method_include.method)?;
            match declared {
                Some((_, field)) if field.ty != method.return_type => None,
                _ => Some((method_include, name, method)),
            }
        });

        let (mut field, field_type) = match method {
            Some((method_include, name, method)) => {
                *consumed += 1;
                let ordinal = *consumed;
                let mut field = Field::leaf(protocol_name(name));
                for (argument, value) in strip_nulls(&method_include.arguments).into_iter() {
                    let argument = argument.as_str().to_string();
                    let ty = method
                        .arguments
                        .get(&argument)
                        .or_else(|| {
                            method
                                .arguments
                                .iter()
                                .find(|(declared, _)| declared.eq_ignore_ascii_case(&argument))
                                .map(|(_, ty)| ty)
                        })
                        .ok_or_else(|| CompileError::UnknownArgumentType {
                            query: format!("{type_name}.{name}"),
                            argument: argument.clone(),
                        })?;
                    let variable = format!("{argument}{prefix}{ordinal}");
                    field.arguments.push((argument, variable.clone()));
                    variables.push(IncludeVariable {
                        name: variable,
                        ty: ty.clone(),
                        value,
                    });
                }
                (field, &method.return_type)
            }
            None => {
                let (name, declared) = declared.ok_or_else(|| CompileError::FieldResolution {
                    type_name: type_name.to_string(),
                    field: segment.to_string(),
                })?;
                if declared.ignored {
                    tracing::debug!("include {} names ignored field {type_name}.{name}", include.path);
                    return Ok(None);
                }
                (Field::leaf(protocol_name(name)), &declared.ty)
            }
        };

        let field_type = field_type.inner_named_type();
        if !self.schema.is_object(field_type) {
            if !rest.is_empty() {
                tracing::warn!(
                    "include {} stops at {type_name}.{segment}, which is not an object",
                    include.path
                );
            }
            return Ok(Some(field));
        }

        if rest.is_empty() {
            let mut visited = Vec::new();
            field.selection_set = self.default_selection(field_type, false, &mut visited);
        } else if let Some(child) =
            self.include_field(field_type, rest, include, prefix, consumed, variables)?
        {
            field.selection_set.add(child);
        }
        Ok(Some(field))
    }
}
