//! Accessors over parsed GraphQL documents.
//!
//! The cache consumes [`apollo_compiler::ast::Document`] values that are
//! assumed to be valid executable documents; traversal helpers here extract
//! operations, fragments and argument values without re-validating them.

use std::collections::HashMap;

use apollo_compiler::ast;

use crate::error::CacheError;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// Fragment definitions of a document, by name.
pub(crate) type FragmentMap<'a> = HashMap<&'a str, &'a ast::FragmentDefinition>;

/// Returns the operation a request executes.
///
/// The first operation definition when no name is given.
pub(crate) fn main_operation<'a>(
    document: &'a ast::Document,
    operation_name: Option<&str>,
) -> Result<&'a ast::OperationDefinition, CacheError> {
    let mut operations = document.definitions.iter().filter_map(|definition| {
        if let ast::Definition::OperationDefinition(operation) = definition {
            Some(&**operation)
        } else {
            None
        }
    });

    match operation_name {
        Some(name) => operations
            .find(|operation| operation.name.as_ref().map(|n| n.as_str()) == Some(name))
            .ok_or_else(|| CacheError::UnknownOperation(name.to_string())),
        None => operations.next().ok_or(CacheError::NoOperation),
    }
}

pub(crate) fn fragment_map(document: &ast::Document) -> FragmentMap<'_> {
    document
        .definitions
        .iter()
        .filter_map(|definition| {
            if let ast::Definition::FragmentDefinition(fragment) = definition {
                Some((fragment.name.as_str(), &**fragment))
            } else {
                None
            }
        })
        .collect()
}

/// The key a field's value is stored under in a result object.
pub(crate) fn response_key(field: &ast::Field) -> &str {
    field
        .alias
        .as_ref()
        .map(|alias| alias.as_str())
        .unwrap_or_else(|| field.name.as_str())
}

/// Extracts a field's arguments as JSON, substituting variables.
///
/// Returns `None` for argument-less fields so callers can hand the result
/// straight to [`key_of_field`](crate::keys::key_of_field).
pub(crate) fn field_arguments(field: &ast::Field, variables: &Object) -> Option<Object> {
    if field.arguments.is_empty() {
        return None;
    }
    let mut args = Object::new();
    for argument in &field.arguments {
        args.insert(argument.name.as_str(), ast_value(&argument.value, variables));
    }
    Some(args)
}

/// Converts an AST value into JSON.
///
/// A variable reference that is absent from the variables map coerces to
/// null, which keeps argument canonicalization total.
pub(crate) fn ast_value(value: &ast::Value, variables: &Object) -> Value {
    match value {
        ast::Value::Null => Value::Null,
        ast::Value::Boolean(boolean) => Value::Bool(*boolean),
        ast::Value::Enum(name) => Value::String(name.as_str().into()),
        ast::Value::Variable(name) => variables
            .get(name.as_str())
            .cloned()
            .unwrap_or(Value::Null),
        ast::Value::String(string) => Value::String(string.as_str().into()),
        ast::Value::Int(int) => int
            .as_str()
            .parse::<i64>()
            .map(Value::from)
            .ok()
            .or_else(|| int.as_str().parse::<f64>().map(Value::from).ok())
            .unwrap_or(Value::Null),
        ast::Value::Float(float) => float
            .try_to_f64()
            .map(Value::from)
            .unwrap_or(Value::Null),
        ast::Value::List(values) => Value::Array(
            values
                .iter()
                .map(|value| ast_value(value, variables))
                .collect(),
        ),
        ast::Value::Object(fields) => {
            let mut object = Object::new();
            for (name, value) in fields {
                object.insert(name.as_str(), ast_value(value, variables));
            }
            Value::Object(object)
        }
    }
}

/// Evaluates `@skip`/`@include` against the request variables.
pub(crate) fn should_include(directives: &ast::DirectiveList, variables: &Object) -> bool {
    let skip = directive_condition(directives, "skip", variables).unwrap_or(false);
    let include = directive_condition(directives, "include", variables).unwrap_or(true);
    !skip && include
}

fn directive_condition(
    directives: &ast::DirectiveList,
    name: &str,
    variables: &Object,
) -> Option<bool> {
    let directive = directives.get(name)?;
    let condition = directive
        .arguments
        .iter()
        .find(|argument| argument.name == "if")?;
    match condition.value.as_ref() {
        ast::Value::Boolean(boolean) => Some(*boolean),
        ast::Value::Variable(variable) => variables
            .get(variable.as_str())
            .and_then(|value| value.as_bool()),
        _ => None,
    }
}

/// Merges supplied variables over the operation's declared defaults.
pub(crate) fn normalized_variables(
    operation: &ast::OperationDefinition,
    variables: Option<&Object>,
) -> Object {
    let empty = Object::new();
    let mut normalized = Object::new();
    for definition in &operation.variables {
        if let Some(default) = &definition.default_value {
            normalized.insert(definition.name.as_str(), ast_value(default, &empty));
        }
    }
    if let Some(variables) = variables {
        for (key, value) in variables.iter() {
            normalized.insert(key.clone(), value.clone());
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ast::Document;
    use serde_json_bytes::json;

    use super::*;

    fn first_field<'a>(
        document: &'a Document,
        operation_name: Option<&str>,
    ) -> &'a ast::Field {
        let operation = main_operation(document, operation_name).unwrap();
        match &operation.selection_set[0] {
            ast::Selection::Field(field) => field,
            _ => panic!("expected a field"),
        }
    }

    fn variables(value: Value) -> Object {
        match value {
            Value::Object(map) => map,
            _ => panic!("variables must be an object"),
        }
    }

    #[test]
    fn operation_lookup() {
        let document =
            Document::parse("query A { a } query B { b }", "query.graphql").unwrap();
        assert_eq!(
            main_operation(&document, None).unwrap().name.as_ref().unwrap().as_str(),
            "A",
        );
        assert_eq!(
            main_operation(&document, Some("B")).unwrap().name.as_ref().unwrap().as_str(),
            "B",
        );
        assert_eq!(
            main_operation(&document, Some("C")),
            Err(CacheError::UnknownOperation("C".to_string())),
        );

        let fragments_only =
            Document::parse("fragment F on T { a }", "query.graphql").unwrap();
        assert_eq!(main_operation(&fragments_only, None), Err(CacheError::NoOperation));
    }

    #[test]
    fn argument_extraction_substitutes_variables() {
        let document = Document::parse(
            r#"query ($first: Int) { todos(first: $first, filter: { done: false }) { id } }"#,
            "query.graphql",
        )
        .unwrap();
        let field = first_field(&document, None);

        let args = field_arguments(field, &variables(json!({ "first": 10 }))).unwrap();
        assert_eq!(
            Value::Object(args),
            json!({ "first": 10, "filter": { "done": false } }),
        );
    }

    #[test]
    fn missing_variable_becomes_null() {
        let document = Document::parse(
            "query ($first: Int) { todos(first: $first) { id } }",
            "query.graphql",
        )
        .unwrap();
        let field = first_field(&document, None);

        let args = field_arguments(field, &Object::new()).unwrap();
        assert_eq!(Value::Object(args), json!({ "first": null }));
    }

    #[test]
    fn skip_and_include() {
        let document = Document::parse(
            r#"query ($on: Boolean) {
                a @skip(if: true)
                b @include(if: false)
                c @include(if: $on)
                d @skip(if: $on)
                e
            }"#,
            "query.graphql",
        )
        .unwrap();
        let operation = main_operation(&document, None).unwrap();
        let vars = variables(json!({ "on": true }));

        let included: Vec<&str> = operation
            .selection_set
            .iter()
            .filter_map(|selection| match selection {
                ast::Selection::Field(field) => {
                    should_include(&field.directives, &vars).then(|| field.name.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(included, vec!["c", "e"]);
    }

    #[test]
    fn variable_defaults_merge_under_supplied_values() {
        let document = Document::parse(
            r#"query ($first: Int = 5, $after: String = "a") { todos { id } }"#,
            "query.graphql",
        )
        .unwrap();
        let operation = main_operation(&document, None).unwrap();

        let merged =
            normalized_variables(operation, Some(&variables(json!({ "after": "b" }))));
        assert_eq!(Value::Object(merged), json!({ "first": 5, "after": "b" }));
    }
}
