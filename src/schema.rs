//! Schema oracle.
//!
//! Reads against the cache can run with or without schema knowledge. When a
//! schema is available it answers the two questions the traversals ask —
//! whether a field may be null, and whether a concrete type satisfies a
//! fragment's type condition — plus the return-type queries the populate
//! transform needs.

use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;

use crate::error::CacheError;

#[derive(Debug, Clone)]
pub struct SchemaPredicates {
    schema: Arc<Valid<Schema>>,
}

impl SchemaPredicates {
    /// Parses and validates an SDL schema.
    pub fn parse(sdl: &str) -> Result<Self, CacheError> {
        let schema = Schema::parse_and_validate(sdl, "schema.graphql")
            .map_err(|invalid| CacheError::InvalidSchema(invalid.errors.to_string()))?;
        Ok(Self::from_schema(schema))
    }

    pub fn from_schema(schema: Valid<Schema>) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    /// Whether `typename.field_name` is declared nullable.
    ///
    /// Unknown types and fields are reported as non-nullable so that a
    /// mistyped selection cannot silently satisfy a read as a partial
    /// result.
    pub fn is_field_nullable(&self, typename: &str, field_name: &str) -> bool {
        match self.field_definition(typename, field_name) {
            Some(field) => !field.ty.is_non_null(),
            None => {
                tracing::warn!(
                    "no type or field definition for `{typename}.{field_name}` in schema"
                );
                false
            }
        }
    }

    /// Whether `typename` satisfies `type_condition` as a fragment target:
    /// equal types, interface implementation, or union membership.
    pub fn is_interface_of_type(&self, type_condition: &str, typename: &str) -> bool {
        type_condition == typename || self.schema.is_subtype(type_condition, typename)
    }

    /// The named type a field resolves to, list and non-null wrappers
    /// stripped.
    pub(crate) fn named_field_type(&self, typename: &str, field_name: &str) -> Option<&str> {
        self.field_definition(typename, field_name)
            .map(|field| field.ty.inner_named_type().as_str())
    }

    pub(crate) fn is_object_type(&self, name: &str) -> bool {
        matches!(self.schema.types.get(name), Some(ExtendedType::Object(_)))
    }

    /// Expands a named type into its concrete object types, sorted by name.
    ///
    /// Objects expand to themselves, interfaces to their implementors and
    /// unions to their members; anything else is empty.
    pub(crate) fn concrete_types(&self, name: &str) -> Vec<String> {
        let mut types = match self.schema.types.get(name) {
            Some(ExtendedType::Object(_)) => vec![name.to_string()],
            Some(ExtendedType::Interface(_)) | Some(ExtendedType::Union(_)) => self
                .schema
                .types
                .iter()
                .filter_map(|(candidate, definition)| {
                    let concrete = matches!(definition, ExtendedType::Object(_))
                        && self.schema.is_subtype(name, candidate.as_str());
                    concrete.then(|| candidate.as_str().to_string())
                })
                .collect(),
            _ => Vec::new(),
        };
        types.sort_unstable();
        types
    }

    /// The typename serving the given operation kind, honoring custom
    /// schema roots.
    pub(crate) fn root_typename(&self, operation_type: ast::OperationType) -> &str {
        self.schema
            .root_operation(operation_type)
            .map(|name| name.as_str())
            .unwrap_or_else(|| default_root_typename(operation_type))
    }

    fn field_definition(
        &self,
        typename: &str,
        field_name: &str,
    ) -> Option<&ast::FieldDefinition> {
        match self.schema.types.get(typename)? {
            ExtendedType::Object(object) => {
                object.fields.get(field_name).map(|field| &***field)
            }
            ExtendedType::Interface(interface) => {
                interface.fields.get(field_name).map(|field| &***field)
            }
            _ => None,
        }
    }
}

pub(crate) fn default_root_typename(operation_type: ast::OperationType) -> &'static str {
    match operation_type {
        ast::OperationType::Query => "Query",
        ast::OperationType::Mutation => "Mutation",
        ast::OperationType::Subscription => "Subscription",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        type Query {
            todos: [Todo]
            node: Node
            union_member: Choice
        }
        type Mutation {
            addTodo: Todo!
        }
        interface Node {
            id: ID!
        }
        type Todo implements Node {
            id: ID!
            text: String
            author: User!
        }
        type User implements Node {
            id: ID!
            name: String
        }
        union Choice = Todo | User
    "#;

    fn predicates() -> SchemaPredicates {
        SchemaPredicates::parse(SDL).unwrap()
    }

    #[test]
    fn nullability() {
        let schema = predicates();
        assert!(schema.is_field_nullable("Todo", "text"));
        assert!(!schema.is_field_nullable("Todo", "id"));
        assert!(!schema.is_field_nullable("Todo", "author"));
        // unknowns must not read as nullable
        assert!(!schema.is_field_nullable("Todo", "missing"));
        assert!(!schema.is_field_nullable("Missing", "id"));
    }

    #[test]
    fn type_conditions() {
        let schema = predicates();
        assert!(schema.is_interface_of_type("Todo", "Todo"));
        assert!(schema.is_interface_of_type("Node", "Todo"));
        assert!(schema.is_interface_of_type("Choice", "User"));
        assert!(!schema.is_interface_of_type("Todo", "User"));
        assert!(!schema.is_interface_of_type("User", "Node"));
    }

    #[test]
    fn field_return_types() {
        let schema = predicates();
        assert_eq!(schema.named_field_type("Query", "todos"), Some("Todo"));
        assert_eq!(schema.named_field_type("Mutation", "addTodo"), Some("Todo"));
        assert_eq!(schema.named_field_type("Todo", "author"), Some("User"));
        assert_eq!(schema.named_field_type("Todo", "missing"), None);
    }

    #[test]
    fn concrete_expansion_is_sorted() {
        let schema = predicates();
        assert_eq!(schema.concrete_types("Todo"), vec!["Todo"]);
        assert_eq!(schema.concrete_types("Node"), vec!["Todo", "User"]);
        assert_eq!(schema.concrete_types("Choice"), vec!["Todo", "User"]);
        assert!(schema.concrete_types("ID").is_empty());
    }

    #[test]
    fn root_typenames() {
        let schema = predicates();
        assert_eq!(schema.root_typename(ast::OperationType::Query), "Query");
        assert_eq!(schema.root_typename(ast::OperationType::Mutation), "Mutation");

        let custom = SchemaPredicates::parse(
            "schema { query: Root } type Root { value: Int }",
        )
        .unwrap();
        assert_eq!(custom.root_typename(ast::OperationType::Query), "Root");
    }
}
