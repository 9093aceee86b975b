//! Materializing requests from the store.
//!
//! A read mirrors the write traversal: it walks the selection set against
//! records and links, consulting user resolvers along the way. Whether a
//! miss poisons the surrounding entity or degrades to a null depends on
//! schema knowledge; either way the outcome is encoded in the returned data
//! and the `partial` flag, never as an error.

use apollo_compiler::ast;

use crate::ast::field_arguments;
use crate::ast::fragment_map;
use crate::ast::main_operation;
use crate::ast::normalized_variables;
use crate::ast::response_key;
use crate::ast::FragmentMap;
use crate::error::CacheError;
use crate::json_ext::typename_of;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::TYPENAME;
use crate::keys::join_keys;
use crate::keys::key_of_field;
use crate::schema::SchemaPredicates;
use crate::selection::FragmentMatch;
use crate::selection::SelectionContext;
use crate::selection::SelectionIter;
use crate::store::DependencySet;
use crate::store::Link;
use crate::store::ResolverInfo;
use crate::store::ResolverValue;
use crate::store::Store;
use crate::Request;

/// The outcome of a read.
///
/// `data` is the materialized result or null when the request could not be
/// satisfied; `partial` reports that nullable fields were filled with null
/// for cache misses. Staleness is the consumer's concern, driven by
/// `dependencies`.
#[derive(Debug)]
pub struct QueryResult {
    pub data: Value,
    pub partial: bool,
    pub dependencies: DependencySet,
}

struct ReadEnv<'doc, 'store> {
    store: &'store Store,
    variables: Object,
    fragments: FragmentMap<'doc>,
    schema: Option<SchemaPredicates>,
}

#[derive(Default)]
struct ReadState {
    partial: bool,
    dependencies: DependencySet,
}

/// Reads a request from the store.
#[tracing::instrument(skip_all, level = "trace")]
pub fn read_query(store: &Store, request: &Request<'_>) -> Result<QueryResult, CacheError> {
    let operation = main_operation(request.query, request.operation_name)?;
    let env = read_env(store, request, operation);
    let mut state = ReadState::default();

    let root_key = store.root_key(operation.operation_type);
    let data = read_selection(&env, &mut state, root_key, &operation.selection_set, true)
        .map(Value::Object)
        .unwrap_or(Value::Null);

    Ok(QueryResult {
        data,
        partial: state.partial,
        dependencies: state.dependencies,
    })
}

/// Reads a request, preserving the shape of previously known data.
///
/// When `data` carries a `__typename` the read keeps its shape and only
/// re-materializes sub-fields that resolve to keyed entities in the store;
/// otherwise this behaves like [`read_query`].
#[tracing::instrument(skip_all, level = "trace")]
pub fn read_query_with_data(
    store: &Store,
    request: &Request<'_>,
    data: &Object,
) -> Result<QueryResult, CacheError> {
    let operation = main_operation(request.query, request.operation_name)?;
    let env = read_env(store, request, operation);
    let mut state = ReadState::default();

    let data = if typename_of(data).is_some() {
        Value::Object(read_root(&env, &mut state, &operation.selection_set, data))
    } else {
        let root_key = store.root_key(operation.operation_type);
        read_selection(&env, &mut state, root_key, &operation.selection_set, true)
            .map(Value::Object)
            .unwrap_or(Value::Null)
    };

    Ok(QueryResult {
        data,
        partial: state.partial,
        dependencies: state.dependencies,
    })
}

fn read_env<'doc, 'store>(
    store: &'store Store,
    request: &Request<'doc>,
    operation: &ast::OperationDefinition,
) -> ReadEnv<'doc, 'store> {
    ReadEnv {
        store,
        variables: normalized_variables(operation, request.variables),
        fragments: fragment_map(request.query),
        schema: store.schema().cloned(),
    }
}

/// Reads one entity's selection. `None` is a miss for the whole entity.
fn read_selection(
    env: &ReadEnv<'_, '_>,
    state: &mut ReadState,
    entity_key: &str,
    selections: &[ast::Selection],
    at_root: bool,
) -> Option<Object> {
    let typename: &str = if env.store.is_root_key(entity_key) {
        entity_key
    } else {
        env.store.get_record(entity_key, TYPENAME)?.as_str()?
    };

    let mut data = Object::new();
    data.insert(TYPENAME, Value::String(typename.into()));

    let cx = SelectionContext {
        typename: Some(typename),
        variables: &env.variables,
        fragments: &env.fragments,
        schema: env.schema.as_ref(),
        matcher: FragmentMatch::Store {
            store: env.store,
            entity_key,
        },
    };
    let mut iter = SelectionIter::new(selections);
    let mut attempted = 0usize;
    let mut found = 0usize;
    let mut known = 0usize;

    while let Some(field) = iter.next(&cx) {
        attempted += 1;
        let args = field_arguments(field, &env.variables);
        let field_key = key_of_field(field.name.as_str(), args.as_ref());
        let full_key = join_keys(entity_key, &field_key);
        let alias = response_key(field);

        if env.store.is_query_root(entity_key) {
            state.dependencies.add(full_key.clone());
        } else if !env.store.is_root_key(entity_key) {
            state.dependencies.add(entity_key.to_string());
        }

        let value = if let Some(resolver) = env.store.resolver(typename, field.name.as_str())
        {
            // seed the raw record value under the alias so the resolver can
            // see it
            if let Some(record) = env.store.get_record(entity_key, &field_key) {
                data.insert(alias, record.clone());
            }
            let info = ResolverInfo {
                parent_typename: typename,
                parent_key: entity_key,
                field_name: field.name.as_str(),
                variables: &env.variables,
            };
            let resolver_args = args.unwrap_or_default();
            let returned = resolver(&data, &resolver_args, env.store, &info);
            if field.selection_set.is_empty() {
                resolver_scalar(returned)
                    .or_else(|| env.store.get_record(entity_key, &field_key).cloned())
            } else {
                read_resolver_link(env, state, returned, field, &full_key)
            }
        } else if field.selection_set.is_empty() {
            env.store.get_record(entity_key, &field_key).cloned()
        } else if let Some(link) = env.store.get_link(&full_key) {
            read_link(env, state, link, field)
        } else if let Some(record) = env.store.get_record(entity_key, &field_key) {
            // unnormalized object stored directly in the record
            Some(record.clone())
        } else {
            // embedded continuation: the child may live under this field's
            // own key
            read_selection(env, state, &full_key, &field.selection_set, false)
                .map(Value::Object)
        };

        match value {
            Some(value) => {
                found += 1;
                data.insert(alias, value);
            }
            None => {
                // a field the store has an entry for was poisoned deeper
                // down; that is not the cache knowing nothing about it
                if env.store.has_field(entity_key, &field_key) {
                    known += 1;
                }
                let nullable = env
                    .schema
                    .as_ref()
                    .map(|schema| schema.is_field_nullable(typename, field.name.as_str()))
                    .unwrap_or(false);
                if nullable {
                    state.partial = true;
                    data.insert(alias, Value::Null);
                } else {
                    return None;
                }
            }
        }
    }

    // a root whose null fills all stem from genuinely absent fields reads
    // as absent itself
    if at_root && attempted > 0 && found == 0 && known == 0 {
        return None;
    }
    Some(data)
}

fn read_link(
    env: &ReadEnv<'_, '_>,
    state: &mut ReadState,
    link: &Link,
    field: &ast::Field,
) -> Option<Value> {
    match link {
        Link::Null => Some(Value::Null),
        Link::Single(key) => {
            read_selection(env, state, key, &field.selection_set, false).map(Value::Object)
        }
        Link::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(read_link(env, state, item, field)?);
            }
            Some(Value::Array(values))
        }
    }
}

/// Continues a read through a resolver's return value.
fn read_resolver_link(
    env: &ReadEnv<'_, '_>,
    state: &mut ReadState,
    value: ResolverValue,
    field: &ast::Field,
    fallback_key: &str,
) -> Option<Value> {
    match value {
        ResolverValue::Null | ResolverValue::Missing => Some(Value::Null),
        ResolverValue::EntityRef(key) => {
            read_selection(env, state, &key, &field.selection_set, false).map(Value::Object)
        }
        ResolverValue::Embedded(object) => {
            let key = env
                .store
                .key_of_entity(&object)
                .unwrap_or_else(|| fallback_key.to_string());
            read_selection(env, state, &key, &field.selection_set, false).map(Value::Object)
        }
        ResolverValue::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let element_key = join_keys(fallback_key, &index.to_string());
                values.push(read_resolver_link(env, state, item, field, &element_key)?);
            }
            Some(Value::Array(values))
        }
        ResolverValue::Scalar(_) => {
            tracing::warn!(
                "resolver for `{fallback_key}` returned a scalar where a selection \
                 set was expected"
            );
            None
        }
    }
}

fn resolver_scalar(value: ResolverValue) -> Option<Value> {
    match value {
        ResolverValue::Scalar(value) => Some(value),
        ResolverValue::Null => Some(Value::Null),
        ResolverValue::EntityRef(key) => Some(Value::String(key.into())),
        ResolverValue::Embedded(object) => Some(Value::Object(object)),
        ResolverValue::List(items) => Some(Value::Array(
            items
                .into_iter()
                .map(|item| resolver_scalar(item).unwrap_or(Value::Null))
                .collect(),
        )),
        ResolverValue::Missing => None,
    }
}

/// Shape-preserving read over previously known data.
fn read_root(
    env: &ReadEnv<'_, '_>,
    state: &mut ReadState,
    selections: &[ast::Selection],
    data: &Object,
) -> Object {
    let Some(typename) = typename_of(data) else {
        return data.clone();
    };

    let mut out = Object::new();
    out.insert(TYPENAME, Value::String(typename.into()));

    let cx = SelectionContext {
        typename: Some(typename),
        variables: &env.variables,
        fragments: &env.fragments,
        schema: env.schema.as_ref(),
        matcher: FragmentMatch::Data(data),
    };
    let mut iter = SelectionIter::new(selections);
    while let Some(field) = iter.next(&cx) {
        let alias = response_key(field);
        let Some(value) = data.get(alias) else {
            continue;
        };
        if !field.selection_set.is_empty() && !value.is_null() {
            let value = read_root_field(env, state, &field.selection_set, value);
            out.insert(alias, value);
        } else {
            out.insert(alias, value.clone());
        }
    }
    out
}

fn read_root_field(
    env: &ReadEnv<'_, '_>,
    state: &mut ReadState,
    selections: &[ast::Selection],
    value: &Value,
) -> Value {
    match value {
        Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(read_root_field(env, state, selections, item));
            }
            Value::Array(values)
        }
        Value::Object(object) => match env.store.key_of_entity(object) {
            // a keyed entity is re-read from the store so the freshest
            // normalized state wins
            Some(key) => read_selection(env, state, &key, selections, false)
                .map(Value::Object)
                .unwrap_or(Value::Null),
            None => Value::Object(read_root(env, state, selections, object)),
        },
        value => value.clone(),
    }
}
