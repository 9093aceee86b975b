//! Normalizing server results into the store.
//!
//! A write walks the operation's selection set and the result tree side by
//! side: leaf values land in records, composite values become links to
//! child entities which are recursed into under their own keys. The set of
//! keys touched is captured so consumers can invalidate dependent reads.

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
use crate::store::Store;
use crate::store::UpdaterInfo;
use crate::Request;

/// The outcome of a write: the keys it touched.
#[derive(Debug)]
pub struct WriteResult {
    pub dependencies: DependencySet,
}

struct WriteEnv<'doc> {
    variables: Object,
    fragments: FragmentMap<'doc>,
    schema: Option<SchemaPredicates>,
}

/// Writes an operation result into the store.
///
/// Returns the dependency keys the write touched. Registered updaters for
/// mutation and subscription root fields run after the data is in place.
#[tracing::instrument(skip_all, level = "trace")]
pub fn write_query(
    store: &mut Store,
    request: &Request<'_>,
    data: &Object,
) -> Result<WriteResult, CacheError> {
    let operation = main_operation(request.query, request.operation_name)?;
    let env = WriteEnv {
        variables: normalized_variables(operation, request.variables),
        fragments: fragment_map(request.query),
        schema: store.schema().cloned(),
    };
    let root_key = store.root_key(operation.operation_type).to_string();
    let typename = typename_of(data).unwrap_or(&root_key).to_string();

    let mut dependencies = DependencySet::new();
    write_selection(
        store,
        &env,
        &mut dependencies,
        &root_key,
        &typename,
        &operation.selection_set,
        data,
    );

    if matches!(
        operation.operation_type,
        ast::OperationType::Mutation | ast::OperationType::Subscription
    ) {
        invoke_updaters(store, &env, operation, data, &root_key);
    }

    Ok(WriteResult { dependencies })
}

fn write_selection(
    store: &mut Store,
    env: &WriteEnv<'_>,
    dependencies: &mut DependencySet,
    entity_key: &str,
    typename: &str,
    selections: &[ast::Selection],
    data: &Object,
) {
    store.write_record(entity_key, TYPENAME, Some(Value::String(typename.into())));

    let cx = SelectionContext {
        typename: Some(typename),
        variables: &env.variables,
        fragments: &env.fragments,
        schema: env.schema.as_ref(),
        matcher: FragmentMatch::Data(data),
    };
    let mut iter = SelectionIter::new(selections);
    while let Some(field) = iter.next(&cx) {
        let args = field_arguments(field, &env.variables);
        let field_key = key_of_field(field.name.as_str(), args.as_ref());
        let full_key = join_keys(entity_key, &field_key);

        let Some(value) = data.get(response_key(field)) else {
            tracing::warn!("field `{full_key}` is undefined in the result; skipping");
            continue;
        };

        if store.is_query_root(entity_key) {
            dependencies.add(full_key.clone());
        } else if !store.is_root_key(entity_key) {
            dependencies.add(entity_key.to_string());
        }

        if field.selection_set.is_empty() {
            store.write_record(entity_key, &field_key, Some(value.clone()));
            continue;
        }

        match value {
            Value::Null => store.write_link(full_key, Link::Null),
            Value::Array(items) => {
                let link = write_list(store, env, dependencies, &full_key, items, field);
                store.write_link(full_key, link);
            }
            Value::Object(object) => match typename_of(object) {
                Some(child_typename) => match store.key_of_entity(object) {
                    Some(child_key) => {
                        write_selection(
                            store,
                            env,
                            dependencies,
                            &child_key,
                            child_typename,
                            &field.selection_set,
                            object,
                        );
                        store.write_link(full_key, Link::Single(child_key));
                    }
                    None => {
                        // embedded: the child is addressed through this
                        // field's key, no link entry
                        store.remove_link(&full_key);
                        write_selection(
                            store,
                            env,
                            dependencies,
                            &full_key,
                            child_typename,
                            &field.selection_set,
                            object,
                        );
                    }
                },
                None => {
                    tracing::warn!(
                        "no `__typename` in result for `{full_key}`; storing unnormalized"
                    );
                    store.remove_link(&full_key);
                    store.write_record(entity_key, &field_key, Some(value.clone()));
                }
            },
            value => {
                tracing::warn!("expected an object or list for `{full_key}`");
                store.write_record(entity_key, &field_key, Some(value.clone()));
            }
        }
    }
}

fn write_list(
    store: &mut Store,
    env: &WriteEnv<'_>,
    dependencies: &mut DependencySet,
    prefix: &str,
    items: &[Value],
    field: &ast::Field,
) -> Link {
    let mut links = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let element_key = join_keys(prefix, &index.to_string());
        let link = match item {
            Value::Null => Link::Null,
            Value::Array(inner) => {
                write_list(store, env, dependencies, &element_key, inner, field)
            }
            Value::Object(object) => match typename_of(object) {
                Some(child_typename) => {
                    let child_key = store
                        .key_of_entity(object)
                        .unwrap_or_else(|| element_key.clone());
                    write_selection(
                        store,
                        env,
                        dependencies,
                        &child_key,
                        child_typename,
                        &field.selection_set,
                        object,
                    );
                    Link::Single(child_key)
                }
                None => {
                    tracing::warn!(
                        "no `__typename` in result list element `{element_key}`"
                    );
                    Link::Null
                }
            },
            _ => {
                tracing::warn!("expected an object or null in list at `{element_key}`");
                Link::Null
            }
        };
        links.push(link);
    }
    Link::List(links)
}

fn invoke_updaters(
    store: &mut Store,
    env: &WriteEnv<'_>,
    operation: &ast::OperationDefinition,
    data: &Object,
    root_key: &str,
) {
    let cx = SelectionContext {
        typename: Some(root_key),
        variables: &env.variables,
        fragments: &env.fragments,
        schema: env.schema.as_ref(),
        matcher: FragmentMatch::Data(data),
    };
    let mut iter = SelectionIter::new(&operation.selection_set);
    while let Some(field) = iter.next(&cx) {
        let Some(updater) = store.updater(root_key, field.name.as_str()) else {
            continue;
        };
        let args = field_arguments(field, &env.variables).unwrap_or_default();
        let info = UpdaterInfo {
            field_name: field.name.as_str(),
            variables: &env.variables,
        };
        updater(data, &args, store, &info);
    }
}
