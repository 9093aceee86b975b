//! The normalized store.
//!
//! Two flat tables hold everything the cache knows: `records` maps an
//! addressing key (an entity key, or the full field key of an embedded
//! entity) to its scalar fields, and `links` maps fully qualified field keys
//! to the child entities behind them. User-supplied resolvers and updaters
//! hang off the store and are consulted by the read and write traversals.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use apollo_compiler::ast;
use serde::Deserialize;
use serde::Serialize;

use crate::json_ext::typename_of;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::keys::join_keys;
use crate::keys::key_of_field;
use crate::schema::default_root_typename;
use crate::schema::SchemaPredicates;

/// The flat mapping of field keys to scalars stored under an addressing key.
pub type Record = HashMap<String, Value>;

/// The relation from a parent field to its child entities.
///
/// List fields produce parallel list links, nested arbitrarily for
/// list-of-list types, with entity keys or nulls at the leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    /// A single child entity key.
    Single(String),
    Null,
    List(Vec<Link>),
}

/// What a resolver hands back to the read traversal.
pub enum ResolverValue {
    Scalar(Value),
    /// An entity key for the read to continue on.
    EntityRef(String),
    /// An entity candidate; its derived key decides where the read
    /// continues.
    Embedded(Object),
    List(Vec<ResolverValue>),
    Null,
    /// Treated as a cache miss for the field.
    Missing,
}

impl From<Value> for ResolverValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ResolverValue::Null,
            Value::Array(values) => {
                ResolverValue::List(values.into_iter().map(Into::into).collect())
            }
            Value::Object(object) => {
                if typename_of(&object).is_some() {
                    ResolverValue::Embedded(object)
                } else {
                    ResolverValue::Scalar(Value::Object(object))
                }
            }
            value => ResolverValue::Scalar(value),
        }
    }
}

/// Context handed to resolvers.
pub struct ResolverInfo<'a> {
    pub parent_typename: &'a str,
    pub parent_key: &'a str,
    pub field_name: &'a str,
    pub variables: &'a Object,
}

/// Context handed to updaters.
pub struct UpdaterInfo<'a> {
    pub field_name: &'a str,
    pub variables: &'a Object,
}

/// A user resolver: `(parent, args, store, info)` to a tagged return value.
///
/// Resolvers receive the store read-only; the only parent field guaranteed
/// to be populated is the resolved field's own alias, pre-seeded with the
/// raw record value when one exists.
pub type Resolver =
    Box<dyn Fn(&Object, &Object, &Store, &ResolverInfo<'_>) -> ResolverValue + Send + Sync>;

/// A user updater, invoked after a write at an operation root with
/// `(result, args, store, info)`.
pub type Updater = Arc<dyn Fn(&Object, &Object, &mut Store, &UpdaterInfo<'_>) + Send + Sync>;

/// The set of keys a single read or write touched.
///
/// Captured explicitly per logical call: each traversal creates one, threads
/// it through, and returns it, so exactly one capture is active per call by
/// construction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencySet {
    keys: HashSet<String>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, key: impl Into<String>) {
        self.keys.insert(key.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|key| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

struct RootKeys {
    query: String,
    mutation: String,
    subscription: String,
}

impl RootKeys {
    fn new(schema: Option<&SchemaPredicates>) -> Self {
        let name = |operation_type| match schema {
            Some(schema) => schema.root_typename(operation_type).to_string(),
            None => default_root_typename(operation_type).to_string(),
        };
        Self {
            query: name(ast::OperationType::Query),
            mutation: name(ast::OperationType::Mutation),
            subscription: name(ast::OperationType::Subscription),
        }
    }
}

pub struct Store {
    records: HashMap<String, Record>,
    links: HashMap<String, Link>,
    resolvers: HashMap<String, HashMap<String, Resolver>>,
    updaters: HashMap<String, HashMap<String, Updater>>,
    schema: Option<SchemaPredicates>,
    roots: RootKeys,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("records", &self.records)
            .field("links", &self.links)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_schema(schema: SchemaPredicates) -> Self {
        Self::build(Some(schema))
    }

    fn build(schema: Option<SchemaPredicates>) -> Self {
        let roots = RootKeys::new(schema.as_ref());
        Self {
            records: HashMap::new(),
            links: HashMap::new(),
            resolvers: HashMap::new(),
            updaters: HashMap::new(),
            schema,
            roots,
        }
    }

    pub fn schema(&self) -> Option<&SchemaPredicates> {
        self.schema.as_ref()
    }

    /// The root entity key serving an operation kind.
    pub fn root_key(&self, operation_type: ast::OperationType) -> &str {
        match operation_type {
            ast::OperationType::Query => &self.roots.query,
            ast::OperationType::Mutation => &self.roots.mutation,
            ast::OperationType::Subscription => &self.roots.subscription,
        }
    }

    pub fn is_root_key(&self, key: &str) -> bool {
        key == self.roots.query || key == self.roots.mutation || key == self.roots.subscription
    }

    pub(crate) fn is_query_root(&self, key: &str) -> bool {
        key == self.roots.query
    }

    /// Derives the entity key of a result object.
    ///
    /// Root typenames key to the root itself; other entities key to
    /// `Typename:id` with `id` preferred over `_id`. `None` means the
    /// object is embedded and addressed through its parent.
    pub fn key_of_entity(&self, data: &Object) -> Option<String> {
        let typename = typename_of(data)?;
        if self.is_root_key(typename) {
            return Some(typename.to_string());
        }
        let id = entity_id(data.get("id")).or_else(|| entity_id(data.get("_id")))?;
        Some(format!("{typename}:{id}"))
    }

    pub fn get_record(&self, entity_key: &str, field_key: &str) -> Option<&Value> {
        self.records.get(entity_key)?.get(field_key)
    }

    /// Writes or, with `None`, removes a record field.
    pub fn write_record(&mut self, entity_key: &str, field_key: &str, value: Option<Value>) {
        match value {
            Some(value) => {
                self.records
                    .entry(entity_key.to_string())
                    .or_default()
                    .insert(field_key.to_string(), value);
            }
            None => {
                if let Some(record) = self.records.get_mut(entity_key) {
                    record.remove(field_key);
                }
            }
        }
    }

    pub fn get_link(&self, full_key: &str) -> Option<&Link> {
        self.links.get(full_key)
    }

    pub fn write_link(&mut self, full_key: impl Into<String>, link: Link) {
        self.links.insert(full_key.into(), link);
    }

    pub fn remove_link(&mut self, full_key: &str) {
        self.links.remove(full_key);
    }

    /// Record lookup by field name and arguments.
    pub fn get_field(
        &self,
        entity_key: &str,
        field_name: &str,
        args: Option<&Object>,
    ) -> Option<&Value> {
        self.get_record(entity_key, &key_of_field(field_name, args))
    }

    /// Whether anything is known about a field: a record value or a link.
    pub fn has_field(&self, entity_key: &str, field_key: &str) -> bool {
        self.get_record(entity_key, field_key).is_some()
            || self.links.contains_key(&join_keys(entity_key, field_key))
    }

    pub fn add_resolver<F>(&mut self, typename: &str, field_name: &str, resolver: F)
    where
        F: Fn(&Object, &Object, &Store, &ResolverInfo<'_>) -> ResolverValue
            + Send
            + Sync
            + 'static,
    {
        self.resolvers
            .entry(typename.to_string())
            .or_default()
            .insert(field_name.to_string(), Box::new(resolver));
    }

    pub(crate) fn resolver(&self, typename: &str, field_name: &str) -> Option<&Resolver> {
        self.resolvers.get(typename)?.get(field_name)
    }

    /// Registers an updater under the mutation or subscription root.
    pub fn add_updater<F>(
        &mut self,
        operation_type: ast::OperationType,
        field_name: &str,
        updater: F,
    ) where
        F: Fn(&Object, &Object, &mut Store, &UpdaterInfo<'_>) + Send + Sync + 'static,
    {
        let root = self.root_key(operation_type).to_string();
        self.updaters
            .entry(root)
            .or_default()
            .insert(field_name.to_string(), Arc::new(updater));
    }

    pub(crate) fn updater(&self, root_key: &str, field_name: &str) -> Option<Updater> {
        self.updaters.get(root_key)?.get(field_name).cloned()
    }
}

fn entity_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(id) => Some(id.as_str().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
