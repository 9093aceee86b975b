//! A normalized, in-memory GraphQL document cache.
//!
//! Server results are normalized into an entity/record [`Store`] keyed by
//! type and id, requests are read back out of it with full or partial
//! satisfaction reporting, and every read and write returns the set of keys
//! it touched so invalidation can be driven by the mutations and
//! subscriptions crossing the boundary. A second, closely related piece is
//! the [`Populate`] transform, which rewrites mutations marked `@populate`
//! to re-request exactly the fields that live queries already observe.
//!
//! The cache consumes parsed [`apollo_compiler::ast::Document`] values and,
//! optionally, a validated schema through [`SchemaPredicates`]; it does no
//! parsing, transport or stream wiring of its own.
//!
//! ```
//! use apollo_compiler::ast::Document;
//! use graphcache::{read_query, write_query, Request, Store};
//! use serde_json_bytes::json;
//!
//! let document = Document::parse("{ todos { id text } }", "query.graphql").unwrap();
//! let request = Request::new(&document);
//!
//! let mut store = Store::new();
//! let data = json!({
//!     "todos": [{ "__typename": "Todo", "id": "1", "text": "walk the dog" }],
//! });
//! write_query(&mut store, &request, data.as_object().unwrap()).unwrap();
//!
//! let result = read_query(&store, &request).unwrap();
//! assert!(!result.partial);
//! assert!(result.dependencies.contains("Todo:1"));
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

mod ast;
mod error;
mod json_ext;
mod keys;
mod populate;
mod read;
mod schema;
mod selection;
mod store;
mod write;

pub use crate::error::CacheError;
pub use crate::json_ext::Object;
pub use crate::json_ext::Value;
pub use crate::keys::join_keys;
pub use crate::keys::key_of_field;
pub use crate::populate::Operation;
pub use crate::populate::OperationKind;
pub use crate::populate::Populate;
pub use crate::read::read_query;
pub use crate::read::read_query_with_data;
pub use crate::read::QueryResult;
pub use crate::schema::SchemaPredicates;
pub use crate::store::DependencySet;
pub use crate::store::Link;
pub use crate::store::Record;
pub use crate::store::Resolver;
pub use crate::store::ResolverInfo;
pub use crate::store::ResolverValue;
pub use crate::store::Store;
pub use crate::store::Updater;
pub use crate::store::UpdaterInfo;
pub use crate::write::write_query;
pub use crate::write::WriteResult;

/// A cacheable request: a parsed document plus its variables.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub query: &'a apollo_compiler::ast::Document,
    pub variables: Option<&'a Object>,
    /// Selects among multiple operation definitions; the first one runs
    /// otherwise.
    pub operation_name: Option<&'a str>,
}

impl<'a> Request<'a> {
    pub fn new(query: &'a apollo_compiler::ast::Document) -> Self {
        Self {
            query,
            variables: None,
            operation_name: None,
        }
    }

    pub fn with_variables(
        query: &'a apollo_compiler::ast::Document,
        variables: &'a Object,
    ) -> Self {
        Self {
            query,
            variables: Some(variables),
            operation_name: None,
        }
    }
}
