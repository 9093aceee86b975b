//! JSON value aliases and helpers shared by the traversals.

pub use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

pub(crate) const TYPENAME: &str = "__typename";

/// Returns the `__typename` of an object, if it carries one.
///
/// An object with a string `__typename` is an entity candidate; anything
/// else is a scalar as far as normalization is concerned.
pub(crate) fn typename_of(data: &Object) -> Option<&str> {
    data.get(TYPENAME).and_then(|value| value.as_str())
}
