use displaydoc::Display;
use thiserror::Error;

/// Cache request errors.
///
/// Recoverable conditions (cache misses, resolver misuse) never surface
/// here; they are encoded in the returned data and flags. These variants are
/// reserved for requests the cache cannot act on at all.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheError {
    /// document contains no executable operation
    NoOperation,
    /// unknown operation named "{0}"
    UnknownOperation(String),
    /// invalid schema: {0}
    InvalidSchema(String),
}
