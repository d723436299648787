// corpus-core/src/engine.rs
//! Collaborators outside the core: the query translator and the data engine

use async_trait::async_trait;

use crate::bundle::{QueryMeta, RawRow};
use crate::catalog::Shard;
use crate::error::TranslateError;

/// Compiled form of a user query
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    /// Executable statement, parameterised by shard at dispatch time
    pub statement: String,
    /// Result set descriptions, stored as bundle entry `0`
    pub meta: QueryMeta,
}

/// Turns query text into a statement; called once per run
pub trait Translator: Send + Sync {
    fn translate(&self, query: &str) -> Result<Translation, TranslateError>;
}

/// Executes statements against shards
///
/// Errors are returned as text and reported to the user verbatim.
#[async_trait]
pub trait DataEngine: Send + Sync {
    /// Run the statement against one shard, returning every matching row
    async fn execute(&self, statement: &str, shard: &Shard) -> Result<Vec<RawRow>, String>;

    /// Fetch sentence context (result set `-1` rows) for enumerable matches
    async fn sentences(&self, shard: &Shard, matches: &[RawRow]) -> Result<Vec<RawRow>, String>;
}
