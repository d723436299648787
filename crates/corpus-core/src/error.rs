//! Error types for the query core.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Every shard is done; the run is finished.
    #[error("no shard left to scan")]
    NoShardAvailable,
    /// A single-shard corpus was asked for its shard after it was scanned.
    #[error("single shard '{0}' has already been scanned")]
    ShardAlreadyDone(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid catalog pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("unknown corpus {0}")]
    UnknownCorpus(u32),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregateError {
    #[error("malformed row for result set {id}: {reason}")]
    MalformedRow { id: i64, reason: String },
    #[error("result rows arrived before query metadata")]
    MissingMetadata,
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("query could not be translated: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run store error: {0}")]
    Db(#[from] sled::Error),
    #[error("corrupt run record: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors that end a run before or outside the scheduling loop.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot resume run: {0}")]
    InvalidResume(String),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("request selects no shards")]
    NoShards,
}
