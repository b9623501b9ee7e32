//! Source and target database abstractions used by the migrator.
//!
//! The migrator only needs a handful of operations from each side, they are
//! expressed as traits so the copy pipeline can run against [mongo] handles or
//! against the in-memory [memory] store.
#[doc(hidden)]
pub mod memory;
pub mod mongo;

use bson::Document;
use std::error::Error as StdError;
use std::fmt;
use std::result::Result as StdResult;
use std::time::Duration;

/// Error raised by a source or target store.
#[derive(Debug)]
pub struct StoreError {
    inner: Box<dyn StdError + Send + Sync>,
    timed_out: bool,
}

impl StoreError {
    /// create a store error from a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        let message: String = message.into();
        StoreError {
            inner: message.into(),
            timed_out: false,
        }
    }

    /// wrap an underlying driver error.
    pub fn wrap<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        StoreError {
            inner: Box::new(err),
            timed_out: false,
        }
    }

    /// mark the error as caused by an exhausted time limit.
    pub fn timed_out(mut self) -> Self {
        self.timed_out = true;
        self
    }

    /// whether the store gave up because the time limit passed.
    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

/// Failure while pulling the next item from a source cursor.
#[derive(Debug)]
pub enum ReadError {
    /// one document could not be materialized, the cursor itself is fine.
    Decode(StoreError),
    /// the cursor terminated abnormally.
    Stream(StoreError),
    /// the cursor ran out of the time limit given when it was opened.
    Timeout(StoreError),
}

/// Result of one unordered bulk insert.
///
/// Per-document failures (e.g. duplicate `_id`) are counted in `rejected`,
/// they don't stop sibling documents from being inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// documents confirmed written.
    pub inserted: u64,
    /// documents refused individually by the target.
    pub rejected: u64,
}

/// Database which documents are copied from.
pub trait SourceDb: Sync {
    /// Cursor over one collection, closed when dropped.
    type Cursor: Iterator<Item = StdResult<Document, ReadError>>;

    /// database name, only used for reporting.
    fn name(&self) -> &str;

    /// list collection names visible at call time.
    fn list_collection_names(&self) -> StdResult<Vec<String>, StoreError>;

    /// open an unfiltered cursor over collection `coll`.
    ///
    /// `time_limit` bounds how long the server may spend on the cursor.
    fn open_cursor(
        &self,
        coll: &str,
        time_limit: Option<Duration>,
    ) -> StdResult<Self::Cursor, StoreError>;
}

/// Database which documents are copied to.
pub trait TargetDb: Sync {
    /// Handle to one target collection.
    type Collection: TargetCollection;

    /// database name, only used for reporting.
    fn name(&self) -> &str;

    /// get handle of collection `coll`.
    fn collection(&self, coll: &str) -> Self::Collection;
}

/// Collection which accepts batches of documents.
pub trait TargetCollection {
    /// insert `docs` without ordering, so one failing document doesn't abort the others.
    ///
    /// `time_limit` bounds how long the target may take, running out of it is an
    /// `Err` for which [StoreError::is_timeout] is true.
    /// Returns `Err` only when the call as a whole failed.
    fn insert_unordered(
        &self,
        docs: &[Document],
        time_limit: Option<Duration>,
    ) -> StdResult<InsertOutcome, StoreError>;
}
