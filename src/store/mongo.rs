//! [SourceDb] and [TargetDb] implemented on top of mongodb blocking api.
use super::{InsertOutcome, ReadError, SourceDb, StoreError, TargetCollection, TargetDb};
use bson::{Document, RawDocumentBuf};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{FindOptions, InsertManyOptions, WriteConcern};
use mongodb::sync::{Collection, Cursor, Database};
use std::result::Result as StdResult;
use std::time::Duration;

/// server error code when an operation exceeds its `maxTimeMS`.
const MAX_TIME_MS_EXPIRED: i32 = 50;
/// server write concern error code when `wtimeout` expires.
const WRITE_CONCERN_FAILED: i32 = 64;

/// whether `err` was raised because a server side time limit passed.
fn is_time_limit_error(err: &MongoError) -> bool {
    match *err.kind {
        ErrorKind::Command(ref command_error) => command_error.code == MAX_TIME_MS_EXPIRED,
        ErrorKind::Write(WriteFailure::WriteConcernError(ref wc_error)) => {
            wc_error.code == WRITE_CONCERN_FAILED
        }
        ErrorKind::BulkWrite(ref failure) => failure
            .write_concern_error
            .as_ref()
            .map_or(false, |wc_error| wc_error.code == WRITE_CONCERN_FAILED),
        _ => false,
    }
}

fn store_error(err: MongoError) -> StoreError {
    if is_time_limit_error(&err) {
        StoreError::wrap(err).timed_out()
    } else {
        StoreError::wrap(err)
    }
}

/// `maxTimeMS: 0` means no limit for the server, so never send less than 1ms.
fn server_time_limit(time_limit: Option<Duration>) -> Option<Duration> {
    time_limit.map(|limit| limit.max(Duration::from_millis(1)))
}

/// Source mongodb database.
#[derive(Clone)]
pub struct MongoSource {
    db: Database,
}

impl MongoSource {
    /// wrap a source `db`.
    pub fn new(db: Database) -> Self {
        MongoSource { db }
    }
}

impl SourceDb for MongoSource {
    type Cursor = MongoCursor;

    fn name(&self) -> &str {
        self.db.name()
    }

    fn list_collection_names(&self) -> StdResult<Vec<String>, StoreError> {
        self.db.list_collection_names(None).map_err(store_error)
    }

    fn open_cursor(
        &self,
        coll: &str,
        time_limit: Option<Duration>,
    ) -> StdResult<MongoCursor, StoreError> {
        // Read raw documents, so a malformed document is reported as decode error
        // instead of a failure of the whole cursor.
        let options = FindOptions::builder()
            .max_time(server_time_limit(time_limit))
            .build();
        let inner = self
            .db
            .collection::<RawDocumentBuf>(coll)
            .find(None, options)
            .map_err(store_error)?;
        Ok(MongoCursor { inner })
    }
}

/// Cursor over one source collection, the server side cursor is killed when it's dropped.
pub struct MongoCursor {
    inner: Cursor<RawDocumentBuf>,
}

impl Iterator for MongoCursor {
    type Item = StdResult<Document, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = match self.inner.next()? {
            Ok(raw) => raw,
            Err(e) if is_time_limit_error(&e) => {
                return Some(Err(ReadError::Timeout(store_error(e))))
            }
            Err(e) => return Some(Err(ReadError::Stream(StoreError::wrap(e)))),
        };
        Some(
            raw.to_document()
                .map_err(|e| ReadError::Decode(StoreError::wrap(e))),
        )
    }
}

/// Target mongodb database.
#[derive(Clone)]
pub struct MongoTarget {
    db: Database,
}

impl MongoTarget {
    /// wrap a target `db`.
    pub fn new(db: Database) -> Self {
        MongoTarget { db }
    }
}

impl TargetDb for MongoTarget {
    type Collection = MongoTargetCollection;

    fn name(&self) -> &str {
        self.db.name()
    }

    fn collection(&self, coll: &str) -> MongoTargetCollection {
        MongoTargetCollection {
            coll: self.db.collection(coll),
        }
    }
}

/// Target mongodb collection.
pub struct MongoTargetCollection {
    coll: Collection<Document>,
}

impl TargetCollection for MongoTargetCollection {
    fn insert_unordered(
        &self,
        docs: &[Document],
        time_limit: Option<Duration>,
    ) -> StdResult<InsertOutcome, StoreError> {
        let write_concern = WriteConcern::builder()
            .w_timeout(server_time_limit(time_limit))
            .build();
        let options = InsertManyOptions::builder()
            .ordered(false)
            .write_concern(write_concern)
            .build();
        match self.coll.insert_many(docs, options) {
            Ok(result) => Ok(InsertOutcome {
                inserted: result.inserted_ids.len() as u64,
                rejected: 0,
            }),
            Err(e) => {
                // With `ordered: false` the server keeps inserting after a failed document,
                // and reports every failed document in `write_errors`.
                // Write concern errors mean we don't know what was persisted.
                let rejected = match *e.kind {
                    ErrorKind::BulkWrite(ref failure) if failure.write_concern_error.is_none() => {
                        failure.write_errors.as_ref().map_or(0, |errors| errors.len())
                    }
                    _ => 0,
                };
                if rejected == 0 {
                    return Err(store_error(e));
                }
                Ok(InsertOutcome {
                    inserted: docs.len().saturating_sub(rejected) as u64,
                    rejected: rejected as u64,
                })
            }
        }
    }
}
