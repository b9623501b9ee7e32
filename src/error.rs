use crate::store::StoreError;
use std::fmt;
use std::result::Result as StdResult;
use thiserror::Error;

/// Operation which was running when a migration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// resolving and validating configuration.
    Configure,
    /// establishing source or target connection.
    Connect,
    /// listing source collections.
    List,
    /// reading documents from a source cursor.
    Read,
    /// materializing one source document.
    Decode,
    /// bulk inserting a batch into target.
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Configure => "configure",
            Operation::Connect => "connect",
            Operation::List => "list",
            Operation::Read => "read",
            Operation::Decode => "decode",
            Operation::Write => "write",
        };
        f.write_str(name)
    }
}

/// Error which stops a migration run.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// configuration is missing a value or holds an invalid one.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// configuration file can't be read or parsed.
    #[error("Read configuration file {path:?} failed, detailed: {detail}")]
    ConfigFile {
        /// path of the configuration file.
        path: String,
        /// why reading failed.
        detail: String,
    },
    /// source or target server can't be reached.
    #[error("Mongodb connection error, connection string: {uri:?}, detailed: {detail}")]
    Connection {
        /// connection string of the unreachable server.
        uri: String,
        /// underlying driver error.
        detail: StoreError,
    },
    /// source collections can't be listed.
    #[error("List collections for database {db:?} failed, detailed: {detail}")]
    SourceUnavailable {
        /// source database name.
        db: String,
        /// underlying driver error.
        detail: StoreError,
    },
    /// cursor over a source collection can't be opened.
    #[error("Open cursor on collection {coll:?} failed, detailed: {detail}")]
    OpenCursor {
        /// collection being migrated.
        coll: String,
        /// underlying driver error.
        detail: StoreError,
    },
    /// one source document can't be decoded.
    #[error("Decode document #{position} of collection {coll:?} failed, detailed: {detail}")]
    ReadDecode {
        /// collection being migrated.
        coll: String,
        /// 1-based position of the document in the cursor.
        position: u64,
        /// underlying decode error.
        detail: StoreError,
    },
    /// a bulk insert failed as a whole.
    #[error("Insert batch #{batch} into collection {coll:?} failed, detailed: {detail}")]
    BatchWrite {
        /// collection being migrated.
        coll: String,
        /// 1-based number of the failed batch.
        batch: u64,
        /// underlying driver error.
        detail: StoreError,
    },
    /// source cursor terminated abnormally.
    #[error("Cursor error in collection {coll:?}, detailed: {detail}")]
    Stream {
        /// collection being migrated.
        coll: String,
        /// underlying driver error.
        detail: StoreError,
    },
    /// run or collection deadline passed.
    #[error("Deadline exceeded during {op} of collection {coll:?}")]
    DeadlineExceeded {
        /// collection being migrated.
        coll: String,
        /// operation which ran out of time.
        op: Operation,
    },
    /// migration stopped because a sibling collection failed.
    #[error("Migration of collection {coll:?} aborted because another collection failed")]
    Aborted {
        /// collection being migrated.
        coll: String,
    },
}

impl MigrateError {
    /// which operation failed.
    pub fn operation(&self) -> Operation {
        match self {
            MigrateError::Configuration(_) | MigrateError::ConfigFile { .. } => {
                Operation::Configure
            }
            MigrateError::Connection { .. } => Operation::Connect,
            MigrateError::SourceUnavailable { .. } => Operation::List,
            MigrateError::OpenCursor { .. }
            | MigrateError::Stream { .. }
            | MigrateError::Aborted { .. } => Operation::Read,
            MigrateError::ReadDecode { .. } => Operation::Decode,
            MigrateError::BatchWrite { .. } => Operation::Write,
            MigrateError::DeadlineExceeded { op, .. } => *op,
        }
    }

    /// the collection being migrated when the error occurred, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            MigrateError::OpenCursor { coll, .. }
            | MigrateError::ReadDecode { coll, .. }
            | MigrateError::BatchWrite { coll, .. }
            | MigrateError::Stream { coll, .. }
            | MigrateError::DeadlineExceeded { coll, .. }
            | MigrateError::Aborted { coll } => Some(coll),
            _ => None,
        }
    }
}

/// result type of migration operations.
pub type Result<T> = StdResult<T, MigrateError>;
