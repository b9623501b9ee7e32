//! Mongo migrate lib, copies every collection of one mongodb database into another mongodb database.
//!
//! Documents are streamed from a source cursor, grouped into fixed size batches and written
//! to target with unordered bulk inserts. Indexes, validation rules and collection options are
//! not copied.
//!
//! Use [run_migration] to migrate with mongodb connections described by a [MigrateConf], or
//! [DbMigrator] to migrate between any [SourceDb] and [TargetDb].
//!
//! # Example:
//! ```no_run
//! use mongo_migrate::{run_migration, MigrateConf};
//!
//! let conf = MigrateConf::new(
//!     "mongodb://localhost:27017".to_string(),
//!     "mongodb://localhost:27018".to_string(),
//!     "app".to_string(),
//!     "app".to_string(),
//! )
//! .with_batch_size(1000);
//! let summary = run_migration(&conf).unwrap();
//! println!("migrated {} documents", summary.total_read());
//! ```
//!
//! # In-memory example:
//! ```
//! use bson::doc;
//! use mongo_migrate::store::memory::{MemorySource, MemoryTarget};
//! use mongo_migrate::{DbMigrator, MigrateConf};
//!
//! let source = MemorySource::new("app").with_collection("users", vec![doc! {"_id": 1}]);
//! let target = MemoryTarget::new("app_copy");
//! let conf = MigrateConf::new("memory://a".into(), "memory://b".into(), "app".into(), "app_copy".into());
//! let summary = DbMigrator::new(&source, &target, &conf).run().unwrap();
//! assert_eq!(summary.total_read(), 1);
//! assert_eq!(target.documents("users"), vec![doc! {"_id": 1}]);
//! ```

#![warn(missing_docs)]

mod config;
mod connection;
mod deadline;
pub mod enumerator;
mod error;
pub mod migrator;
mod report;
pub mod store;
mod syncer;

/// mongodb internal database for admin.
const ADMIN_DB_NAME: &str = "admin";

/// documents per bulk insert when not configured.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// run and collection deadline in seconds when not configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30 * 60;

pub use config::{Endpoint, MigrateConf, MigrateSection, SyncerConfig};
pub use connection::Connection;
pub use deadline::{AbortFlag, Deadline};
pub use error::{MigrateError, Operation, Result};
pub use migrator::CollectionMigrator;
pub use report::{CollectionReport, MigrationSummary};
pub use store::{SourceDb, TargetCollection, TargetDb};
pub use syncer::{run_migration, DbMigrator};
