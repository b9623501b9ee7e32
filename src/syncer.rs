use crate::config::MigrateConf;
use crate::connection::Connection;
use crate::deadline::{AbortFlag, Deadline};
use crate::enumerator;
use crate::error::{MigrateError, Result};
use crate::migrator::CollectionMigrator;
use crate::report::{CollectionReport, MigrationSummary};
use crate::store::{SourceDb, TargetDb};
use chrono::Local;
use crossbeam::channel;
use rayon::ThreadPoolBuilder;
use std::time::Instant;
use tracing::{info, info_span, Span};
use uuid::Uuid;

enum MigrateCollStatus {
    Done(CollectionReport),
    Failed(MigrateError),
}

/// Migrates every collection of a source database into a target database.
pub struct DbMigrator<'a, S, T> {
    source: &'a S,
    target: &'a T,
    conf: &'a MigrateConf,
}

impl<'a, S: SourceDb, T: TargetDb> DbMigrator<'a, S, T> {
    /// create a migrator copying `source` into `target` as `conf` describes.
    pub fn new(source: &'a S, target: &'a T, conf: &'a MigrateConf) -> Self {
        DbMigrator {
            source,
            target,
            conf,
        }
    }

    /// Enumerate collections once, then migrate each of them.
    ///
    /// Stops on the first failure, collections not reached yet are left untouched.
    pub fn run(&self) -> Result<MigrationSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("migration", %run_id);
        let _enter = span.enter();

        let started_at = Local::now();
        let started = Instant::now();
        let deadline = Deadline::after(self.conf.get_timeout());

        let colls = enumerator::list_collections(self.source, self.conf.get_colls())?;
        info!(
            total = colls.len(),
            src_db = self.source.name(),
            dst_db = self.target.name(),
            %started_at,
            "Begin to migrate collections"
        );

        let migrator = CollectionMigrator::new(self.source, self.target, self.conf)
            .with_deadline(deadline);
        let collections = if self.conf.get_collection_concurrent() <= 1 || colls.len() <= 1 {
            self.migrate_serial(&migrator, &colls)?
        } else {
            self.migrate_concurrent(migrator, &colls)?
        };

        let summary = MigrationSummary {
            run_id,
            started_at,
            collections,
            elapsed: started.elapsed(),
        };
        info!(
            collections = summary.collections.len(),
            count = summary.total_read(),
            inserted = summary.total_inserted(),
            rejected = summary.total_rejected(),
            elapsed_secs = summary.elapsed.as_secs_f32(),
            "Database migration completed successfully."
        );
        Ok(summary)
    }

    fn migrate_serial(
        &self,
        migrator: &CollectionMigrator<'a, S, T>,
        colls: &[String],
    ) -> Result<Vec<CollectionReport>> {
        colls.iter().map(|coll| migrator.migrate(coll)).collect()
    }

    // Every collection uses its own cursor and batch, nothing is shared between
    // workers except the abort flag.
    fn migrate_concurrent(
        &self,
        migrator: CollectionMigrator<'a, S, T>,
        colls: &[String],
    ) -> Result<Vec<CollectionReport>> {
        let workers = self.conf.get_collection_concurrent().min(colls.len());
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("migrate-worker-{}", idx))
            .build()
            .map_err(|e| {
                MigrateError::Configuration(format!("build collection worker pool failed: {}", e))
            })?;
        let abort = AbortFlag::new();
        let migrator = migrator.with_abort_flag(abort.clone());
        let (sender, receiver) = channel::unbounded();
        let span = Span::current();

        info!(workers, "Migrate collections concurrently");
        pool.scope(|scope| {
            for coll in colls.iter() {
                let sender = sender.clone();
                let (migrator, abort, span) = (&migrator, &abort, span.clone());
                scope.spawn(move |_| {
                    let _enter = span.enter();
                    let status = match migrator.migrate(coll) {
                        Ok(report) => MigrateCollStatus::Done(report),
                        Err(e) => {
                            abort.abort();
                            MigrateCollStatus::Failed(e)
                        }
                    };
                    let _ = sender.send(status);
                });
            }
        });
        drop(sender);

        let mut reports = Vec::with_capacity(colls.len());
        let mut first_error = None;
        for status in receiver.iter() {
            match status {
                MigrateCollStatus::Done(report) => reports.push(report),
                // caused by another failure, which is the one to report.
                MigrateCollStatus::Failed(MigrateError::Aborted { .. }) => {}
                MigrateCollStatus::Failed(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }
}

/// Migrate databases described by `conf`.
///
/// Configuration is validated before connecting, connections are released before returning.
pub fn run_migration(conf: &MigrateConf) -> Result<MigrationSummary> {
    conf.validate()?;
    let conn = Connection::new(conf)?;
    conn.check_connectivity()?;
    let (source, target) = (conn.get_src_db(), conn.get_target_db());
    DbMigrator::new(&source, &target, conf).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryEntry, MemorySource, MemoryTarget};
    use bson::{doc, Document};

    fn conf() -> MigrateConf {
        MigrateConf::new(
            "memory://src".to_string(),
            "memory://dst".to_string(),
            "src".to_string(),
            "dst".to_string(),
        )
        .with_batch_size(100)
    }

    fn docs(n: i32) -> Vec<Document> {
        (0..n).map(|i| doc! {"_id": i}).collect()
    }

    #[test]
    fn test_run_serial() {
        let source = MemorySource::new("src")
            .with_collection("a", docs(250))
            .with_collection("b", vec![]);
        let target = MemoryTarget::new("dst");
        let conf = conf();
        let summary = DbMigrator::new(&source, &target, &conf).run().unwrap();

        assert_eq!(summary.collections.len(), 2);
        assert_eq!(summary.collection("a").unwrap().read, 250);
        assert_eq!(summary.collection("b").unwrap().read, 0);
        assert_eq!(summary.total_read(), 250);
        assert_eq!(target.insert_calls("a"), vec![100, 100, 50]);
        assert!(target.insert_calls("b").is_empty());
    }

    #[test]
    fn test_run_serial_stops_at_first_failure() {
        // collections are migrated in name order, so `a` fails before `b` starts.
        let source = MemorySource::new("src")
            .with_entries("a", vec![MemoryEntry::Corrupt("bad".to_string())])
            .with_collection("b", docs(10));
        let target = MemoryTarget::new("dst");
        let conf = conf();
        let err = DbMigrator::new(&source, &target, &conf).run().unwrap_err();
        assert_eq!(err.collection(), Some("a"));
        assert!(target.insert_calls("b").is_empty());
    }

    #[test]
    fn test_run_concurrent() {
        let source = MemorySource::new("src")
            .with_collection("a", docs(250))
            .with_collection("b", docs(30))
            .with_collection("c", docs(100));
        let target = MemoryTarget::new("dst");
        let conf = conf().with_collection_concurrent(3);
        let summary = DbMigrator::new(&source, &target, &conf).run().unwrap();

        assert_eq!(summary.collections.len(), 3);
        assert_eq!(summary.total_read(), 380);
        assert_eq!(target.documents("a"), docs(250));
        assert_eq!(target.documents("b"), docs(30));
        assert_eq!(target.insert_calls("c"), vec![100]);
    }

    #[test]
    fn test_run_concurrent_reports_real_failure() {
        let source = MemorySource::new("src")
            .with_collection("a", docs(50))
            .with_collection("b", docs(50));
        let target = MemoryTarget::new("dst").fail_writes_to("b");
        let conf = conf().with_collection_concurrent(2);
        let err = DbMigrator::new(&source, &target, &conf).run().unwrap_err();
        assert!(matches!(err, MigrateError::BatchWrite { .. }));
        assert_eq!(err.collection(), Some("b"));
    }

    #[test]
    fn test_run_list_failure() {
        let source = MemorySource::new("src").failing_list("not authorized");
        let target = MemoryTarget::new("dst");
        let conf = conf();
        let err = DbMigrator::new(&source, &target, &conf).run().unwrap_err();
        assert!(matches!(err, MigrateError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_run_migration_validates_before_connecting() {
        let conf = MigrateConf::new(
            "mongodb://localhost:27017".to_string(),
            "".to_string(),
            "app".to_string(),
            "app".to_string(),
        );
        assert!(matches!(
            run_migration(&conf),
            Err(MigrateError::Configuration(_))
        ));
    }
}
