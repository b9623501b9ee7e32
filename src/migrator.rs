//! Copy one collection from source to target in fixed size batches.
//!
//! Documents are read through a cursor, collected into a batch, and the batch is
//! flushed with one unordered bulk insert once it's full. A partial batch left
//! when the cursor is exhausted is flushed the same way.
//!
//! Failure policy:
//! * a document which can't be decoded aborts the collection, the pending batch is dropped.
//! * a bulk insert which fails as a whole aborts the collection.
//! * documents refused individually inside a bulk insert (e.g. duplicate `_id`) are only counted.
//! * a cursor failure aborts the collection after the pending batch is flushed.
//! * running out of time while reading or writing aborts the collection with
//!   [MigrateError::DeadlineExceeded], the pending batch is dropped.
//!
//! Batches already flushed are never rolled back.
use crate::config::MigrateConf;
use crate::deadline::{AbortFlag, Deadline};
use crate::error::{MigrateError, Operation, Result};
use crate::report::CollectionReport;
use crate::store::{ReadError, SourceDb, TargetCollection, TargetDb};
use bson::Document;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Migrates collections from `source` to the collection with same name in `target`.
pub struct CollectionMigrator<'a, S, T> {
    source: &'a S,
    target: &'a T,
    batch_size: usize,
    run_deadline: Deadline,
    collection_timeout: Duration,
    abort: AbortFlag,
}

impl<'a, S: SourceDb, T: TargetDb> CollectionMigrator<'a, S, T> {
    /// create a migrator, the run deadline starts now.
    pub fn new(source: &'a S, target: &'a T, conf: &MigrateConf) -> Self {
        CollectionMigrator {
            source,
            target,
            batch_size: conf.get_batch_size().max(1),
            run_deadline: Deadline::after(conf.get_timeout()),
            collection_timeout: conf.get_collection_timeout(),
            abort: AbortFlag::new(),
        }
    }

    /// replace the run deadline.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.run_deadline = deadline;
        self
    }

    /// stop migrating when `abort` is raised.
    pub fn with_abort_flag(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    /// Copy all documents of collection `coll`.
    ///
    /// `read` of the returned report counts documents read from source, which were all
    /// sent to target, `inserted` counts documents target confirmed.
    pub fn migrate(&self, coll: &str) -> Result<CollectionReport> {
        let started = Instant::now();
        let deadline = self
            .run_deadline
            .earliest(Deadline::after(self.collection_timeout));
        info!(%coll, "Migrating collection");

        deadline.check(coll, Operation::Read)?;
        let mut cursor = self
            .source
            .open_cursor(coll, deadline.remaining())
            .map_err(|detail| {
                if detail.is_timeout() {
                    MigrateError::DeadlineExceeded {
                        coll: coll.to_string(),
                        op: Operation::Read,
                    }
                } else {
                    MigrateError::OpenCursor {
                        coll: coll.to_string(),
                        detail,
                    }
                }
            })?;
        let target_coll = self.target.collection(coll);

        let mut report = CollectionReport::new(coll);
        let mut batch: Vec<Document> = Vec::with_capacity(self.batch_size);
        let mut stream_error = None;
        loop {
            if self.abort.is_aborted() {
                return Err(MigrateError::Aborted {
                    coll: coll.to_string(),
                });
            }
            deadline.check(coll, Operation::Read)?;

            match cursor.next() {
                None => break,
                Some(Ok(doc)) => {
                    batch.push(doc);
                    report.read += 1;
                }
                Some(Err(ReadError::Decode(detail))) => {
                    return Err(MigrateError::ReadDecode {
                        coll: coll.to_string(),
                        position: report.read + 1,
                        detail,
                    });
                }
                Some(Err(ReadError::Timeout(_))) => {
                    return Err(MigrateError::DeadlineExceeded {
                        coll: coll.to_string(),
                        op: Operation::Read,
                    });
                }
                Some(Err(ReadError::Stream(detail))) => {
                    stream_error = Some(detail);
                    break;
                }
            }

            if batch.len() == self.batch_size {
                self.flush(coll, &target_coll, &mut batch, &mut report, &deadline)?;
            }
        }
        drop(cursor);

        if !batch.is_empty() {
            self.flush(coll, &target_coll, &mut batch, &mut report, &deadline)?;
        }
        if let Some(detail) = stream_error {
            return Err(MigrateError::Stream {
                coll: coll.to_string(),
                detail,
            });
        }

        report.elapsed = started.elapsed();
        info!(
            %coll,
            count = report.read,
            inserted = report.inserted,
            rejected = report.rejected,
            "Successfully migrated collection"
        );
        Ok(report)
    }

    fn flush(
        &self,
        coll: &str,
        target_coll: &T::Collection,
        batch: &mut Vec<Document>,
        report: &mut CollectionReport,
        deadline: &Deadline,
    ) -> Result<()> {
        deadline.check(coll, Operation::Write)?;

        report.batches += 1;
        let outcome = target_coll
            .insert_unordered(batch.as_slice(), deadline.remaining())
            .map_err(|detail| {
                if detail.is_timeout() {
                    MigrateError::DeadlineExceeded {
                        coll: coll.to_string(),
                        op: Operation::Write,
                    }
                } else {
                    MigrateError::BatchWrite {
                        coll: coll.to_string(),
                        batch: report.batches,
                        detail,
                    }
                }
            })?;
        report.inserted += outcome.inserted;
        report.rejected += outcome.rejected;
        if outcome.rejected > 0 {
            warn!(
                %coll,
                batch = report.batches,
                rejected = outcome.rejected,
                "Target refused some documents of batch"
            );
        }
        info!(%coll, batch = report.batches, count = report.read, "Inserted documents");

        batch.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryEntry, MemorySource, MemoryTarget};
    use bson::doc;

    fn conf(batch_size: usize) -> MigrateConf {
        MigrateConf::new(
            "memory://src".to_string(),
            "memory://dst".to_string(),
            "src".to_string(),
            "dst".to_string(),
        )
        .with_batch_size(batch_size)
    }

    fn docs(range: std::ops::Range<i32>) -> Vec<Document> {
        range.map(|i| doc! {"_id": i, "n": i}).collect()
    }

    #[test]
    fn test_batches_preserve_read_order() {
        let source = MemorySource::new("src").with_collection("a", docs(0..25));
        let target = MemoryTarget::new("dst");
        let report = CollectionMigrator::new(&source, &target, &conf(10))
            .migrate("a")
            .unwrap();

        assert_eq!(report.read, 25);
        assert_eq!(report.inserted, 25);
        assert_eq!(report.batches, 3);
        assert_eq!(target.insert_calls("a"), vec![10, 10, 5]);
        assert_eq!(target.documents("a"), docs(0..25));
    }

    #[test]
    fn test_empty_collection_never_writes() {
        let source = MemorySource::new("src").with_collection("a", vec![]);
        let target = MemoryTarget::new("dst");
        let report = CollectionMigrator::new(&source, &target, &conf(10))
            .migrate("a")
            .unwrap();
        assert_eq!(report.read, 0);
        assert_eq!(report.batches, 0);
        assert!(target.insert_calls("a").is_empty());
    }

    #[test]
    fn test_exact_multiple_has_no_extra_flush() {
        let source = MemorySource::new("src").with_collection("a", docs(0..20));
        let target = MemoryTarget::new("dst");
        CollectionMigrator::new(&source, &target, &conf(10))
            .migrate("a")
            .unwrap();
        assert_eq!(target.insert_calls("a"), vec![10, 10]);
    }

    #[test]
    fn test_decode_failure_drops_pending_batch() {
        let mut entries: Vec<MemoryEntry> = docs(0..14).into_iter().map(MemoryEntry::Doc).collect();
        entries.push(MemoryEntry::Corrupt("invalid bson".to_string()));
        entries.extend(docs(14..30).into_iter().map(MemoryEntry::Doc));
        let source = MemorySource::new("src").with_entries("a", entries);
        let target = MemoryTarget::new("dst");

        let err = CollectionMigrator::new(&source, &target, &conf(10))
            .migrate("a")
            .unwrap_err();
        match err {
            MigrateError::ReadDecode { coll, position, .. } => {
                assert_eq!(coll, "a");
                assert_eq!(position, 15);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(target.insert_calls("a"), vec![10]);
        assert_eq!(target.documents("a").len(), 10);
    }

    #[test]
    fn test_stream_failure_flushes_pending_batch_then_fails() {
        let mut entries: Vec<MemoryEntry> = docs(0..13).into_iter().map(MemoryEntry::Doc).collect();
        entries.push(MemoryEntry::StreamFailure("cursor killed".to_string()));
        let source = MemorySource::new("src").with_entries("a", entries);
        let target = MemoryTarget::new("dst");

        let err = CollectionMigrator::new(&source, &target, &conf(10))
            .migrate("a")
            .unwrap_err();
        assert!(matches!(err, MigrateError::Stream { .. }));
        assert_eq!(err.operation(), Operation::Read);
        assert_eq!(target.insert_calls("a"), vec![10, 3]);
    }

    #[test]
    fn test_write_failure_is_fatal() {
        let source = MemorySource::new("src").with_collection("a", docs(0..25));
        let target = MemoryTarget::new("dst").fail_writes_to("a");
        let err = CollectionMigrator::new(&source, &target, &conf(10))
            .migrate("a")
            .unwrap_err();
        match err {
            MigrateError::BatchWrite { coll, batch, .. } => {
                assert_eq!(coll, "a");
                assert_eq!(batch, 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(target.insert_calls("a"), vec![10]);
    }

    #[test]
    fn test_rejected_documents_are_not_fatal() {
        let source = MemorySource::new("src").with_collection("a", docs(0..20));
        let target = MemoryTarget::new("dst").with_existing("a", docs(0..3));
        let report = CollectionMigrator::new(&source, &target, &conf(10))
            .migrate("a")
            .unwrap();
        assert_eq!(report.read, 20);
        assert_eq!(report.inserted, 17);
        assert_eq!(report.rejected, 3);
        assert_eq!(target.documents("a").len(), 20);
    }

    #[test]
    fn test_expired_deadline() {
        let source = MemorySource::new("src").with_collection("a", docs(0..5));
        let target = MemoryTarget::new("dst");
        let err = CollectionMigrator::new(&source, &target, &conf(10))
            .with_deadline(Deadline::after(Duration::from_secs(0)))
            .migrate("a")
            .unwrap_err();
        assert!(matches!(
            err,
            MigrateError::DeadlineExceeded {
                op: Operation::Read,
                ..
            }
        ));
        assert!(target.insert_calls("a").is_empty());
    }

    #[test]
    fn test_aborted() {
        let source = MemorySource::new("src").with_collection("a", docs(0..5));
        let target = MemoryTarget::new("dst");
        let abort = AbortFlag::new();
        abort.abort();
        let err = CollectionMigrator::new(&source, &target, &conf(10))
            .with_abort_flag(abort)
            .migrate("a")
            .unwrap_err();
        assert!(matches!(err, MigrateError::Aborted { .. }));
    }

    #[test]
    fn test_deadline_passes_during_write() {
        let source = MemorySource::new("src").with_collection("a", docs(0..25));
        let target = MemoryTarget::new("dst").with_write_delay(Duration::from_millis(600));
        // the first insert fits into the deadline, the second one runs out of it.
        let err = CollectionMigrator::new(&source, &target, &conf(10))
            .with_deadline(Deadline::after(Duration::from_millis(1000)))
            .migrate("a")
            .unwrap_err();
        match err {
            MigrateError::DeadlineExceeded { coll, op } => {
                assert_eq!(coll, "a");
                assert_eq!(op, Operation::Write);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(target.documents("a"), docs(0..10));
        assert_eq!(target.insert_calls("a"), vec![10, 10]);
    }

    #[test]
    fn test_deadline_passes_during_read() {
        let mut entries: Vec<MemoryEntry> =
            docs(0..10).into_iter().map(MemoryEntry::Doc).collect();
        entries.push(MemoryEntry::Stall(Duration::from_millis(600)));
        entries.extend(docs(10..25).into_iter().map(MemoryEntry::Doc));
        let source = MemorySource::new("src").with_entries("a", entries);
        let target = MemoryTarget::new("dst");
        let err = CollectionMigrator::new(&source, &target, &conf(10))
            .with_deadline(Deadline::after(Duration::from_millis(300)))
            .migrate("a")
            .unwrap_err();
        match err {
            MigrateError::DeadlineExceeded { coll, op } => {
                assert_eq!(coll, "a");
                assert_eq!(op, Operation::Read);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(target.documents("a"), docs(0..10));
        assert_eq!(target.insert_calls("a"), vec![10]);
    }
}
