use crate::error::{MigrateError, Operation, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Point in time after which reads and writes are refused.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    // None when the duration overflows `Instant`, which means never.
    at: Option<Instant>,
}

impl Deadline {
    /// deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Deadline {
            at: Instant::now().checked_add(duration),
        }
    }

    /// the earlier one of `self` and `other`.
    pub fn earliest(self, other: Deadline) -> Deadline {
        match (self.at, other.at) {
            (Some(a), Some(b)) => Deadline { at: Some(a.min(b)) },
            (Some(_), None) => self,
            _ => other,
        }
    }

    /// time left before the deadline, None if it never expires.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        match self.at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Fails with [MigrateError::DeadlineExceeded] when the deadline has passed.
    pub fn check(&self, coll: &str, op: Operation) -> Result<()> {
        if self.is_expired() {
            return Err(MigrateError::DeadlineExceeded {
                coll: coll.to_string(),
                op,
            });
        }
        Ok(())
    }
}

/// Shared flag which tells concurrent collection migrations to stop.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    /// create a flag which is not raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// raise the flag, every clone sees it.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// whether the flag has been raised.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_deadline_is_expired() {
        let deadline = Deadline::after(Duration::from_secs(0));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Some(Duration::from_secs(0)));
        match deadline.check("users", Operation::Read) {
            Err(MigrateError::DeadlineExceeded { coll, op }) => {
                assert_eq!(coll, "users");
                assert_eq!(op, Operation::Read);
            }
            other => panic!("unexpected check result: {:?}", other),
        }
    }

    #[test]
    fn test_earliest() {
        let long = Deadline::after(Duration::from_secs(3600));
        let short = Deadline::after(Duration::from_secs(0));
        assert!(long.earliest(short).is_expired());
        assert!(short.earliest(long).is_expired());
        assert!(!long.earliest(long).is_expired());
    }

    #[test]
    fn test_overflowing_deadline_never_expires() {
        let never = Deadline::after(Duration::MAX);
        assert!(!never.is_expired());
        assert_eq!(never.remaining(), None);
        assert!(never.check("users", Operation::Write).is_ok());

        let short = Deadline::after(Duration::from_secs(0));
        assert!(never.earliest(short).is_expired());
    }

    #[test]
    fn test_abort_flag_is_shared() {
        let flag = AbortFlag::new();
        let cloned = flag.clone();
        assert!(!cloned.is_aborted());
        flag.abort();
        assert!(cloned.is_aborted());
    }
}
