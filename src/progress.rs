use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};

use crate::error::NetworkError;

/// Cooperative cancellation plus fire-and-forget progress notification.
///
/// Long-running loops call [`Progress::check_for_cancel`] at least once per outer
/// iteration and unwind with its error. Progress counters never influence control flow.
pub trait Progress: Sync {
    fn check_for_cancel(&self) -> Result<()>;

    fn set_maximum_progress(&self, _max: usize) {}

    fn set_progress(&self, _value: usize) {}
}

/// Poll an optional progress handle.
#[inline]
pub fn check(progress: Option<&dyn Progress>) -> Result<()> {
    match progress {
        Some(p) => p.check_for_cancel(),
        None => Ok(()),
    }
}

#[inline]
pub(crate) fn report(progress: Option<&dyn Progress>, value: usize) {
    if let Some(p) = progress {
        p.set_progress(value);
    }
}

/// A thread-safe flag that can be flipped from another thread to stop a computation.
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
    progress: AtomicUsize,
    maximum: AtomicUsize,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> (usize, usize) {
        (
            self.progress.load(Ordering::Relaxed),
            self.maximum.load(Ordering::Relaxed),
        )
    }
}

impl Progress for CancelFlag {
    fn check_for_cancel(&self) -> Result<()> {
        if self.is_cancelled() {
            bail!(NetworkError::Cancelled);
        }
        Ok(())
    }

    fn set_maximum_progress(&self, max: usize) {
        self.maximum.store(max, Ordering::Relaxed);
    }

    fn set_progress(&self, value: usize) {
        self.progress.store(value, Ordering::Relaxed);
    }
}

/// Cancels after a fixed number of polls. Handy for exercising mid-run unwinding.
#[derive(Debug)]
pub struct CancelAfter {
    remaining: AtomicUsize,
}

impl CancelAfter {
    pub fn new(polls: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(polls),
        }
    }
}

impl Progress for CancelAfter {
    fn check_for_cancel(&self) -> Result<()> {
        let left = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| r.checked_sub(1));
        if left.is_err() {
            bail!(NetworkError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_cancelled;

    #[test]
    fn flag_cancels() {
        let flag = CancelFlag::new();
        assert!(check(Some(&flag)).is_ok());
        flag.cancel();
        let err = check(Some(&flag)).unwrap_err();
        assert!(is_cancelled(&err));
        assert!(check(None).is_ok());
    }

    #[test]
    fn cancel_after_counts_polls() {
        let p = CancelAfter::new(2);
        assert!(p.check_for_cancel().is_ok());
        assert!(p.check_for_cancel().is_ok());
        assert!(p.check_for_cancel().is_err());
    }

    #[test]
    fn progress_is_recorded() {
        let flag = CancelFlag::new();
        flag.set_maximum_progress(10);
        report(Some(&flag), 3);
        assert_eq!(flag.progress(), (3, 10));
    }
}
