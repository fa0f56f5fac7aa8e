//! # Critical-Section Resource Pause
//!
//! Each accept+handle cycle is short and latency-sensitive. Workers run a periodic
//! trimming pass that hands free heap pages back to the OS; that pass can take a while
//! on a fragmented heap, so it must not run in the middle of a cycle. A pass that comes
//! due while reclamation is paused is deferred and runs when the outermost pause ends,
//! i.e. between two cycles.
//!
//! The pause is an optimization only. Everything behaves identically with
//! [`NoopReclaimer`].
//!
//! ## Scoping
//!
//! [`PauseGuard`] resumes reclamation in `Drop`, so [`with_paused`] and [`paused`] resume
//! on every exit path: normal return, error return, a cancelled future, or unwinding.
//!
//! ```rust
//! use prefork_framework::pause::{with_paused, Reclaimer, ReclamationSwitch};
//!
//! let switch = ReclamationSwitch::new();
//! let seen = with_paused(&switch, || switch.is_paused());
//! assert!(seen);
//! assert!(!switch.is_paused());
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Interval between background trimming passes.
pub const TRIM_INTERVAL: Duration = Duration::from_secs(5);

/// A background memory-reclamation pass that can be suspended.
pub trait Reclaimer: Send + Sync + 'static {
    fn pause(&self);
    fn resume(&self);
    fn is_paused(&self) -> bool;
}

/// Reclamation toggle backed by a nesting counter.
///
/// Nested pauses are allowed; reclamation resumes when the outermost guard drops.
#[derive(Debug, Default)]
pub struct ReclamationSwitch {
    depth: AtomicUsize,
    deferred: AtomicBool,
    passes: AtomicUsize,
}

impl ReclamationSwitch {
    pub const fn new() -> Self {
        Self {
            depth: AtomicUsize::new(0),
            deferred: AtomicBool::new(false),
            passes: AtomicUsize::new(0),
        }
    }

    /// Runs a trimming pass now, or defers it to the next resume while paused.
    ///
    /// Returns whether the pass ran.
    pub fn request_pass(&self) -> bool {
        if self.is_paused() {
            self.deferred.store(true, Ordering::Release);
            return false;
        }
        self.run_pass();
        true
    }

    /// Number of trimming passes run so far.
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::Acquire)
    }

    fn run_pass(&self) {
        let released = release_free_memory();
        self.passes.fetch_add(1, Ordering::AcqRel);
        debug!(released, "Trim pass");
    }
}

impl Reclaimer for ReclamationSwitch {
    fn pause(&self) {
        self.depth.fetch_add(1, Ordering::AcqRel);
    }

    fn resume(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                depth.checked_sub(1)
            });
        if previous == Ok(1) && self.deferred.swap(false, Ordering::AcqRel) {
            self.run_pass();
        }
    }

    fn is_paused(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
    }
}

/// A reclaimer that never pauses anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReclaimer;

impl Reclaimer for NoopReclaimer {
    fn pause(&self) {}

    fn resume(&self) {}

    fn is_paused(&self) -> bool {
        false
    }
}

/// Keeps reclamation paused until dropped.
#[must_use = "reclamation resumes as soon as the guard is dropped"]
pub struct PauseGuard<'a> {
    reclaimer: &'a dyn Reclaimer,
}

impl<'a> PauseGuard<'a> {
    pub fn new(reclaimer: &'a dyn Reclaimer) -> Self {
        reclaimer.pause();
        Self { reclaimer }
    }
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.reclaimer.resume();
    }
}

/// Runs `work` with reclamation paused.
pub fn with_paused<R>(reclaimer: &dyn Reclaimer, work: impl FnOnce() -> R) -> R {
    let _guard = PauseGuard::new(reclaimer);
    work()
}

/// Awaits `work` with reclamation paused.
pub async fn paused<F: Future>(reclaimer: &dyn Reclaimer, work: F) -> F::Output {
    let _guard = PauseGuard::new(reclaimer);
    work.await
}

/// Spawns the periodic trimming pass on the current runtime.
pub fn spawn_trimmer(switch: Arc<ReclamationSwitch>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !switch.request_pass() {
                debug!("Trim deferred");
            }
        }
    })
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn release_free_memory() -> bool {
    // SAFETY: malloc_trim only walks allocator arenas and has no preconditions.
    unsafe { nix::libc::malloc_trim(0) != 0 }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn release_free_memory() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_resumes_after_error() {
        let switch = ReclamationSwitch::new();
        let result: Result<(), &str> = with_paused(&switch, || {
            assert!(switch.is_paused());
            Err("handler failed")
        });
        assert!(result.is_err());
        assert!(!switch.is_paused());
    }

    #[test]
    fn test_resumes_after_panic() {
        let switch = ReclamationSwitch::new();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            with_paused(&switch, || panic!("handler blew up"))
        }));
        assert!(outcome.is_err());
        assert!(!switch.is_paused());
    }

    #[test]
    fn test_nested_pauses() {
        let switch = ReclamationSwitch::new();
        with_paused(&switch, || {
            with_paused(&switch, || assert!(switch.is_paused()));
            assert!(switch.is_paused());
        });
        assert!(!switch.is_paused());
    }

    #[test]
    fn test_unbalanced_resume_saturates() {
        let switch = ReclamationSwitch::new();
        switch.resume();
        assert!(!switch.is_paused());
        let _guard = PauseGuard::new(&switch);
        assert!(switch.is_paused());
    }

    #[tokio::test]
    async fn test_resumes_when_future_is_cancelled() {
        let switch = ReclamationSwitch::new();
        let pending = paused(&switch, std::future::pending::<()>());
        let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;
        assert!(timed_out.is_err());
        assert!(!switch.is_paused());
    }

    #[tokio::test]
    async fn test_noop_reclaimer_is_never_paused() {
        let value = paused(&NoopReclaimer, async {
            assert!(!NoopReclaimer.is_paused());
            7
        })
        .await;
        assert_eq!(value, 7);
    }

    #[test]
    fn test_deferred_pass_runs_on_outermost_resume() {
        let switch = ReclamationSwitch::new();
        assert!(switch.request_pass());
        assert_eq!(switch.passes(), 1);

        with_paused(&switch, || {
            with_paused(&switch, || assert!(!switch.request_pass()));
            // Still paused by the outer scope.
            assert_eq!(switch.passes(), 1);
        });
        assert_eq!(switch.passes(), 2);

        // Nothing deferred, nothing runs on resume.
        with_paused(&switch, || ());
        assert_eq!(switch.passes(), 2);
    }

    #[tokio::test]
    async fn test_trimmer_runs_and_stops() {
        let switch = Arc::new(ReclamationSwitch::new());
        let trimmer = spawn_trimmer(Arc::clone(&switch), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(switch.passes() >= 1);

        trimmer.abort();
        assert!(trimmer.await.unwrap_err().is_cancelled());
    }
}
