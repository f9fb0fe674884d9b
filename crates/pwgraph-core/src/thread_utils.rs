//! Thread-utils capability (spec §4.3): create/join a worker thread and
//! elevate it to real-time scheduling with a clamp-and-fallback policy.
//!
//! Grounded on `module-rt.c`'s `set_nice`/`set_rt_priority` dance: ask for
//! the requested `rtprio`, and if the kernel rejects it (no
//! `CAP_SYS_NICE`), clamp to `RLIMIT_RTPRIO`'s soft limit and retry once
//! before giving up and running at normal priority (spec SPEC_FULL.md
//! "RT priority clamp-and-fallback").

use nix::sys::resource::{getrlimit, setrlimit, Resource};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Requested real-time scheduling parameters for a worker thread (spec
/// §4.3).
#[derive(Debug, Clone, Copy)]
pub struct RtRequest {
    /// SCHED_FIFO priority, 1-99.
    pub priority: i32,
    /// `nice(2)` level applied before any RT elevation, matching
    /// `module-rt.c`'s "set nice level first, then try RT" order.
    pub nice_level: i32,
}

impl RtRequest {
    /// A request at `priority`, nice level 0.
    #[must_use]
    pub const fn new(priority: i32) -> Self {
        Self {
            priority,
            nice_level: 0,
        }
    }
}

/// Outcome of an RT elevation attempt (spec §4.3 "acquire_rt").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtOutcome {
    /// Got exactly the requested priority.
    Granted(i32),
    /// Kernel rejected the requested priority; re-requested and got this
    /// clamped value instead.
    Clamped(i32),
    /// RT scheduling was unavailable entirely; thread stays at normal
    /// scheduling.
    Fallback,
}

/// The range of `rtprio` values available to this process, as reported by
/// `RLIMIT_RTPRIO` (spec §4.3 "get_rt_range").
#[must_use]
pub fn rt_range() -> (i32, i32) {
    match getrlimit(Resource::RLIMIT_RTPRIO) {
        Ok((soft, _hard)) => (1, soft.min(i64::from(i32::MAX)) as i32),
        Err(_) => (0, 0),
    }
}

/// Attempt to elevate the *calling* thread to `SCHED_FIFO` at
/// `request.priority`, applying `request.nice_level` first.
///
/// Clamp-and-fallback policy: if `sched_setscheduler` fails with `EPERM`,
/// clamp the priority to `RLIMIT_RTPRIO`'s soft limit and retry once; if
/// that also fails (or the limit is `0`), fall back to ordinary
/// scheduling rather than propagating an error — a missing `CAP_SYS_NICE`
/// must never prevent a node from running, only from meeting its
/// deadline as reliably.
pub fn acquire_rt(request: RtRequest) -> RtOutcome {
    apply_nice(request.nice_level);

    match set_fifo_priority(request.priority) {
        Ok(()) => {
            info!(priority = request.priority, "acquired real-time priority");
            RtOutcome::Granted(request.priority)
        }
        Err(nix::errno::Errno::EPERM) => {
            let (_, max) = rt_range();
            if max <= 0 {
                warn!("no RLIMIT_RTPRIO headroom, running at normal priority");
                return RtOutcome::Fallback;
            }
            let clamped = request.priority.min(max);
            debug!(
                requested = request.priority,
                clamped, "clamping rtprio to RLIMIT_RTPRIO soft limit"
            );
            match set_fifo_priority(clamped) {
                Ok(()) => RtOutcome::Clamped(clamped),
                Err(e) => {
                    warn!(error = %e, "clamped rtprio request still rejected, falling back");
                    RtOutcome::Fallback
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "sched_setscheduler failed, falling back to normal scheduling");
            RtOutcome::Fallback
        }
    }
}

/// Drop back to normal (`SCHED_OTHER`) scheduling, e.g. when a driver
/// transitions to freewheel (spec SPEC_FULL.md "freewheel driver
/// fallback").
pub fn drop_rt() {
    // SAFETY: `sched_setscheduler(0, ...)` affects only the calling
    // thread's own scheduling policy; no pointers are dereferenced beyond
    // the stack-local `sched_param`.
    let param = libc::sched_param { sched_priority: 0 };
    let res = unsafe { libc::sched_setscheduler(0, libc::SCHED_OTHER, &param) };
    if res != 0 {
        debug!("sched_setscheduler(SCHED_OTHER) failed, thread may already be non-RT");
    }
}

fn set_fifo_priority(priority: i32) -> Result<(), nix::errno::Errno> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: as above, only the calling thread's scheduling policy is
    // affected.
    let res = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if res == 0 {
        Ok(())
    } else {
        Err(nix::errno::Errno::last())
    }
}

fn apply_nice(nice_level: i32) {
    if nice_level == 0 {
        return;
    }
    // SAFETY: `setpriority` with `PRIO_PROCESS, 0` affects the calling
    // thread's own process-wide nice value; no unsafe aliasing.
    let res = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice_level) };
    if res != 0 {
        debug!(nice_level, "setpriority failed, continuing at current nice level");
    }
}

/// Raise `RLIMIT_RTTIME`'s soft limit to `hard`, matching `module-rt.c`'s
/// practice of disabling the RT runtime watchdog while reconfiguring a
/// thread's scheduling policy, then restoring it.
///
/// # Errors
///
/// Propagates `getrlimit`/`setrlimit` failures.
pub fn with_rttime_disabled<R>(f: impl FnOnce() -> R) -> Result<R, nix::Error> {
    let (soft, hard) = getrlimit(Resource::RLIMIT_RTTIME)?;
    setrlimit(Resource::RLIMIT_RTTIME, hard, hard)?;
    let result = f();
    setrlimit(Resource::RLIMIT_RTTIME, soft, hard)?;
    Ok(result)
}

/// Trait wrapping thread creation + RT elevation so a
/// [`crate::data_loop::DataLoop`] doesn't depend on a concrete scheduling
/// backend (spec §4.3 "thread-utils capability").
pub trait ThreadUtils: Send + Sync {
    /// Spawn `f` as a named worker thread.
    fn create(&self, name: &str, f: Box<dyn FnOnce() + Send>) -> std::io::Result<JoinHandle<()>>;

    /// Attempt RT elevation for the calling thread (called from inside
    /// the spawned thread itself).
    fn acquire_rt(&self, request: RtRequest) -> RtOutcome;

    /// Drop the calling thread back to normal scheduling.
    fn drop_rt(&self);

    /// The `rtprio` range available to this process.
    fn rt_range(&self) -> (i32, i32);
}

/// The default, OS-backed [`ThreadUtils`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultThreadUtils;

impl ThreadUtils for DefaultThreadUtils {
    fn create(&self, name: &str, f: Box<dyn FnOnce() + Send>) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
    }

    fn acquire_rt(&self, request: RtRequest) -> RtOutcome {
        acquire_rt(request)
    }

    fn drop_rt(&self) {
        drop_rt();
    }

    fn rt_range(&self) -> (i32, i32) {
        rt_range()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rt_range_does_not_panic() {
        let (min, max) = rt_range();
        assert!(min <= max || max == 0);
    }

    #[test]
    fn default_thread_utils_spawns_and_joins() {
        let tu = DefaultThreadUtils;
        let handle = tu
            .create("pwgraph-test", Box::new(|| {}))
            .expect("spawn should succeed");
        handle.join().unwrap();
    }

    #[test]
    fn acquire_rt_never_panics_without_privilege() {
        // In CI/sandboxed environments this will almost always fall back;
        // the important invariant is that it never panics or hangs.
        let outcome = acquire_rt(RtRequest::new(10));
        match outcome {
            RtOutcome::Granted(_) | RtOutcome::Clamped(_) | RtOutcome::Fallback => {}
        }
        drop_rt();
    }
}
