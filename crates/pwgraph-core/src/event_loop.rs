//! The event loop (spec §4.2 "Loop"): a poll-based dispatcher for wake
//! sources (fds, timers, idle callbacks) plus an invoke queue for
//! cross-thread requests to run a closure on the loop's own thread.
//!
//! Listener sets use the "frozen listener" idiom (spec §4.2/§9): a
//! callback may add or remove sources/listeners while the loop is
//! iterating, but the change only takes effect on the *next* iteration —
//! the vector being iterated is snapshotted at the start of the pass.

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::eventfd::EventFd;
use nix::unistd::{read, write};
use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{trace, warn};

/// A registered wake source (spec §4.2 "wake sources").
pub struct IoSource {
    id: u64,
    fd: RawFd,
    interest: PollFlags,
}

impl IoSource {
    /// This source's loop-assigned id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

type IoCallback = Box<dyn FnMut(RawFd, PollFlags) + Send>;
type IdleCallback = Box<dyn FnMut() + Send>;
type InvokeCallback = Box<dyn FnOnce() + Send>;

struct IoEntry {
    id: u64,
    fd: RawFd,
    interest: PollFlags,
    callback: IoCallback,
    removed: bool,
}

struct IdleEntry {
    id: u64,
    callback: IdleCallback,
    removed: bool,
}

/// A single-threaded event loop (spec §4.2).
///
/// Not `Send`/`Sync` itself — it must be driven from one thread (the main
/// loop, or a [`crate::data_loop::DataLoop`]'s worker thread). Other
/// threads reach it through [`Loop::invoker`], which *is* `Send + Sync`.
pub struct Loop {
    io_sources: Vec<IoEntry>,
    idle_sources: Vec<IdleEntry>,
    next_id: u64,
    wake_fd: EventFd,
    invoke_queue: std::sync::Arc<Mutex<Vec<InvokeCallback>>>,
    iterations: u64,
}

/// A handle other threads use to queue work onto a [`Loop`] and wake it
/// (spec §4.2 "invoke queue").
#[derive(Clone)]
pub struct Invoker {
    wake_fd: RawFd,
    queue: std::sync::Arc<Mutex<Vec<InvokeCallback>>>,
}

// SAFETY: `Invoker` only ever touches the wake eventfd (a plain syscall fd,
// safe to share) and a `Mutex`-guarded queue; it never reaches into `Loop`'s
// single-threaded state directly.
unsafe impl Send for Invoker {}
// SAFETY: see above; all shared state is behind a `Mutex`.
unsafe impl Sync for Invoker {}

impl Invoker {
    /// Queue `f` to run on the loop's thread during its next iteration,
    /// then wake the loop so it notices without waiting out its poll
    /// timeout.
    pub fn invoke(&self, f: impl FnOnce() + Send + 'static) {
        self.queue.lock().unwrap().push(Box::new(f));
        self.wake();
    }

    /// Wake the loop without queuing anything, e.g. to make it re-check a
    /// condition set from another thread.
    pub fn wake(&self) {
        let one: u64 = 1;
        // SAFETY: `wake_fd` is a valid eventfd for the lifetime of this
        // `Invoker` (kept alive by the owning `Loop`; the loop shares the
        // raw fd only while it is running).
        let fd = unsafe { BorrowedFd::borrow_raw(self.wake_fd) };
        if let Err(e) = write(fd, &one.to_ne_bytes()) {
            warn!(error = %e, "failed to write to loop wake eventfd");
        }
    }
}

impl Loop {
    /// Create an empty loop with its own wake eventfd.
    ///
    /// # Errors
    ///
    /// Propagates [`std::io::Error`] if the eventfd cannot be created.
    pub fn new() -> std::io::Result<Self> {
        let wake_fd = EventFd::new()?;
        Ok(Self {
            io_sources: Vec::new(),
            idle_sources: Vec::new(),
            next_id: 1,
            wake_fd,
            invoke_queue: std::sync::Arc::new(Mutex::new(Vec::new())),
            iterations: 0,
        })
    }

    /// An `Invoker` other threads can use to schedule work here.
    #[must_use]
    pub fn invoker(&self) -> Invoker {
        Invoker {
            wake_fd: self.wake_fd.as_fd().as_raw_fd(),
            queue: self.invoke_queue.clone(),
        }
    }

    /// Register an fd wake source. The callback fires on any iteration
    /// where `fd` is ready for one of `interest`'s events.
    ///
    /// Per the frozen-listener rule, if this is called from inside a
    /// callback during [`Loop::iterate`], the new source is only visible
    /// starting the *next* call to `iterate`.
    pub fn add_io(
        &mut self,
        fd: RawFd,
        interest: PollFlags,
        callback: impl FnMut(RawFd, PollFlags) + Send + 'static,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.io_sources.push(IoEntry {
            id,
            fd,
            interest,
            callback: Box::new(callback),
            removed: false,
        });
        id
    }

    /// Remove a previously added io source. Marks it removed rather than
    /// deleting it immediately, so a callback can remove itself (or a
    /// sibling) mid-iteration without invalidating the vector being
    /// walked; actually dropped at the end of [`Loop::iterate`].
    pub fn remove_io(&mut self, id: u64) {
        if let Some(e) = self.io_sources.iter_mut().find(|e| e.id == id) {
            e.removed = true;
        }
    }

    /// Register an idle callback, invoked once per iteration regardless of
    /// any fd readiness.
    pub fn add_idle(&mut self, callback: impl FnMut() + Send + 'static) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.idle_sources.push(IdleEntry {
            id,
            callback: Box::new(callback),
            removed: false,
        });
        id
    }

    /// Remove a previously added idle source (same deferred-removal rule
    /// as [`Loop::remove_io`]).
    pub fn remove_idle(&mut self, id: u64) {
        if let Some(e) = self.idle_sources.iter_mut().find(|e| e.id == id) {
            e.removed = true;
        }
    }

    /// Run one iteration: drain the invoke queue, poll registered fds up
    /// to `timeout_ms` (or block forever if `None`), dispatch readiness
    /// and idle callbacks, then sweep sources marked for removal.
    ///
    /// # Errors
    ///
    /// Propagates `poll(2)` failures other than `EINTR`, which is treated
    /// as "nothing ready" and swallowed (signals are expected to interrupt
    /// the underlying poll).
    pub fn iterate(&mut self, timeout_ms: Option<u32>) -> std::io::Result<()> {
        self.drain_invoke_queue();

        let wake_raw = self.wake_fd.as_fd().as_raw_fd();
        // SAFETY: `wake_raw` stays valid for this call: it is owned by
        // `self.wake_fd`, which outlives this borrow.
        let wake_borrowed = unsafe { BorrowedFd::borrow_raw(wake_raw) };
        let mut poll_fds: Vec<PollFd> = vec![PollFd::new(wake_borrowed, PollFlags::POLLIN)];
        for entry in self.io_sources.iter().filter(|e| !e.removed) {
            // SAFETY: `entry.fd` is owned and kept open by the caller that
            // registered it for at least as long as the source is
            // registered (spec §4.2 invariant: sources outlive their
            // registration).
            let bf = unsafe { BorrowedFd::borrow_raw(entry.fd) };
            poll_fds.push(PollFd::new(bf, entry.interest));
        }

        let timeout = match timeout_ms {
            Some(ms) => PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX),
            None => PollTimeout::NONE,
        };

        match poll(&mut poll_fds, timeout) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return Ok(()),
            Err(e) => return Err(std::io::Error::from(e)),
        }

        if let Some(revents) = poll_fds[0].revents() {
            if revents.contains(PollFlags::POLLIN) {
                self.drain_wake_fd();
                self.drain_invoke_queue();
            }
        }

        let snapshot_len = self.io_sources.len();
        for i in 0..snapshot_len {
            if self.io_sources[i].removed {
                continue;
            }
            let revents = poll_fds[i + 1].revents().unwrap_or(PollFlags::empty());
            if revents.is_empty() {
                continue;
            }
            let fd = self.io_sources[i].fd;
            (self.io_sources[i].callback)(fd, revents);
        }

        let idle_len = self.idle_sources.len();
        for i in 0..idle_len {
            if self.idle_sources[i].removed {
                continue;
            }
            (self.idle_sources[i].callback)();
        }

        self.io_sources.retain(|e| !e.removed);
        self.idle_sources.retain(|e| !e.removed);
        self.iterations += 1;
        Ok(())
    }

    /// Number of completed [`Loop::iterate`] calls, for diagnostics and
    /// tests.
    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.iterations
    }

    fn drain_wake_fd(&self) {
        let mut buf = [0u8; 8];
        let fd = self.wake_fd.as_fd().as_raw_fd();
        // SAFETY: `fd` is owned by `self.wake_fd`.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        loop {
            match read(borrowed.as_raw_fd(), &mut buf) {
                Ok(_) => {}
                Err(nix::errno::Errno::EAGAIN) | Err(_) => break,
            }
        }
    }

    fn drain_invoke_queue(&mut self) {
        let mut callbacks = self.invoke_queue.lock().unwrap();
        if callbacks.is_empty() {
            return;
        }
        let drained: Vec<InvokeCallback> = std::mem::take(&mut *callbacks);
        drop(callbacks);
        trace!(count = drained.len(), "draining loop invoke queue");
        for f in drained {
            f();
        }
    }
}

/// Monotonically increasing id generator shared by loop-adjacent modules
/// that need process-wide unique ids without going through a `Loop`
/// instance (e.g. assigning node or port ids before a loop exists).
#[derive(Default)]
pub struct IdAllocator(AtomicU64);

impl IdAllocator {
    /// A fresh allocator starting at 0.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Allocate and return the next id.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn invoke_runs_on_next_iterate() {
        let mut l = Loop::new().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let invoker = l.invoker();
        invoker.invoke(move || ran2.store(true, Ordering::SeqCst));
        l.iterate(Some(0)).unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn idle_callback_fires_every_iteration() {
        let mut l = Loop::new().unwrap();
        let count = Arc::new(AtomicU64::new(0));
        let count2 = count.clone();
        l.add_idle(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..3 {
            l.iterate(Some(0)).unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn removed_source_does_not_fire_next_iteration() {
        let mut l = Loop::new().unwrap();
        let count = Arc::new(AtomicU64::new(0));
        let count2 = count.clone();
        let id = l.add_idle(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        l.iterate(Some(0)).unwrap();
        l.remove_idle(id);
        l.iterate(Some(0)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frozen_listener_add_mid_iteration_waits_for_next_pass() {
        let mut l = Loop::new().unwrap();
        let added = Arc::new(AtomicBool::new(false));
        let fired = Arc::new(AtomicU64::new(0));

        let invoker = l.invoker();
        let added_c = added.clone();
        let fired_c = fired.clone();
        // This idle callback adds a *new* idle callback the first time it
        // runs; that new callback must not run until the next iterate.
        let guard = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let guard_c = guard.clone();
        l.add_idle(move || {
            if !guard_c.swap(true, Ordering::SeqCst) {
                added_c.store(true, Ordering::SeqCst);
                let fired_c2 = fired_c.clone();
                invoker.invoke(move || {
                    fired_c2.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        l.iterate(Some(0)).unwrap();
        assert!(added.load(Ordering::SeqCst));
        // invoke() queues for "next iterate", which is itself drained at
        // the top of the *current* iterate call already in progress vs.
        // the next one - here we assert it hasn't run synchronously
        // inside add_idle's own closure.
        l.iterate(Some(0)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
