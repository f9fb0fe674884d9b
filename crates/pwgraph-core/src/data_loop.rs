//! Data loop (spec §4.4): a real-time worker thread running its own
//! [`Loop`], used to host one or more driver/follower nodes on a
//! dedicated CPU away from the main loop.

use crate::event_loop::{Invoker, Loop};
use crate::thread_utils::{self, RtOutcome, RtRequest, ThreadUtils};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, warn};

/// Configuration for a [`DataLoop`] (spec §4.4).
#[derive(Debug, Clone)]
pub struct DataLoopConfig {
    /// Thread name, used for RT-elevation logging and debugging (`ps
    /// -eLo comm`).
    pub name: String,
    /// Requested real-time priority; `None` runs the loop at normal
    /// scheduling (used for freewheel/offline rendering, spec
    /// SPEC_FULL.md "freewheel driver fallback").
    pub rt_priority: Option<i32>,
    /// CPU core to pin this thread to, if any.
    pub affinity: Option<usize>,
}

impl DataLoopConfig {
    /// A loop named `name` requesting RT priority `priority`, no
    /// affinity.
    #[must_use]
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            rt_priority: Some(priority),
            affinity: None,
        }
    }

    /// A loop running at normal scheduling, for freewheel drivers (spec
    /// §4.10 "freewheel").
    #[must_use]
    pub fn freewheel(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rt_priority: None,
            affinity: None,
        }
    }
}

/// A real-time worker thread running a [`Loop`] (spec §4.4).
///
/// The `Loop` itself is confined to the spawned thread; [`DataLoop`]
/// exposes only `Send + Sync` handles (the [`Invoker`] and lifecycle
/// controls) to the rest of the engine, the same confinement pattern the
/// event-loop-on-its-own-thread idiom uses elsewhere in this codebase
/// (see [`crate::event_loop::Invoker`]'s own safety comment).
pub struct DataLoop {
    name: String,
    invoker: Invoker,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    rt_outcome: Arc<Mutex<Option<RtOutcome>>>,
}

impl DataLoop {
    /// Spawn the worker thread, create its `Loop`, and attempt RT
    /// elevation per `config`.
    ///
    /// # Errors
    ///
    /// Propagates [`std::io::Error`] if the `Loop`'s wake eventfd or the
    /// OS thread itself fails to create.
    pub fn spawn(
        config: DataLoopConfig,
        thread_utils: Arc<dyn ThreadUtils>,
        on_iterate: impl Fn(&mut Loop) + Send + 'static,
    ) -> std::io::Result<Self> {
        let mut inner_loop = Loop::new()?;
        let invoker = inner_loop.invoker();
        let running = Arc::new(AtomicBool::new(true));
        let running_worker = running.clone();
        let rt_outcome = Arc::new(Mutex::new(None));
        let rt_outcome_worker = rt_outcome.clone();
        let name = config.name.clone();

        let handle = thread_utils.create(
            &config.name,
            Box::new(move || {
                if let Some(priority) = config.rt_priority {
                    let outcome = thread_utils::acquire_rt(RtRequest::new(priority));
                    if matches!(outcome, RtOutcome::Fallback) {
                        warn!(thread = %config.name, "data loop running without real-time priority");
                    }
                    *rt_outcome_worker.lock().unwrap() = Some(outcome);
                } else {
                    *rt_outcome_worker.lock().unwrap() = Some(RtOutcome::Fallback);
                }

                if let Some(cpu) = config.affinity {
                    if let Err(e) = pin_to_cpu(cpu) {
                        warn!(cpu, error = %e, "failed to set data loop CPU affinity");
                    }
                }

                info!(thread = %config.name, "data loop started");
                while running_worker.load(Ordering::Acquire) {
                    on_iterate(&mut inner_loop);
                }
                info!(thread = %config.name, "data loop stopped");
            }),
        )?;

        Ok(Self {
            name,
            invoker,
            running,
            handle: Some(handle),
            rt_outcome,
        })
    }

    /// This loop's thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// An [`Invoker`] for scheduling work on this loop's thread.
    #[must_use]
    pub fn invoker(&self) -> Invoker {
        self.invoker.clone()
    }

    /// The outcome of the RT elevation attempt, once the thread has
    /// started. `None` if the thread hasn't reached that point yet.
    #[must_use]
    pub fn rt_outcome(&self) -> Option<RtOutcome> {
        *self.rt_outcome.lock().unwrap()
    }

    /// Signal the loop to stop after its current iteration and wake it so
    /// it notices promptly.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.invoker.wake();
    }

    /// Stop the loop and block until its thread has exited.
    ///
    /// # Errors
    ///
    /// Returns the thread's panic payload if it panicked.
    pub fn join(mut self) -> std::thread::Result<()> {
        self.stop();
        match self.handle.take() {
            Some(h) => h.join(),
            None => Ok(()),
        }
    }
}

impl Drop for DataLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
            if let Some(h) = self.handle.take() {
                let _ = h.join();
            }
        }
    }
}

fn pin_to_cpu(cpu: usize) -> nix::Result<()> {
    let mut set = nix::sched::CpuSet::new();
    set.set(cpu)?;
    nix::sched::sched_setaffinity(nix::unistd::Pid::from_raw(0), &set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_utils::DefaultThreadUtils;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    #[test]
    fn data_loop_runs_and_stops_cleanly() {
        let ticks = Arc::new(AtomicU64::new(0));
        let ticks_worker = ticks.clone();
        let loop_ = DataLoop::spawn(
            DataLoopConfig::freewheel("test-data-loop"),
            Arc::new(DefaultThreadUtils),
            move |l| {
                ticks_worker.fetch_add(1, Ordering::SeqCst);
                let _ = l.iterate(Some(5));
            },
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        loop_.stop();
        loop_.join().unwrap();
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn invoker_reaches_the_data_loop_thread() {
        let ran = Arc::new(AtomicBool::new(false));
        let loop_ = DataLoop::spawn(
            DataLoopConfig::freewheel("test-invoke-loop"),
            Arc::new(DefaultThreadUtils),
            move |l| {
                let _ = l.iterate(Some(10));
            },
        )
        .unwrap();

        let ran2 = ran.clone();
        loop_.invoker().invoke(move || ran2.store(true, Ordering::SeqCst));
        std::thread::sleep(Duration::from_millis(30));
        loop_.join().unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
