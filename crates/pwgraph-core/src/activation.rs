//! Node activation records (spec §4.8 "Activation & scheduler").
//!
//! An [`Activation`] is the per-node shared-memory record the scheduler
//! and the node's own processing both touch every cycle: a driver arms its
//! followers by writing `pending = required`, each completed dependency
//! decrements `pending` with `fetch_sub`, and a follower is triggered the
//! instant its counter reaches zero.
//!
//! `state` is double-buffered by cycle parity (spec §3/§4.8): `state[0]`
//! and `state[1]` each hold a full `{pending, required}` pair, one per
//! parity of the driver's cycle counter. A stuck node's cycle N keeps
//! draining `state[0]` — any late cross-loop completion for it still lands
//! there — while the driver arms cycle N+1 into `state[1]` without
//! waiting, so a slow follower delays only its own dependents, not the
//! next cycle's arm (spec scenario S3, xrun detection). The scheduler
//! tracks the current parity and threads it through every call here;
//! `required` itself is not a per-cycle quantity (it reflects topology,
//! bumped by [`Activation::set_required`] on link activate/deactivate) so
//! it is kept identical in both slots rather than duplicated
//! independently.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

/// One parity's `{pending, required}` pair (spec §3/§4.8 `state[2]`).
#[derive(Debug, Default)]
struct Slot {
    pending: AtomicI32,
    required: AtomicI32,
}

/// Lifecycle status of a node within one cycle (spec §4.8).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Node is not part of any running graph.
    Inactive = 0,
    /// Armed for this cycle, waiting on dependencies.
    NotTriggered = 1,
    /// `pending` reached zero; queued to run.
    Triggered = 2,
    /// Currently executing `process`.
    Awake = 3,
    /// `process` returned for this cycle.
    Finished = 4,
}

impl NodeStatus {
    const fn from_i32(v: i32) -> Self {
        match v {
            1 => Self::NotTriggered,
            2 => Self::Triggered,
            3 => Self::Awake,
            4 => Self::Finished,
            _ => Self::Inactive,
        }
    }
}

/// The shared-memory activation record for one graph node (spec §4.8).
///
/// Lives in a [`crate::pool::Mapping`] in the real deployment; atomics
/// mean no lock is needed even though a driver thread and the node's own
/// data-loop thread both touch it. `status` and the counters are `Send +
/// Sync` by construction.
#[derive(Debug, Default)]
pub struct Activation {
    state: [Slot; 2],
    status: AtomicI32,
    signal_time: AtomicU64,
    awake_time: AtomicU64,
    finish_time: AtomicU64,
    xrun_count: AtomicU32,
    xrun_time: AtomicU64,
    xrun_delay: AtomicU64,
    version: AtomicU32,
}

impl Activation {
    /// A fresh, inactive record with `required = 0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the number of dependencies this node waits on before it
    /// is triggered. Changing this bumps [`Activation::version`] so
    /// drivers mid-cycle can detect a topology change landed underneath
    /// them (spec §4.8 "recalculation"). Written into both parity slots:
    /// `required` is a topology fact, not a per-cycle one, so the value
    /// the next cycle arms with and the value the current cycle's
    /// diagnostics read back agree.
    pub fn set_required(&self, required: i32) {
        for slot in &self.state {
            slot.required.store(required, Ordering::Release);
        }
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Current configured dependency count.
    #[must_use]
    pub fn required(&self) -> i32 {
        self.state[0].required.load(Ordering::Acquire)
    }

    /// Current countdown value for cycle parity `parity` (`parity & 1`
    /// selects the slot).
    #[must_use]
    pub fn pending(&self, parity: usize) -> i32 {
        self.state[parity & 1].pending.load(Ordering::Acquire)
    }

    /// Arm the node for the cycle at parity `parity`: `pending =
    /// required` in that slot, `status = NotTriggered` (or `Triggered` if
    /// `required == 0`, e.g. a driver or a source node with no active
    /// inputs). The other slot, still holding the previous cycle's
    /// countdown, is untouched — a cycle that hasn't finished draining
    /// keeps its own counter (spec scenario S3).
    pub fn arm(&self, parity: usize) {
        let slot = &self.state[parity & 1];
        let required = slot.required.load(Ordering::Acquire);
        slot.pending.store(required, Ordering::Release);
        let status = if required <= 0 {
            NodeStatus::Triggered
        } else {
            NodeStatus::NotTriggered
        };
        self.status.store(status as i32, Ordering::Release);
    }

    /// Record that one dependency completed for cycle parity `parity`.
    /// Returns `true` if this call brought that slot's `pending` to
    /// exactly zero, meaning the caller must trigger this node now (spec
    /// §4.8 "fetch_sub dance").
    ///
    /// Uses `fetch_sub` so concurrent completions from multiple upstream
    /// threads race safely; each sees a distinct pre-decrement value and
    /// only one observes the zero crossing. A late completion for a
    /// previous cycle (a slow cross-loop peer finishing after the driver
    /// already armed the next cycle) still targets its own parity's slot
    /// and can't corrupt the next cycle's countdown.
    pub fn complete_dependency(&self, parity: usize) -> bool {
        let prev = self.state[parity & 1].pending.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            self.status
                .store(NodeStatus::Triggered as i32, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Mark the node awake (about to call `process`), recording
    /// `now_nsec` as `signal_time`.
    pub fn set_awake(&self, now_nsec: u64) {
        self.signal_time.store(now_nsec, Ordering::Release);
        self.status
            .store(NodeStatus::Awake as i32, Ordering::Release);
        self.awake_time.store(now_nsec, Ordering::Release);
    }

    /// Mark the node finished for this cycle, recording `now_nsec` as
    /// `finish_time`.
    pub fn set_finished(&self, now_nsec: u64) {
        self.finish_time.store(now_nsec, Ordering::Release);
        self.status
            .store(NodeStatus::Finished as i32, Ordering::Release);
    }

    /// Deactivate: no future cycle will arm this node until reconfigured.
    pub fn set_inactive(&self) {
        self.status
            .store(NodeStatus::Inactive as i32, Ordering::Release);
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_i32(self.status.load(Ordering::Acquire))
    }

    /// Timestamp this node was signaled (armed and triggered) this cycle.
    #[must_use]
    pub fn signal_time(&self) -> u64 {
        self.signal_time.load(Ordering::Acquire)
    }

    /// Timestamp `process` began.
    #[must_use]
    pub fn awake_time(&self) -> u64 {
        self.awake_time.load(Ordering::Acquire)
    }

    /// Timestamp `process` returned.
    #[must_use]
    pub fn finish_time(&self) -> u64 {
        self.finish_time.load(Ordering::Acquire)
    }

    /// `finish_time - awake_time`, the node's measured processing
    /// duration for the last cycle it ran, or `0` if it hasn't finished.
    #[must_use]
    pub fn last_duration_nsec(&self) -> u64 {
        self.finish_time().saturating_sub(self.awake_time())
    }

    /// Record a cycle deadline miss (spec §4.8/§8 "xrun"): bumps the
    /// counter and records when and by how much.
    pub fn record_xrun(&self, now_nsec: u64, delay_nsec: u64) {
        self.xrun_count.fetch_add(1, Ordering::AcqRel);
        self.xrun_time.store(now_nsec, Ordering::Release);
        self.xrun_delay.store(delay_nsec, Ordering::Release);
    }

    /// Total xruns recorded since this record was created.
    #[must_use]
    pub fn xrun_count(&self) -> u32 {
        self.xrun_count.load(Ordering::Acquire)
    }

    /// Timestamp of the most recent xrun, `0` if none yet.
    #[must_use]
    pub fn xrun_time(&self) -> u64 {
        self.xrun_time.load(Ordering::Acquire)
    }

    /// The delay that caused the most recent xrun.
    #[must_use]
    pub fn xrun_delay(&self) -> u64 {
        self.xrun_delay.load(Ordering::Acquire)
    }

    /// Version counter, bumped by every [`Activation::set_required`].
    /// Drivers snapshot this before a cycle and compare after to detect a
    /// topology change that raced the cycle (spec §4.8 "recalc_pending
    /// coalescing").
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_with_zero_required_is_immediately_triggered() {
        let a = Activation::new();
        a.set_required(0);
        a.arm(0);
        assert_eq!(a.status(), NodeStatus::Triggered);
        assert_eq!(a.pending(0), 0);
    }

    #[test]
    fn arm_with_required_waits_until_all_dependencies_complete() {
        let a = Activation::new();
        a.set_required(3);
        a.arm(0);
        assert_eq!(a.status(), NodeStatus::NotTriggered);
        assert!(!a.complete_dependency(0));
        assert!(!a.complete_dependency(0));
        assert_eq!(a.status(), NodeStatus::NotTriggered);
        assert!(a.complete_dependency(0));
        assert_eq!(a.status(), NodeStatus::Triggered);
    }

    #[test]
    fn awake_then_finished_records_timestamps_in_order() {
        let a = Activation::new();
        a.set_required(0);
        a.arm(0);
        a.set_awake(100);
        a.set_finished(150);
        assert_eq!(a.status(), NodeStatus::Finished);
        assert_eq!(a.last_duration_nsec(), 50);
    }

    #[test]
    fn cycle_n_plus_one_arms_in_state_1_while_state_0_still_drains() {
        // Spec scenario S3: a blocked node's cycle N keeps its pending
        // count in state[0]; the driver arms cycle N+1 into state[1]
        // without disturbing it, and a late completion for N still lands
        // in state[0] alone.
        let a = Activation::new();
        a.set_required(2);
        a.arm(0);
        assert_eq!(a.pending(0), 2);
        assert!(!a.complete_dependency(0));
        assert_eq!(a.pending(0), 1);

        // Cycle N is still stuck at pending(0) == 1 (an xrun gets
        // recorded for it elsewhere); the driver proceeds to arm N+1.
        a.arm(1);
        assert_eq!(a.pending(1), 2);
        assert_eq!(a.pending(0), 1, "state[0] must be untouched by arming state[1]");

        // A late fetch_sub for the stuck cycle N still targets state[0].
        assert!(a.complete_dependency(0));
        assert_eq!(a.pending(1), 2, "state[1] must be untouched by completing state[0]");
    }

    #[test]
    fn xrun_is_recorded_and_counted() {
        let a = Activation::new();
        assert_eq!(a.xrun_count(), 0);
        a.record_xrun(1000, 250);
        assert_eq!(a.xrun_count(), 1);
        assert_eq!(a.xrun_time(), 1000);
        assert_eq!(a.xrun_delay(), 250);
        a.record_xrun(2000, 50);
        assert_eq!(a.xrun_count(), 2);
    }

    #[test]
    fn set_required_bumps_version() {
        let a = Activation::new();
        let v0 = a.version();
        a.set_required(2);
        assert_eq!(a.version(), v0 + 1);
    }

    proptest::proptest! {
        #[test]
        fn complete_dependency_triggers_exactly_once(required in 1i32..64) {
            let a = Activation::new();
            a.set_required(required);
            a.arm(0);
            let mut triggers = 0;
            for _ in 0..required {
                if a.complete_dependency(0) {
                    triggers += 1;
                }
            }
            proptest::prop_assert_eq!(triggers, 1);
            proptest::prop_assert_eq!(a.status(), NodeStatus::Triggered);
        }
    }
}
