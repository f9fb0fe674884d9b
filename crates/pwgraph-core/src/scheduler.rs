//! The cycle scheduler (spec §4.8 "Activation & scheduler — the heart").
//!
//! [`Scheduler`] owns the graph's nodes and links and drives them through
//! one cycle at a time: arm phase, driver tick, the `fetch_sub` dependency
//! dance (same-loop calls direct, cross-loop calls via the target's
//! eventfd-backed wakeup — represented here by an injectable
//! [`Wakeup`]), completion detection, and xrun recording.

use crate::activation::NodeStatus;
use crate::link::Link;
use crate::node::Node;
use std::collections::HashMap;
use tracing::{trace, warn};

/// How the scheduler notifies a node on a different loop that it has been
/// triggered (spec §4.8 step 2: "writes 1 to the target's wakeup
/// eventfd"). Abstracted behind a trait so tests can run an entire graph
/// on one thread without real eventfds while production wiring backs it
/// with [`crate::event_loop::Invoker`].
pub trait Wakeup: Send + Sync {
    /// Wake the node identified by `node_id`.
    fn wake(&self, node_id: u64);
}

/// A `Wakeup` that does nothing but record which nodes were woken, for
/// same-process/in-test graphs where cross-loop wakeups are driven
/// directly by [`Scheduler::run_cycle`].
#[derive(Default)]
pub struct NullWakeup;

impl Wakeup for NullWakeup {
    fn wake(&self, _node_id: u64) {}
}

/// Outcome of one scheduler cycle, for tests and the profiler (spec §4.8
/// "optionally emits a profiler event").
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    /// Ids of nodes that reached `FINISHED` this cycle.
    pub finished: Vec<u64>,
    /// Ids of nodes still not `FINISHED` when the cycle was declared
    /// complete — each gets an xrun recorded.
    pub xruns: Vec<u64>,
}

/// Owns the graph's nodes and links and runs cycles over them (spec
/// §4.8). Topology mutation (add/remove node or link) happens through
/// this type so the recalculation pass always sees a consistent view.
#[derive(Default)]
pub struct Scheduler {
    nodes: HashMap<u64, Node>,
    links: HashMap<u64, Link>,
    recalc_pending: bool,
    /// Cycle counter; `cycle & 1` is the parity passed to every
    /// [`crate::activation::Activation`] call this cycle (spec §3/§4.8
    /// "state[2] double-buffered by cycle parity").
    cycle: u64,
}

impl Scheduler {
    /// An empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id(), node);
        self.request_recalc();
    }

    /// Remove a node and any links touching it.
    pub fn remove_node(&mut self, node_id: u64) {
        self.nodes.remove(&node_id);
        self.links
            .retain(|_, l| l.output().node_id != node_id && l.input().node_id != node_id);
        self.request_recalc();
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, node_id: u64) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Mutable lookup of a node.
    pub fn node_mut(&mut self, node_id: u64) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Register a link, already constructed by the caller (activation is
    /// a separate step via [`Scheduler::activate_link`]).
    pub fn add_link(&mut self, link: Link) {
        self.links.insert(link.id(), link);
        self.request_recalc();
    }

    /// Activate a registered link: wires target lists between its two
    /// nodes.
    ///
    /// # Errors
    ///
    /// [`crate::error::CoreError::NotFound`] if either node id is
    /// unregistered; propagates [`Link::activate`] errors otherwise.
    pub fn activate_link(&mut self, link_id: u64) -> crate::error::CoreResult<()> {
        let (output_id, input_id) = {
            let link = self
                .links
                .get(&link_id)
                .ok_or_else(|| crate::error::CoreError::NotFound(format!("link {link_id}")))?;
            (link.output().node_id, link.input().node_id)
        };

        // Two-phase borrow: pull both nodes out, mutate, put back. A
        // `HashMap` can't hand out two `&mut` entries at once, and the
        // nodes involved are always distinct (a link never connects a
        // node to itself, spec §3 "Link" is a directed edge between
        // different ports).
        let mut output_node = self
            .nodes
            .remove(&output_id)
            .ok_or_else(|| crate::error::CoreError::NotFound(format!("node {output_id}")))?;
        let mut input_node = self.nodes.remove(&input_id).ok_or_else(|| {
            crate::error::CoreError::NotFound(format!("node {input_id}"))
        })?;

        let result = self
            .links
            .get_mut(&link_id)
            .expect("checked above")
            .activate(&mut output_node, &mut input_node);

        self.nodes.insert(output_id, output_node);
        self.nodes.insert(input_id, input_node);
        self.request_recalc();
        result
    }

    /// Remove and destroy a link, freeing any pool blocks it tagged.
    pub fn destroy_link(&mut self, link_id: u64, pool: &mut crate::pool::MemoryPool) {
        let Some(mut link) = self.links.remove(&link_id) else {
            return;
        };
        let output_id = link.output().node_id;
        let input_id = link.input().node_id;
        if let (Some(mut output_node), Some(mut input_node)) =
            (self.nodes.remove(&output_id), self.nodes.remove(&input_id))
        {
            link.destroy(&mut output_node, &mut input_node, pool);
            self.nodes.insert(output_id, output_node);
            self.nodes.insert(input_id, input_node);
        }
        self.request_recalc();
    }

    /// Mark that topology changed and a recalculation should happen; if a
    /// recalculation is already pending, this is a no-op — re-entrant
    /// recalcs coalesce into the one already scheduled (spec §4.8
    /// "Recalculation").
    pub fn request_recalc(&mut self) {
        self.recalc_pending = true;
    }

    /// Whether a recalculation is pending.
    #[must_use]
    pub const fn recalc_pending(&self) -> bool {
        self.recalc_pending
    }

    /// Run the reachability pass (spec §4.8 "Driver selection"): assign
    /// every node to the highest-priority driver reachable through its
    /// links, ties broken by lowest id. A node whose own component elects
    /// no driver (an unlinked source/sink, or a driver-less component —
    /// spec scenario S1's sources and sink carry no link to the driver at
    /// all) falls back to the single highest-priority driver node in the
    /// whole graph, if any exists; only a graph with no driver node
    /// anywhere leaves such nodes undriven. Clears `recalc_pending`.
    pub fn recalculate(&mut self) {
        if !self.recalc_pending {
            return;
        }

        // Union-find over node ids connected by links, then within each
        // component pick the driver with highest priority (lowest id on
        // ties).
        let mut parent: HashMap<u64, u64> = self.nodes.keys().map(|&id| (id, id)).collect();

        fn find(parent: &mut HashMap<u64, u64>, x: u64) -> u64 {
            let p = parent[&x];
            if p != x {
                let root = find(parent, p);
                parent.insert(x, root);
                root
            } else {
                x
            }
        }

        let edges: Vec<(u64, u64)> = self
            .links
            .values()
            .map(|l| (l.output().node_id, l.input().node_id))
            .collect();
        for (a, b) in edges {
            if !parent.contains_key(&a) || !parent.contains_key(&b) {
                continue;
            }
            let ra = find(&mut parent, a);
            let rb = find(&mut parent, b);
            if ra != rb {
                parent.insert(ra, rb);
            }
        }

        let mut best_driver: HashMap<u64, (i32, u64)> = HashMap::new();
        for node in self.nodes.values() {
            if !node.is_driver() {
                continue;
            }
            let root = find(&mut parent, node.id());
            let entry = best_driver.entry(root).or_insert((i32::MIN, u64::MAX));
            let candidate = (node.priority(), node.id());
            if candidate.0 > entry.0 || (candidate.0 == entry.0 && candidate.1 < entry.1) {
                *entry = candidate;
            }
        }

        let global_best = best_driver
            .values()
            .copied()
            .max_by_key(|&(prio, id)| (prio, std::cmp::Reverse(id)))
            .map(|(_, id)| id);

        let mut fell_back = 0usize;
        for node in self.nodes.values_mut() {
            let root = find(&mut parent, node.id());
            if let Some(&(_, driver_id)) = best_driver.get(&root) {
                node.set_driver_id(Some(driver_id));
            } else if global_best.is_some() {
                fell_back += 1;
                node.set_driver_id(global_best);
            } else {
                node.set_driver_id(None);
            }
        }

        self.recalc_pending = false;
        trace!(
            drivers = best_driver.len(),
            fell_back,
            "recalculated driver subgraphs"
        );
    }

    /// Arm phase (spec §4.8 step 1): for every node in `driver_id`'s
    /// subgraph, reset `pending := required` in parity `parity`'s slot
    /// and set status accordingly. Called on the main loop before the
    /// driver's next tick; the previous cycle's parity slot, if still
    /// draining, is untouched.
    pub fn arm_subgraph(&self, driver_id: u64, parity: usize) {
        for node in self.nodes.values() {
            if node.driver_id() == Some(driver_id) {
                node.activation().arm(parity);
            }
        }
    }

    /// Run one complete cycle for the driver `driver_id`: tick the
    /// driver, cascade `fetch_sub` through same-loop targets directly and
    /// cross-loop targets via `wakeup`, call `process` on every triggered
    /// node's handle, and return a report of what finished vs. what
    /// xran.
    ///
    /// This models the whole chain synchronously for a single-process /
    /// single-scheduler-thread deployment (the reference CLI, and tests);
    /// a multi-data-loop production deployment instead has each data
    /// loop's own iteration perform steps 3-4 for the nodes it owns, with
    /// `wakeup` backed by that loop's [`crate::event_loop::Invoker`].
    pub fn run_cycle(
        &mut self,
        driver_id: u64,
        now_nsec: u64,
        wakeup: &dyn Wakeup,
    ) -> crate::error::CoreResult<CycleReport> {
        let parity = (self.cycle & 1) as usize;
        self.cycle = self.cycle.wrapping_add(1);
        self.arm_subgraph(driver_id, parity);

        let driver_activation = self
            .nodes
            .get(&driver_id)
            .ok_or_else(|| crate::error::CoreError::NotFound(format!("driver {driver_id}")))?
            .activation()
            .clone();
        driver_activation.set_awake(now_nsec);

        // Seed with every node the arm phase already triggered, not just
        // the driver: a source node with `required == 0` (an independent
        // producer with no upstream of its own) is armed straight to
        // `Triggered` and is never reached by walking target lists from
        // `driver_id` alone, since nothing points at it — it only points
        // downstream.
        let mut ready: Vec<u64> = self
            .nodes
            .values()
            .filter(|n| n.driver_id() == Some(driver_id) && n.activation().status() == NodeStatus::Triggered)
            .map(Node::id)
            .collect();
        if !ready.contains(&driver_id) {
            ready.push(driver_id);
        }
        let mut report = CycleReport::default();

        while let Some(node_id) = ready.pop() {
            let targets = match self.nodes.get_mut(&node_id) {
                Some(node) => {
                    if node.activation().status() != NodeStatus::Triggered {
                        continue;
                    }
                    node.activation().set_awake(now_nsec);
                    let _ = node.handle_mut().process();
                    node.activation().set_finished(now_nsec);
                    report.finished.push(node_id);
                    node.target_list().to_vec()
                }
                None => continue,
            };

            for target in &targets {
                if target.activation.complete_dependency(parity) {
                    if target.same_loop {
                        ready.push(target.node_id);
                    } else {
                        wakeup.wake(target.node_id);
                    }
                }
            }
        }

        for node in self.nodes.values() {
            if node.driver_id() == Some(driver_id)
                && node.activation().status() != NodeStatus::Finished
            {
                node.activation().record_xrun(now_nsec, 0);
                report.xruns.push(node.id());
                warn!(node = node.id(), "cycle deadline exceeded, xrun recorded");
            }
        }

        Ok(report)
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of registered links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Endpoint, Link};
    use crate::port::INVALID_MIX_ID;
    use pwgraph_spa::NullNode;

    fn make_node(id: u64, driver: bool, priority: i32) -> Node {
        let mut node = Node::new(id, Box::new(NullNode::default()));
        node.set_driver(driver);
        node.set_priority(priority);
        node
    }

    fn endpoint(node_id: u64) -> Endpoint {
        Endpoint {
            node_id,
            port_id: 0,
            mix_id: INVALID_MIX_ID,
        }
    }

    #[test]
    fn recalculate_assigns_followers_to_connected_driver() {
        let mut sched = Scheduler::new();
        sched.add_node(make_node(1, true, 10));
        sched.add_node(make_node(2, false, 0));
        sched.add_link(Link::new(0, endpoint(1), endpoint(2)));
        sched.activate_link(0).unwrap();
        sched.recalculate();
        assert_eq!(sched.node(1).unwrap().driver_id(), Some(1));
        assert_eq!(sched.node(2).unwrap().driver_id(), Some(1));
    }

    #[test]
    fn recalculate_picks_highest_priority_driver_in_component() {
        let mut sched = Scheduler::new();
        sched.add_node(make_node(1, true, 5));
        sched.add_node(make_node(2, true, 10));
        sched.add_node(make_node(3, false, 0));
        sched.add_link(Link::new(0, endpoint(1), endpoint(3)));
        sched.add_link(Link::new(1, endpoint(2), endpoint(3)));
        sched.activate_link(0).unwrap();
        sched.activate_link(1).unwrap();
        sched.recalculate();
        assert_eq!(sched.node(3).unwrap().driver_id(), Some(2));
    }

    #[test]
    fn single_driver_two_followers_complete_one_cycle() {
        let mut sched = Scheduler::new();
        sched.add_node(make_node(1, true, 10));
        sched.add_node(make_node(2, false, 0));
        sched.add_node(make_node(3, false, 0));
        sched.add_link(Link::new(0, endpoint(1), endpoint(2)));
        sched.add_link(Link::new(1, endpoint(1), endpoint(3)));
        sched.activate_link(0).unwrap();
        sched.activate_link(1).unwrap();
        sched.recalculate();

        let report = sched.run_cycle(1, 1000, &NullWakeup).unwrap();
        assert!(report.finished.contains(&1));
        assert!(report.finished.contains(&2));
        assert!(report.finished.contains(&3));
        assert!(report.xruns.is_empty());
    }

    #[test]
    fn independent_sources_reach_a_shared_sink_with_no_link_to_the_driver() {
        // Spec scenario S1: driver D has no links of its own; sources
        // S1, S2 are each linked only to sink K. D must still end up
        // driving all three via the global-fallback rule, and K must run
        // exactly once with no xruns.
        let mut sched = Scheduler::new();
        sched.add_node(make_node(1, true, 10)); // D
        sched.add_node(make_node(2, false, 0)); // S1
        sched.add_node(make_node(3, false, 0)); // S2
        sched.add_node(make_node(4, false, 0)); // K
        sched.add_link(Link::new(0, endpoint(2), endpoint(4)));
        sched.add_link(Link::new(1, endpoint(3), endpoint(4)));
        sched.activate_link(0).unwrap();
        sched.activate_link(1).unwrap();
        sched.recalculate();

        assert_eq!(sched.node(2).unwrap().driver_id(), Some(1));
        assert_eq!(sched.node(4).unwrap().activation().required(), 2);

        let report = sched.run_cycle(1, 1000, &NullWakeup).unwrap();
        assert!(report.finished.contains(&1));
        assert!(report.finished.contains(&2));
        assert!(report.finished.contains(&3));
        assert!(report.finished.contains(&4));
        assert!(report.xruns.is_empty());
    }

    #[test]
    fn recalc_pending_coalesces_until_recalculate_runs() {
        let mut sched = Scheduler::new();
        sched.add_node(make_node(1, true, 0));
        assert!(sched.recalc_pending());
        sched.add_node(make_node(2, false, 0));
        assert!(sched.recalc_pending());
        sched.recalculate();
        assert!(!sched.recalc_pending());
    }
}
