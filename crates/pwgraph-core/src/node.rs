//! Graph nodes (spec §4.8 "Activation & scheduler"): the engine-side
//! wrapper around a [`pwgraph_spa::SpaNode`] handle, carrying the
//! activation record, port set, loop assignment, and driver/target-list
//! bookkeeping the scheduler needs.

use crate::activation::Activation;
use crate::port::Port;
use pwgraph_spa::{Direction, SpaNode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle state of a graph node (spec §4.5/§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Registered but not yet given ports/format.
    Creating,
    /// Ports configured, not scheduled.
    Suspended,
    /// Scheduled (assigned to a driver) but not currently running a
    /// cycle.
    Idle,
    /// Actively participating in cycles.
    Running,
    /// The SPA node reported an unrecoverable error.
    Error,
}

/// Which loop class a node requests (spec §6 "context.data-loops").
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoopAssignment {
    /// Requested data-loop name (`node.loop.name`), if pinned explicitly.
    pub name: Option<String>,
    /// Requested data-loop class (`node.loop.class`), used when `name` is
    /// unset to pick any loop in that class.
    pub class: Option<String>,
}

/// A node's target-list entry (spec §4.8 "target_list"): a downstream peer
/// this node's driver tick (or this node's own completion, if it's a
/// follower) must `fetch_sub` against.
#[derive(Clone)]
pub struct Target {
    /// The downstream node's id.
    pub node_id: u64,
    /// The downstream node's activation record, reachable directly for
    /// the `fetch_sub` dance without a lookup through the graph (spec
    /// §4.9 "wires the input node's activation mapping into the output
    /// node's address space").
    pub activation: Arc<Activation>,
    /// Whether `node_id` lives on the same data loop as this node (a same
    /// -loop completion calls `process` directly; cross-loop writes the
    /// peer's wakeup eventfd).
    pub same_loop: bool,
}

/// A node in the graph (spec §4.5 wraps the plugin contract; spec §4.8
/// adds the scheduling bookkeeping).
pub struct Node {
    id: u64,
    handle: Box<dyn SpaNode>,
    activation: Arc<Activation>,
    state: NodeState,
    input_ports: HashMap<u32, Port>,
    output_ports: HashMap<u32, Port>,
    loop_assignment: LoopAssignment,
    driver: bool,
    driver_id: Option<u64>,
    target_list: Vec<Target>,
    quantum: u64,
    priority: i32,
    freewheeling: AtomicBool,
}

impl Node {
    /// Wrap a SPA node handle as a graph node, initially `Creating` with
    /// no ports.
    #[must_use]
    pub fn new(id: u64, handle: Box<dyn SpaNode>) -> Self {
        Self {
            id,
            handle,
            activation: Arc::new(Activation::new()),
            state: NodeState::Creating,
            input_ports: HashMap::new(),
            output_ports: HashMap::new(),
            loop_assignment: LoopAssignment::default(),
            driver: false,
            driver_id: None,
            target_list: Vec::new(),
            quantum: 0,
            priority: 0,
            freewheeling: AtomicBool::new(false),
        }
    }

    /// This node's graph-assigned id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The underlying SPA node handle.
    #[must_use]
    pub fn handle(&self) -> &dyn SpaNode {
        self.handle.as_ref()
    }

    /// Mutable access to the underlying SPA node handle (for `process`,
    /// `send_command`, etc. on the data-loop thread).
    pub fn handle_mut(&mut self) -> &mut dyn SpaNode {
        self.handle.as_mut()
    }

    /// This node's activation record, shared with the scheduler and (for
    /// upstream peers) installed into their target lists.
    #[must_use]
    pub fn activation(&self) -> &Arc<Activation> {
        &self.activation
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> NodeState {
        self.state
    }

    /// Transition lifecycle state. Valid transitions aren't enforced here
    /// (the scheduler/context own that policy); this is a plain setter.
    pub fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }

    /// Add a port in `direction` with id `port_id`. Returns the port's id
    /// for convenience chaining.
    pub fn add_port(&mut self, direction: Direction, port_id: u32) -> u32 {
        let ports = self.ports_mut(direction);
        ports.insert(port_id, Port::new(port_id, direction));
        port_id
    }

    /// Remove a port.
    pub fn remove_port(&mut self, direction: Direction, port_id: u32) {
        self.ports_mut(direction).remove(&port_id);
    }

    /// Look up a port.
    #[must_use]
    pub fn port(&self, direction: Direction, port_id: u32) -> Option<&Port> {
        match direction {
            Direction::Input => self.input_ports.get(&port_id),
            Direction::Output => self.output_ports.get(&port_id),
        }
    }

    /// Mutable lookup of a port.
    pub fn port_mut(&mut self, direction: Direction, port_id: u32) -> Option<&mut Port> {
        self.ports_mut(direction).get_mut(&port_id)
    }

    /// Iterate over all ports in `direction`.
    pub fn ports(&self, direction: Direction) -> impl Iterator<Item = &Port> {
        match direction {
            Direction::Input => self.input_ports.values(),
            Direction::Output => self.output_ports.values(),
        }
    }

    fn ports_mut(&mut self, direction: Direction) -> &mut HashMap<u32, Port> {
        match direction {
            Direction::Input => &mut self.input_ports,
            Direction::Output => &mut self.output_ports,
        }
    }

    /// Requested loop assignment.
    #[must_use]
    pub const fn loop_assignment(&self) -> &LoopAssignment {
        &self.loop_assignment
    }

    /// Set the requested loop assignment (`node.loop.name` /
    /// `node.loop.class`).
    pub fn set_loop_assignment(&mut self, assignment: LoopAssignment) {
        self.loop_assignment = assignment;
    }

    /// Whether this node has a clock source and `node.driver = true`
    /// (spec §4.8 "driver selection").
    #[must_use]
    pub const fn is_driver(&self) -> bool {
        self.driver
    }

    /// Mark (or unmark) this node as a driver candidate.
    pub fn set_driver(&mut self, driver: bool) {
        self.driver = driver;
    }

    /// The driver subgraph this node currently belongs to, `None` until
    /// the reachability pass assigns one.
    #[must_use]
    pub const fn driver_id(&self) -> Option<u64> {
        self.driver_id
    }

    /// Assign this node to a driver subgraph (set by the scheduler's
    /// reachability pass).
    pub fn set_driver_id(&mut self, driver_id: Option<u64>) {
        self.driver_id = driver_id;
    }

    /// This node's target list (spec §4.8/§4.9): downstream peers it
    /// `fetch_sub`s against on completion.
    #[must_use]
    pub fn target_list(&self) -> &[Target] {
        &self.target_list
    }

    /// Append a target (called by [`crate::link::Link::activate`]).
    /// Append-only during a cycle, per spec §5 ordering guarantee.
    pub fn add_target(&mut self, target: Target) {
        self.target_list.push(target);
    }

    /// Remove a target by downstream node id (called by
    /// [`crate::link::Link::deactivate`]).
    pub fn remove_target(&mut self, node_id: u64) {
        self.target_list.retain(|t| t.node_id != node_id);
    }

    /// The samples-per-cycle this node's driver currently schedules
    /// (`target_duration`, spec §4.8).
    #[must_use]
    pub const fn quantum(&self) -> u64 {
        self.quantum
    }

    /// Set the quantum, e.g. when the driver's clock area changes.
    pub fn set_quantum(&mut self, quantum: u64) {
        self.quantum = quantum;
    }

    /// Driver priority, used by the reachability pass to pick the
    /// "highest-priority driver" in a connected component (spec §4.8).
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Set this node's driver priority.
    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    /// Whether this driver has dropped its timer and is running in
    /// freewheel mode (spec §4.8 "Freewheeling").
    #[must_use]
    pub fn is_freewheeling(&self) -> bool {
        self.freewheeling.load(Ordering::Acquire)
    }

    /// Enter or leave freewheel mode.
    pub fn set_freewheeling(&self, freewheeling: bool) {
        self.freewheeling.store(freewheeling, Ordering::Release);
    }

    /// Number of direct input-link peers currently in this node's driver
    /// subgraph — the value the arm phase writes into `required` (spec
    /// §4.8 step 1). Computed from how many input ports have an active
    /// mix bound to a peer; the scheduler is the caller that knows which
    /// mixes are currently linked, so this takes that count directly
    /// rather than re-deriving it from port state.
    #[must_use]
    pub fn required_for_arm(&self, active_input_links: u32) -> i32 {
        i32::try_from(active_input_links).unwrap_or(i32::MAX)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("driver", &self.driver)
            .field("driver_id", &self.driver_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwgraph_spa::NullNode;

    fn sample_node(id: u64) -> Node {
        Node::new(id, Box::new(NullNode::default()))
    }

    #[test]
    fn new_node_starts_creating_with_no_ports() {
        let node = sample_node(1);
        assert_eq!(node.state(), NodeState::Creating);
        assert_eq!(node.ports(Direction::Input).count(), 0);
    }

    #[test]
    fn add_remove_port() {
        let mut node = sample_node(1);
        node.add_port(Direction::Input, 0);
        assert!(node.port(Direction::Input, 0).is_some());
        node.remove_port(Direction::Input, 0);
        assert!(node.port(Direction::Input, 0).is_none());
    }

    #[test]
    fn target_list_is_append_only_within_a_cycle() {
        let mut node = sample_node(1);
        let peer_activation = Arc::new(Activation::new());
        node.add_target(Target {
            node_id: 2,
            activation: peer_activation.clone(),
            same_loop: true,
        });
        node.add_target(Target {
            node_id: 3,
            activation: peer_activation,
            same_loop: false,
        });
        assert_eq!(node.target_list().len(), 2);
        node.remove_target(2);
        assert_eq!(node.target_list().len(), 1);
        assert_eq!(node.target_list()[0].node_id, 3);
    }

    #[test]
    fn freewheel_toggle_is_observable_across_handles() {
        let node = sample_node(1);
        assert!(!node.is_freewheeling());
        node.set_freewheeling(true);
        assert!(node.is_freewheeling());
    }
}
