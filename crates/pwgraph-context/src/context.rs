//! The process-wide [`Context`] (spec §3 "Context"): owns the main loop,
//! the data loops, the memory pool, the plugin loader, and the global
//! registry, and wires node/port/link registration through to the
//! scheduler.

use crate::config::ContextConfig;
use crate::error::{ContextError, ContextResult};
use crate::global::{Global, GlobalRegistry, GlobalType, Permissions};
use crate::properties;
use pwgraph_core::data_loop::{DataLoop, DataLoopConfig};
use pwgraph_core::event_loop::Loop;
use pwgraph_core::link::Link;
use pwgraph_core::node::{LoopAssignment, Node};
use pwgraph_core::pool::MemoryPool;
use pwgraph_core::scheduler::{CycleReport, NullWakeup, Scheduler};
use pwgraph_core::thread_utils::ThreadUtils;
use pwgraph_spa::factory::PluginLoader;
use pwgraph_spa::NullNode;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// First id handed out to objects the context itself creates (the
/// freewheel fallback driver), kept well clear of the range a caller is
/// expected to use for its own node/link ids.
const INTERNAL_ID_BASE: u64 = 1 << 62;

/// Properties recorded on a client, device, factory, or module's
/// [`Global`] — these kinds have no dedicated engine-side record of their
/// own, so the context only tracks their global.
type PropertyRecord = HashMap<String, String>;

/// The process-wide context (spec §3): owns every loop, the graph's
/// scheduler and memory pool, and the global registry everything else is
/// addressed through.
pub struct Context {
    properties: HashMap<String, String>,
    main_loop: Loop,
    data_loops: HashMap<String, DataLoop>,
    loop_classes: HashMap<String, Option<String>>,
    loop_last_used: HashMap<String, u64>,
    lru_tick: u64,
    pool: MemoryPool,
    plugin_loader: PluginLoader,
    thread_utils: Arc<dyn ThreadUtils>,
    globals: GlobalRegistry,
    scheduler: Scheduler,
    node_globals: HashMap<u64, u32>,
    node_loops: HashMap<u64, Option<String>>,
    link_globals: HashMap<u64, u32>,
    clients: HashMap<u32, PropertyRecord>,
    devices: HashMap<u32, PropertyRecord>,
    factories: HashMap<u32, PropertyRecord>,
    modules: HashMap<u32, PropertyRecord>,
    freewheel_driver: Option<u64>,
    next_internal_id: u64,
}

impl Context {
    /// Build a context from a parsed config: fills process properties,
    /// opens the main loop, spawns one [`DataLoop`] per `context.data-loops`
    /// entry, and seeds the plugin loader from `context.spa-libs`.
    ///
    /// # Errors
    ///
    /// [`ContextError::Io`] if the main loop or a data loop's `Loop`/thread
    /// fails to start; [`ContextError::Loader`] if a `context.spa-libs`
    /// pattern doesn't compile as a regex.
    pub fn new(config: ContextConfig, thread_utils: Arc<dyn ThreadUtils>) -> ContextResult<Self> {
        let mut props = config.properties.clone();
        properties::fill_properties(&mut props);

        let main_loop = Loop::new()?;

        let mut plugin_loader = PluginLoader::new();
        for (pattern, path) in &config.spa_libs {
            plugin_loader.add_rule(pattern, path)?;
        }

        let mut data_loops = HashMap::new();
        let mut loop_classes = HashMap::new();
        for spec in &config.data_loops {
            let dl_config = DataLoopConfig {
                name: spec.name.clone(),
                rt_priority: spec.priority,
                affinity: spec.affinity,
            };
            let data_loop = DataLoop::spawn(dl_config, thread_utils.clone(), |l| {
                let _ = l.iterate(Some(10));
            })?;
            loop_classes.insert(spec.name.clone(), spec.class.clone());
            data_loops.insert(spec.name.clone(), data_loop);
        }

        info!(
            data_loops = data_loops.len(),
            properties = props.len(),
            "context constructed"
        );

        Ok(Self {
            properties: props,
            main_loop,
            data_loops,
            loop_classes,
            loop_last_used: HashMap::new(),
            lru_tick: 0,
            pool: MemoryPool::new(),
            plugin_loader,
            thread_utils,
            globals: GlobalRegistry::new(),
            scheduler: Scheduler::new(),
            node_globals: HashMap::new(),
            node_loops: HashMap::new(),
            link_globals: HashMap::new(),
            clients: HashMap::new(),
            devices: HashMap::new(),
            factories: HashMap::new(),
            modules: HashMap::new(),
            freewheel_driver: None,
            next_internal_id: INTERNAL_ID_BASE,
        })
    }

    /// This context's properties (`application.*` plus whatever
    /// `context.properties` set).
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// The main loop, for registering idle/io sources at startup.
    pub fn main_loop_mut(&mut self) -> &mut Loop {
        &mut self.main_loop
    }

    /// Look up a registered global by id.
    #[must_use]
    pub fn global(&self, id: u32) -> Option<&Global> {
        self.globals.get(id)
    }

    /// The plugin loader, for instantiating `context.objects` entries.
    pub fn plugin_loader_mut(&mut self) -> &mut PluginLoader {
        &mut self.plugin_loader
    }

    /// The memory pool backing every node's buffers and IO areas.
    pub fn pool_mut(&mut self) -> &mut MemoryPool {
        &mut self.pool
    }

    /// The thread-utils capability this context was built with.
    #[must_use]
    pub fn thread_utils(&self) -> Arc<dyn ThreadUtils> {
        self.thread_utils.clone()
    }

    /// Resolve a node's requested loop assignment to a data loop name
    /// (spec §4.3): an explicit `name` must match an existing loop
    /// exactly; a `class` picks the least-recently-used loop in that
    /// class; neither means "run on the main loop" (`Ok(None)`).
    ///
    /// # Errors
    ///
    /// [`ContextError::NoMatchingLoop`] if a `name`/`class` was requested
    /// but nothing configured matches it.
    pub fn resolve_loop_assignment(
        &mut self,
        assignment: &LoopAssignment,
    ) -> ContextResult<Option<String>> {
        if assignment.name.is_none() && assignment.class.is_none() {
            return Ok(None);
        }

        if let Some(name) = &assignment.name {
            if self.data_loops.contains_key(name) {
                self.touch_loop(name);
                return Ok(Some(name.clone()));
            }
            return Err(ContextError::NoMatchingLoop {
                name: Some(name.clone()),
                class: assignment.class.clone(),
            });
        }

        let class = assignment.class.as_ref().expect("checked above");
        let candidate = self
            .loop_classes
            .iter()
            .filter(|(_, c)| c.as_deref() == Some(class.as_str()))
            .map(|(name, _)| name.clone())
            .min_by_key(|name| self.loop_last_used.get(name).copied().unwrap_or(0));

        match candidate {
            Some(name) => {
                self.touch_loop(&name);
                Ok(Some(name))
            }
            None => Err(ContextError::NoMatchingLoop {
                name: None,
                class: Some(class.clone()),
            }),
        }
    }

    fn touch_loop(&mut self, name: &str) {
        self.lru_tick += 1;
        self.loop_last_used.insert(name.to_string(), self.lru_tick);
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_internal_id;
        self.next_internal_id += 1;
        id
    }

    /// Register a node: resolve its loop assignment, mint a [`Global`],
    /// and hand it to the scheduler. Returns the node's id.
    ///
    /// # Errors
    ///
    /// [`ContextError::NoMatchingLoop`] if the node requested a loop that
    /// isn't configured.
    pub fn register_node(
        &mut self,
        mut node: Node,
        props: HashMap<String, String>,
    ) -> ContextResult<u64> {
        let node_id = node.id();
        let resolved_loop = self.resolve_loop_assignment(node.loop_assignment())?;
        node.set_loop_assignment(LoopAssignment {
            name: resolved_loop.clone(),
            class: node.loop_assignment().class.clone(),
        });

        let global_id = self.globals.register(GlobalType::Node, Permissions::all_granted(), props);
        self.node_globals.insert(node_id, global_id);
        self.node_loops.insert(node_id, resolved_loop);
        self.scheduler.add_node(node);
        debug!(node = node_id, global = global_id, "node registered");
        Ok(node_id)
    }

    /// Remove a node: drops its global and scheduler entry (and any links
    /// touching it).
    pub fn remove_node(&mut self, node_id: u64) {
        if let Some(global_id) = self.node_globals.remove(&node_id) {
            self.globals.remove(global_id);
        }
        self.node_loops.remove(&node_id);
        self.scheduler.remove_node(node_id);
        if self.freewheel_driver == Some(node_id) {
            self.freewheel_driver = None;
        }
    }

    /// The data loop a node was resolved onto, `None` if it runs on the
    /// main loop.
    #[must_use]
    pub fn node_loop(&self, node_id: u64) -> Option<&str> {
        self.node_loops.get(&node_id).and_then(|l| l.as_deref())
    }

    /// Add a port to a node already registered with this context, and
    /// mint a [`Global`] for it.
    ///
    /// # Errors
    ///
    /// [`pwgraph_core::CoreError::NotFound`] if `node_id` isn't
    /// registered.
    pub fn register_port(
        &mut self,
        node_id: u64,
        direction: pwgraph_spa::Direction,
        port_id: u32,
        props: HashMap<String, String>,
    ) -> ContextResult<u32> {
        let node = self
            .scheduler
            .node_mut(node_id)
            .ok_or_else(|| pwgraph_core::CoreError::NotFound(format!("node {node_id}")))?;
        node.add_port(direction, port_id);
        let global_id = self.globals.register(GlobalType::Port, Permissions::all_granted(), props);
        Ok(global_id)
    }

    /// Register a link between two already-registered nodes, mint a
    /// [`Global`] for it, and hand it to the scheduler.
    pub fn register_link(&mut self, link: Link, props: HashMap<String, String>) -> ContextResult<u64> {
        let link_id = link.id();
        let global_id = self.globals.register(GlobalType::Link, Permissions::all_granted(), props);
        self.link_globals.insert(link_id, global_id);
        self.scheduler.add_link(link);
        Ok(link_id)
    }

    /// Activate a registered link (spec §4.9).
    ///
    /// # Errors
    ///
    /// Propagates [`Scheduler::activate_link`] errors.
    pub fn activate_link(&mut self, link_id: u64) -> ContextResult<()> {
        self.scheduler.activate_link(link_id).map_err(ContextError::from)
    }

    /// Destroy a link: removes its global, deactivates it, and frees any
    /// pool blocks it tagged.
    pub fn destroy_link(&mut self, link_id: u64) {
        if let Some(global_id) = self.link_globals.remove(&link_id) {
            self.globals.remove(global_id);
        }
        self.scheduler.destroy_link(link_id, &mut self.pool);
    }

    /// Register a client, minting a [`Global`] but no scheduler state.
    pub fn register_client(&mut self, props: HashMap<String, String>) -> u32 {
        let global_id = self.globals.register(GlobalType::Client, Permissions::all_granted(), props.clone());
        self.clients.insert(global_id, props);
        global_id
    }

    /// Remove a client.
    pub fn remove_client(&mut self, global_id: u32) {
        self.clients.remove(&global_id);
        self.globals.remove(global_id);
    }

    /// Register a device.
    pub fn register_device(&mut self, props: HashMap<String, String>) -> u32 {
        let global_id = self.globals.register(GlobalType::Device, Permissions::all_granted(), props.clone());
        self.devices.insert(global_id, props);
        global_id
    }

    /// Register a factory.
    pub fn register_factory(&mut self, props: HashMap<String, String>) -> u32 {
        let global_id = self.globals.register(GlobalType::Factory, Permissions::all_granted(), props.clone());
        self.factories.insert(global_id, props);
        global_id
    }

    /// Register a loaded module.
    pub fn register_module(&mut self, props: HashMap<String, String>) -> u32 {
        let global_id = self.globals.register(GlobalType::Module, Permissions::all_granted(), props.clone());
        self.modules.insert(global_id, props);
        global_id
    }

    /// Run the scheduler's reachability pass, then apply the freewheel
    /// fallback (SPEC_FULL.md "Driver selection" supplement): if recalc
    /// left any node without a driver, register a synthetic freewheeling
    /// driver node and recalculate once more so every node lands in a
    /// runnable subgraph.
    pub fn recalculate(&mut self) {
        self.scheduler.recalculate();

        if self.freewheel_driver.is_none() && self.any_driverless_node() {
            self.spawn_freewheel_driver();
            self.scheduler.recalculate();
        }
    }

    fn any_driverless_node(&self) -> bool {
        self.node_globals
            .keys()
            .filter_map(|id| self.scheduler.node(*id))
            .any(|n| n.driver_id().is_none())
    }

    fn spawn_freewheel_driver(&mut self) {
        let id = self.next_id();
        let mut node = Node::new(id, Box::new(NullNode::default()));
        node.set_driver(true);
        node.set_priority(i32::MIN);
        node.set_freewheeling(true);

        let mut props = HashMap::new();
        props.insert("node.name".to_string(), "freewheel-driver".to_string());
        props.insert("node.driver".to_string(), "true".to_string());
        let global_id = self.globals.register(GlobalType::Node, Permissions::all_granted(), props);
        self.node_globals.insert(id, global_id);
        self.node_loops.insert(id, None);
        self.scheduler.add_node(node);
        self.freewheel_driver = Some(id);
        warn!(node = id, "no driver present, registered freewheel fallback driver");
    }

    /// The id of the synthetic freewheel driver, if one was needed.
    #[must_use]
    pub const fn freewheel_driver(&self) -> Option<u64> {
        self.freewheel_driver
    }

    /// Run one cycle for `driver_id` (spec §4.8). In this single-process
    /// deployment every node's wakeup is modeled directly by the
    /// scheduler rather than through a per-data-loop `Invoker`, matching
    /// the scope [`Scheduler::run_cycle`] documents for a reference CLI.
    ///
    /// # Errors
    ///
    /// Propagates [`Scheduler::run_cycle`] errors (e.g. an unknown driver
    /// id).
    pub fn run_cycle(&mut self, driver_id: u64, now_nsec: u64) -> ContextResult<CycleReport> {
        self.scheduler
            .run_cycle(driver_id, now_nsec, &NullWakeup)
            .map_err(ContextError::from)
    }

    /// Number of nodes currently registered.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.scheduler.node_count()
    }

    /// Number of links currently registered.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.scheduler.link_count()
    }

    /// Tear the context down in reverse dependency order (spec §3
    /// "destroyed tears down everything in reverse dependency order"):
    /// stop and join every data loop, then drop the plugin loader and
    /// pool.
    pub fn shutdown(mut self) {
        info!("context shutting down");
        for (name, data_loop) in self.data_loops.drain() {
            debug!(loop_name = %name, "stopping data loop");
            data_loop.stop();
            if let Err(e) = data_loop.join() {
                warn!(loop_name = %name, ?e, "data loop thread panicked during shutdown");
            }
        }
        drop(std::mem::take(&mut self.plugin_loader));
        drop(std::mem::replace(&mut self.pool, MemoryPool::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwgraph_core::link::Endpoint;
    use pwgraph_core::port::INVALID_MIX_ID;
    use pwgraph_core::thread_utils::DefaultThreadUtils;

    fn test_context() -> Context {
        Context::new(ContextConfig::default(), Arc::new(DefaultThreadUtils)).unwrap()
    }

    fn endpoint(node_id: u64) -> Endpoint {
        Endpoint {
            node_id,
            port_id: 0,
            mix_id: INVALID_MIX_ID,
        }
    }

    fn sample_node(id: u64, driver: bool, priority: i32) -> Node {
        let mut node = Node::new(id, Box::new(NullNode::default()));
        node.set_driver(driver);
        node.set_priority(priority);
        node
    }

    #[test]
    fn register_node_mints_a_global() {
        let mut ctx = test_context();
        let id = ctx.register_node(sample_node(1, true, 0), HashMap::new()).unwrap();
        assert_eq!(id, 1);
        assert_eq!(ctx.node_count(), 1);
        assert!(ctx.global(0).is_some());
    }

    #[test]
    fn loop_assignment_without_request_stays_on_main_loop() {
        let mut ctx = test_context();
        let id = ctx.register_node(sample_node(1, true, 0), HashMap::new()).unwrap();
        assert_eq!(ctx.node_loop(id), None);
    }

    #[test]
    fn loop_assignment_by_name_requires_an_existing_loop() {
        let mut ctx = test_context();
        let mut node = sample_node(1, true, 0);
        node.set_loop_assignment(LoopAssignment {
            name: Some("rt.audio".to_string()),
            class: None,
        });
        let err = ctx.register_node(node, HashMap::new()).unwrap_err();
        assert!(matches!(err, ContextError::NoMatchingLoop { .. }));
    }

    #[test]
    fn remove_node_drops_its_global() {
        let mut ctx = test_context();
        let id = ctx.register_node(sample_node(1, true, 0), HashMap::new()).unwrap();
        let global_id = *ctx.node_globals.get(&id).unwrap();
        ctx.remove_node(id);
        assert!(ctx.global(global_id).is_none());
        assert_eq!(ctx.node_count(), 0);
    }

    #[test]
    fn recalculate_spawns_freewheel_driver_when_none_present() {
        let mut ctx = test_context();
        ctx.register_node(sample_node(1, false, 0), HashMap::new()).unwrap();
        ctx.register_node(sample_node(2, false, 0), HashMap::new()).unwrap();
        ctx.register_link(Link::new(0, endpoint(1), endpoint(2)), HashMap::new())
            .unwrap();
        ctx.activate_link(0).unwrap();
        ctx.recalculate();
        assert!(ctx.freewheel_driver().is_some());
        let driver_id = ctx.freewheel_driver().unwrap();
        assert_eq!(ctx.scheduler.node(1).unwrap().driver_id(), Some(driver_id));
    }

    #[test]
    fn recalculate_does_not_spawn_freewheel_when_a_driver_exists() {
        let mut ctx = test_context();
        ctx.register_node(sample_node(1, true, 10), HashMap::new()).unwrap();
        ctx.register_node(sample_node(2, false, 0), HashMap::new()).unwrap();
        ctx.register_link(Link::new(0, endpoint(1), endpoint(2)), HashMap::new())
            .unwrap();
        ctx.activate_link(0).unwrap();
        ctx.recalculate();
        assert!(ctx.freewheel_driver().is_none());
    }

    #[test]
    fn run_cycle_completes_after_recalculate() {
        let mut ctx = test_context();
        ctx.register_node(sample_node(1, true, 10), HashMap::new()).unwrap();
        ctx.register_node(sample_node(2, false, 0), HashMap::new()).unwrap();
        ctx.register_link(Link::new(0, endpoint(1), endpoint(2)), HashMap::new())
            .unwrap();
        ctx.activate_link(0).unwrap();
        ctx.recalculate();
        let report = ctx.run_cycle(1, 1000).unwrap();
        assert!(report.finished.contains(&1));
        assert!(report.finished.contains(&2));
    }

    #[test]
    fn shutdown_stops_data_loops_cleanly() {
        let ctx = test_context();
        ctx.shutdown();
    }
}
