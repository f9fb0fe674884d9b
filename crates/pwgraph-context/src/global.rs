//! Globals (spec §3 "Global"): the uniformly identified, bindable object
//! every node, port, link, device, client, factory, and module has exactly
//! one of. A process-wide generation counter bumps on every registration so
//! an observer holding a stale generation can be told apart from one
//! watching the current graph.

use std::collections::HashMap;

bitflags::bitflags! {
    /// Permission bits gating what a client may do with a bound global
    /// (spec §7 "EACCES — permission bits reject binding").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        /// May read the global's properties and params.
        const READ = 1 << 0;
        /// May push params/commands to the global.
        const WRITE = 1 << 1;
        /// May invoke methods that create/destroy other globals through it
        /// (e.g. a factory's `create_object`).
        const EXECUTE = 1 << 2;
        /// May subscribe to metadata changes on the global.
        const METADATA = 1 << 3;
    }
}

impl Permissions {
    /// Every bit set — the default for a trusted in-process registration.
    #[must_use]
    pub const fn all_granted() -> Self {
        Self::READ.union(Self::WRITE).union(Self::EXECUTE).union(Self::METADATA)
    }
}

/// The kind of object a [`Global`] identifies (spec §3: "every node, port,
/// link, device, client, factory has exactly one global").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalType {
    /// A graph node.
    Node,
    /// A port on a node.
    Port,
    /// A link between two ports.
    Link,
    /// A device (grouping of nodes sharing a piece of hardware).
    Device,
    /// A connected client.
    Client,
    /// A SPA factory.
    Factory,
    /// A loaded module.
    Module,
}

/// A registered, bindable object (spec §3 "Global").
#[derive(Debug, Clone)]
pub struct Global {
    id: u32,
    type_: GlobalType,
    permissions: Permissions,
    generation: u64,
    props: HashMap<String, String>,
}

impl Global {
    /// This global's process-unique id.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// The kind of object this global identifies.
    #[must_use]
    pub const fn type_(&self) -> GlobalType {
        self.type_
    }

    /// Permission bits clients are granted against this global.
    #[must_use]
    pub const fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// The registry-wide generation this global was registered under.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// This global's properties.
    #[must_use]
    pub fn props(&self) -> &HashMap<String, String> {
        &self.props
    }

    /// Mutable access to this global's properties.
    pub fn props_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.props
    }
}

/// Registers [`Global`]s and hands out monotonically increasing ids and a
/// monotonically increasing generation counter (spec §3 "Generation
/// monotonically increases on registration").
#[derive(Default)]
pub struct GlobalRegistry {
    globals: HashMap<u32, Global>,
    next_id: u32,
    generation: u64,
}

impl GlobalRegistry {
    /// An empty registry, generation 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new global, bumping the registry's generation and
    /// stamping it onto the returned global's id.
    pub fn register(&mut self, type_: GlobalType, permissions: Permissions, props: HashMap<String, String>) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.generation += 1;
        self.globals.insert(
            id,
            Global {
                id,
                type_,
                permissions,
                generation: self.generation,
                props,
            },
        );
        id
    }

    /// Remove a global, returning it if it was registered.
    pub fn remove(&mut self, id: u32) -> Option<Global> {
        self.globals.remove(&id)
    }

    /// Look up a global.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Global> {
        self.globals.get(&id)
    }

    /// Mutable lookup of a global.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Global> {
        self.globals.get_mut(&id)
    }

    /// Iterate over every registered global of a given type.
    pub fn iter_type(&self, type_: GlobalType) -> impl Iterator<Item = &Global> {
        self.globals.values().filter(move |g| g.type_ == type_)
    }

    /// The registry's current generation (bumped by every `register`
    /// call so far).
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of currently registered globals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.globals.len()
    }

    /// True if no globals are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_increases_monotonically() {
        let mut reg = GlobalRegistry::new();
        let a = reg.register(GlobalType::Node, Permissions::all_granted(), HashMap::new());
        let b = reg.register(GlobalType::Node, Permissions::all_granted(), HashMap::new());
        assert!(reg.get(a).unwrap().generation() < reg.get(b).unwrap().generation());
        assert_eq!(reg.generation(), 2);
    }

    #[test]
    fn ids_are_unique_and_stable_across_removal() {
        let mut reg = GlobalRegistry::new();
        let a = reg.register(GlobalType::Client, Permissions::all_granted(), HashMap::new());
        let b = reg.register(GlobalType::Client, Permissions::all_granted(), HashMap::new());
        assert_ne!(a, b);
        reg.remove(a);
        assert!(reg.get(a).is_none());
        assert!(reg.get(b).is_some());
    }

    #[test]
    fn iter_type_filters_by_global_type() {
        let mut reg = GlobalRegistry::new();
        reg.register(GlobalType::Node, Permissions::all_granted(), HashMap::new());
        reg.register(GlobalType::Client, Permissions::all_granted(), HashMap::new());
        assert_eq!(reg.iter_type(GlobalType::Node).count(), 1);
        assert_eq!(reg.iter_type(GlobalType::Client).count(), 1);
    }
}
