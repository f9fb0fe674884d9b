//! The client-side mix table (spec §4.10 "The client maintains a mix
//! table keyed by `(direction, port_id, mix_id)`"): tracks which buffers
//! and IO areas are currently bound to each port mix the server has told
//! this client about.

use pwgraph_spa::Direction;
use std::collections::HashMap;

/// Key identifying one entry in the mix table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MixKey {
    /// Port direction as seen from this client's node.
    pub direction: Direction,
    /// Port id.
    pub port_id: u32,
    /// Mix id, `pwgraph_core::port::INVALID_MIX_ID` for a port's static
    /// mix.
    pub mix_id: u32,
}

/// What the server has bound for one mix: which pool memory ids back its
/// buffers, and which blocks back its IO areas.
#[derive(Debug, Clone, Default)]
pub struct MixBinding {
    /// Pool memory ids for each buffer currently assigned, in buffer-id
    /// order (spec §4.10 `port_buffers`).
    pub buffer_mem_ids: Vec<u32>,
    /// Pool memory id backing this mix's IO areas, keyed by area kind.
    pub io_mem_ids: HashMap<pwgraph_spa::IoType, u32>,
    /// The peer node id this mix connects to, if the server has announced
    /// one via `port_set_mix_info`.
    pub peer_id: Option<u64>,
}

/// Table of live mix bindings for one client-node connection.
#[derive(Debug, Default)]
pub struct MixTable {
    entries: HashMap<MixKey, MixBinding>,
}

impl MixTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure an entry exists for `key`, creating a default binding if
    /// this is the first message about it (spec §4.10
    /// `port_set_mix_info` announcing a new mix).
    pub fn ensure(&mut self, key: MixKey) -> &mut MixBinding {
        self.entries.entry(key).or_default()
    }

    /// Record the peer on the other end of a mix, or remove the entry
    /// entirely when `peer_id` is `None` (spec §4.10 "a `None` peer_id
    /// removes" the mix).
    pub fn set_peer(&mut self, key: MixKey, peer_id: Option<u64>) {
        match peer_id {
            Some(_) => self.ensure(key).peer_id = peer_id,
            None => {
                self.entries.remove(&key);
            }
        }
    }

    /// Record buffer memory ids for a mix (spec §4.10 `port_buffers`). An
    /// empty list releases the binding, matching `PortUseBuffers`'s
    /// "empty to release" convention.
    pub fn set_buffers(&mut self, key: MixKey, buffer_mem_ids: Vec<u32>) {
        self.ensure(key).buffer_mem_ids = buffer_mem_ids;
    }

    /// Record (or release, with `mem_id = None`) an IO area binding for a
    /// mix (spec §4.10 `port_set_io(id, mem_id=INVALID)` releases a
    /// binding).
    pub fn set_io(&mut self, key: MixKey, io_type: pwgraph_spa::IoType, mem_id: Option<u32>) {
        let binding = self.ensure(key);
        match mem_id {
            Some(id) => {
                binding.io_mem_ids.insert(io_type, id);
            }
            None => {
                binding.io_mem_ids.remove(&io_type);
            }
        }
    }

    /// Look up a binding.
    #[must_use]
    pub fn get(&self, key: MixKey) -> Option<&MixBinding> {
        self.entries.get(&key)
    }

    /// Drop every entry for a port (spec §4.10 `remove_port`): clears all
    /// mixes at once, including the static one.
    pub fn remove_port(&mut self, direction: Direction, port_id: u32) {
        self.entries
            .retain(|key, _| !(key.direction == direction && key.port_id == port_id));
    }

    /// Number of tracked mixes, for tests and diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no mix is currently tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(port_id: u32, mix_id: u32) -> MixKey {
        MixKey {
            direction: Direction::Input,
            port_id,
            mix_id,
        }
    }

    #[test]
    fn set_buffers_then_release_with_empty_list() {
        let mut table = MixTable::new();
        table.set_buffers(key(0, 0), vec![1, 2, 3]);
        assert_eq!(table.get(key(0, 0)).unwrap().buffer_mem_ids, vec![1, 2, 3]);

        table.set_buffers(key(0, 0), vec![]);
        assert!(table.get(key(0, 0)).unwrap().buffer_mem_ids.is_empty());
    }

    #[test]
    fn set_peer_none_removes_entry() {
        let mut table = MixTable::new();
        table.set_peer(key(0, 0), Some(42));
        assert_eq!(table.len(), 1);
        table.set_peer(key(0, 0), None);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn set_io_invalid_mem_id_releases_binding() {
        let mut table = MixTable::new();
        table.set_io(key(0, 0), pwgraph_spa::IoType::Buffers, Some(7));
        assert_eq!(
            table.get(key(0, 0)).unwrap().io_mem_ids[&pwgraph_spa::IoType::Buffers],
            7
        );
        table.set_io(key(0, 0), pwgraph_spa::IoType::Buffers, None);
        assert!(table.get(key(0, 0)).unwrap().io_mem_ids.is_empty());
    }

    #[test]
    fn remove_port_clears_all_its_mixes() {
        let mut table = MixTable::new();
        table.set_peer(key(0, 0), Some(1));
        table.set_peer(key(0, 7), Some(1));
        table.set_peer(
            MixKey {
                direction: Direction::Output,
                port_id: 0,
                mix_id: 0,
            },
            Some(1),
        );
        table.remove_port(Direction::Input, 0);
        assert_eq!(table.len(), 1);
    }
}
