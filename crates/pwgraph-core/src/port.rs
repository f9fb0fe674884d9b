//! Ports and mixes (spec §4.6): a node's input/output connection points,
//! each able to fan in/out to multiple links through per-peer "mix"
//! slots.

use crate::buffer::BufferPool;
use crate::io::IoBuffers;
use pwgraph_spa::{Direction, Param, ParamId};
use std::collections::HashMap;

/// Sentinel mix id meaning "the port's single static mix" (spec §4.6
/// "dynamic-mix id=INVALID convention"): ports that never fan in/out use
/// this id rather than allocating a dynamic one.
pub const INVALID_MIX_ID: u32 = u32::MAX;

/// One negotiated connection slot on a [`Port`] (spec §4.6 "Mix").
pub struct Mix {
    id: u32,
    io: IoBuffers,
    buffers: BufferPool,
    params: Vec<Param>,
}

impl Mix {
    fn new(id: u32) -> Self {
        Self {
            id,
            io: IoBuffers::new(),
            buffers: BufferPool::new(),
            params: Vec::new(),
        }
    }

    /// This mix's id, [`INVALID_MIX_ID`] for a port's implicit static
    /// mix.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// The IO buffers area this mix exchanges with its peer.
    #[must_use]
    pub const fn io(&self) -> &IoBuffers {
        &self.io
    }

    /// Mutable access to the IO buffers area.
    pub fn io_mut(&mut self) -> &mut IoBuffers {
        &mut self.io
    }

    /// The negotiated buffer pool for this mix.
    #[must_use]
    pub const fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    /// Mutable access to the negotiated buffer pool.
    pub fn buffers_mut(&mut self) -> &mut BufferPool {
        &mut self.buffers
    }

    /// Params currently enumerated/set on this mix.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Replace this mix's param list (`port_set_param`).
    pub fn set_params(&mut self, params: Vec<Param>) {
        self.params = params;
    }
}

/// A node's port: one direction, with zero or more format params and one
/// or more [`Mix`] slots (spec §4.6).
pub struct Port {
    id: u32,
    direction: Direction,
    format: Option<Param>,
    mixes: HashMap<u32, Mix>,
    next_mix_id: u32,
}

impl Port {
    /// A new port with no negotiated format and a single static mix
    /// ([`INVALID_MIX_ID`]).
    #[must_use]
    pub fn new(id: u32, direction: Direction) -> Self {
        let mut port = Self {
            id,
            direction,
            format: None,
            mixes: HashMap::new(),
            next_mix_id: 0,
        };
        port.mixes.insert(INVALID_MIX_ID, Mix::new(INVALID_MIX_ID));
        port
    }

    /// This port's id, local to its owning node and direction.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Input or output.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// The negotiated `EnumFormat`/`Format` param, if any.
    #[must_use]
    pub fn format(&self) -> Option<&Param> {
        self.format.as_ref()
    }

    /// Set the negotiated format (`port_set_param` with
    /// [`ParamId::Format`]); passing `None` clears it, forcing
    /// renegotiation before the port can be used.
    pub fn set_format(&mut self, format: Option<Param>) {
        self.format = format;
    }

    /// Allocate a new dynamic mix slot, used when this port needs to fan
    /// out/in to more than one peer (spec §4.6 "dynamic-mix id=INVALID
    /// convention": any id other than `INVALID_MIX_ID` is dynamic).
    pub fn add_mix(&mut self) -> u32 {
        let id = self.next_mix_id;
        self.next_mix_id += 1;
        self.mixes.insert(id, Mix::new(id));
        id
    }

    /// Remove a dynamic mix. Removing [`INVALID_MIX_ID`] is a no-op: the
    /// static mix always exists (spec §8 law 7, idempotent commands).
    pub fn remove_mix(&mut self, id: u32) {
        if id != INVALID_MIX_ID {
            self.mixes.remove(&id);
        }
    }

    /// Look up a mix by id.
    #[must_use]
    pub fn mix(&self, id: u32) -> Option<&Mix> {
        self.mixes.get(&id)
    }

    /// Mutable lookup of a mix by id.
    pub fn mix_mut(&mut self, id: u32) -> Option<&mut Mix> {
        self.mixes.get_mut(&id)
    }

    /// The static mix every port has (spec §4.6).
    #[must_use]
    pub fn static_mix(&self) -> &Mix {
        self.mixes
            .get(&INVALID_MIX_ID)
            .expect("static mix always present")
    }

    /// Mutable access to the static mix.
    pub fn static_mix_mut(&mut self) -> &mut Mix {
        self.mixes
            .get_mut(&INVALID_MIX_ID)
            .expect("static mix always present")
    }

    /// Number of mixes currently on this port (including the static one).
    #[must_use]
    pub fn mix_count(&self) -> usize {
        self.mixes.len()
    }

    /// Iterate over all mixes on this port.
    pub fn mixes(&self) -> impl Iterator<Item = &Mix> {
        self.mixes.values()
    }

    /// True if this port has a negotiated format and is ready to be
    /// linked (spec §4.6/§4.9 pre-link check).
    #[must_use]
    pub fn is_negotiated(&self) -> bool {
        self.format
            .as_ref()
            .is_some_and(|f| f.id == ParamId::Format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwgraph_spa::PodValue;

    #[test]
    fn new_port_has_static_mix_only() {
        let port = Port::new(0, Direction::Input);
        assert_eq!(port.mix_count(), 1);
        assert!(port.mix(INVALID_MIX_ID).is_some());
    }

    #[test]
    fn add_and_remove_dynamic_mix() {
        let mut port = Port::new(0, Direction::Output);
        let a = port.add_mix();
        let b = port.add_mix();
        assert_ne!(a, b);
        assert_eq!(port.mix_count(), 3);
        port.remove_mix(a);
        assert_eq!(port.mix_count(), 2);
    }

    #[test]
    fn removing_static_mix_is_a_no_op() {
        let mut port = Port::new(0, Direction::Input);
        port.remove_mix(INVALID_MIX_ID);
        assert_eq!(port.mix_count(), 1);
        assert!(port.mix(INVALID_MIX_ID).is_some());
    }

    #[test]
    fn format_negotiation_state() {
        let mut port = Port::new(0, Direction::Input);
        assert!(!port.is_negotiated());
        port.set_format(Some(Param::new(ParamId::Format, PodValue::new(vec![0; 4]))));
        assert!(port.is_negotiated());
        port.set_format(None);
        assert!(!port.is_negotiated());
    }
}
