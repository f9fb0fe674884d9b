//! Links (spec §4.9): a directed edge between an output port+mix and an
//! input port+mix, and the negotiation that activating one performs.

use crate::activation::Activation;
use crate::buffer::{Buffer, Data};
use crate::error::{CoreError, CoreResult};
use crate::io::IoBuffers;
use crate::node::{Node, Target};
use crate::pool::{BlockFlags, MemoryPool};
use pwgraph_spa::{Direction, Param, ParamId};
use std::sync::Arc;
use tracing::{debug, info};

/// Which side of a link allocates buffers (spec §4.7 step 1: "output
/// preferred").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocator {
    /// The output (producer) side allocates.
    Output,
    /// The input (consumer) side allocates, used when the output can't
    /// (e.g. it only supports `use_buffers`, never `alloc_buffers`).
    Input,
}

/// Buffer-allocation policy for a link (Open Question resolved in
/// DESIGN.md: exposed as an explicit config knob rather than inferred
/// solely from port flags, so a config file can force e.g. `Input` for a
/// node known to need page-locked buffers it owns).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorPolicy {
    /// Prefer the output side (spec §4.7 default), falling back to input
    /// only if the output can't allocate.
    PreferOutput,
    /// Force the input side to allocate.
    ForceInput,
    /// Force the output side to allocate, failing negotiation if it
    /// can't.
    ForceOutput,
}

impl Default for AllocatorPolicy {
    fn default() -> Self {
        Self::PreferOutput
    }
}

/// Overrun behavior when a producer finds its IO-buffers slot still
/// `HAVE_DATA` (spec §4.7 "Overruns").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrunMode {
    /// Skip this cycle's write and record an xrun.
    Block,
    /// Overwrite the slot and record an xrun.
    Drop,
    /// Use a paired `AsyncBuffers` double-buffered slot instead of
    /// blocking or dropping.
    Async,
}

/// Endpoint of a link: a node's port and mix.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    /// The node id owning the port.
    pub node_id: u64,
    /// The port id on that node.
    pub port_id: u32,
    /// The mix id within that port.
    pub mix_id: u32,
}

/// Lifecycle state of a [`Link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Constructed, not yet negotiated.
    Init,
    /// Format/buffers negotiated, target list wired.
    Active,
    /// Torn down.
    Inactive,
}

/// A directed edge between an output endpoint and an input endpoint
/// (spec §4.9).
pub struct Link {
    id: u64,
    output: Endpoint,
    input: Endpoint,
    policy: AllocatorPolicy,
    overrun_mode: OverrunMode,
    state: LinkState,
    format: Option<Param>,
    io_block_tag: Option<[u32; 5]>,
}

impl Link {
    /// Construct a new, inactive link between `output` and `input`.
    #[must_use]
    pub fn new(id: u64, output: Endpoint, input: Endpoint) -> Self {
        Self {
            id,
            output,
            input,
            policy: AllocatorPolicy::default(),
            overrun_mode: OverrunMode::Block,
            state: LinkState::Init,
            format: None,
            io_block_tag: None,
        }
    }

    /// This link's id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The output-side endpoint.
    #[must_use]
    pub const fn output(&self) -> Endpoint {
        self.output
    }

    /// The input-side endpoint.
    #[must_use]
    pub const fn input(&self) -> Endpoint {
        self.input
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Override the default allocator policy.
    pub fn set_allocator_policy(&mut self, policy: AllocatorPolicy) {
        self.policy = policy;
    }

    /// Override the default overrun mode.
    pub fn set_overrun_mode(&mut self, mode: OverrunMode) {
        self.overrun_mode = mode;
    }

    /// The negotiated overrun mode.
    #[must_use]
    pub const fn overrun_mode(&self) -> OverrunMode {
        self.overrun_mode
    }

    /// Negotiate a common format between `output_formats` and
    /// `input_formats` (spec §4.6): both sides' `EnumFormat` lists,
    /// intersected by raw equality since this engine treats PODs
    /// opaquely. Returns the chosen format.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoCommonFormat`] if the sets don't intersect.
    pub fn negotiate_format(
        &mut self,
        output_formats: &[Param],
        input_formats: &[Param],
    ) -> CoreResult<Param> {
        let chosen = output_formats
            .iter()
            .find(|of| of.id == ParamId::EnumFormat && input_formats.contains(of))
            .or_else(|| {
                output_formats
                    .iter()
                    .find(|of| input_formats.iter().any(|inf| inf.value == of.value))
            })
            .cloned()
            .ok_or(CoreError::NoCommonFormat)?;
        self.format = Some(Param::new(ParamId::Format, chosen.value));
        Ok(self.format.clone().unwrap())
    }

    /// Reconcile the two sides' `Buffers` params (spec §4.6 "pick buffers
    /// param that intersects; prefer the allocator side"). Returns which
    /// side allocates and the chosen buffers param.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoCommonBuffers`] if no intersection exists, or if
    /// `ForceOutput`/`ForceInput` names a side whose param list is empty.
    pub fn negotiate_buffers(
        &mut self,
        output_can_alloc: bool,
        output_buffers: &[Param],
        input_buffers: &[Param],
    ) -> CoreResult<(Allocator, Param)> {
        let allocator = match self.policy {
            AllocatorPolicy::PreferOutput if output_can_alloc => Allocator::Output,
            AllocatorPolicy::PreferOutput => Allocator::Input,
            AllocatorPolicy::ForceOutput => Allocator::Output,
            AllocatorPolicy::ForceInput => Allocator::Input,
        };

        let (primary, secondary) = match allocator {
            Allocator::Output => (output_buffers, input_buffers),
            Allocator::Input => (input_buffers, output_buffers),
        };

        let chosen = primary
            .iter()
            .find(|p| p.id == ParamId::Buffers && secondary.iter().any(|s| s.value == p.value))
            .or_else(|| primary.iter().find(|p| p.id == ParamId::Buffers))
            .cloned()
            .ok_or(CoreError::NoCommonBuffers)?;

        Ok((allocator, chosen))
    }

    /// Allocate the shared IO-buffers area for this link from `pool`,
    /// tagged `(output.node_id, Output, output.port_id, output.mix_id,
    /// 0)` per spec §4.7 step 2.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::pool::MemoryPool::alloc`] failures.
    pub fn allocate_io_area(&mut self, pool: &mut MemoryPool) -> CoreResult<IoBuffers> {
        let tag = [
            self.output.node_id as u32,
            Direction::Output as u32,
            self.output.port_id,
            self.output.mix_id,
            0,
        ];
        let block = pool.alloc(
            std::mem::size_of::<IoBuffers>(),
            BlockFlags::READWRITE | BlockFlags::MAP,
        )?;
        pool.set_tag(&block, tag);
        self.io_block_tag = Some(tag);
        debug!(link = self.id, ?tag, "allocated link IO-buffers area");
        Ok(IoBuffers::new())
    }

    /// Activate this link (spec §4.9): wire the output node's target list
    /// to the input node, bump the input's required count, and merge
    /// driver subgraphs if they differ.
    ///
    /// # Errors
    ///
    /// [`CoreError::NegotiationBusy`] if the link is already active.
    pub fn activate(&mut self, output_node: &mut Node, input_node: &mut Node) -> CoreResult<()> {
        if self.state == LinkState::Active {
            return Err(CoreError::NegotiationBusy);
        }

        let same_loop = output_node.loop_assignment() == input_node.loop_assignment();
        output_node.add_target(Target {
            node_id: input_node.id(),
            activation: Arc::clone(input_node.activation()),
            same_loop,
        });

        let current_required = input_node.activation().required();
        input_node.activation().set_required(current_required + 1);

        if output_node.driver_id() != input_node.driver_id() {
            let higher_priority_is_output = output_node.priority() >= input_node.priority();
            let driver = if higher_priority_is_output {
                output_node.driver_id().unwrap_or_else(|| output_node.id())
            } else {
                input_node.driver_id().unwrap_or_else(|| input_node.id())
            };
            output_node.set_driver_id(Some(driver));
            input_node.set_driver_id(Some(driver));
        }

        self.state = LinkState::Active;
        info!(
            link = self.id,
            output = output_node.id(),
            input = input_node.id(),
            "link activated"
        );
        Ok(())
    }

    /// Deactivate this link: reverse of [`Link::activate`].
    pub fn deactivate(&mut self, output_node: &mut Node, input_node: &mut Node) {
        if self.state != LinkState::Active {
            return;
        }
        output_node.remove_target(input_node.id());
        let current_required = input_node.activation().required();
        input_node
            .activation()
            .set_required((current_required - 1).max(0));
        self.state = LinkState::Inactive;
        info!(link = self.id, "link deactivated");
    }

    /// Destroy this link: deactivates first if still active, then frees
    /// any pool blocks it tagged (spec §4.7 step 7, spec §4.9 "`destroy`
    /// unconditionally deactivates first").
    pub fn destroy(&mut self, output_node: &mut Node, input_node: &mut Node, pool: &mut MemoryPool) {
        self.deactivate(output_node, input_node);
        if let Some(tag) = self.io_block_tag.take() {
            let freed = pool.gc_by_tag(tag);
            debug!(link = self.id, freed, "freed link pool blocks");
        }
    }

    /// Construct the negotiated buffer set for the allocating side (spec
    /// §4.7 steps 2-3): `count` buffers of `size` bytes each, backed by
    /// one pool block per buffer, tagged for later GC.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::pool::MemoryPool::alloc`] failures.
    pub fn allocate_buffers(
        &self,
        pool: &mut MemoryPool,
        endpoint: Endpoint,
        count: u32,
        size: usize,
    ) -> CoreResult<Vec<Buffer>> {
        let mut buffers = Vec::with_capacity(count as usize);
        for buffer_id in 0..count {
            let block = pool.alloc(size, BlockFlags::READWRITE | BlockFlags::MAP)?;
            pool.set_tag(
                &block,
                [
                    endpoint.node_id as u32,
                    endpoint.port_id,
                    endpoint.mix_id,
                    buffer_id,
                    0,
                ],
            );
            let data = Data::new_mem_fd(block, 0, size);
            buffers.push(Buffer::new(buffer_id, vec![data]));
        }
        Ok(buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MemoryPool;
    use pwgraph_spa::{NullNode, PodValue};

    fn endpoint(node_id: u64) -> Endpoint {
        Endpoint {
            node_id,
            port_id: 0,
            mix_id: crate::port::INVALID_MIX_ID,
        }
    }

    fn sample_node(id: u64) -> Node {
        Node::new(id, Box::new(NullNode::default()))
    }

    #[test]
    fn negotiate_format_picks_common_value() {
        let mut link = Link::new(0, endpoint(1), endpoint(2));
        let shared = Param::new(ParamId::EnumFormat, PodValue::new(vec![1, 2, 3]));
        let other = Param::new(ParamId::EnumFormat, PodValue::new(vec![9, 9]));
        let result = link
            .negotiate_format(&[other, shared.clone()], &[shared])
            .unwrap();
        assert_eq!(result.id, ParamId::Format);
    }

    #[test]
    fn negotiate_format_fails_without_intersection() {
        let mut link = Link::new(0, endpoint(1), endpoint(2));
        let a = Param::new(ParamId::EnumFormat, PodValue::new(vec![1]));
        let b = Param::new(ParamId::EnumFormat, PodValue::new(vec![2]));
        let err = link.negotiate_format(&[a], &[b]).unwrap_err();
        assert!(matches!(err, CoreError::NoCommonFormat));
    }

    #[test]
    fn negotiate_buffers_prefers_output_when_it_can_allocate() {
        let mut link = Link::new(0, endpoint(1), endpoint(2));
        let buf = Param::new(ParamId::Buffers, PodValue::new(vec![4]));
        let (allocator, _) = link
            .negotiate_buffers(true, &[buf.clone()], &[buf])
            .unwrap();
        assert_eq!(allocator, Allocator::Output);
    }

    #[test]
    fn negotiate_buffers_falls_back_to_input_when_output_cannot_allocate() {
        let mut link = Link::new(0, endpoint(1), endpoint(2));
        let buf = Param::new(ParamId::Buffers, PodValue::new(vec![4]));
        let (allocator, _) = link
            .negotiate_buffers(false, &[buf.clone()], &[buf])
            .unwrap();
        assert_eq!(allocator, Allocator::Input);
    }

    #[test]
    fn activate_wires_target_list_and_bumps_required() {
        let mut link = Link::new(0, endpoint(1), endpoint(2));
        let mut out_node = sample_node(1);
        let mut in_node = sample_node(2);
        assert_eq!(in_node.activation().required(), 0);
        link.activate(&mut out_node, &mut in_node).unwrap();
        assert_eq!(out_node.target_list().len(), 1);
        assert_eq!(in_node.activation().required(), 1);
        assert_eq!(link.state(), LinkState::Active);
    }

    #[test]
    fn deactivate_reverses_activate() {
        let mut link = Link::new(0, endpoint(1), endpoint(2));
        let mut out_node = sample_node(1);
        let mut in_node = sample_node(2);
        link.activate(&mut out_node, &mut in_node).unwrap();
        link.deactivate(&mut out_node, &mut in_node);
        assert_eq!(out_node.target_list().len(), 0);
        assert_eq!(in_node.activation().required(), 0);
        assert_eq!(link.state(), LinkState::Inactive);
    }

    #[test]
    fn destroy_frees_tagged_pool_blocks() {
        let mut link = Link::new(0, endpoint(1), endpoint(2));
        let mut out_node = sample_node(1);
        let mut in_node = sample_node(2);
        let mut pool = MemoryPool::new();
        link.activate(&mut out_node, &mut in_node).unwrap();
        link.allocate_io_area(&mut pool).unwrap();
        assert_eq!(pool.block_count(), 1);
        link.destroy(&mut out_node, &mut in_node, &mut pool);
        assert_eq!(pool.block_count(), 0);
    }
}
