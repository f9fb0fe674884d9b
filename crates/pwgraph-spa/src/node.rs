//! The SPA node contract (spec §4.5): the plugin-side interface every graph
//! node wraps. Modeled as a trait object at the ABI boundary (loaded
//! plugins) and as a concrete type where the node implementation is known
//! at compile time (built-in nodes), per the "opaque handles with manual
//! vtables" rearchitecture note.

use crate::error::{SpaError, SpaResult};
use crate::param::{Direction, Param, ParamFlags, ParamId};
use std::fmt;

bitflags::bitflags! {
    /// Bitmask returned from [`SpaNode::process`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProcessStatus: u32 {
        /// The node consumed all available input and needs more to proceed.
        const NEED_DATA = 1 << 0;
        /// The node produced output data on at least one port.
        const HAVE_DATA = 1 << 1;
        /// The node has no more data to produce and will not be retriggered.
        const DRAINED   = 1 << 2;
        /// The node is stopped and `process()` was a no-op.
        const STOPPED   = 1 << 3;
    }
}

/// Transport commands sent to a node via [`SpaNode::send_command`].
///
/// Idempotent for same-state transitions per spec §4.5: issuing `Start` on
/// an already-running node, or `Suspend` on an already-suspended one, must
/// return `Ok(())` with no observable state change (spec §8 law 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Begin producing/consuming data; node becomes eligible for scheduling.
    Start,
    /// Stop scheduling but keep negotiated state (ports, buffers) intact.
    Pause,
    /// Release all negotiated state; the node returns to its initial state.
    Suspend,
    /// Drop all queued buffers without processing them.
    Flush,
    /// Ask an `ASYNC`-flagged node to run a pending unit of work now.
    RequestProcess,
}

/// Events a node emits to subscribed listeners.
///
/// Dispatched synchronously from whichever loop calls into the node — the
/// "frozen listener" idiom (spec §4.2 / §9) means a listener may add or
/// remove itself from within a callback; such mutations take effect only
/// after the current emission completes.
pub trait NodeEvents: Send {
    /// The node's basic info (flags, max ports, param count) changed, or
    /// this is the synchronous emission following `add_listener`.
    fn info(&mut self, _max_input_ports: u32, _max_output_ports: u32) {}

    /// A port was added or removed.
    fn port_info(&mut self, _direction: Direction, _port_id: u32, _removed: bool) {}

    /// Completion of an async method previously returned as
    /// `AsyncStatus::Pending(seq)`, or a lazily-enumerated param.
    fn result(&mut self, _seq: u32, _res: i32, _param: Option<Param>) {}

    /// An out-of-band event (xrun, buffer reuse request, ...).
    fn event(&mut self, _event_id: u32) {}
}

/// A no-op listener, useful as a default/placeholder subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEvents;
impl NodeEvents for NullEvents {}

/// The kind of shared-memory area an IO binding carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoType {
    /// Per-port single-slot buffer handoff (`io_buffers`).
    Buffers,
    /// Driver clock (`io_clock`).
    Clock,
    /// Driver position, embeds a clock (`io_position`).
    Position,
    /// Sample-rate-matching control area for resampling adapters.
    RateMatch,
    /// Double-buffered slots used under the `ASYNC` link mode.
    AsyncBuffers,
}

/// The plugin-side contract every graph [`crate::node`](mod@crate) wraps.
///
/// Every method may legitimately return [`SpaError`] per the negative-errno
/// convention in spec §4.5/§7; async-capable methods additionally return an
/// [`crate::error::AsyncStatus`] wrapper (kept separate here from the error
/// channel because "pending" is not a failure).
///
/// # Real-time safety
///
/// `process()` must not block, allocate, or take a blocking lock (spec
/// §5). Implementations backed by a real allocator must pre-size all
/// scratch state outside of `process()`.
pub trait SpaNode: Send {
    /// Subscribe to node events. Implementations must synchronously emit
    /// the current `info` (and, for existing ports, `port_info`) to the new
    /// listener before returning, so a late subscriber observes consistent
    /// state.
    fn add_listener(&mut self, listener: Box<dyn NodeEvents>) -> SpaResult<()>;

    /// Bind a node-level IO area (`Position` or `Clock`). `size == 0`
    /// unbinds. The node does not own `area`'s memory; it borrows it for as
    /// long as the binding is live.
    fn set_io(&mut self, io: IoType, area: Option<&mut [u8]>) -> SpaResult<()>;

    /// Bind a per-port, per-mix IO area. See [`Self::set_io`] for the
    /// `size == 0` unbind convention.
    fn port_set_io(
        &mut self,
        direction: Direction,
        port_id: u32,
        mix_id: u32,
        io: IoType,
        area: Option<&mut [u8]>,
    ) -> SpaResult<()>;

    /// Enumerate params matching `filter`, starting at `start`, at most
    /// `num` results. `seq` is echoed back through `result` deliveries so
    /// callers can correlate multiple in-flight enumerations.
    fn enum_params(
        &mut self,
        seq: u32,
        id: ParamId,
        start: u32,
        num: u32,
        filter: Option<&Param>,
    ) -> SpaResult<Vec<Param>>;

    /// Push a param onto the node. Unsupported params fail with
    /// [`SpaError::NotSupported`].
    fn set_param(&mut self, flags: ParamFlags, param: Param) -> SpaResult<()>;

    /// Port-level analogue of [`Self::set_param`].
    fn port_set_param(
        &mut self,
        direction: Direction,
        port_id: u32,
        flags: ParamFlags,
        param: Param,
    ) -> SpaResult<()>;

    /// Bind externally-allocated buffers to a port/mix.
    fn port_use_buffers(
        &mut self,
        direction: Direction,
        port_id: u32,
        mix_id: u32,
        buffer_ids: &[u32],
    ) -> SpaResult<()>;

    /// Ask the node to allocate `count` buffers of `size` bytes for a port.
    fn port_alloc_buffers(
        &mut self,
        direction: Direction,
        port_id: u32,
        mix_id: u32,
        count: u32,
        size: u32,
    ) -> SpaResult<Vec<u32>>;

    /// Drive a lifecycle transition. Idempotent for a no-op transition.
    fn send_command(&mut self, command: Command) -> SpaResult<()>;

    /// Run one scheduling cycle: consume input IO slots, produce output IO
    /// slots. Must not block (spec §5).
    fn process(&mut self) -> SpaResult<ProcessStatus>;

    /// Barrier for asynchronous operations: the implementation must emit a
    /// matching `result(seq, 0, None)` once every op submitted before this
    /// call has completed.
    fn sync(&mut self, seq: u32) -> SpaResult<()>;
}

impl fmt::Debug for dyn SpaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("dyn SpaNode").finish_non_exhaustive()
    }
}

/// A trivial [`SpaNode`] that accepts any param, allocates no buffers, and
/// always reports `HAVE_DATA`. Used by tests and as a scaffold for new
/// built-in node kinds.
#[derive(Default)]
pub struct NullNode {
    started: bool,
}

impl SpaNode for NullNode {
    fn add_listener(&mut self, _listener: Box<dyn NodeEvents>) -> SpaResult<()> {
        Ok(())
    }

    fn set_io(&mut self, _io: IoType, _area: Option<&mut [u8]>) -> SpaResult<()> {
        Ok(())
    }

    fn port_set_io(
        &mut self,
        _direction: Direction,
        _port_id: u32,
        _mix_id: u32,
        _io: IoType,
        _area: Option<&mut [u8]>,
    ) -> SpaResult<()> {
        Ok(())
    }

    fn enum_params(
        &mut self,
        _seq: u32,
        _id: ParamId,
        _start: u32,
        _num: u32,
        _filter: Option<&Param>,
    ) -> SpaResult<Vec<Param>> {
        Ok(Vec::new())
    }

    fn set_param(&mut self, _flags: ParamFlags, _param: Param) -> SpaResult<()> {
        Ok(())
    }

    fn port_set_param(
        &mut self,
        _direction: Direction,
        _port_id: u32,
        _flags: ParamFlags,
        _param: Param,
    ) -> SpaResult<()> {
        Ok(())
    }

    fn port_use_buffers(
        &mut self,
        _direction: Direction,
        _port_id: u32,
        _mix_id: u32,
        _buffer_ids: &[u32],
    ) -> SpaResult<()> {
        Ok(())
    }

    fn port_alloc_buffers(
        &mut self,
        _direction: Direction,
        _port_id: u32,
        _mix_id: u32,
        _count: u32,
        _size: u32,
    ) -> SpaResult<Vec<u32>> {
        Err(SpaError::NotSupported)
    }

    fn send_command(&mut self, command: Command) -> SpaResult<()> {
        match command {
            Command::Start => self.started = true,
            Command::Pause | Command::Suspend => self.started = false,
            Command::Flush | Command::RequestProcess => {}
        }
        Ok(())
    }

    fn process(&mut self) -> SpaResult<ProcessStatus> {
        if self.started {
            Ok(ProcessStatus::HAVE_DATA)
        } else {
            Ok(ProcessStatus::STOPPED)
        }
    }

    fn sync(&mut self, _seq: u32) -> SpaResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_start_command() {
        let mut node = NullNode::default();
        node.send_command(Command::Start).unwrap();
        assert_eq!(node.process().unwrap(), ProcessStatus::HAVE_DATA);
        // Re-issuing Start on a running node is a no-op transition.
        node.send_command(Command::Start).unwrap();
        assert_eq!(node.process().unwrap(), ProcessStatus::HAVE_DATA);
    }

    #[test]
    fn suspend_before_start_is_noop() {
        let mut node = NullNode::default();
        node.send_command(Command::Suspend).unwrap();
        assert_eq!(node.process().unwrap(), ProcessStatus::STOPPED);
    }
}
