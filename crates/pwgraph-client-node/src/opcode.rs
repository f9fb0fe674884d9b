//! Wire opcodes for the client-node protocol (spec §6 "Client-node wire
//! protocol"), named after their PipeWire counterparts (`remote-node.c`'s
//! `PW_CLIENT_NODE_*` change-mask bits and method table) but expressed as
//! a closed Rust enum per direction rather than a C change-mask.
//!
//! Marshaling these onto a concrete transport (a POD over a Unix socket,
//! in the real deployment) is explicitly out of scope (spec §1
//! Non-goals "transport protocols and wire marshaling"); this module only
//! fixes the vocabulary both sides agree on.

use pwgraph_spa::{Direction, Param};

/// Messages the server sends to the client (spec §6 "S→C").
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Bind the client's activation record and wakeup eventfds.
    Transport {
        /// Read side of the wakeup pipe/eventfd.
        read_fd: i32,
        /// Write side.
        write_fd: i32,
        /// Pool memory id backing the shared activation record.
        activation_mem_id: u32,
        /// Offset within that block.
        offset: usize,
        /// Size of the activation record.
        size: usize,
    },
    /// Push a node-level param.
    SetParam {
        /// Which param.
        param: Param,
        /// Apply flags.
        flags: pwgraph_spa::ParamFlags,
    },
    /// Bind a node-level IO area.
    SetIo {
        /// IO area kind.
        io_type: pwgraph_spa::IoType,
        /// Pool memory id, `None` to unbind.
        mem_id: Option<u32>,
        /// Offset within the block.
        offset: usize,
        /// Size of the area, `0` to unbind.
        size: usize,
    },
    /// An opaque node event.
    Event {
        /// Event id.
        event_id: u32,
    },
    /// A lifecycle command (spec §4.5 `send_command`).
    Command(pwgraph_spa::Command),
    /// Add a port.
    AddPort {
        /// Direction of the new port.
        direction: Direction,
        /// Port id.
        port_id: u32,
    },
    /// Remove a port.
    RemovePort {
        /// Direction of the removed port.
        direction: Direction,
        /// Port id.
        port_id: u32,
    },
    /// Push a port-level param.
    PortSetParam {
        /// Which port.
        direction: Direction,
        /// Port id.
        port_id: u32,
        /// The param.
        param: Param,
        /// Apply flags.
        flags: pwgraph_spa::ParamFlags,
    },
    /// Bind externally-allocated buffers to a port mix.
    PortUseBuffers {
        /// Direction.
        direction: Direction,
        /// Port id.
        port_id: u32,
        /// Mix id.
        mix_id: u32,
        /// Memory ids backing each buffer, empty to release.
        buffer_mem_ids: Vec<u32>,
    },
    /// Bind a port-level IO area (spec §4.5 `port_set_io`).
    PortSetIo {
        /// Direction.
        direction: Direction,
        /// Port id.
        port_id: u32,
        /// Mix id.
        mix_id: u32,
        /// IO area kind.
        io_type: pwgraph_spa::IoType,
        /// Pool memory id, [`INVALID_MEM_ID`] releases the binding (spec
        /// §4.10 "`port_set_io(id, mem_id=INVALID)` releases a
        /// binding").
        mem_id: u32,
        /// Offset within the block.
        offset: usize,
        /// Size of the area.
        size: usize,
    },
    /// Install the shared activation record for a specific mix (used
    /// when a port's dynamic mixes each need their own mapping).
    SetActivation {
        /// Direction.
        direction: Direction,
        /// Port id.
        port_id: u32,
        /// Mix id.
        mix_id: u32,
        /// Pool memory id backing the activation record.
        mem_id: u32,
    },
    /// Add or remove a mix on a port (spec §4.10 "`port_set_mix_info`").
    PortSetMixInfo {
        /// Direction.
        direction: Direction,
        /// Port id.
        port_id: u32,
        /// Mix id.
        mix_id: u32,
        /// The peer node id on the other end of this mix, `None` removes
        /// it.
        peer_id: Option<u64>,
    },
    /// Hand buffer descriptors for a port mix to the client.
    PortBuffers {
        /// Direction.
        direction: Direction,
        /// Port id.
        port_id: u32,
        /// Mix id.
        mix_id: u32,
        /// Memory ids, one per buffer.
        buffer_mem_ids: Vec<u32>,
    },
}

/// Sentinel `mem_id` meaning "release this IO binding" (spec §4.10).
pub const INVALID_MEM_ID: u32 = u32::MAX;

/// Messages the client sends to the server (spec §6 "C→S").
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Node info + params update.
    Update {
        /// Updated node-level params, if any changed.
        params: Vec<Param>,
        /// Maximum input ports this node supports.
        max_input_ports: u32,
        /// Maximum output ports this node supports.
        max_output_ports: u32,
    },
    /// Port info + params update.
    PortUpdate {
        /// Direction.
        direction: Direction,
        /// Port id.
        port_id: u32,
        /// Updated port-level params.
        params: Vec<Param>,
    },
    /// An asynchronous reply to a server request (spec §4.5 "`result`
    /// callback").
    Result {
        /// The sequence number the server's request carried.
        seq: u32,
        /// Negative-errno on failure, `0` on success.
        res: i32,
        /// Returned param, if the request was a query.
        param: Option<Param>,
    },
    /// An opaque node event.
    Event {
        /// Event id.
        event_id: u32,
    },
}
