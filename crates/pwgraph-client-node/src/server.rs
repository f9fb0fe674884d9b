//! The server side of client-node remoting (spec §4.10): the in-process
//! stub a [`pwgraph_core::node::Node`] wraps to mirror an out-of-process
//! node. Forwards control-plane calls to the remote client over a
//! [`crate::transport::ServerTransport`]; `process()` touches only the
//! shared activation record and the client's wakeup eventfd, never the
//! transport (spec §4.10 "During `process()`, no control messages are
//! exchanged").

use crate::error::ClientNodeResult;
use crate::opcode::ServerMessage;
use crate::transport::ServerTransport;
use crate::version::NegotiatedVersion;
use pwgraph_spa::{
    Command, Direction, IoType, NodeEvents, Param, ParamFlags, ParamId, ProcessStatus, SpaError,
    SpaNode, SpaResult,
};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use tracing::warn;

/// Key a remote node's `object.linger` property is read from (spec §4.10
/// "unless `object.linger=true` is set on its properties").
pub const LINGER_PROP: &str = "object.linger";

/// The in-process mirror of an out-of-process node.
///
/// Implements [`SpaNode`] so it slots directly into
/// [`pwgraph_core::node::Node`]; every mutating call is forwarded to the
/// client as a [`ServerMessage`] and returns immediately (the real
/// completion arrives later via the client's `result`/`event` messages,
/// delivered by whatever drains the transport and calls [`deliver`]).
pub struct ServerNodeStub {
    transport: Box<dyn ServerTransport>,
    version: NegotiatedVersion,
    wake_fd: Option<OwnedFd>,
    props: std::collections::HashMap<String, String>,
    listener: Option<Box<dyn NodeEvents>>,
}

impl ServerNodeStub {
    /// Wrap a transport already accepted from a client, with this
    /// server's declared version and the client's initial properties.
    #[must_use]
    pub fn new(
        transport: Box<dyn ServerTransport>,
        server_version: u32,
        props: std::collections::HashMap<String, String>,
    ) -> Self {
        Self {
            transport,
            version: NegotiatedVersion::new(0, server_version),
            wake_fd: None,
            props,
            listener: None,
        }
    }

    /// Record the client's declared version once its first message
    /// arrives, and the node's own properties if they changed (spec
    /// §4.10 "Versioning").
    pub fn set_client_version(&mut self, client_version: u32) {
        self.version = NegotiatedVersion::new(client_version, self.version.server_version);
    }

    /// Bind the client's activation record and wakeup fds (spec §4.10
    /// `transport(readfd, writefd, activation_mem_id, offset, size)`).
    ///
    /// # Errors
    ///
    /// [`crate::error::ClientNodeError::Disconnected`] if the transport
    /// has already closed.
    pub fn bind_transport(
        &mut self,
        write_fd: OwnedFd,
        activation_mem_id: u32,
        offset: usize,
        size: usize,
    ) -> ClientNodeResult<()> {
        let read_fd: RawFd = self.transport.as_raw_fd();
        let write_raw: RawFd = write_fd.as_raw_fd();
        self.wake_fd = Some(write_fd);
        self.transport.send(ServerMessage::Transport {
            read_fd,
            write_fd: write_raw,
            activation_mem_id,
            offset,
            size,
        })
    }

    /// The negotiated protocol version as currently known (spec §4.10
    /// "Versioning").
    #[must_use]
    pub fn version(&self) -> NegotiatedVersion {
        self.version
    }

    /// True if this node should survive its client disconnecting (spec
    /// §4.10 "the server destroys the mirrored node unless
    /// `object.linger=true`").
    #[must_use]
    pub fn should_linger(&self) -> bool {
        self.props.get(LINGER_PROP).is_some_and(|v| v == "true")
    }

    fn send(&mut self, message: ServerMessage) -> SpaResult<()> {
        self.transport.send(message).map_err(|e| {
            warn!(error = %e, "client-node transport send failed");
            SpaError::InvalidState
        })
    }

    fn wake_client(&self) {
        let Some(fd) = &self.wake_fd else { return };
        let one: u64 = 1;
        if let Err(e) = nix::unistd::write(fd.as_fd(), &one.to_ne_bytes()) {
            warn!(error = %e, "failed to wake client-node eventfd");
        }
    }
}

impl SpaNode for ServerNodeStub {
    fn add_listener(&mut self, listener: Box<dyn NodeEvents>) -> SpaResult<()> {
        self.listener = Some(listener);
        Ok(())
    }

    fn set_io(&mut self, io: IoType, area: Option<&mut [u8]>) -> SpaResult<()> {
        // `SpaNode::set_io` carries a borrowed byte slice, not a pool
        // memory id; the caller that actually owns the `MemBlock` behind
        // `area` (the graph node wiring in `pwgraph-core`) is responsible
        // for the mem-id-carrying variant of this message when one is
        // needed. This path only conveys bind/unbind and size.
        let size = area.map_or(0, <[u8]>::len);
        self.send(ServerMessage::SetIo {
            io_type: io,
            mem_id: None,
            offset: 0,
            size,
        })
    }

    fn port_set_io(
        &mut self,
        direction: Direction,
        port_id: u32,
        mix_id: u32,
        io: IoType,
        area: Option<&mut [u8]>,
    ) -> SpaResult<()> {
        let size = area.map_or(0, <[u8]>::len);
        self.send(ServerMessage::PortSetIo {
            direction,
            port_id,
            mix_id,
            io_type: io,
            mem_id: crate::opcode::INVALID_MEM_ID,
            offset: 0,
            size,
        })
    }

    fn enum_params(
        &mut self,
        _seq: u32,
        _id: ParamId,
        _start: u32,
        _num: u32,
        _filter: Option<&Param>,
    ) -> SpaResult<Vec<Param>> {
        // Enumeration results arrive asynchronously via the client's
        // `result` messages (spec §4.10), delivered through `deliver`
        // rather than returned synchronously here.
        Ok(Vec::new())
    }

    fn set_param(&mut self, flags: ParamFlags, param: Param) -> SpaResult<()> {
        self.send(ServerMessage::SetParam { param, flags })
    }

    fn port_set_param(
        &mut self,
        direction: Direction,
        port_id: u32,
        flags: ParamFlags,
        param: Param,
    ) -> SpaResult<()> {
        self.send(ServerMessage::PortSetParam {
            direction,
            port_id,
            param,
            flags,
        })
    }

    fn port_use_buffers(
        &mut self,
        direction: Direction,
        port_id: u32,
        mix_id: u32,
        buffer_ids: &[u32],
    ) -> SpaResult<()> {
        self.send(ServerMessage::PortUseBuffers {
            direction,
            port_id,
            mix_id,
            buffer_mem_ids: buffer_ids.to_vec(),
        })
    }

    fn port_alloc_buffers(
        &mut self,
        _direction: Direction,
        _port_id: u32,
        _mix_id: u32,
        _count: u32,
        _size: u32,
    ) -> SpaResult<Vec<u32>> {
        // A remote node never allocates buffers on the server's behalf;
        // the allocator side of a link always resolves to whichever peer
        // is actually local (spec §4.9 `negotiate_buffers`).
        Err(SpaError::NotSupported)
    }

    fn send_command(&mut self, command: Command) -> SpaResult<()> {
        self.send(ServerMessage::Command(command))
    }

    fn process(&mut self) -> SpaResult<ProcessStatus> {
        self.wake_client();
        Ok(ProcessStatus::HAVE_DATA)
    }

    fn sync(&mut self, seq: u32) -> SpaResult<()> {
        if let Some(listener) = &mut self.listener {
            listener.result(seq, 0, None);
        }
        Ok(())
    }
}

/// Inspect incoming client messages and update `stub`'s known version and
/// its listener's view of node/port info and async results. Does not
/// consume [`crate::opcode::ClientMessage::Update`]/`PortUpdate` params
/// beyond forwarding them to the listener; applying them to a live
/// [`pwgraph_core::node::Node`]'s ports is the caller's job since this
/// stub has no port table of its own.
pub fn deliver(stub: &mut ServerNodeStub, message: crate::opcode::ClientMessage) {
    use crate::opcode::ClientMessage;
    match message {
        ClientMessage::Update {
            max_input_ports,
            max_output_ports,
            ..
        } => {
            if let Some(listener) = &mut stub.listener {
                listener.info(max_input_ports, max_output_ports);
            }
        }
        ClientMessage::PortUpdate {
            direction, port_id, ..
        } => {
            if let Some(listener) = &mut stub.listener {
                listener.port_info(direction, port_id, false);
            }
        }
        ClientMessage::Result { seq, res, param } => {
            if let Some(listener) = &mut stub.listener {
                listener.result(seq, res, param);
            }
        }
        ClientMessage::Event { event_id } => {
            if let Some(listener) = &mut stub.listener {
                listener.event(event_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::loopback;

    #[test]
    fn should_linger_reads_object_linger_prop() {
        let pair = loopback();
        let mut props = std::collections::HashMap::new();
        props.insert(LINGER_PROP.to_string(), "true".to_string());
        let stub = ServerNodeStub::new(Box::new(pair.server), 1, props);
        assert!(stub.should_linger());
    }

    #[test]
    fn missing_linger_prop_means_destroy_on_disconnect() {
        let pair = loopback();
        let stub = ServerNodeStub::new(Box::new(pair.server), 1, std::collections::HashMap::new());
        assert!(!stub.should_linger());
    }

    #[test]
    fn set_param_forwards_to_transport() {
        let pair = loopback();
        let mut stub = ServerNodeStub::new(Box::new(pair.server), 1, std::collections::HashMap::new());
        stub.set_param(
            ParamFlags::empty(),
            Param::new(ParamId::Props, pwgraph_spa::PodValue::new(vec![1, 2, 3])),
        )
        .unwrap();
        let mut client = pair.client;
        let received = client.try_recv().unwrap().unwrap();
        assert!(matches!(received, ServerMessage::SetParam { .. }));
    }

    #[test]
    fn sync_delivers_result_through_listener_immediately() {
        struct Capture(std::sync::Arc<std::sync::atomic::AtomicU32>);
        impl NodeEvents for Capture {
            fn result(&mut self, seq: u32, _res: i32, _param: Option<Param>) {
                self.0.store(seq, std::sync::atomic::Ordering::SeqCst);
            }
        }
        let pair = loopback();
        let mut stub = ServerNodeStub::new(Box::new(pair.server), 1, std::collections::HashMap::new());
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        stub.add_listener(Box::new(Capture(seen.clone()))).unwrap();
        stub.sync(42).unwrap();
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 42);
    }
}
