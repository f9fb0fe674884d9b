//! The client side of client-node remoting (spec §4.10): drives a local
//! [`pwgraph_spa::SpaNode`] on behalf of a remote server, translating
//! incoming [`ServerMessage`]s into node calls and memory imports, and
//! reporting back via [`ClientMessage`].
//!
//! Ordering assumption: request/reply correlation is simplified to "the
//! transport delivers messages in send order and every request gets
//! exactly one reply before the next is issued" — a real FIFO stream
//! transport (a Unix socket, per spec §4.10) satisfies this; a `seq`
//! field on every server request is the full protocol's mechanism for
//! the general case, out of scope per the wire-marshaling non-goal.

use crate::error::{ClientNodeError, ClientNodeResult};
use crate::memory::MemCache;
use crate::mix_table::{MixKey, MixTable};
use crate::opcode::{ClientMessage, ServerMessage, INVALID_MEM_ID};
use crate::version::NegotiatedVersion;
use pwgraph_core::pool::{BlockFlags, MemoryPool};
use pwgraph_spa::{IoType, SpaNode};
use std::os::fd::OwnedFd;
use tracing::{debug, warn};

/// Drives a concrete [`SpaNode`] implementation from a remote server's
/// messages.
pub struct ClientNodeHandle<T: crate::transport::ClientTransport> {
    transport: T,
    pool: MemoryPool,
    mem_cache: MemCache,
    mix_table: MixTable,
    version: NegotiatedVersion,
}

impl<T: crate::transport::ClientTransport> ClientNodeHandle<T> {
    /// Wrap a transport already connected to a server, declaring this
    /// client's protocol version. `server_version` starts at `0` until
    /// the first message from the server updates it.
    #[must_use]
    pub fn new(transport: T, client_version: u32) -> Self {
        Self {
            transport,
            pool: MemoryPool::new(),
            mem_cache: MemCache::new(),
            mix_table: MixTable::new(),
            version: NegotiatedVersion::new(client_version, 0),
        }
    }

    /// The negotiated version as currently known (spec §4.10
    /// "Versioning").
    #[must_use]
    pub fn version(&self) -> NegotiatedVersion {
        self.version
    }

    /// The mix table this connection has built up from `port_set_mix_info`
    /// / `port_buffers` / `port_set_io` messages.
    #[must_use]
    pub fn mix_table(&self) -> &MixTable {
        &self.mix_table
    }

    /// Import a block announced out-of-band (e.g. via `SCM_RIGHTS`) under
    /// `mem_id`, for later reference by `port_set_io`/`port_use_buffers`
    /// messages that name it.
    ///
    /// # Errors
    ///
    /// Propagates [`MemoryPool::import`] failures.
    pub fn add_mem(&mut self, mem_id: u32, fd: OwnedFd, size: usize) -> ClientNodeResult<()> {
        let msg = crate::memory::AddMem {
            mem_id,
            mem_type: crate::memory::MemType::MemFd,
            fd: -1,
            flags: BlockFlags::READWRITE | BlockFlags::MAP,
            offset: 0,
            size,
        };
        self.mem_cache.add_mem(&mut self.pool, msg, fd)?;
        Ok(())
    }

    /// Drain and apply every [`ServerMessage`] currently pending, driving
    /// `node` and replying over the transport where a reply is expected.
    /// Returns the number of messages processed.
    ///
    /// # Errors
    ///
    /// [`ClientNodeError::Disconnected`] if the transport reports the
    /// server closed the connection mid-drain.
    pub fn dispatch_incoming(&mut self, node: &mut dyn SpaNode) -> ClientNodeResult<usize> {
        let mut processed = 0;
        while let Some(message) = self.transport.try_recv()? {
            self.apply(node, message)?;
            processed += 1;
        }
        Ok(processed)
    }

    fn apply(&mut self, node: &mut dyn SpaNode, message: ServerMessage) -> ClientNodeResult<()> {
        match message {
            ServerMessage::Transport { .. } => {
                debug!("transport binding received");
            }
            ServerMessage::SetParam { param, flags } => {
                let res = node.set_param(flags, param);
                self.reply(res.map_err(std::convert::Into::into))?;
            }
            ServerMessage::SetIo { io_type, mem_id, size, offset } => {
                self.apply_node_io(node, io_type, mem_id, offset, size)?;
            }
            ServerMessage::Event { event_id } => {
                self.transport.send(ClientMessage::Event { event_id })?;
            }
            ServerMessage::Command(command) => {
                let res = node.send_command(command);
                self.reply(res.map_err(std::convert::Into::into))?;
            }
            ServerMessage::AddPort { .. } | ServerMessage::RemovePort { .. } => {
                // Port lifecycle on a client-node is driven by the client's
                // own Update/PortUpdate reports (spec §4.10); the server
                // only mirrors what the client already announced, so there
                // is nothing further to apply to `node` here.
            }
            ServerMessage::PortSetParam {
                direction,
                port_id,
                param,
                flags,
            } => {
                let res = node.port_set_param(direction, port_id, flags, param);
                self.reply(res.map_err(std::convert::Into::into))?;
            }
            ServerMessage::PortUseBuffers {
                direction,
                port_id,
                mix_id,
                buffer_mem_ids,
            } => {
                self.mix_table.set_buffers(
                    MixKey {
                        direction,
                        port_id,
                        mix_id,
                    },
                    buffer_mem_ids.clone(),
                );
                let res = node.port_use_buffers(direction, port_id, mix_id, &buffer_mem_ids);
                self.reply(res.map_err(std::convert::Into::into))?;
            }
            ServerMessage::PortSetIo {
                direction,
                port_id,
                mix_id,
                io_type,
                mem_id,
                offset,
                size,
            } => {
                self.apply_port_io(node, direction, port_id, mix_id, io_type, mem_id, offset, size)?;
            }
            ServerMessage::SetActivation { .. } => {
                debug!("activation binding for a dynamic mix received");
            }
            ServerMessage::PortSetMixInfo {
                direction,
                port_id,
                mix_id,
                peer_id,
            } => {
                self.mix_table.set_peer(
                    MixKey {
                        direction,
                        port_id,
                        mix_id,
                    },
                    peer_id,
                );
            }
            ServerMessage::PortBuffers {
                direction,
                port_id,
                mix_id,
                buffer_mem_ids,
            } => {
                self.mix_table.set_buffers(
                    MixKey {
                        direction,
                        port_id,
                        mix_id,
                    },
                    buffer_mem_ids,
                );
            }
        }
        Ok(())
    }

    fn apply_node_io(
        &mut self,
        node: &mut dyn SpaNode,
        io_type: IoType,
        mem_id: Option<u32>,
        offset: usize,
        size: usize,
    ) -> ClientNodeResult<()> {
        let res = match mem_id {
            None | Some(INVALID_MEM_ID) => node.set_io(io_type, None),
            Some(id) => {
                let Some(block) = self.mem_cache.get(id).cloned() else {
                    return Err(ClientNodeError::UnknownMem(id));
                };
                let mapping = self
                    .pool
                    .map(&block, offset, size, BlockFlags::READWRITE)
                    .map_err(ClientNodeError::Core)?;
                mapping.with_bytes(|bytes| node.set_io(io_type, Some(bytes)))
            }
        };
        self.reply(res.map_err(std::convert::Into::into))
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_port_io(
        &mut self,
        node: &mut dyn SpaNode,
        direction: pwgraph_spa::Direction,
        port_id: u32,
        mix_id: u32,
        io_type: IoType,
        mem_id: u32,
        offset: usize,
        size: usize,
    ) -> ClientNodeResult<()> {
        self.mix_table.set_io(
            MixKey {
                direction,
                port_id,
                mix_id,
            },
            io_type,
            (mem_id != INVALID_MEM_ID).then_some(mem_id),
        );
        let res = if mem_id == INVALID_MEM_ID {
            node.port_set_io(direction, port_id, mix_id, io_type, None)
        } else {
            let Some(block) = self.mem_cache.get(mem_id).cloned() else {
                return Err(ClientNodeError::UnknownMix {
                    direction,
                    port_id,
                    mix_id,
                });
            };
            let mapping = self
                .pool
                .map(&block, offset, size, BlockFlags::READWRITE)
                .map_err(ClientNodeError::Core)?;
            mapping.with_bytes(|bytes| node.port_set_io(direction, port_id, mix_id, io_type, Some(bytes)))
        };
        self.reply(res.map_err(std::convert::Into::into))
    }

    fn reply(&mut self, result: ClientNodeResult<()>) -> ClientNodeResult<()> {
        match result {
            Ok(()) => self.transport.send(ClientMessage::Result {
                seq: 0,
                res: 0,
                param: None,
            }),
            Err(ClientNodeError::Node(spa_err)) => {
                warn!(error = %spa_err, "client-node request rejected by local node");
                self.transport.send(ClientMessage::Result {
                    seq: 0,
                    res: spa_err.errno(),
                    param: None,
                })
            }
            Err(ClientNodeError::Core(core_err)) => {
                warn!(error = %core_err, "client-node request failed");
                self.transport.send(ClientMessage::Result {
                    seq: 0,
                    res: core_err.errno(),
                    param: None,
                })
            }
            Err(other) => Err(other),
        }
    }
}
