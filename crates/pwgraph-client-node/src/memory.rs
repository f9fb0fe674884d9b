//! Memory exchange by id (spec §4.10 "Memory is exchanged by id").

use std::os::fd::RawFd;

/// The kind of memory an `add_mem` message describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemType {
    /// A memfd-backed pool block.
    MemFd,
    /// A DMA-BUF fd, passed through opaque.
    DmaBuf,
}

/// One `add_mem(mem_id, type, fd, flags, offset, size)` message (spec
/// §4.10): announces a block the sender wants the receiver to map, keyed
/// by `mem_id` for later reference from `port_set_io`/`port_use_buffers`
/// messages.
#[derive(Debug, Clone, Copy)]
pub struct AddMem {
    /// Id other messages reference this block by.
    pub mem_id: u32,
    /// Transport kind.
    pub mem_type: MemType,
    /// The file descriptor (received via `SCM_RIGHTS` in the real
    /// deployment; carried directly here since marshaling is out of
    /// scope).
    pub fd: RawFd,
    /// Pool block flags to map with.
    pub flags: pwgraph_core::pool::BlockFlags,
    /// Offset into the block.
    pub offset: usize,
    /// Size to map.
    pub size: usize,
}

/// The client's cache of blocks announced via `add_mem`, keyed by
/// `mem_id` and by the pool tag they were imported with, so a repeated
/// `add_mem` for a block already mapped (e.g. a link renegotiation)
/// reuses the existing mapping rather than importing the fd twice (spec
/// §4.10 "client maps them and caches the mapping keyed by tag").
#[derive(Default)]
pub struct MemCache {
    by_mem_id: std::collections::HashMap<u32, pwgraph_core::pool::MemBlock>,
}

impl MemCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Import `msg.fd` into `pool` and cache it under `msg.mem_id`. If
    /// `mem_id` is already cached, returns the existing block without
    /// re-importing (idempotent, spec §8 law 7).
    ///
    /// # Errors
    ///
    /// Propagates [`pwgraph_core::pool::MemoryPool::import`] failures.
    pub fn add_mem(
        &mut self,
        pool: &mut pwgraph_core::pool::MemoryPool,
        msg: AddMem,
        owned_fd: std::os::fd::OwnedFd,
    ) -> pwgraph_core::CoreResult<pwgraph_core::pool::MemBlock> {
        if let Some(existing) = self.by_mem_id.get(&msg.mem_id) {
            return Ok(existing.clone());
        }
        let block = pool.import(owned_fd, msg.size, msg.flags)?;
        self.by_mem_id.insert(msg.mem_id, block.clone());
        Ok(block)
    }

    /// Look up a previously cached block.
    #[must_use]
    pub fn get(&self, mem_id: u32) -> Option<&pwgraph_core::pool::MemBlock> {
        self.by_mem_id.get(&mem_id)
    }

    /// Drop a cached block, e.g. when the sender releases a binding with
    /// `mem_id = INVALID` and this was the last reference.
    pub fn remove(&mut self, mem_id: u32) {
        self.by_mem_id.remove(&mem_id);
    }
}
