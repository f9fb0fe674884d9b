//! Memory pool (spec §4.1): allocates named, shareable, file-descriptor
//! backed blocks and memory-mapped slices over them.
//!
//! Mutated only on the main loop (spec §5 "Shared resources"); data loops
//! only ever read mappings handed to them during topology setup.

use crate::error::{CoreError, CoreResult};
use memmap2::MmapMut;
use nix::fcntl::{fcntl, FcntlArg, SealFlag};
use nix::sys::memfd::{memfd_create, MFdFlags};
use nix::unistd::ftruncate;
use std::collections::HashMap;
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

bitflags::bitflags! {
    /// Flags controlling how [`MemoryPool::alloc`] creates a block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u32 {
        /// Map the block read-write (default is read-only once sealed).
        const READWRITE = 1 << 0;
        /// Map the block immediately after allocation.
        const MAP = 1 << 1;
        /// Apply shrink/grow seals once the block's final size is set.
        const SEAL = 1 << 2;
        /// Block backs a dma-buf rather than a memfd (imported only; `alloc`
        /// rejects this flag).
        const DMA = 1 << 3;
    }
}

/// Up-to-5-`u32` tuple identifying a block's purpose and owner, enabling
/// garbage collection by tag (spec §3 "Memory pool").
///
/// Typical tag shape per spec §4.7: `(node_id, direction, port_id, mix_id,
/// buffer_id)`.
pub type Tag = [u32; 5];

struct BlockInner {
    id: u32,
    file: File,
    size: parking_lot::RwLock<usize>,
    flags: BlockFlags,
    tag: parking_lot::RwLock<Option<Tag>>,
}

/// A handle to a pool-owned block. Cloning shares the same underlying file
/// descriptor; the fd is closed exactly once, when the last clone (and any
/// [`Mapping`] holding one) is dropped.
#[derive(Clone)]
pub struct MemBlock(Arc<BlockInner>);

impl MemBlock {
    /// The block's pool-assigned id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.0.id
    }

    /// Current size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        *self.0.size.read()
    }

    /// The flags the block was allocated or imported with.
    #[must_use]
    pub fn flags(&self) -> BlockFlags {
        self.0.flags
    }

    /// The block's tag, if any.
    #[must_use]
    pub fn tag(&self) -> Option<Tag> {
        *self.0.tag.read()
    }

    /// Raw fd for this block, for handing to a peer via `SCM_RIGHTS` (the
    /// actual ancillary-data send is the protocol layer's job; out of
    /// scope here).
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.0.file.as_raw_fd()
    }
}

/// A live mmap over a `(block, offset, size)` region. Multiple calls to
/// [`MemoryPool::map`] with the same tuple share one underlying mapping via
/// reference counting; the mapping is unmapped when the last `Mapping` for
/// that tuple is dropped.
pub struct Mapping {
    block: MemBlock,
    offset: usize,
    len: usize,
    mmap: parking_lot::Mutex<MmapMut>,
}

impl Mapping {
    /// The block this mapping is over.
    #[must_use]
    pub fn block(&self) -> &MemBlock {
        &self.block
    }

    /// Offset into the block this mapping starts at.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the mapped region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the mapping covers zero bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Run `f` with exclusive access to the mapped bytes.
    ///
    /// A `Mutex` guards concurrent access from this process; cross-process
    /// synchronization of the bytes themselves is the caller's
    /// responsibility (IO areas use their own lock-free protocol, spec
    /// §5).
    pub fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.mmap.lock();
        f(&mut guard[..])
    }
}

#[derive(Hash, PartialEq, Eq, Clone, Copy)]
struct MappingKey {
    block_id: u32,
    offset: usize,
    len: usize,
}

/// Pool of blocks addressed by 32-bit ids (spec §3 "Memory pool").
#[derive(Default)]
pub struct MemoryPool {
    blocks: HashMap<u32, MemBlock>,
    mappings: HashMap<MappingKey, Weak<Mapping>>,
    next_id: u32,
}

impl MemoryPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a memfd-backed block of `size` bytes.
    ///
    /// # Errors
    ///
    /// [`CoreError::Io`] if `memfd_create`, `ftruncate`, or sealing fails;
    /// `BlockFlags::DMA` is rejected with [`CoreError::NoCommonFormat`]
    /// since dma-bufs can only be adopted via [`Self::import`].
    pub fn alloc(&mut self, size: usize, flags: BlockFlags) -> CoreResult<MemBlock> {
        if flags.contains(BlockFlags::DMA) {
            return Err(CoreError::NoCommonFormat);
        }

        let name = std::ffi::CString::new("pwgraph-pool").expect("no interior NUL");
        let owned_fd: OwnedFd = memfd_create(&name, MFdFlags::MFD_CLOEXEC | MFdFlags::MFD_ALLOW_SEALING)?;
        let file = File::from(owned_fd);
        ftruncate(&file, size as i64)?;

        if flags.contains(BlockFlags::SEAL) {
            fcntl(
                file.as_raw_fd(),
                FcntlArg::F_ADD_SEALS(SealFlag::F_SEAL_SHRINK | SealFlag::F_SEAL_GROW),
            )?;
        }

        let id = self.next_id;
        self.next_id += 1;

        let block = MemBlock(Arc::new(BlockInner {
            id,
            file,
            size: parking_lot::RwLock::new(size),
            flags,
            tag: parking_lot::RwLock::new(None),
        }));
        self.blocks.insert(id, block.clone());
        debug!(id, size, ?flags, "allocated pool block");

        if flags.contains(BlockFlags::MAP) {
            let _ = self.map(&block, 0, size, flags)?;
        }

        Ok(block)
    }

    /// Tag an existing block for later lookup via [`Self::find_tag`] /
    /// [`Self::gc_by_tag`].
    pub fn set_tag(&mut self, block: &MemBlock, tag: Tag) {
        *block.0.tag.write() = Some(tag);
    }

    /// Look up a block by id.
    #[must_use]
    pub fn find_id(&self, id: u32) -> Option<MemBlock> {
        self.blocks.get(&id).cloned()
    }

    /// Look up the first block carrying `tag`.
    #[must_use]
    pub fn find_tag(&self, tag: Tag) -> Option<MemBlock> {
        self.blocks.values().find(|b| b.tag() == Some(tag)).cloned()
    }

    /// Free every block whose tag matches `tag`, dropping the pool's
    /// reference. Blocks with live mappings or external [`MemBlock`]
    /// clones are unaffected until those drop too (spec §4.1 invariant).
    pub fn gc_by_tag(&mut self, tag: Tag) -> usize {
        let ids: Vec<u32> = self
            .blocks
            .iter()
            .filter(|(_, b)| b.tag() == Some(tag))
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.blocks.remove(id);
        }
        trace!(tag = ?tag, freed = ids.len(), "gc_by_tag");
        ids.len()
    }

    /// Adopt an externally-received fd (e.g. from `SCM_RIGHTS`) as a block.
    ///
    /// # Errors
    ///
    /// [`CoreError::Io`] with `EBADFD`-class errors if `fd` is invalid.
    pub fn import(&mut self, fd: OwnedFd, size: usize, flags: BlockFlags) -> CoreResult<MemBlock> {
        let file = File::from(fd);
        // Validate the fd is alive by probing its metadata; an invalid fd
        // surfaces here rather than at first use.
        file.metadata().map_err(CoreError::Io)?;

        let id = self.next_id;
        self.next_id += 1;
        let block = MemBlock(Arc::new(BlockInner {
            id,
            file,
            size: parking_lot::RwLock::new(size),
            flags,
            tag: parking_lot::RwLock::new(None),
        }));
        self.blocks.insert(id, block.clone());
        debug!(id, size, "imported external block");
        Ok(block)
    }

    /// Resize a block in place (supplement to spec §4.1, see SPEC_FULL.md):
    /// valid only for unsealed, `READWRITE` blocks with no live mappings,
    /// used when a link renegotiates buffer count without a format change.
    pub fn resize(&mut self, block: &MemBlock, new_size: usize) -> CoreResult<()> {
        if !block.flags().contains(BlockFlags::READWRITE) {
            return Err(CoreError::AccessDenied);
        }
        let key_prefix = block.id();
        if self.mappings.keys().any(|k| k.block_id == key_prefix) {
            return Err(CoreError::NegotiationBusy);
        }
        ftruncate(&block.0.file, new_size as i64)?;
        *block.0.size.write() = new_size;
        Ok(())
    }

    /// Mmap `size` bytes at `offset` into `block`, sharing the mapping with
    /// any other live [`Mapping`] over the same `(block, offset, size)`
    /// tuple.
    ///
    /// # Errors
    ///
    /// [`CoreError::AccessDenied`] if `READWRITE` was requested on a block
    /// not opened for writing; [`CoreError::Io`] if the `mmap(2)` call
    /// itself fails.
    pub fn map(
        &mut self,
        block: &MemBlock,
        offset: usize,
        size: usize,
        flags: BlockFlags,
    ) -> CoreResult<Arc<Mapping>> {
        let key = MappingKey {
            block_id: block.id(),
            offset,
            len: size,
        };
        if let Some(existing) = self.mappings.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        if flags.contains(BlockFlags::READWRITE) && !block.flags().contains(BlockFlags::READWRITE) {
            return Err(CoreError::AccessDenied);
        }

        // SAFETY: the backing file is a memfd or adopted fd whose lifetime
        // is tied to `block` (kept alive by the `Arc` this `Mapping` holds);
        // nothing else in this process truncates it out from under us
        // between the offset/size check above and this call.
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .offset(offset as u64)
                .len(size)
                .map_mut(block.0.file.as_fd())
        }
        .map_err(CoreError::Io)?;

        let mapping = Arc::new(Mapping {
            block: block.clone(),
            offset,
            len: size,
            mmap: parking_lot::Mutex::new(mmap),
        });
        self.mappings.insert(key, Arc::downgrade(&mapping));
        trace!(id = block.id(), offset, size, "mapped pool block region");
        Ok(mapping)
    }

    /// Number of blocks currently tracked by the pool.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_map_round_trip() {
        let mut pool = MemoryPool::new();
        let block = pool
            .alloc(4096, BlockFlags::READWRITE | BlockFlags::MAP)
            .unwrap();
        assert_eq!(block.size(), 4096);

        let mapping = pool.map(&block, 0, 4096, BlockFlags::READWRITE).unwrap();
        mapping.with_bytes(|bytes| bytes[0] = 0xAB);
        assert_eq!(mapping.len(), 4096);
    }

    #[test]
    fn repeated_map_shares_mapping() {
        let mut pool = MemoryPool::new();
        let block = pool.alloc(4096, BlockFlags::READWRITE).unwrap();
        let a = pool.map(&block, 0, 4096, BlockFlags::READWRITE).unwrap();
        let b = pool.map(&block, 0, 4096, BlockFlags::READWRITE).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn find_id_and_tag() {
        let mut pool = MemoryPool::new();
        let block = pool.alloc(1024, BlockFlags::READWRITE).unwrap();
        let id = block.id();
        pool.set_tag(&block, [1, 0, 2, 0, 3]);
        assert!(pool.find_id(id).is_some());
        assert!(pool.find_tag([1, 0, 2, 0, 3]).is_some());
        assert!(pool.find_tag([9, 9, 9, 9, 9]).is_none());
    }

    #[test]
    fn gc_by_tag_drops_pool_reference() {
        let mut pool = MemoryPool::new();
        let block = pool.alloc(1024, BlockFlags::READWRITE).unwrap();
        pool.set_tag(&block, [7, 0, 0, 0, 0]);
        assert_eq!(pool.gc_by_tag([7, 0, 0, 0, 0]), 1);
        assert_eq!(pool.block_count(), 0);
        // The caller's own clone keeps the fd alive until it drops too.
        assert_eq!(block.size(), 1024);
    }

    #[test]
    fn dma_flag_rejected_on_alloc() {
        let mut pool = MemoryPool::new();
        let err = pool.alloc(1024, BlockFlags::DMA).unwrap_err();
        assert!(matches!(err, CoreError::NoCommonFormat));
    }
}
