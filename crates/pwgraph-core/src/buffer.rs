//! Buffers (spec §4.7): the data a port's mix exchanges with its peer,
//! plus the free-list lifecycle a port uses to recycle them.

use crate::pool::MemBlock;

/// How the bytes behind a [`Data`] are transported between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// A memory-mapped region inside a [`crate::pool::MemBlock`].
    MemFd,
    /// A DMA-BUF file descriptor, passed through opaque (spec §1
    /// Non-goals: this engine never maps or reads DMA-BUF contents).
    DmaBuf,
    /// A plain heap allocation, used for in-process-only graphs (tests,
    /// the reference CLI) where no fd needs to cross a process boundary.
    MemPtr,
}

/// One contiguous span of valid data within a [`Data`]'s backing memory
/// (spec §4.7 `chunk {offset, size, stride, flags}`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset of valid data within the `Data`'s region.
    pub offset: u32,
    /// Length in bytes of valid data.
    pub size: u32,
    /// Stride in bytes between logical elements, `0` if not applicable.
    pub stride: i32,
    /// Producer-set flags (e.g. discontinuity marker).
    pub flags: u32,
}

/// One data plane of a buffer (spec §4.7 `Data {type, fd, mapoffset,
/// maxsize, pointer, chunk}`).
#[derive(Clone)]
pub struct Data {
    data_type: DataType,
    block: Option<MemBlock>,
    map_offset: usize,
    max_size: usize,
    chunk: Chunk,
}

impl Data {
    /// A data plane backed by a mapped pool block.
    #[must_use]
    pub fn new_mem_fd(block: MemBlock, map_offset: usize, max_size: usize) -> Self {
        Self {
            data_type: DataType::MemFd,
            block: Some(block),
            map_offset,
            max_size,
            chunk: Chunk::default(),
        }
    }

    /// A data plane with no backing allocation yet (port negotiated a
    /// format but buffers haven't been allocated/assigned).
    #[must_use]
    pub fn empty(max_size: usize) -> Self {
        Self {
            data_type: DataType::MemPtr,
            block: None,
            map_offset: 0,
            max_size,
            chunk: Chunk::default(),
        }
    }

    /// Which transport this plane uses.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The backing pool block, if any.
    #[must_use]
    pub fn block(&self) -> Option<&MemBlock> {
        self.block.as_ref()
    }

    /// Offset into the mapped block where this plane's bytes start.
    #[must_use]
    pub const fn map_offset(&self) -> usize {
        self.map_offset
    }

    /// Capacity in bytes.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// The currently valid sub-range.
    #[must_use]
    pub const fn chunk(&self) -> Chunk {
        self.chunk
    }

    /// Producer: publish `chunk` as the valid region for this cycle.
    pub fn set_chunk(&mut self, chunk: Chunk) {
        self.chunk = chunk;
    }
}

/// Per-buffer metadata blocks (spec §4.7 "Meta types"): header, ring, and
/// opaque/unknown kinds the engine passes through without interpreting.
#[derive(Debug, Clone)]
pub enum Meta {
    /// `{seq, pts, dts_offset, flags}`-style free-form header bytes.
    Header(Vec<u8>),
    /// Ring-buffer bookkeeping (`read_index`, `write_index`), used when a
    /// port negotiates a ring-mode buffer layout.
    Ring {
        /// Consumer's read cursor.
        read_index: u32,
        /// Producer's write cursor.
        write_index: u32,
    },
    /// Any metadata kind this engine doesn't need to interpret, carried
    /// through untouched (spec §1 Non-goals: opaque format payloads).
    Opaque(Vec<u8>),
}

/// One exchangeable unit of data: a set of [`Data`] planes plus metadata,
/// identified by a buffer id local to its port mix (spec §4.7).
pub struct Buffer {
    id: u32,
    datas: Vec<Data>,
    metas: Vec<Meta>,
}

impl Buffer {
    /// Construct a buffer with the given id and data planes.
    #[must_use]
    pub fn new(id: u32, datas: Vec<Data>) -> Self {
        Self {
            id,
            datas,
            metas: Vec::new(),
        }
    }

    /// This buffer's id, local to the owning port mix's buffer pool.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// The data planes.
    #[must_use]
    pub fn datas(&self) -> &[Data] {
        &self.datas
    }

    /// Mutable access to the data planes, for a producer writing chunks.
    pub fn datas_mut(&mut self) -> &mut [Data] {
        &mut self.datas
    }

    /// The metadata blocks.
    #[must_use]
    pub fn metas(&self) -> &[Meta] {
        &self.metas
    }

    /// Attach a metadata block.
    pub fn add_meta(&mut self, meta: Meta) {
        self.metas.push(meta);
    }
}

/// A port mix's pool of negotiated buffers plus a free list (spec §4.7
/// "free-list lifecycle"): `port_use_buffers` populates `buffers`, then
/// producer and consumer hand buffer ids back and forth via
/// [`crate::io::IoBuffers`] rather than through this list directly — the
/// free list tracks which ids are available to be handed to the producer
/// next, separate from the single in-flight slot the IO area exposes.
#[derive(Default)]
pub struct BufferPool {
    buffers: Vec<Buffer>,
    free: Vec<u32>,
}

impl BufferPool {
    /// An empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the negotiated buffer set (`port_use_buffers`); all buffers
    /// start on the free list.
    pub fn set_buffers(&mut self, buffers: Vec<Buffer>) {
        self.free = buffers.iter().map(Buffer::id).collect();
        self.buffers = buffers;
    }

    /// Clear the negotiated buffers (`port_use_buffers` with an empty
    /// set, used to tear down before renegotiating format).
    pub fn clear(&mut self) {
        self.buffers.clear();
        self.free.clear();
    }

    /// Number of negotiated buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffers are negotiated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Look up a buffer by id.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Buffer> {
        self.buffers.iter().find(|b| b.id() == id)
    }

    /// Mutable lookup by id, for a producer filling in chunks.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Buffer> {
        self.buffers.iter_mut().find(|b| b.id() == id)
    }

    /// Pop the next free buffer id for a producer to fill.
    pub fn acquire(&mut self) -> Option<u32> {
        self.free.pop()
    }

    /// Return a consumed buffer id to the free list. Idempotent: pushing
    /// an id already on the list is a caller bug but is tolerated rather
    /// than corrupting the pool, matching the command idempotency law
    /// (spec §8 law 7).
    pub fn release(&mut self, id: u32) {
        if !self.free.contains(&id) {
            self.free.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_buffers(n: u32) -> Vec<Buffer> {
        (0..n)
            .map(|id| Buffer::new(id, vec![Data::empty(1024)]))
            .collect()
    }

    #[test]
    fn acquire_release_round_trip() {
        let mut pool = BufferPool::new();
        pool.set_buffers(sample_buffers(4));
        assert_eq!(pool.len(), 4);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b);
        pool.release(a);
        assert_eq!(pool.acquire(), Some(a));
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn release_is_idempotent() {
        let mut pool = BufferPool::new();
        pool.set_buffers(sample_buffers(2));
        let a = pool.acquire().unwrap();
        pool.release(a);
        pool.release(a);
        // both frees collapse to one entry, pool doesn't grow unbounded
        let mut count = 0;
        while pool.acquire().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn clear_empties_pool_for_renegotiation() {
        let mut pool = BufferPool::new();
        pool.set_buffers(sample_buffers(3));
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.acquire(), None);
    }

    #[test]
    fn buffer_chunk_is_settable_by_producer() {
        let mut buf = Buffer::new(0, vec![Data::empty(64)]);
        buf.datas_mut()[0].set_chunk(Chunk {
            offset: 0,
            size: 32,
            stride: 4,
            flags: 0,
        });
        assert_eq!(buf.datas()[0].chunk().size, 32);
    }
}
