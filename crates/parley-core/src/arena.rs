//! Fixed-capacity bump arena with checkpoint rewind.
//!
//! The arena is a flat byte buffer allocated once per endpoint. Allocations
//! bump a cursor forward and are never freed individually; space is reclaimed
//! only by rewinding the cursor (`pop`, `pop_to`, `restore_checkpoint`,
//! `clear`). Callers receive [`Block`] handles (offset + length) and reach the
//! bytes through [`Arena::bytes`] and [`Arena::bytes_mut`].
//!
//! # Invariants
//!
//! - `ARENA_BASE_POS <= pos <= capacity` after every operation
//! - Every block starts at a multiple of [`ARENA_ALIGN`]
//! - Checkpoints are popped strictly LIFO
//!
//! The arena keeps no per-block metadata. A block handed out before a rewind
//! still addresses the same bytes afterwards; not reusing it is the caller's
//! job.

use crate::error::ArenaError;

/// Offset of the first allocatable byte.
pub const ARENA_BASE_POS: usize = 0;

/// Alignment of every block: the platform pointer width.
pub const ARENA_ALIGN: usize = std::mem::size_of::<usize>();

/// Default arena capacity: 10 MiB.
pub const DEFAULT_ARENA_CAPACITY: usize = 10 * 1024 * 1024;

const fn align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Handle to a region carved from an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    offset: usize,
    len: usize,
}

impl Block {
    /// Offset of the first byte.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length blocks.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Snapshot of arena usage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArenaStats {
    /// Total capacity in bytes.
    pub capacity: usize,
    /// Bytes between the base and the cursor.
    pub used: usize,
    /// Bytes between the cursor and the end.
    pub available: usize,
    /// Highest cursor position reached.
    pub high_water: usize,
    /// Number of saved checkpoints.
    pub checkpoint_depth: usize,
    /// `used` as a percentage of the allocatable space.
    pub usage_percent: f64,
}

/// Bump allocator over a fixed buffer.
pub struct Arena {
    buf: Vec<u8>,
    pos: usize,
    high_water: usize,
    checkpoints: Vec<usize>,
}

impl Arena {
    /// Create an arena with `capacity` zeroed bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            pos: ARENA_BASE_POS.min(capacity),
            high_water: ARENA_BASE_POS.min(capacity),
            checkpoints: Vec::new(),
        }
    }

    /// Allocate `size` bytes at the next aligned offset.
    ///
    /// With `zero_fill` the block is cleared; otherwise it holds whatever a
    /// previous, rewound allocation left there.
    ///
    /// # Errors
    ///
    /// `Overflow` if the aligned end would pass the capacity. The cursor is
    /// unchanged.
    pub fn push(&mut self, size: usize, zero_fill: bool) -> Result<Block, ArenaError> {
        let Some((start, end)) = align_up(self.pos, ARENA_ALIGN)
            .and_then(|start| Some((start, start.checked_add(size)?)))
            .filter(|&(_, end)| end <= self.capacity())
        else {
            tracing::debug!(size, pos = self.pos, capacity = self.capacity(), "arena overflow");
            return Err(ArenaError::Overflow { requested: size, available: self.available() });
        };

        self.pos = end;
        self.high_water = self.high_water.max(end);

        if zero_fill {
            self.buf[start..end].fill(0);
        }

        Ok(Block { offset: start, len: size })
    }

    /// Allocate a block and copy `data` into it.
    pub fn push_copy(&mut self, data: &[u8]) -> Result<Block, ArenaError> {
        let block = self.push(data.len(), false)?;
        self.bytes_mut(block).copy_from_slice(data);
        Ok(block)
    }

    /// Move the cursor back by `size`, never below the base offset.
    pub fn pop(&mut self, size: usize) {
        let size = size.min(self.pos - ARENA_BASE_POS);
        self.pos -= size;
    }

    /// Rewind the cursor to `pos` if it is behind the cursor.
    pub fn pop_to(&mut self, pos: usize) {
        if pos < self.pos {
            self.pop(self.pos - pos);
        }
    }

    /// Push the cursor onto the checkpoint stack.
    pub fn save_checkpoint(&mut self) {
        self.checkpoints.push(self.pos);
    }

    /// Rewind to the most recent checkpoint and drop it.
    ///
    /// No-op when no checkpoint is saved.
    pub fn restore_checkpoint(&mut self) {
        if let Some(pos) = self.checkpoints.pop() {
            self.pop_to(pos);
        }
    }

    /// Rewind to the base offset and forget all checkpoints.
    pub fn clear(&mut self) {
        self.pos = ARENA_BASE_POS.min(self.capacity());
        self.checkpoints.clear();
    }

    /// Bytes of a block. Empty if the block lies outside this arena.
    pub fn bytes(&self, block: Block) -> &[u8] {
        self.buf.get(block.offset..block.end()).unwrap_or_default()
    }

    /// Mutable bytes of a block. Empty if the block lies outside this arena.
    pub fn bytes_mut(&mut self, block: Block) -> &mut [u8] {
        self.buf.get_mut(block.offset..block.end()).unwrap_or_default()
    }

    /// Current cursor.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Total capacity.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes allocated since the base offset.
    pub fn used(&self) -> usize {
        self.pos - ARENA_BASE_POS
    }

    /// Bytes left before the capacity, ignoring alignment padding.
    pub fn available(&self) -> usize {
        self.capacity() - self.pos
    }

    /// Depth of the checkpoint stack.
    pub fn checkpoint_depth(&self) -> usize {
        self.checkpoints.len()
    }

    /// Usage as a percentage of the allocatable space.
    #[allow(clippy::cast_precision_loss)]
    pub fn usage_percent(&self) -> f64 {
        let total = self.capacity().saturating_sub(ARENA_BASE_POS);
        if total == 0 {
            return 0.0;
        }
        self.used() as f64 / total as f64 * 100.0
    }

    /// Usage snapshot.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.capacity(),
            used: self.used(),
            available: self.available(),
            high_water: self.high_water,
            checkpoint_depth: self.checkpoint_depth(),
            usage_percent: self.usage_percent(),
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity())
            .field("pos", &self.pos)
            .field("checkpoints", &self.checkpoints.len())
            .finish_non_exhaustive()
    }
}
