use core::ops::Range;

use super::Heap;
use crate::{
    arena::Arena,
    block::{self, OVERHEAD, Payload, Walk},
    free_list,
};

/// A snapshot of one block's boundary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub payload: Payload,
    /// Total size including header and footer.
    pub size: usize,
    pub allocated: bool,
}

impl BlockInfo {
    fn read(bytes: &[u8], bp: usize) -> Self {
        Self {
            payload: Payload::new(bp),
            size: block::size(bytes, bp),
            allocated: block::is_allocated(bytes, bp),
        }
    }

    /// Usable payload bytes.
    #[must_use]
    pub const fn payload_size(&self) -> usize {
        self.size - OVERHEAD
    }

    /// The arena range spanned by the block, header and footer included.
    #[must_use]
    pub fn span(&self) -> Range<usize> {
        let start = block::header(self.payload.offset());
        start..start + self.size
    }
}

/// Iterator over all blocks in address order. See [`Heap::blocks`].
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    bytes: &'a [u8],
    walk: Walk<'a>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let bp = self.walk.next()?;
        Some(BlockInfo::read(self.bytes, bp))
    }
}

/// Iterator over the free list from head to tail. See [`Heap::free_blocks`].
#[derive(Debug, Clone)]
pub struct FreeBlocks<'a> {
    bytes: &'a [u8],
    iter: Option<free_list::Iter<'a>>,
}

impl Iterator for FreeBlocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let bp = self.iter.as_mut()?.next()?;
        Some(BlockInfo::read(self.bytes, bp))
    }
}

impl<A> Heap<A>
where
    A: Arena,
{
    /// Walks every block between the prologue and the epilogue.
    ///
    /// Yields nothing for an uninitialized heap.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        let bytes = self.arena.bytes();
        let from = if self.initialized {
            self.first_block()
        } else {
            bytes.len() + 1
        };
        Blocks {
            bytes,
            walk: Walk::new(bytes, from),
        }
    }

    /// Walks the free list in list order.
    ///
    /// The walk trusts the links; use [`check`](Self::check) first when the
    /// heap may be damaged.
    #[must_use]
    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        let bytes = self.arena.bytes();
        FreeBlocks {
            bytes,
            iter: self
                .initialized
                .then(|| self.free_list.iter(bytes)),
        }
    }
}
