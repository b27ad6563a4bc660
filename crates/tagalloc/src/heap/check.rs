//! Heap consistency checker.
//!
//! The checker walks the block sequence and the free list independently and
//! cross-checks them. It only reads the arena, and every read is bounds
//! checked first, so it is safe to run on a damaged heap.

use super::Heap;
use crate::{
    arena::Arena,
    block::{self, ALIGNMENT, DOUBLE_WORD_SIZE, MIN_BLOCK_SIZE, Tag},
    error::CheckError,
    free_list,
};

/// Summary of a heap that passed [`Heap::check`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Arena size in bytes, sentinels included.
    pub arena_size: usize,
    /// Number of blocks between prologue and epilogue.
    pub blocks: usize,
    pub free_blocks: usize,
    /// Bytes in allocated blocks, tags included.
    pub allocated_bytes: usize,
    /// Bytes in free blocks, tags included.
    pub free_bytes: usize,
    /// Size of the largest free block.
    pub largest_free: usize,
}

impl<A> Heap<A>
where
    A: Arena,
{
    /// Verifies every structural invariant of the heap.
    ///
    /// Checks the sentinels, the alignment and size of every block, that
    /// headers match footers, that no two free blocks are adjacent, that the
    /// free list holds exactly the free blocks with consistent links, and
    /// that the next-fit cursor sits on a block boundary.
    pub fn check(&self) -> Result<HeapStats, CheckError> {
        if !self.initialized {
            return Err(CheckError::Uninitialized);
        }
        let bytes = self.arena.bytes();
        let stats = self.check_blocks(bytes)?;
        self.check_free_list(bytes, &stats)?;
        Ok(stats)
    }

    fn check_blocks(&self, bytes: &[u8]) -> Result<HeapStats, CheckError> {
        let prologue = self.prologue;
        let expected = Tag::new(MIN_BLOCK_SIZE, true);
        if prologue + MIN_BLOCK_SIZE > bytes.len()
            || block::read_tag(bytes, block::header(prologue)) != expected
            || block::read_tag(bytes, prologue + MIN_BLOCK_SIZE - DOUBLE_WORD_SIZE) != expected
        {
            return Err(CheckError::BadPrologue { offset: prologue });
        }

        let mut stats = HeapStats {
            arena_size: bytes.len(),
            ..HeapStats::default()
        };
        let mut cursor_found = self.cursor == prologue;
        let mut prev_free = false;
        let mut bp = self.first_block();
        loop {
            let tag = block::read_tag(bytes, block::header(bp));
            if tag.size() == 0 {
                if !tag.is_allocated() || bp != bytes.len() {
                    return Err(CheckError::BadEpilogue {
                        offset: block::header(bp),
                    });
                }
                cursor_found |= self.cursor == bp;
                break;
            }

            let size = tag.size();
            if !bp.is_multiple_of(ALIGNMENT) {
                return Err(CheckError::Misaligned { offset: bp });
            }
            if size < MIN_BLOCK_SIZE || bp + size > bytes.len() {
                return Err(CheckError::BadSize { offset: bp, size });
            }
            let footer = block::read_tag(bytes, bp + size - DOUBLE_WORD_SIZE);
            if footer != tag {
                return Err(CheckError::TagMismatch {
                    offset: bp,
                    header: tag,
                    footer,
                });
            }

            if tag.is_allocated() {
                stats.allocated_bytes += size;
                prev_free = false;
            } else {
                if prev_free {
                    return Err(CheckError::AdjacentFree { offset: bp });
                }
                stats.free_blocks += 1;
                stats.free_bytes += size;
                stats.largest_free = stats.largest_free.max(size);
                prev_free = true;
            }
            stats.blocks += 1;
            cursor_found |= self.cursor == bp;
            bp += size;
        }

        if !cursor_found {
            return Err(CheckError::BadCursor {
                offset: self.cursor,
            });
        }
        Ok(stats)
    }

    fn check_free_list(&self, bytes: &[u8], stats: &HeapStats) -> Result<(), CheckError> {
        let first = self.first_block();
        let mut in_list = 0;
        let mut prev = None;
        let mut node = self.free_list.head();
        while let Some(bp) = node {
            if bp < first || bp + MIN_BLOCK_SIZE > bytes.len() || !bp.is_multiple_of(ALIGNMENT) {
                return Err(CheckError::BrokenLink { offset: bp });
            }
            let tag = block::read_tag(bytes, block::header(bp));
            if tag.is_allocated() {
                return Err(CheckError::AllocatedInFreeList { offset: bp });
            }
            let size = tag.size();
            if size < MIN_BLOCK_SIZE
                || bp + size > bytes.len()
                || block::read_tag(bytes, bp + size - DOUBLE_WORD_SIZE) != tag
                || free_list::prev(bytes, bp) != prev
            {
                return Err(CheckError::BrokenLink { offset: bp });
            }

            in_list += 1;
            // more links than blocks means the list loops
            if in_list > stats.blocks {
                return Err(CheckError::BrokenLink { offset: bp });
            }
            prev = Some(bp);
            node = free_list::next(bytes, bp);
        }

        if self.free_list.tail() != prev {
            return Err(CheckError::BrokenLink {
                offset: self.free_list.tail().unwrap_or_default(),
            });
        }
        if in_list != stats.free_blocks {
            return Err(CheckError::FreeListMismatch {
                in_list,
                flagged_free: stats.free_blocks,
            });
        }
        Ok(())
    }
}
