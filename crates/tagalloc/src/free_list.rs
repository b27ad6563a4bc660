//! Explicit free list threaded through the payloads of free blocks.
//!
//! A free block stores two link words at the start of its payload:
//!
//! ```text
//! Free Block Layout:
//! ┌────────┬─────────────┬─────────────┬──────────────┬────────┐
//! │ header │ prev: u32   │ next: u32   │ (unused)     │ footer │
//! └────────┴─────────────┴─────────────┴──────────────┴────────┘
//!          ▲ bp          ▲ bp + 4
//! ```
//!
//! Links are arena offsets of other free blocks' payloads. Offset zero never
//! names a payload (the prologue sits in front of every block), so it encodes
//! "no link". Only the head and tail offsets live outside the arena.

use platform_cast::CastFrom as _;

use crate::block::{self, WORD_SIZE};

const PREV: usize = 0;
const NEXT: usize = WORD_SIZE;

fn read_link(bytes: &[u8], offset: usize) -> Option<usize> {
    match block::read_word(bytes, offset) {
        0 => None,
        bp => Some(usize::cast_from(bp)),
    }
}

fn write_link(bytes: &mut [u8], offset: usize, link: Option<usize>) {
    block::write_word(bytes, offset, link.map_or(0, block::to_word));
}

pub(crate) fn prev(bytes: &[u8], bp: usize) -> Option<usize> {
    read_link(bytes, bp + PREV)
}

pub(crate) fn next(bytes: &[u8], bp: usize) -> Option<usize> {
    read_link(bytes, bp + NEXT)
}

fn set_prev(bytes: &mut [u8], bp: usize, link: Option<usize>) {
    write_link(bytes, bp + PREV, link);
}

fn set_next(bytes: &mut [u8], bp: usize, link: Option<usize>) {
    write_link(bytes, bp + NEXT, link);
}

/// Head and tail of a doubly linked list of free blocks.
///
/// New blocks are pushed at the head (LIFO order).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeList {
    head: Option<usize>,
    tail: Option<usize>,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    pub(crate) const fn head(&self) -> Option<usize> {
        self.head
    }

    pub(crate) const fn tail(&self) -> Option<usize> {
        self.tail
    }

    /// Pushes block `bp` at the head of the list.
    pub(crate) fn insert(&mut self, bytes: &mut [u8], bp: usize) {
        debug_assert!(!block::is_allocated(bytes, bp), "inserting allocated block {bp:#x}");
        set_prev(bytes, bp, None);
        set_next(bytes, bp, self.head);
        match self.head {
            Some(head) => set_prev(bytes, head, Some(bp)),
            None => self.tail = Some(bp),
        }
        self.head = Some(bp);
    }

    /// Unlinks block `bp` from the list.
    ///
    /// The predecessor (or the head) is pointed at the successor, and the
    /// successor (or the tail) is pointed back at the predecessor.
    pub(crate) fn remove(&mut self, bytes: &mut [u8], bp: usize) {
        let prev = prev(bytes, bp);
        let next = next(bytes, bp);
        match prev {
            Some(prev) => set_next(bytes, prev, next),
            None => self.head = next,
        }
        match next {
            Some(next) => set_prev(bytes, next, prev),
            None => self.tail = prev,
        }
        set_prev(bytes, bp, None);
        set_next(bytes, bp, None);
    }

    pub(crate) fn iter<'a>(&self, bytes: &'a [u8]) -> Iter<'a> {
        Iter {
            bytes,
            next: self.head,
        }
    }
}

/// Iterator over free block offsets from head to tail.
#[derive(Debug, Clone)]
pub(crate) struct Iter<'a> {
    bytes: &'a [u8],
    next: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let bp = self.next?;
        if bp + 2 * WORD_SIZE > self.bytes.len() {
            self.next = None;
            return None;
        }
        self.next = next(self.bytes, bp);
        Some(bp)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::{vec, vec::Vec};

    use super::*;

    /// Four free blocks of 16 bytes at payload offsets 8, 24, 40 and 56.
    fn free_blocks() -> Vec<u8> {
        let mut bytes = vec![0; 80];
        for bp in [8, 24, 40, 56] {
            block::set(&mut bytes, bp, 16, false);
        }
        bytes
    }

    fn collect(list: &FreeList, bytes: &[u8]) -> Vec<usize> {
        list.iter(bytes).collect()
    }

    #[test]
    fn test_insert_is_lifo() {
        let mut bytes = free_blocks();
        let mut list = FreeList::new();
        list.insert(&mut bytes, 8);
        list.insert(&mut bytes, 24);
        list.insert(&mut bytes, 40);

        assert_eq!(collect(&list, &bytes), [40, 24, 8]);
        assert_eq!(list.head(), Some(40));
        assert_eq!(list.tail(), Some(8));
        assert_eq!(prev(&bytes, 8), Some(24));
        assert_eq!(prev(&bytes, 40), None);
    }

    #[test]
    fn test_remove_head_middle_and_tail() {
        let mut bytes = free_blocks();
        let mut list = FreeList::new();
        for bp in [8, 24, 40, 56] {
            list.insert(&mut bytes, bp);
        }
        assert_eq!(collect(&list, &bytes), [56, 40, 24, 8]);

        // middle
        list.remove(&mut bytes, 40);
        assert_eq!(collect(&list, &bytes), [56, 24, 8]);
        assert_eq!(prev(&bytes, 24), Some(56));

        // head
        list.remove(&mut bytes, 56);
        assert_eq!(collect(&list, &bytes), [24, 8]);
        assert_eq!(list.head(), Some(24));
        assert_eq!(prev(&bytes, 24), None);

        // tail
        list.remove(&mut bytes, 8);
        assert_eq!(collect(&list, &bytes), [24]);
        assert_eq!(list.tail(), Some(24));
        assert_eq!(next(&bytes, 24), None);

        list.remove(&mut bytes, 24);
        assert_eq!(list, FreeList::new());
        assert_eq!(list.iter(&bytes).count(), 0);
    }

    #[test]
    fn test_remove_first_element_updates_successor_back_link() {
        let mut bytes = free_blocks();
        let mut list = FreeList::new();
        list.insert(&mut bytes, 8);
        list.insert(&mut bytes, 24);

        list.remove(&mut bytes, 24);
        assert_eq!(list.head(), Some(8));
        assert_eq!(prev(&bytes, 8), None);

        list.insert(&mut bytes, 40);
        assert_eq!(collect(&list, &bytes), [40, 8]);
        assert_eq!(prev(&bytes, 8), Some(40));
    }
}
