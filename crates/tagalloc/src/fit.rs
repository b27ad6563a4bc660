//! Fit search policies.
//!
//! Both searches return the payload offset of a free block whose size is at
//! least the adjusted request size, or `None` when no such block exists, in
//! which case the caller grows the arena.

use crate::{
    block::{self, Walk},
    free_list::FreeList,
};

fn fits(bytes: &[u8], bp: usize, size: usize) -> bool {
    !block::is_allocated(bytes, bp) && block::size(bytes, bp) >= size
}

/// First-fit over the free list, starting at its head.
pub(crate) fn first_fit(bytes: &[u8], free_list: &FreeList, size: usize) -> Option<usize> {
    free_list
        .iter(bytes)
        .find(|&bp| block::size(bytes, bp) >= size)
}

/// Next-fit over the block sequence.
///
/// Scans from `cursor` up to the epilogue, then from `first` back up to the
/// original cursor position. On success the cursor is left on the block that
/// was found; otherwise it is unchanged.
pub(crate) fn next_fit(
    bytes: &[u8],
    first: usize,
    cursor: &mut usize,
    size: usize,
) -> Option<usize> {
    let origin = *cursor;
    let found = Walk::new(bytes, origin)
        .find(|&bp| fits(bytes, bp, size))
        .or_else(|| {
            Walk::new(bytes, first)
                .take_while(|&bp| bp < origin)
                .find(|&bp| fits(bytes, bp, size))
        })?;
    *cursor = found;
    Some(found)
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::{vec, vec::Vec};

    use super::*;
    use crate::block::Tag;

    /// Blocks: 8 (16, alloc), 24 (32, free), 56 (16, alloc), 72 (48, free),
    /// then an epilogue at 120.
    fn sample() -> (Vec<u8>, FreeList) {
        let mut bytes = vec![0; 124];
        block::set(&mut bytes, 8, 16, true);
        block::set(&mut bytes, 24, 32, false);
        block::set(&mut bytes, 56, 16, true);
        block::set(&mut bytes, 72, 48, false);
        block::write_tag(&mut bytes, block::header(120), Tag::EPILOGUE);

        let mut list = FreeList::new();
        list.insert(&mut bytes, 24);
        list.insert(&mut bytes, 72);
        (bytes, list)
    }

    #[test]
    fn test_first_fit_follows_list_order() {
        let (bytes, list) = sample();
        // the list head is 72, inserted last
        assert_eq!(first_fit(&bytes, &list, 16), Some(72));
        assert_eq!(first_fit(&bytes, &list, 48), Some(72));
        assert_eq!(first_fit(&bytes, &list, 56), None);
    }

    #[test]
    fn test_next_fit_scans_forward_from_cursor() {
        let (bytes, _list) = sample();
        let mut cursor = 8;
        assert_eq!(next_fit(&bytes, 8, &mut cursor, 16), Some(24));
        assert_eq!(cursor, 24);

        let mut cursor = 56;
        assert_eq!(next_fit(&bytes, 8, &mut cursor, 16), Some(72));
        assert_eq!(cursor, 72);
    }

    #[test]
    fn test_next_fit_wraps_around() {
        let (bytes, _list) = sample();
        let mut cursor = 120;
        assert_eq!(next_fit(&bytes, 8, &mut cursor, 32), Some(24));
        assert_eq!(cursor, 24);
    }

    #[test]
    fn test_next_fit_miss_keeps_cursor() {
        let (bytes, _list) = sample();
        let mut cursor = 56;
        assert_eq!(next_fit(&bytes, 8, &mut cursor, 64), None);
        assert_eq!(cursor, 56);
    }
}
