//! Boundary tags and block address arithmetic.
//!
//! Every block in the arena is framed by two identical tag words: a header
//! just before the payload and a footer at the end of the block. A tag packs
//! the block size (always a multiple of [`ALIGNMENT`]) together with status
//! bits in the low three bits.
//!
//! ```text
//!            bp - 4          bp                          bp + size - 8
//!   ┌───────────────┬───────────────────────────────────┬───────────────┐
//!   │ header (tag)  │ payload                           │ footer (tag)  │
//!   └───────────────┴───────────────────────────────────┴───────────────┘
//!   ◄───────────────────────────── size ────────────────────────────────►
//! ```
//!
//! Blocks are addressed by `bp`, the arena offset of their payload. All
//! accessors in this module take the arena bytes explicitly and never
//! reinterpret memory in place; reads and writes go through [`DataView`].

use core::fmt;

use bitflags::bitflags;
use dataview::DataView;
use platform_cast::CastFrom as _;

/// Size of a tag or link word in bytes.
pub const WORD_SIZE: usize = 4;

/// Size of two words. Payloads are aligned to this.
pub const DOUBLE_WORD_SIZE: usize = 2 * WORD_SIZE;

/// Alignment of every payload offset and every block size.
pub const ALIGNMENT: usize = DOUBLE_WORD_SIZE;

/// Bytes of metadata carried by every block (header and footer).
pub const OVERHEAD: usize = 2 * WORD_SIZE;

/// Smallest block able to hold its tags plus the two free-list links.
pub const MIN_BLOCK_SIZE: usize = OVERHEAD + 2 * WORD_SIZE;

/// Largest block size representable in a tag word.
pub const MAX_BLOCK_SIZE: usize = (u32::MAX & Tag::SIZE_MASK) as usize;

const _: () = assert!(MIN_BLOCK_SIZE.is_multiple_of(ALIGNMENT));

bitflags! {
    /// Status bits stored in the low bits of a boundary tag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TagFlags: u32 {
        /// The block is handed out to a caller (or is a sentinel).
        const ALLOCATED = 1 << 0;
    }
}

/// A boundary tag: block size and status packed into one word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Tag(u32);

impl Tag {
    const SIZE_MASK: u32 = !0x7;

    /// The tag marking the end of the arena: zero size, allocated.
    pub const EPILOGUE: Self = Self(TagFlags::ALLOCATED.bits());

    /// Packs `size` and the allocated status into a tag.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a multiple of [`ALIGNMENT`] or exceeds
    /// [`MAX_BLOCK_SIZE`].
    #[must_use]
    pub fn new(size: usize, allocated: bool) -> Self {
        assert!(
            size.is_multiple_of(ALIGNMENT),
            "block size must be aligned: {size}"
        );
        assert!(size <= MAX_BLOCK_SIZE, "block size too large: {size}");
        let flags = if allocated {
            TagFlags::ALLOCATED
        } else {
            TagFlags::empty()
        };
        Self(to_word(size) | flags.bits())
    }

    /// Reinterprets a raw tag word.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw tag word.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns the block size encoded in the tag.
    #[must_use]
    pub fn size(self) -> usize {
        usize::cast_from(self.0 & Self::SIZE_MASK)
    }

    /// Returns the status bits encoded in the tag.
    #[must_use]
    pub const fn flags(self) -> TagFlags {
        TagFlags::from_bits_retain(self.0 & !Self::SIZE_MASK)
    }

    #[must_use]
    pub const fn is_allocated(self) -> bool {
        self.flags().contains(TagFlags::ALLOCATED)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("size", &self.size())
            .field("allocated", &self.is_allocated())
            .finish()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_allocated() { 'a' } else { 'f' };
        write!(f, "{}/{status}", self.size())
    }
}

/// Handle to an allocated payload, expressed as its offset in the arena.
///
/// A `Payload` is only meaningful for the heap that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(u32);

impl Payload {
    pub(crate) fn new(bp: usize) -> Self {
        Self(to_word(bp))
    }

    /// Returns the arena offset of the first payload byte.
    #[must_use]
    pub fn offset(self) -> usize {
        usize::cast_from(self.0)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Converts an arena offset or size into a word.
///
/// Arenas never grow beyond [`MAX_BLOCK_SIZE`] bytes, so every offset fits.
pub(crate) fn to_word(value: usize) -> u32 {
    u32::try_from(value).expect("arena offsets always fit in a word")
}

/// Computes the block size needed to serve a request of `requested` bytes.
///
/// Returns `None` when the block would not be representable in a tag.
pub(crate) fn adjusted_size(requested: usize) -> Option<usize> {
    let size = requested
        .checked_next_multiple_of(ALIGNMENT)?
        .checked_add(OVERHEAD)?
        .max(MIN_BLOCK_SIZE);
    (size <= MAX_BLOCK_SIZE).then_some(size)
}

pub(crate) fn read_word(bytes: &[u8], offset: usize) -> u32 {
    debug_assert!(
        offset + WORD_SIZE <= bytes.len(),
        "word read out of bounds: offset={offset:#x}, len={:#x}",
        bytes.len()
    );
    DataView::from(bytes).read::<u32>(offset)
}

pub(crate) fn write_word(bytes: &mut [u8], offset: usize, value: u32) {
    debug_assert!(
        offset + WORD_SIZE <= bytes.len(),
        "word write out of bounds: offset={offset:#x}, len={:#x}",
        bytes.len()
    );
    DataView::from_mut(bytes).write(offset, &value);
}

pub(crate) fn read_tag(bytes: &[u8], offset: usize) -> Tag {
    Tag::from_bits(read_word(bytes, offset))
}

pub(crate) fn write_tag(bytes: &mut [u8], offset: usize, tag: Tag) {
    write_word(bytes, offset, tag.bits());
}

/// Offset of the header of block `bp`.
pub(crate) const fn header(bp: usize) -> usize {
    bp - WORD_SIZE
}

/// Offset of the footer of block `bp`, located through its header.
pub(crate) fn footer(bytes: &[u8], bp: usize) -> usize {
    bp + size(bytes, bp) - DOUBLE_WORD_SIZE
}

pub(crate) fn size(bytes: &[u8], bp: usize) -> usize {
    read_tag(bytes, header(bp)).size()
}

pub(crate) fn is_allocated(bytes: &[u8], bp: usize) -> bool {
    read_tag(bytes, header(bp)).is_allocated()
}

/// The block following `bp` in address order.
pub(crate) fn next(bytes: &[u8], bp: usize) -> usize {
    bp + size(bytes, bp)
}

/// The block preceding `bp` in address order, found through its footer.
pub(crate) fn prev(bytes: &[u8], bp: usize) -> usize {
    bp - read_tag(bytes, bp - DOUBLE_WORD_SIZE).size()
}

/// Writes matching header and footer tags for block `bp`.
pub(crate) fn set(bytes: &mut [u8], bp: usize, size: usize, allocated: bool) {
    let tag = Tag::new(size, allocated);
    write_tag(bytes, header(bp), tag);
    write_tag(bytes, footer(bytes, bp), tag);
}

/// Iterator over block offsets in address order, stopping at the epilogue.
///
/// The walk also stops at the first block whose size would run past the end
/// of the arena, so a damaged heap cannot make it read out of bounds.
#[derive(Debug, Clone)]
pub(crate) struct Walk<'a> {
    bytes: &'a [u8],
    next: Option<usize>,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(bytes: &'a [u8], from: usize) -> Self {
        Self {
            bytes,
            next: Some(from),
        }
    }
}

impl Iterator for Walk<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let bp = self.next.take()?;
        if bp > self.bytes.len() || bp < WORD_SIZE {
            return None;
        }
        let size = size(self.bytes, bp);
        if size == 0 || bp + size > self.bytes.len() {
            return None;
        }
        self.next = Some(bp + size);
        Some(bp)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::{vec, vec::Vec};

    use super::*;

    #[test]
    fn test_tag_packing() {
        let tag = Tag::new(24, true);
        assert_eq!(tag.bits(), 25);
        assert_eq!(tag.size(), 24);
        assert!(tag.is_allocated());

        let tag = Tag::new(4096, false);
        assert_eq!(tag.size(), 4096);
        assert!(!tag.is_allocated());
        assert_eq!(tag.flags(), TagFlags::empty());

        assert_eq!(Tag::EPILOGUE.size(), 0);
        assert!(Tag::EPILOGUE.is_allocated());
    }

    #[test]
    #[should_panic(expected = "block size must be aligned")]
    fn test_tag_rejects_unaligned_size() {
        let _ = Tag::new(12, false);
    }

    #[test]
    fn test_adjusted_size() {
        assert_eq!(adjusted_size(1), Some(MIN_BLOCK_SIZE));
        assert_eq!(adjusted_size(8), Some(MIN_BLOCK_SIZE));
        assert_eq!(adjusted_size(9), Some(24));
        assert_eq!(adjusted_size(90), Some(104));
        assert_eq!(adjusted_size(100), Some(112));
        assert_eq!(adjusted_size(200), Some(208));
        assert_eq!(adjusted_size(MAX_BLOCK_SIZE), None);
        assert_eq!(adjusted_size(usize::MAX), None);
    }

    #[test]
    fn test_block_navigation() {
        let mut bytes = vec![0; 64];
        // two blocks of 16 and 24 bytes followed by an epilogue
        set(&mut bytes, 8, 16, true);
        set(&mut bytes, 24, 24, false);
        write_tag(&mut bytes, header(48), Tag::EPILOGUE);

        assert_eq!(size(&bytes, 8), 16);
        assert_eq!(footer(&bytes, 8), 16);
        assert_eq!(next(&bytes, 8), 24);
        assert_eq!(prev(&bytes, 24), 8);
        assert!(is_allocated(&bytes, 8));
        assert!(!is_allocated(&bytes, 24));
        assert_eq!(read_tag(&bytes, footer(&bytes, 24)), Tag::new(24, false));

        let walked = Walk::new(&bytes, 8).collect::<Vec<_>>();
        assert_eq!(walked, [8, 24]);
    }

    #[test]
    fn test_walk_stops_on_oversized_block() {
        let mut bytes = vec![0; 32];
        write_tag(&mut bytes, header(8), Tag::new(64, false));
        assert_eq!(Walk::new(&bytes, 8).count(), 0);
    }
}
