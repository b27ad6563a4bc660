//! The heap: allocation, release and resizing over one arena.
//!
//! # Memory Layout
//!
//! ```text
//!  0     4          8              16      20       24
//!  ┌─────┬──────────┬──────────────┬───────┬────────┬──────────────────┬─────┐
//!  │ pad │ pro. hdr │ pro. payload │ pro.  │ block  │ blocks ...       │ epi │
//!  │     │  16 / a  │              │ ftr   │ header │                  │ 0/a │
//!  └─────┴──────────┴──────────────┴───────┴────────┴──────────────────┴─────┘
//! ```
//!
//! The prologue is a permanently allocated minimum-size block and the epilogue
//! is a zero-size allocated header at the end of the arena. Neither can ever
//! be merged, so coalescing needs no special cases at the arena boundaries.
//!
//! # Coalescing Convention
//!
//! Coalescing merges a free block with its free neighbours and returns
//! the merged block, but never links it into the free list. The callers
//! (release and arena growth) insert the returned block themselves.

use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
    arena::{Arena, GrowError, GrowSnafu},
    block::{
        self, DOUBLE_WORD_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, OVERHEAD, Payload, Tag, WORD_SIZE,
    },
    config::{FitPolicy, HeapConfig},
    error::{AllocError, InitError, alloc_error, init_error},
    fit,
    free_list::FreeList,
};

mod check;
mod walk;

pub use self::{
    check::HeapStats,
    walk::{BlockInfo, Blocks, FreeBlocks},
};

/// Bytes written by initialization: padding, prologue and epilogue header.
const INITIAL_SIZE: usize = WORD_SIZE + MIN_BLOCK_SIZE + WORD_SIZE;

/// A boundary-tag heap with an explicit free list.
///
/// All allocator state lives in this value, so several heaps can coexist and
/// each one is used through `&mut self` only.
///
/// # Examples
///
/// ```
/// use tagalloc::{Heap, HeapConfig, VecArena};
///
/// let mut heap = Heap::new(VecArena::new(), HeapConfig::new());
/// let a = heap.allocate(100).unwrap();
/// heap.payload_mut(a)[..5].copy_from_slice(b"hello");
///
/// let a = heap.resize(Some(a), 1000).unwrap().unwrap();
/// assert_eq!(&heap.payload(a)[..5], b"hello");
///
/// heap.free(Some(a));
/// heap.check().unwrap();
/// ```
#[derive(Debug)]
pub struct Heap<A> {
    arena: A,
    config: HeapConfig,
    free_list: FreeList,
    /// Payload offset of the prologue block.
    prologue: usize,
    /// Next-fit search position; always a block start or the epilogue.
    cursor: usize,
    initialized: bool,
}

impl<A> Heap<A>
where
    A: Arena,
{
    /// Creates an uninitialized heap over `arena`.
    ///
    /// The heap initializes itself on first use; call [`init`](Self::init)
    /// to do it eagerly and observe failures.
    #[must_use]
    pub const fn new(arena: A, config: HeapConfig) -> Self {
        Self {
            arena,
            config,
            free_list: FreeList::new(),
            prologue: 0,
            cursor: 0,
            initialized: false,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub const fn arena(&self) -> &A {
        &self.arena
    }

    #[must_use]
    pub fn into_arena(self) -> A {
        self.arena
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Lays out the prologue and epilogue and seeds the heap with one chunk
    /// of free space.
    ///
    /// Calling this on an initialized heap does nothing.
    pub fn init(&mut self) -> Result<(), InitError> {
        if self.initialized {
            return Ok(());
        }

        let base = self.grow(INITIAL_SIZE).context(init_error::GrowSnafu)?;
        let prologue = base + DOUBLE_WORD_SIZE;
        debug_assert!(
            prologue.is_multiple_of(block::ALIGNMENT),
            "arena base must be aligned: {base:#x}"
        );

        let bytes = self.arena.bytes_mut();
        block::write_word(bytes, base, 0);
        block::set(bytes, prologue, MIN_BLOCK_SIZE, true);
        block::write_tag(bytes, block::header(prologue + MIN_BLOCK_SIZE), Tag::EPILOGUE);

        self.prologue = prologue;
        self.cursor = prologue;
        self.free_list = FreeList::new();
        self.initialized = true;

        self.extend(self.config.chunk_size())
            .context(init_error::GrowSnafu)?;
        Ok(())
    }

    /// Allocates a block with at least `size` payload bytes.
    ///
    /// The payload is 8-byte aligned. Its contents are unspecified.
    pub fn allocate(&mut self, size: usize) -> Result<Payload, AllocError> {
        ensure!(size > 0, alloc_error::ZeroSizeSnafu);
        let adjusted = block::adjusted_size(size).context(alloc_error::TooLargeSnafu { size })?;
        self.init().context(alloc_error::InitSnafu)?;

        let bp = match self.find_fit(adjusted) {
            Some(bp) => bp,
            None => self
                .extend(adjusted.max(self.config.chunk_size()))
                .context(alloc_error::OutOfMemorySnafu)?,
        };
        self.place(bp, adjusted);
        Ok(Payload::new(bp))
    }

    /// Releases a block returned by [`allocate`](Self::allocate) or
    /// [`resize`](Self::resize).
    ///
    /// `None` is ignored. Releasing a block twice, or a payload that did not
    /// come from this heap, corrupts the heap.
    pub fn free(&mut self, ptr: Option<Payload>) {
        let Some(ptr) = ptr else {
            return;
        };
        if self.init().is_err() {
            return;
        }

        let bp = ptr.offset();
        let bytes = self.arena.bytes_mut();
        debug_assert!(block::is_allocated(bytes, bp), "double free: {ptr}");
        let size = block::size(bytes, bp);
        block::set(bytes, bp, size, false);

        let bp = self.coalesce(bp);
        self.free_list.insert(self.arena.bytes_mut(), bp);
    }

    /// Changes the size of a block, moving it if needed.
    ///
    /// - `size == 0` releases `ptr` and returns `Ok(None)`;
    /// - `ptr == None` behaves like [`allocate`](Self::allocate);
    /// - a shrink that leaves room for a whole free block happens in place;
    /// - otherwise the contents are copied to a new block and the old one is
    ///   released.
    ///
    /// On error the original block is left untouched.
    pub fn resize(
        &mut self,
        ptr: Option<Payload>,
        size: usize,
    ) -> Result<Option<Payload>, AllocError> {
        if size == 0 {
            self.free(ptr);
            return Ok(None);
        }
        let Some(ptr) = ptr else {
            return self.allocate(size).map(Some);
        };

        let adjusted = block::adjusted_size(size).context(alloc_error::TooLargeSnafu { size })?;
        let bp = ptr.offset();
        let old_size = block::size(self.arena.bytes(), bp);
        debug_assert!(block::is_allocated(self.arena.bytes(), bp));

        if adjusted == old_size {
            return Ok(Some(ptr));
        }

        if adjusted < old_size && old_size - adjusted >= MIN_BLOCK_SIZE {
            let bytes = self.arena.bytes_mut();
            block::set(bytes, bp, adjusted, true);
            block::set(bytes, bp + adjusted, old_size - adjusted, true);
            self.free(Some(Payload::new(bp + adjusted)));
            return Ok(Some(ptr));
        }

        let new = self.allocate(size)?;
        let len = size.min(old_size - OVERHEAD);
        self.arena
            .bytes_mut()
            .copy_within(bp..bp + len, new.offset());
        self.free(Some(ptr));
        Ok(Some(new))
    }

    /// Returns the payload bytes of an allocated block.
    ///
    /// The slice may be longer than the size originally requested.
    #[must_use]
    pub fn payload(&self, ptr: Payload) -> &[u8] {
        let bytes = self.arena.bytes();
        let bp = ptr.offset();
        debug_assert!(block::is_allocated(bytes, bp), "payload of free block: {ptr}");
        let size = block::size(bytes, bp);
        &bytes[bp..bp + size - OVERHEAD]
    }

    /// Returns the payload bytes of an allocated block, mutably.
    #[must_use]
    pub fn payload_mut(&mut self, ptr: Payload) -> &mut [u8] {
        let bytes = self.arena.bytes_mut();
        let bp = ptr.offset();
        debug_assert!(block::is_allocated(bytes, bp), "payload of free block: {ptr}");
        let size = block::size(bytes, bp);
        &mut bytes[bp..bp + size - OVERHEAD]
    }

    /// Payload offset of the first block after the prologue.
    fn first_block(&self) -> usize {
        self.prologue + MIN_BLOCK_SIZE
    }

    fn find_fit(&mut self, size: usize) -> Option<usize> {
        let bytes = self.arena.bytes();
        match self.config.policy() {
            FitPolicy::FirstFit => fit::first_fit(bytes, &self.free_list, size),
            FitPolicy::NextFit => fit::next_fit(bytes, self.prologue, &mut self.cursor, size),
        }
    }

    /// Grows the arena by `size` bytes, refusing to pass the largest offset
    /// a tag can hold.
    fn grow(&mut self, size: usize) -> Result<usize, GrowError> {
        let current = self.arena.size();
        ensure!(
            current
                .checked_add(size)
                .is_some_and(|end| end <= MAX_BLOCK_SIZE),
            GrowSnafu {
                requested: size,
                current,
                limit: MAX_BLOCK_SIZE,
            }
        );
        self.arena.grow(size)
    }

    /// Grows the arena by at least `size` bytes and links the new space into
    /// the free list, merged with a trailing free block if there is one.
    ///
    /// Returns the resulting free block. The arena is grown before any tag
    /// is written, so a failure leaves the heap untouched.
    fn extend(&mut self, size: usize) -> Result<usize, GrowError> {
        let size = size.next_multiple_of(DOUBLE_WORD_SIZE).max(MIN_BLOCK_SIZE);
        // the old epilogue header becomes the header of the new block
        let bp = self.grow(size)?;

        let bytes = self.arena.bytes_mut();
        block::set(bytes, bp, size, false);
        block::write_tag(bytes, block::header(bp + size), Tag::EPILOGUE);

        let bp = self.coalesce(bp);
        self.free_list.insert(self.arena.bytes_mut(), bp);
        Ok(bp)
    }

    /// Marks `size` bytes of free block `bp` allocated, splitting off the
    /// rest as a new free block when it is large enough to stand alone.
    fn place(&mut self, bp: usize, size: usize) {
        let bytes = self.arena.bytes_mut();
        let block_size = block::size(bytes, bp);
        debug_assert!(!block::is_allocated(bytes, bp) && block_size >= size);

        self.free_list.remove(bytes, bp);
        if block_size - size >= MIN_BLOCK_SIZE {
            block::set(bytes, bp, size, true);
            let rest = bp + size;
            block::set(bytes, rest, block_size - size, false);
            // the successor of a free block is always allocated
            debug_assert!(block::is_allocated(bytes, block::next(bytes, rest)));
            self.free_list.insert(bytes, rest);
        } else {
            block::set(bytes, bp, block_size, true);
        }
    }

    /// Merges free block `bp` with its free neighbours.
    ///
    /// Neighbours that are absorbed are unlinked from the free list; the
    /// returned block itself is not linked.
    fn coalesce(&mut self, bp: usize) -> usize {
        let bytes = self.arena.bytes_mut();
        let prev = block::prev(bytes, bp);
        let next = block::next(bytes, bp);
        let prev_free = !block::is_allocated(bytes, prev);
        let next_free = !block::is_allocated(bytes, next);

        let mut size = block::size(bytes, bp);
        let bp = match (prev_free, next_free) {
            (false, false) => return bp,
            (false, true) => {
                self.free_list.remove(bytes, next);
                size += block::size(bytes, next);
                bp
            }
            (true, false) => {
                self.free_list.remove(bytes, prev);
                size += block::size(bytes, prev);
                prev
            }
            (true, true) => {
                self.free_list.remove(bytes, prev);
                self.free_list.remove(bytes, next);
                size += block::size(bytes, prev) + block::size(bytes, next);
                prev
            }
        };
        block::set(bytes, bp, size, false);

        if self.cursor > bp && self.cursor < bp + size {
            self.cursor = bp;
        }
        bp
    }
}
