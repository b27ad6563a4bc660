//! The growable byte region a heap lives in.
//!
//! An [`Arena`] is the heap's only source of memory. It behaves like the
//! classic `sbrk` break: it can be extended at its end, it never shrinks, and
//! bytes already handed out never move relative to the start of the arena.

use alloc::vec::Vec;

use snafu::{Snafu, ensure};

use crate::block::MAX_BLOCK_SIZE;

/// Default limit of a [`VecArena`]: 20 MiB.
pub const DEFAULT_ARENA_LIMIT: usize = 20 * (1 << 20);

/// Error returned when an arena cannot be extended.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(display(
    "arena exhausted: requested={requested}, current={current}, limit={limit}"
))]
pub struct GrowError {
    requested: usize,
    current: usize,
    limit: usize,
    #[snafu(implicit)]
    location: snafu::Location,
}

impl GrowError {
    /// Number of bytes the failed request asked for.
    #[must_use]
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Arena size at the time of the failed request.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current
    }
}

/// A contiguous region that can only grow at its end.
pub trait Arena {
    /// Extends the arena by `delta` bytes.
    ///
    /// Returns the offset of the first new byte (the size of the arena before
    /// the call). On failure the arena is left unchanged.
    ///
    /// A [`Heap`](crate::Heap) never asks an arena to grow beyond
    /// [`MAX_BLOCK_SIZE`] bytes, since larger offsets do not fit in a tag.
    fn grow(&mut self, delta: usize) -> Result<usize, GrowError>;

    /// The current contents of the arena.
    fn bytes(&self) -> &[u8];

    /// The current contents of the arena, mutably.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Current size of the arena in bytes.
    fn size(&self) -> usize {
        self.bytes().len()
    }
}

/// An [`Arena`] backed by a `Vec<u8>` with a hard size limit.
///
/// The limit simulates address space exhaustion: any growth that would make
/// the arena larger than the limit fails with [`GrowError`]. Limits larger
/// than what a boundary tag can describe are clamped.
#[derive(Debug, Clone)]
pub struct VecArena {
    bytes: Vec<u8>,
    limit: usize,
}

impl Default for VecArena {
    fn default() -> Self {
        Self::new()
    }
}

impl VecArena {
    /// Creates an empty arena limited to [`DEFAULT_ARENA_LIMIT`] bytes.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_limit(DEFAULT_ARENA_LIMIT)
    }

    /// Creates an empty arena that never grows beyond `limit` bytes.
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        let limit = if limit > MAX_BLOCK_SIZE {
            MAX_BLOCK_SIZE
        } else {
            limit
        };
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }
}

impl Arena for VecArena {
    fn grow(&mut self, delta: usize) -> Result<usize, GrowError> {
        let current = self.bytes.len();
        let fits = current
            .checked_add(delta)
            .is_some_and(|new_len| new_len <= self.limit);
        ensure!(
            fits && self.bytes.try_reserve(delta).is_ok(),
            GrowSnafu {
                requested: delta,
                current,
                limit: self.limit,
            }
        );
        self.bytes.resize(current + delta, 0);
        Ok(current)
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grow_returns_old_end() {
        let mut arena = VecArena::with_limit(64);
        assert_eq!(arena.grow(24).unwrap(), 0);
        assert_eq!(arena.grow(16).unwrap(), 24);
        assert_eq!(arena.size(), 40);
        assert!(arena.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_grow_past_limit_fails_without_change() {
        let mut arena = VecArena::with_limit(64);
        arena.grow(48).unwrap();
        arena.bytes_mut()[0] = 0xaa;

        let err = arena.grow(24).unwrap_err();
        assert_eq!(err.requested(), 24);
        assert_eq!(err.current(), 48);
        assert_eq!(arena.size(), 48);
        assert_eq!(arena.bytes()[0], 0xaa);

        assert_eq!(arena.grow(16).unwrap(), 48);
        assert_eq!(arena.size(), 64);
    }

    #[test]
    fn test_limit_is_clamped() {
        let arena = VecArena::with_limit(usize::MAX);
        assert_eq!(arena.limit(), MAX_BLOCK_SIZE);
    }
}
