//! Heap tuning knobs.

use alloc::{borrow::ToOwned as _, string::String};
use core::str::FromStr;

use crate::block::{ALIGNMENT, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

/// Strategy used to pick a free block for an allocation request.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    derive_more::Display,
    derive_more::IsVariant,
)]
pub enum FitPolicy {
    /// Scan the free list from its head and take the first block that is
    /// large enough.
    #[default]
    #[display("first-fit")]
    FirstFit,
    /// Scan the block sequence from a cursor left behind by the previous
    /// search, wrapping around at the end of the arena.
    #[display("next-fit")]
    NextFit,
}

/// Error returned when parsing an unknown [`FitPolicy`] name.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("unknown fit policy: {name:?}, expected `first-fit` or `next-fit`")]
pub struct ParseFitPolicyError {
    name: String,
}

impl FromStr for FitPolicy {
    type Err = ParseFitPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-fit" | "first" => Ok(Self::FirstFit),
            "next-fit" | "next" => Ok(Self::NextFit),
            _ => Err(ParseFitPolicyError {
                name: s.to_owned(),
            }),
        }
    }
}

/// Configuration of a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    chunk_size: usize,
    policy: FitPolicy,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    /// Bytes added to the arena at initialization and whenever no free block
    /// fits a request, unless the request itself is larger.
    pub const DEFAULT_CHUNK_SIZE: usize = 4096;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            policy: FitPolicy::FirstFit,
        }
    }

    /// Sets the growth chunk size.
    ///
    /// The value is rounded up to a multiple of the alignment and clamped to
    /// the range of valid block sizes.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = if chunk_size < MIN_BLOCK_SIZE {
            MIN_BLOCK_SIZE
        } else if chunk_size > MAX_BLOCK_SIZE {
            MAX_BLOCK_SIZE
        } else {
            chunk_size.next_multiple_of(ALIGNMENT)
        };
        self
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: FitPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub const fn policy(&self) -> FitPolicy {
        self.policy
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_round_trips_through_names() {
        for policy in [FitPolicy::FirstFit, FitPolicy::NextFit] {
            let name = policy.to_string();
            assert_eq!(name.parse::<FitPolicy>().unwrap(), policy);
        }
        assert_eq!("next".parse::<FitPolicy>().unwrap(), FitPolicy::NextFit);
        assert!("best-fit".parse::<FitPolicy>().is_err());
    }

    #[test]
    fn test_chunk_size_is_normalized() {
        assert_eq!(HeapConfig::new().chunk_size(), 4096);
        assert_eq!(HeapConfig::new().with_chunk_size(0).chunk_size(), 16);
        assert_eq!(HeapConfig::new().with_chunk_size(100).chunk_size(), 104);
        assert_eq!(
            HeapConfig::new().with_chunk_size(usize::MAX).chunk_size(),
            MAX_BLOCK_SIZE
        );
    }

    #[test]
    fn test_default_policy_is_first_fit() {
        assert!(HeapConfig::default().policy().is_first_fit());
    }
}
