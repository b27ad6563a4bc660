//! A boundary-tag heap allocator with an explicit free list.
//!
//! The heap manages a single growable byte [`Arena`]. Every block carries its
//! size and allocation status twice, in a header word before the payload and
//! a footer word at its end, so both neighbours of a block can be found in
//! constant time. Free blocks are additionally linked into a doubly linked
//! LIFO free list whose links live inside their own payloads.
//!
//! ```text
//!            header                          footer
//!            ┌──────┬──────┬──────┬─────────┬──────┐
//!  free      │ size │ prev │ next │   ...   │ size │
//!            └──────┴──────┴──────┴─────────┴──────┘
//!            ┌──────┬─────────────────────────┬──────┐
//!  allocated │size|a│        payload          │size|a│
//!            └──────┴─────────────────────────┴──────┘
//!                   ^ 8-byte aligned payload offset
//! ```
//!
//! Released blocks are merged with free neighbours at once, so no two free
//! blocks are ever adjacent. Placement is either first-fit over the free list
//! or next-fit over the block sequence, see [`FitPolicy`].
//!
//! The crate is `no_std` and only needs `alloc` for [`VecArena`].
//!
//! # Examples
//!
//! ```rust
//! use tagalloc::{FitPolicy, Heap, HeapConfig, VecArena};
//!
//! let config = HeapConfig::new().with_policy(FitPolicy::NextFit);
//! let mut heap = Heap::new(VecArena::new(), config);
//!
//! let a = heap.allocate(100).unwrap();
//! let b = heap.allocate(200).unwrap();
//! heap.free(Some(a));
//!
//! let stats = heap.check().unwrap();
//! assert_eq!(stats.free_blocks, 2);
//! # heap.free(Some(b));
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

mod arena;
pub mod block;
mod config;
mod error;
mod fit;
mod free_list;
mod heap;

pub use self::{
    arena::{Arena, DEFAULT_ARENA_LIMIT, GrowError, VecArena},
    block::{Payload, Tag, TagFlags},
    config::{FitPolicy, HeapConfig, ParseFitPolicyError},
    error::{AllocError, CheckError, InitError},
    heap::{BlockInfo, Blocks, FreeBlocks, Heap, HeapStats},
};
