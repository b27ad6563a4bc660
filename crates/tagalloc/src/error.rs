use snafu::Snafu;

use crate::{arena::GrowError, block::Tag};

/// Errors that can occur while initializing a heap.
#[derive(Debug, Snafu)]
#[snafu(module, visibility(pub(crate)))]
pub enum InitError {
    #[snafu(display("failed to grow arena for the initial heap: {source}"))]
    Grow {
        #[snafu(source)]
        source: GrowError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Errors that can occur while allocating or resizing a block.
#[derive(Debug, Snafu, derive_more::IsVariant)]
#[snafu(module, visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("zero-sized allocation request"))]
    ZeroSize {
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("allocation request too large: size={size}"))]
    TooLarge {
        size: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("out of memory: {source}"))]
    OutOfMemory {
        #[snafu(source)]
        source: GrowError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("failed to initialize heap: {source}"))]
    Init {
        #[snafu(source)]
        source: InitError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Inconsistencies detected by [`Heap::check`](crate::Heap::check).
///
/// Offsets are payload offsets of the offending block unless noted.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[non_exhaustive]
pub enum CheckError {
    #[display("heap is not initialized")]
    Uninitialized,
    #[display("bad prologue block: offset={offset:#x}")]
    BadPrologue { offset: usize },
    #[display("bad epilogue tag: offset={offset:#x}")]
    BadEpilogue { offset: usize },
    #[display("payload is not aligned: offset={offset:#x}")]
    Misaligned { offset: usize },
    #[display("invalid block size: offset={offset:#x}, size={size}")]
    BadSize { offset: usize, size: usize },
    #[display("header does not match footer: offset={offset:#x}, header={header}, footer={footer}")]
    TagMismatch {
        offset: usize,
        header: Tag,
        footer: Tag,
    },
    #[display("two adjacent free blocks: offset={offset:#x}")]
    AdjacentFree { offset: usize },
    #[display("broken free list link: offset={offset:#x}")]
    BrokenLink { offset: usize },
    #[display("allocated block found in free list: offset={offset:#x}")]
    AllocatedInFreeList { offset: usize },
    #[display("free list holds {in_list} blocks but {flagged_free} blocks are marked free")]
    FreeListMismatch { in_list: usize, flagged_free: usize },
    #[display("next-fit cursor is not on a block boundary: offset={offset:#x}")]
    BadCursor { offset: usize },
}
