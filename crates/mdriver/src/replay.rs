//! Replaying traces against a fresh heap.
//!
//! Every payload handed out is checked to be aligned, inside the arena and
//! disjoint from all other live payloads, then filled with a byte pattern
//! derived from its block id. The pattern is verified again before the block
//! is resized or freed, so a heap that corrupts live data is caught at the
//! first operation that touches it.

use std::collections::BTreeMap;

use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use tagalloc::{
    AllocError, Arena as _, CheckError, DEFAULT_ARENA_LIMIT, Heap, HeapConfig, InitError, Payload,
    VecArena,
};

use crate::trace::{Op, Trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayConfig {
    pub heap: HeapConfig,
    /// Maximum arena size in bytes.
    pub arena_limit: usize,
    /// Run the heap checker after every operation.
    pub check: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            heap: HeapConfig::new(),
            arena_limit: DEFAULT_ARENA_LIMIT,
            check: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayStats {
    /// Number of operations replayed.
    pub ops: usize,
    /// Largest total of requested sizes live at the same time.
    pub peak_payload: usize,
    /// Final arena size.
    pub arena_size: usize,
    /// `peak_payload / arena_size`.
    pub utilization: f64,
}

/// A successful replay: its statistics and the heap it left behind.
#[derive(Debug)]
pub struct Outcome {
    pub stats: ReplayStats,
    pub heap: Heap<VecArena>,
}

/// Errors that can occur while replaying a trace.
///
/// `index` is the 0-based position of the failing operation in the trace.
#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum ReplayError {
    #[snafu(display("failed to initialize heap"))]
    Init {
        #[snafu(source)]
        source: InitError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("op {index}: failed to allocate block {id}"))]
    Alloc {
        index: usize,
        id: usize,
        #[snafu(source)]
        source: AllocError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("op {index}: payload of block {id} is not aligned: offset={offset:#x}"))]
    Misaligned {
        index: usize,
        id: usize,
        offset: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display(
        "op {index}: payload of block {id} lies outside its block or the arena: \
         offset={offset:#x}, size={size}, arena_size={arena_size}"
    ))]
    OutOfBounds {
        index: usize,
        id: usize,
        offset: usize,
        size: usize,
        arena_size: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("op {index}: payload of block {id} overlaps block {other}: offset={offset:#x}"))]
    Overlap {
        index: usize,
        id: usize,
        other: usize,
        offset: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("op {index}: payload of block {id} was corrupted at byte {byte}"))]
    Corrupted {
        index: usize,
        id: usize,
        byte: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("op {index}: heap check failed"))]
    HeapCheck {
        index: usize,
        #[snafu(source)]
        source: CheckError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("op {index}: block {id} is not allocated"))]
    UnknownId {
        index: usize,
        id: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("op {index}: block {id} is already allocated"))]
    IdInUse {
        index: usize,
        id: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Replays `trace` on a new heap built from `config`.
pub fn replay(trace: &Trace, config: &ReplayConfig) -> Result<Outcome, ReplayError> {
    let mut replayer = Replayer::new(config, trace.num_ids)?;
    for (index, &op) in trace.ops.iter().enumerate() {
        trace!("op {index}: {op:?}");
        replayer.step(index, op)?;
        if config.check {
            replayer
                .heap
                .check()
                .context(replay_error::HeapCheckSnafu { index })?;
        }
    }

    let arena_size = replayer.heap.arena().size();
    let stats = ReplayStats {
        ops: trace.ops.len(),
        peak_payload: replayer.peak_payload,
        arena_size,
        utilization: ratio(replayer.peak_payload, arena_size),
    };
    debug!(
        "replayed {} ops, peak payload {} bytes, arena {} bytes",
        stats.ops, stats.peak_payload, stats.arena_size
    );
    Ok(Outcome {
        stats,
        heap: replayer.heap,
    })
}

#[expect(clippy::cast_precision_loss)]
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        return 0.0;
    }
    num as f64 / den as f64
}

/// Expected content of byte `i` of block `id`.
#[expect(clippy::cast_possible_truncation)]
fn pattern(id: usize, i: usize) -> u8 {
    (id.wrapping_mul(0x9e37) ^ i) as u8
}

#[derive(Debug, Clone, Copy)]
struct Live {
    /// `None` for zero-size blocks.
    ptr: Option<Payload>,
    size: usize,
}

#[derive(Debug)]
struct Replayer {
    heap: Heap<VecArena>,
    blocks: Vec<Option<Live>>,
    /// Live payload ranges: start offset to (end offset, id).
    ranges: BTreeMap<usize, (usize, usize)>,
    payload: usize,
    peak_payload: usize,
}

impl Replayer {
    fn new(config: &ReplayConfig, num_ids: usize) -> Result<Self, ReplayError> {
        let mut heap = Heap::new(VecArena::with_limit(config.arena_limit), config.heap);
        heap.init().context(replay_error::InitSnafu)?;
        Ok(Self {
            heap,
            blocks: vec![None; num_ids],
            ranges: BTreeMap::new(),
            payload: 0,
            peak_payload: 0,
        })
    }

    fn step(&mut self, index: usize, op: Op) -> Result<(), ReplayError> {
        match op {
            Op::Alloc { id, size } => {
                let slot = self
                    .blocks
                    .get(id)
                    .context(replay_error::UnknownIdSnafu { index, id })?;
                ensure!(slot.is_none(), replay_error::IdInUseSnafu { index, id });
                let ptr = match self.heap.allocate(size) {
                    Ok(ptr) => Some(ptr),
                    Err(AllocError::ZeroSize { .. }) => None,
                    Err(source) => {
                        return Err(source).context(replay_error::AllocSnafu { index, id });
                    }
                };
                self.insert(index, id, Live { ptr, size })?;
            }
            Op::Realloc { id, size } => {
                let old = self.remove(index, id)?;
                let ptr = self
                    .heap
                    .resize(old.ptr, size)
                    .context(replay_error::AllocSnafu { index, id })?;
                if let Some(ptr) = ptr {
                    self.verify(index, id, ptr, old.size.min(size))?;
                }
                self.insert(index, id, Live { ptr, size })?;
            }
            Op::Free { id } => {
                let old = self.remove(index, id)?;
                self.heap.free(old.ptr);
            }
        }
        Ok(())
    }

    fn insert(&mut self, index: usize, id: usize, live: Live) -> Result<(), ReplayError> {
        if let Some(ptr) = live.ptr {
            self.validate(index, id, ptr, live.size)?;
            for (i, byte) in self.heap.payload_mut(ptr)[..live.size]
                .iter_mut()
                .enumerate()
            {
                *byte = pattern(id, i);
            }
            self.ranges
                .insert(ptr.offset(), (ptr.offset() + live.size, id));
        }

        let slot = self
            .blocks
            .get_mut(id)
            .context(replay_error::UnknownIdSnafu { index, id })?;
        *slot = Some(live);
        self.payload += live.size;
        self.peak_payload = self.peak_payload.max(self.payload);
        Ok(())
    }

    fn remove(&mut self, index: usize, id: usize) -> Result<Live, ReplayError> {
        let live = self
            .blocks
            .get_mut(id)
            .and_then(Option::take)
            .context(replay_error::UnknownIdSnafu { index, id })?;
        if let Some(ptr) = live.ptr {
            self.verify(index, id, ptr, live.size)?;
            self.ranges.remove(&ptr.offset());
        }
        self.payload -= live.size;
        Ok(live)
    }

    fn validate(
        &self,
        index: usize,
        id: usize,
        ptr: Payload,
        size: usize,
    ) -> Result<(), ReplayError> {
        let offset = ptr.offset();
        ensure!(
            offset.is_multiple_of(tagalloc::block::ALIGNMENT),
            replay_error::MisalignedSnafu { index, id, offset }
        );

        let arena_size = self.heap.arena().size();
        let in_bounds = offset
            .checked_add(size)
            .is_some_and(|end| end <= arena_size);
        ensure!(
            in_bounds && self.heap.payload(ptr).len() >= size,
            replay_error::OutOfBoundsSnafu {
                index,
                id,
                offset,
                size,
                arena_size,
            }
        );

        // ranges are disjoint, so only the last one starting before `end`
        // can overlap
        if let Some((_, &(other_end, other))) = self.ranges.range(..offset + size).next_back() {
            ensure!(
                other_end <= offset,
                replay_error::OverlapSnafu {
                    index,
                    id,
                    other,
                    offset,
                }
            );
        }
        Ok(())
    }

    fn verify(&self, index: usize, id: usize, ptr: Payload, len: usize) -> Result<(), ReplayError> {
        let data = &self.heap.payload(ptr)[..len];
        if let Some(byte) = (0..len).find(|&i| data[i] != pattern(id, i)) {
            return replay_error::CorruptedSnafu { index, id, byte }.fail();
        }
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use tagalloc::FitPolicy;

    use super::*;

    fn parse(text: &str) -> Trace {
        text.parse().unwrap()
    }

    fn checked(policy: FitPolicy) -> ReplayConfig {
        ReplayConfig {
            heap: HeapConfig::new().with_policy(policy),
            check: true,
            ..ReplayConfig::default()
        }
    }

    #[test]
    fn test_replay_stats() {
        let trace = parse("0\n3\n5\n1\na 0 100\na 1 200\nf 0\na 2 50\nr 1 20\n");
        for policy in [FitPolicy::FirstFit, FitPolicy::NextFit] {
            let outcome = replay(&trace, &checked(policy)).unwrap();
            let stats = outcome.stats;
            assert_eq!(stats.ops, 5);
            assert_eq!(stats.peak_payload, 300);
            assert_eq!(stats.arena_size, 4120);
            assert!((stats.utilization - 300.0 / 4120.0).abs() < 1e-9);
            outcome.heap.check().unwrap();
        }
    }

    #[test]
    fn test_zero_size_blocks_are_null() {
        let trace = parse("0\n2\n6\n1\na 0 0\nr 0 64\na 1 16\nr 1 0\nf 0\nf 1\n");
        let outcome = replay(&trace, &checked(FitPolicy::FirstFit)).unwrap();
        let stats = outcome.heap.check().unwrap();
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.free_blocks, 1);
    }

    #[test]
    fn test_id_errors() {
        let trace = parse("0\n2\n1\n1\nf 1\n");
        assert!(matches!(
            replay(&trace, &ReplayConfig::default()),
            Err(ReplayError::UnknownId { index: 0, id: 1, .. })
        ));

        let trace = parse("0\n2\n2\n1\na 0 8\na 0 8\n");
        assert!(matches!(
            replay(&trace, &ReplayConfig::default()),
            Err(ReplayError::IdInUse { index: 1, id: 0, .. })
        ));
    }

    #[test]
    fn test_out_of_memory() {
        let config = ReplayConfig {
            arena_limit: 8192,
            ..ReplayConfig::default()
        };
        let trace = parse("0\n2\n2\n1\na 0 4000\na 1 5000\n");
        match replay(&trace, &config) {
            Err(ReplayError::Alloc {
                index: 1,
                id: 1,
                source,
                ..
            }) => assert!(source.is_out_of_memory()),
            res => panic!("unexpected result: {res:?}"),
        }
    }

    #[test]
    fn test_init_failure() {
        let config = ReplayConfig {
            arena_limit: 16,
            ..ReplayConfig::default()
        };
        let trace = parse("0\n0\n0\n1\n");
        assert!(matches!(
            replay(&trace, &config),
            Err(ReplayError::Init { .. })
        ));
    }

    #[test]
    fn test_detects_corrupted_payload() {
        let mut replayer = Replayer::new(&ReplayConfig::default(), 1).unwrap();
        replayer.step(0, Op::Alloc { id: 0, size: 32 }).unwrap();

        let ptr = replayer.blocks[0].unwrap().ptr.unwrap();
        replayer.heap.payload_mut(ptr)[5] ^= 0xff;
        assert!(matches!(
            replayer.step(1, Op::Free { id: 0 }),
            Err(ReplayError::Corrupted {
                index: 1,
                id: 0,
                byte: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_detects_overlap() {
        let mut replayer = Replayer::new(&ReplayConfig::default(), 2).unwrap();
        // pretend block 1 already owns the start of the arena's free space
        replayer.ranges.insert(16, (64, 1));
        assert!(matches!(
            replayer.step(0, Op::Alloc { id: 0, size: 32 }),
            Err(ReplayError::Overlap {
                index: 0,
                id: 0,
                other: 1,
                offset: 24,
                ..
            })
        ));
    }
}
