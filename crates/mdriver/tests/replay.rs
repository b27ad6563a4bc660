#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use std::path::{Path, PathBuf};

use mdriver::{
    replay::{self, ReplayConfig, ReplayError},
    trace,
};
use tagalloc::{FitPolicy, HeapConfig};

fn trace_files() -> Vec<PathBuf> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("traces");
    let mut files = std::fs::read_dir(&dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "rep"))
        .collect::<Vec<_>>();
    files.sort();
    assert!(!files.is_empty(), "no traces in {}", dir.display());
    files
}

fn config(policy: FitPolicy, chunk_size: usize) -> ReplayConfig {
    ReplayConfig {
        heap: HeapConfig::new()
            .with_policy(policy)
            .with_chunk_size(chunk_size),
        check: true,
        ..ReplayConfig::default()
    }
}

#[test]
fn replay_bundled_traces() {
    for path in trace_files() {
        let trace = trace::load(&path).unwrap();
        for policy in [FitPolicy::FirstFit, FitPolicy::NextFit] {
            for chunk_size in [16, 4096] {
                let outcome = replay::replay(&trace, &config(policy, chunk_size))
                    .unwrap_or_else(|e| panic!("{} ({policy}): {e}", path.display()));
                let stats = outcome.stats;
                assert_eq!(stats.ops, trace.ops.len());
                assert!(stats.utilization > 0.0 && stats.utilization <= 1.0);

                // every bundled trace frees all of its blocks
                let heap = outcome.heap.check().unwrap();
                assert_eq!(heap.blocks, 1, "{}", path.display());
                assert_eq!(heap.free_blocks, 1, "{}", path.display());
            }
        }
    }
}

#[test]
fn replay_fails_when_arena_is_exhausted() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("traces/short1.rep");
    let trace = trace::load(&path).unwrap();
    let config = ReplayConfig {
        arena_limit: 6000,
        ..ReplayConfig::default()
    };
    match replay::replay(&trace, &config) {
        Err(ReplayError::Alloc { source, .. }) => assert!(source.is_out_of_memory()),
        res => panic!("unexpected result: {res:?}"),
    }
}
