use std::{path::PathBuf, process};

use argh::FromArgs;
use mdriver::{
    info,
    log::{self, LogLevel},
    replay::{self, Outcome, ReplayConfig},
    trace,
};
use snafu::{ResultExt as _, Whatever, whatever};
use tagalloc::{Arena as _, DEFAULT_ARENA_LIMIT, FitPolicy, HeapConfig};

/// Replay allocation traces against the tagalloc heap and report space
/// utilization.
#[derive(Debug, FromArgs)]
struct Args {
    #[argh(positional)]
    traces: Vec<PathBuf>,

    /// placement policy: first-fit or next-fit
    #[argh(option, short = 'p', default = "FitPolicy::FirstFit")]
    policy: FitPolicy,

    /// bytes to grow the heap by when no free block fits
    #[argh(option, default = "HeapConfig::DEFAULT_CHUNK_SIZE")]
    chunk_size: usize,

    /// maximum arena size in bytes
    #[argh(option, default = "DEFAULT_ARENA_LIMIT")]
    limit: usize,

    /// run the heap checker after every operation
    #[argh(switch, short = 'c')]
    check: bool,

    /// print the block map after each trace
    #[argh(switch, short = 'd')]
    dump: bool,

    /// log level: trace, debug, info, warn or error
    #[argh(option, default = "LogLevel::Warn")]
    log_level: LogLevel,
}

fn main() {
    let args: Args = argh::from_env();
    log::set_max_level(args.log_level);

    if let Err(err) = run(&args) {
        eprintln!("{}", snafu::Report::from_error(err));
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Whatever> {
    if args.traces.is_empty() {
        whatever!("no trace files given");
    }

    let config = ReplayConfig {
        heap: HeapConfig::new()
            .with_chunk_size(args.chunk_size)
            .with_policy(args.policy),
        arena_limit: args.limit,
        check: args.check,
    };
    info!("replaying {} traces with {config:?}", args.traces.len());

    let mut total_weight = 0;
    let mut weighted_utilization = 0.0;
    for path in &args.traces {
        let trace = trace::load(path).whatever_context("failed to load trace")?;
        info!("{}: {} ops", path.display(), trace.ops.len());

        let outcome = replay::replay(&trace, &config).with_whatever_context(|_| {
            format!("failed to replay trace, path={}", path.display())
        })?;
        let stats = outcome.stats;
        println!(
            "{:<32} {:>8} ops {:>10} bytes {:>6.1}%",
            path.display(),
            stats.ops,
            stats.arena_size,
            stats.utilization * 100.0
        );
        if args.dump {
            dump(&outcome);
        }

        total_weight += trace.weight;
        weighted_utilization += f64::from(trace.weight) * stats.utilization;
    }

    if total_weight > 0 {
        println!(
            "average utilization ({}): {:.1}%",
            args.policy,
            weighted_utilization / f64::from(total_weight) * 100.0
        );
    }
    Ok(())
}

fn dump(outcome: &Outcome) {
    let heap = &outcome.heap;
    println!("  arena: {} bytes", heap.arena().size());
    for block in heap.blocks() {
        println!(
            "  {:#8x} {:>8} {}",
            block.payload.offset(),
            block.size,
            if block.allocated { "allocated" } else { "free" }
        );
    }
    match heap.check() {
        Ok(stats) => println!(
            "  {} blocks, {} free, largest free {} bytes",
            stats.blocks, stats.free_blocks, stats.largest_free
        ),
        Err(err) => println!("  heap check failed: {err}"),
    }
}
