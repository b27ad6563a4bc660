//! Allocation trace files.
//!
//! A trace is a text file with a four-line header followed by one operation
//! per line:
//!
//! ```text
//! 20000        suggested heap size (ignored by the replayer)
//! 3            number of distinct block ids
//! 4            number of operations
//! 1            weight of the trace in the summary
//! a 0 512      allocate 512 bytes as block 0
//! a 1 128
//! r 0 640      resize block 0 to 640 bytes
//! f 1          free block 1
//! ```
//!
//! Blank lines are ignored.

use std::{
    fs, io,
    num::ParseIntError,
    path::{Path, PathBuf},
    str::FromStr,
};

use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};

/// One trace operation. Ids index the trace's block table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Alloc { id: usize, size: usize },
    Realloc { id: usize, size: usize },
    Free { id: usize },
}

impl Op {
    #[must_use]
    pub const fn id(&self) -> usize {
        match *self {
            Self::Alloc { id, .. } | Self::Realloc { id, .. } | Self::Free { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    /// Suggested heap size from the header.
    pub heap_hint: usize,
    /// Number of distinct ids; every op id is below this.
    pub num_ids: usize,
    /// Weight of this trace when averaging results.
    pub weight: u32,
    pub ops: Vec<Op>,
}

/// Errors that can occur while parsing a trace.
///
/// Line numbers are 1-based.
#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum ParseTraceError {
    #[snafu(display("line {line}: missing header field `{field}`"))]
    MissingHeader {
        line: usize,
        field: &'static str,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("line {line}: invalid number {text:?}"))]
    InvalidNumber {
        line: usize,
        text: String,
        #[snafu(source)]
        source: ParseIntError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("line {line}: unknown operation {text:?}"))]
    UnknownOp {
        line: usize,
        text: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("line {line}: missing operand"))]
    MissingOperand {
        line: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("line {line}: unexpected trailing input {text:?}"))]
    TrailingInput {
        line: usize,
        text: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("line {line}: block id {id} is out of range, trace declares {num_ids} ids"))]
    IdOutOfRange {
        line: usize,
        id: usize,
        num_ids: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("trace declares {expected} operations but contains {actual}"))]
    OpCountMismatch {
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Errors that can occur while loading a trace file.
#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum LoadTraceError {
    #[snafu(display("failed to read trace file, path={}", path.display()))]
    Read {
        path: PathBuf,
        #[snafu(source)]
        source: io::Error,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("failed to parse trace file, path={}", path.display()))]
    Parse {
        path: PathBuf,
        #[snafu(source)]
        source: ParseTraceError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Reads and parses the trace file at `path`.
pub fn load(path: &Path) -> Result<Trace, LoadTraceError> {
    let text = fs::read_to_string(path).context(load_trace_error::ReadSnafu { path })?;
    text.parse::<Trace>()
        .context(load_trace_error::ParseSnafu { path })
}

fn number<T>(line: usize, text: &str) -> Result<T, ParseTraceError>
where
    T: FromStr<Err = ParseIntError>,
{
    text.parse()
        .context(parse_trace_error::InvalidNumberSnafu { line, text })
}

fn header<'a, T>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    last: &mut usize,
    field: &'static str,
) -> Result<T, ParseTraceError>
where
    T: FromStr<Err = ParseIntError>,
{
    let (line, text) = lines
        .next()
        .context(parse_trace_error::MissingHeaderSnafu {
            line: *last + 1,
            field,
        })?;
    *last = line;
    number(line, text)
}

fn parse_op(line: usize, text: &str, num_ids: usize) -> Result<Op, ParseTraceError> {
    let mut words = text.split_whitespace();
    let kind = words.next().unwrap_or_default();
    let mut operand = || -> Result<usize, ParseTraceError> {
        let word = words
            .next()
            .context(parse_trace_error::MissingOperandSnafu { line })?;
        number(line, word)
    };

    let op = match kind {
        "a" => {
            let id = operand()?;
            let size = operand()?;
            Op::Alloc { id, size }
        }
        "r" => {
            let id = operand()?;
            let size = operand()?;
            Op::Realloc { id, size }
        }
        "f" => Op::Free { id: operand()? },
        _ => return parse_trace_error::UnknownOpSnafu { line, text: kind }.fail(),
    };

    ensure!(
        words.next().is_none(),
        parse_trace_error::TrailingInputSnafu { line, text }
    );
    ensure!(
        op.id() < num_ids,
        parse_trace_error::IdOutOfRangeSnafu {
            line,
            id: op.id(),
            num_ids,
        }
    );
    Ok(op)
}

impl FromStr for Trace {
    type Err = ParseTraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let mut last = 0;
        let heap_hint = header(&mut lines, &mut last, "heap size")?;
        let num_ids = header(&mut lines, &mut last, "number of ids")?;
        let num_ops: usize = header(&mut lines, &mut last, "number of operations")?;
        let weight = header(&mut lines, &mut last, "weight")?;

        let ops = lines
            .map(|(line, text)| parse_op(line, text, num_ids))
            .collect::<Result<Vec<_>, _>>()?;
        ensure!(
            ops.len() == num_ops,
            parse_trace_error::OpCountMismatchSnafu {
                expected: num_ops,
                actual: ops.len(),
            }
        );

        Ok(Self {
            heap_hint,
            num_ids,
            weight,
            ops,
        })
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Trace, ParseTraceError> {
        text.parse()
    }

    #[test]
    fn test_parse() {
        let trace = parse("20000\n3\n4\n1\na 0 512\na 1 128\n\nr 0 640\n  f 1  \n").unwrap();
        assert_eq!(trace.heap_hint, 20000);
        assert_eq!(trace.num_ids, 3);
        assert_eq!(trace.weight, 1);
        assert_eq!(
            trace.ops,
            [
                Op::Alloc { id: 0, size: 512 },
                Op::Alloc { id: 1, size: 128 },
                Op::Realloc { id: 0, size: 640 },
                Op::Free { id: 1 },
            ]
        );
        assert_eq!(trace.ops[2].id(), 0);
    }

    #[test]
    fn test_parse_empty_trace() {
        let trace = parse("0\n0\n0\n0\n").unwrap();
        assert!(trace.ops.is_empty());
    }

    #[test]
    fn test_header_errors() {
        assert!(matches!(
            parse("100\n2\n"),
            Err(ParseTraceError::MissingHeader {
                line: 3,
                field: "number of operations",
                ..
            })
        ));
        assert!(matches!(
            parse("100\ntwo\n1\n1\n"),
            Err(ParseTraceError::InvalidNumber { line: 2, .. })
        ));
    }

    #[test]
    fn test_op_errors() {
        let err = parse("0\n2\n1\n1\nx 0 8\n").unwrap_err();
        assert!(matches!(err, ParseTraceError::UnknownOp { line: 5, .. }));
        assert_eq!(err.to_string(), "line 5: unknown operation \"x\"");

        assert!(matches!(
            parse("0\n2\n1\n1\na 0\n"),
            Err(ParseTraceError::MissingOperand { line: 5, .. })
        ));
        assert!(matches!(
            parse("0\n2\n1\n1\nf 0 8\n"),
            Err(ParseTraceError::TrailingInput { line: 5, .. })
        ));
        assert!(matches!(
            parse("0\n2\n1\n1\n\na 2 8\n"),
            Err(ParseTraceError::IdOutOfRange {
                line: 6,
                id: 2,
                num_ids: 2,
                ..
            })
        ));
        assert!(matches!(
            parse("0\n2\n1\n1\na 0 -8\n"),
            Err(ParseTraceError::InvalidNumber { line: 5, .. })
        ));
    }

    #[test]
    fn test_op_count_mismatch() {
        assert!(matches!(
            parse("0\n2\n3\n1\na 0 8\nf 0\n"),
            Err(ParseTraceError::OpCountMismatch {
                expected: 3,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/trace.rep")).unwrap_err();
        assert!(matches!(err, LoadTraceError::Read { .. }));
    }
}
