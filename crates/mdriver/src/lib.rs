//! Trace-driven test harness for the [`tagalloc`] heap.
//!
//! [`trace`] reads allocation traces, [`replay`] runs them against a fresh
//! heap while validating every payload it gets back.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

#[macro_use]
pub mod log;
pub mod replay;
pub mod trace;
