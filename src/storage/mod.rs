//! # Bounded Persistent Log Storage
//!
//! This module provides the durable overflow buffer used when the
//! persistent tier must absorb writes awaiting transfer to a larger store
//! (e.g., write-ahead records bound for an append-only file).
//!
//! ## File Layout
//!
//! A log is a single fixed-size file: a 64-byte header followed by a data
//! region of exactly the configured capacity. The file never grows or
//! shrinks after creation; "resetting" the log only moves the logical write
//! offset back to zero.
//!
//! ```text
//! +------------------+--------------------------------------+
//! | LogHeader (64B)  | data region (capacity bytes)         |
//! |  magic           |                                      |
//! |  version         |  [0 .. write_offset) = live content  |
//! |  capacity        |  [write_offset ..)   = reusable      |
//! |  write_offset    |                                      |
//! |  checksum        |                                      |
//! +------------------+--------------------------------------+
//! ```
//!
//! ## Append Atomicity
//!
//! Data bytes are written and synced before the header's write offset
//! advances. The header write is the commit point: a crash mid-append leaves
//! the old offset in place and the torn bytes logically outside the log, so
//! `open` and `check` never observe a partial append.
//!
//! ## Overflow Protocol
//!
//! An append that would fill the log first drains the entire current
//! contents to an external sink in append order, then rewinds and appends.
//! Every byte is either still in the log or has been handed to the sink
//! before being overwritten; a sink failure aborts the protocol with the log
//! untouched.
//!
//! ## Concurrency
//!
//! Single-writer by design: all mutating methods take `&mut self` and a log
//! is owned exclusively by the caller that opened it. The drain step reads
//! the whole log, so the type system preventing interleaved appends is a
//! correctness requirement, not a convenience.

mod bounded_log;

pub use bounded_log::{BoundedLog, DrainSink, LogError, LogHeader};
