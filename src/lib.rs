//! Post-mortem call path reconstruction for parallel execution traces
//!
//! Every location (thread) of a traced process records a stream of events:
//! region entries and exits, thread team creation, task switches, message
//! requests, lock operations... This crate replays the streams of one
//! process concurrently, one thread per location, to rebuild the call tree
//! of the whole process and annotate each event with its call path. It also
//! provides the building blocks that trace analyses need afterwards: event
//! navigation, per-task call stacks and lock acquisition replay.
//!
//! Event records and the definitions they refer to live in the
//! `trace-events` crate, which is re-exported.

#![deny(missing_docs)]

pub mod callstack;
pub mod calltree;
pub mod cursor;
pub mod locks;
pub mod replay;
pub mod requests;
pub mod store;
pub mod team;

pub use crate::{
    callstack::Callstack,
    calltree::{CallTree, CallTreeError, Callpath, PathStep},
    cursor::Cursor,
    locks::{LockError, LockKind, LockTracker},
    replay::{replay_process, ReplayError, ReplayOutcome},
    requests::RequestLinker,
    store::EventStore,
    team::{SyncPoint, Team, TeamError},
};
pub use trace_events;
