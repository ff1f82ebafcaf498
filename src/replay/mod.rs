//! Multi-threaded replay of the event streams of one process
//!
//! Each location of the process is replayed by its own thread. The replay
//! happens in two passes separated by a call tree merge:
//!
//! - The verification pass fixes the placement of buffer flush events,
//!   checks that Enter and Leave events are balanced, and builds a call tree
//!   for each location.
//! - The per-location trees are merged into a single tree, shared by all
//!   threads.
//! - The preprocessing pass shifts timestamps so that the process starts at
//!   time zero, attaches call paths from the merged tree to Enter and Leave
//!   events, and links the events of nonblocking requests.

mod preprocess;
mod tracker;
mod verify;

pub use self::verify::rectify_flushes;

use crate::{
    calltree::CallTree,
    store::EventStore,
    team::{SyncPoint, Team, TeamError, TeamMember},
};
use std::sync::{Mutex, OnceLock};
use thiserror::Error;
use trace_events::{CallsiteId, Definitions, LocationId, RegionId, TaskId, Timestamp};

/// Replay the event streams of every location of a process
///
/// `stores` must be ordered by team-local thread number, the first store
/// being the master thread. On success, every store has been preprocessed,
/// and the merged call tree is returned along with some statistics.
///
/// If any thread fails, the other threads are released from the barriers
/// they are waiting on and the first failure that is not a consequence of
/// another thread's failure is reported. Locations must record the same
/// number of thread teams, otherwise the replay fails with
/// `TeamError::Diverged`.
pub fn replay_process(
    defs: &Definitions,
    stores: &mut [EventStore],
) -> Result<ReplayOutcome, ReplayError> {
    if stores.is_empty() {
        log::warn!("No location to replay");
        return Ok(ReplayOutcome::default());
    }
    log::info!("Replaying {} locations", stores.len());

    let team = Team::new(stores.len());
    let offset = TimeOffset::new();
    let merged = OnceLock::new();
    let results = std::thread::scope(|s| {
        let handles = stores
            .iter_mut()
            .enumerate()
            .map(|(thread, store)| {
                let (team, offset, merged) = (&team, &offset, &merged);
                s.spawn(move || {
                    let member = team.member(thread);
                    let _guard = member.abort_on_panic();
                    let result = replay_location(defs, store, member, offset, merged);
                    if let Err(e) = &result {
                        log::debug!("Replay thread {thread} failed: {e}");
                        team.abort();
                    }
                    result
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    });

    let mut open_requests = 0;
    let mut root_cause = None;
    let mut aborted = false;
    for result in results {
        match result {
            Ok(Ok(num_open)) => open_requests += num_open,
            Ok(Err(ReplayError::Team(TeamError::Aborted))) => aborted = true,
            Ok(Err(e)) => {
                root_cause.get_or_insert(e);
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
    if let Some(e) = root_cause {
        return Err(e);
    }
    if aborted {
        return Err(TeamError::Aborted.into());
    }

    let tree = merged.into_inner().unwrap_or_default();
    log::info!("Merged call tree has {} call paths", tree.len());
    Ok(ReplayOutcome {
        tree,
        time_offset: offset.get(),
        open_requests,
    })
}

/// Replay the event stream of one location
fn replay_location(
    defs: &Definitions,
    store: &mut EventStore,
    member: TeamMember,
    offset: &TimeOffset,
    merged: &OnceLock<CallTree>,
) -> Result<usize, ReplayError> {
    let tree = verify::verify_calltree(defs, store, member, offset)?;
    if let Some(tree) = member.merge(tree)? {
        merged.get_or_init(|| tree);
    }
    member.barrier(SyncPoint::Merge)?;
    let tree = merged
        .get()
        .expect("The master thread should have provided the merged call tree");
    preprocess::preprocess_trace(defs, store, tree, member, offset.get())
}

/// Result of a successful process replay
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    /// Call tree of the whole process
    tree: CallTree,

    /// Timestamp of the earliest event, which was subtracted from all
    /// timestamps
    time_offset: Timestamp,

    /// Number of request chains left open at the end of the trace
    open_requests: usize,
}
//
impl ReplayOutcome {
    /// Call tree of the whole process
    pub fn tree(&self) -> &CallTree {
        &self.tree
    }

    /// Extract the call tree
    pub fn into_tree(self) -> CallTree {
        self.tree
    }

    /// Time offset that was subtracted from all timestamps
    pub fn time_offset(&self) -> Timestamp {
        self.time_offset
    }

    /// Number of request chains left open at the end of the trace
    pub fn open_requests(&self) -> usize {
        self.open_requests
    }
}

/// Earliest timestamp of the process, reduced across threads
#[derive(Debug, Default)]
pub(crate) struct TimeOffset(Mutex<Option<Timestamp>>);
//
impl TimeOffset {
    /// Start with no timestamp
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for the first timestamp of a location, if it has events
    pub fn contribute(&self, first: Option<Timestamp>) {
        let Some(first) = first else {
            return;
        };
        let mut offset = self.0.lock().expect("A replay thread has crashed");
        *offset = Some(offset.map_or(first, |offset| offset.min(first)));
    }

    /// Final offset, zero if no location recorded any event
    ///
    /// Only meaningful once all threads have contributed.
    pub fn get(&self) -> Timestamp {
        self.0
            .lock()
            .expect("A replay thread has crashed")
            .unwrap_or(0.0)
    }
}

/// Things that can go wrong during replay
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ReplayError {
    /// A Leave event had no matching Enter event
    #[error("unbalanced ENTER/LEAVE events on {location} (too many LEAVEs)")]
    TooManyLeaves {
        /// Location whose events are unbalanced
        location: LocationId,
    },

    /// Some Enter events had no matching Leave event
    #[error("unbalanced ENTER/LEAVE events on {location} (too many ENTERs)")]
    TooManyEnters {
        /// Location whose events are unbalanced
        location: LocationId,
    },

    /// A task was switched to but never entered a region
    #[error("{task} of {location} does not enter any region after it starts")]
    MissingTaskEntry {
        /// Location that executed the task
        location: LocationId,

        /// Task that was switched to
        task: TaskId,
    },

    /// A call path is missing from the merged call tree
    #[error("call tree has no path entering {region} from {callsite}, as seen on {location}")]
    UnknownCallpath {
        /// Location where the call path was encountered
        location: LocationId,

        /// Region that was entered
        region: RegionId,

        /// Call site it was entered from
        callsite: CallsiteId,
    },

    /// Threads could not synchronize, either because another replay thread
    /// failed or because locations disagree on the thread team schedule
    #[error(transparent)]
    Team(#[from] TeamError),
}
