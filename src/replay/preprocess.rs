//! Second replay pass: annotate events for the analyses that follow

use super::{
    tracker::{CallpathTracker, Frozen},
    ReplayError,
};
use crate::{calltree::CallTree, requests::RequestLinker, store::EventStore, team::TeamMember};
use trace_events::{Definitions, Timestamp};

/// Prepare the event stream of one location for analysis
///
/// Timestamps are shifted by the global time offset, Enter and Leave events
/// receive their call path from the merged call tree, and the events of
/// nonblocking requests are linked into chains. Call paths and request links
/// that the trace already carried are discarded. Returns the number of request
/// chains that were left open at the end of the trace.
///
/// All threads of the team must call this concurrently, after the call tree
/// was merged.
pub(crate) fn preprocess_trace(
    defs: &Definitions,
    store: &mut EventStore,
    tree: &CallTree,
    member: TeamMember,
    offset: Timestamp,
) -> Result<usize, ReplayError> {
    let location = store.location().id();
    let mut source = Frozen(tree);
    let mut tracker = CallpathTracker::new(defs, store.location(), member);
    tracker.start(&mut source, store.get(0))?;

    let mut linker = RequestLinker::new();
    let events = store.events_mut();
    for idx in 0..events.len() {
        events[idx].shift_timestamp(offset);
        events[idx].clear_annotations();
        if let Some(callpath) = tracker.step(&mut source, events, idx)? {
            events[idx].attach_callpath(callpath);
        }
        linker.link(events, idx);
    }
    Ok(linker.finish(location))
}
