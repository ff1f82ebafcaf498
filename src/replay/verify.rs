//! First replay pass: fix the event order and build the local call tree

use super::{tracker::CallpathTracker, ReplayError, TimeOffset};
use crate::{calltree::CallTree, store::EventStore, team::TeamMember};
use trace_events::{Definitions, EventGroup};

/// Move buffer flush events to their chronological position
///
/// The tracer records the Enter/Leave events of a trace buffer flush at the
/// point where the flush was triggered, but the events that follow them in
/// the buffer may have earlier timestamps. Each flush event is moved forward
/// past every following event whose timestamp is not later than its own.
///
/// Returns the number of events that were moved.
pub fn rectify_flushes(defs: &Definitions, store: &mut EventStore) -> usize {
    let flushing = defs.flushing_region();
    let mut moved = 0;
    for idx in (0..store.len()).rev() {
        let event = &store[idx];
        let is_frame = event.is_of(EventGroup::Enter) || event.is_of(EventGroup::Leave);
        if !is_frame || event.region() != Some(flushing) {
            continue;
        }
        let timestamp = event.timestamp();
        let mut current = idx;
        while current + 1 < store.len() && store[current + 1].timestamp() <= timestamp {
            store.swap(current, current + 1);
            current += 1;
        }
        if current != idx {
            moved += 1;
        }
    }
    if moved > 0 {
        log::debug!(
            "Moved {moved} buffer flush events of {}",
            store.location().name()
        );
    }
    moved
}

/// Verify the event stream of one location and build its call tree
///
/// All threads of the team must call this concurrently.
pub(crate) fn verify_calltree(
    defs: &Definitions,
    store: &mut EventStore,
    member: TeamMember,
    offset: &TimeOffset,
) -> Result<CallTree, ReplayError> {
    offset.contribute(store.get(0).map(|event| event.timestamp()));
    rectify_flushes(defs, store);

    let mut tree = CallTree::new();
    let mut tracker = CallpathTracker::new(defs, store.location(), member);
    tracker.start(&mut tree, store.get(0))?;
    let events = store.events();
    for idx in 0..events.len() {
        tracker.step(&mut tree, events, idx)?;
    }
    tracker.finish()?;
    log::debug!(
        "Location {} has {} distinct call paths",
        store.location().name(),
        tree.len()
    );
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trace_events::{EventRecord, Location, LocationId, Paradigm, Payload, RegionRole};

    #[test]
    fn flushes() {
        let mut builder = Definitions::builder();
        let main = builder.add_region("main", RegionRole::Function, Paradigm::User);
        let work = builder.add_region("work", RegionRole::Function, Paradigm::User);
        let defs = builder.build();
        let flush = defs.flushing_region();

        let mut store = EventStore::from_records(
            Location::new(LocationId(0), 0, "master"),
            [
                EventRecord::new(1.0, Payload::enter(main)),
                EventRecord::new(5.0, Payload::enter(flush)),
                EventRecord::new(6.0, Payload::leave(flush)),
                EventRecord::new(2.0, Payload::enter(work)),
                EventRecord::new(3.0, Payload::leave(work)),
                EventRecord::new(7.0, Payload::leave(main)),
            ],
        );
        assert_eq!(rectify_flushes(&defs, &mut store), 2);
        let order = store
            .iter()
            .map(|event| (event.timestamp(), event.region()))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            [
                (1.0, Some(main)),
                (2.0, Some(work)),
                (3.0, Some(work)),
                (5.0, Some(flush)),
                (6.0, Some(flush)),
                (7.0, Some(main)),
            ]
        );

        // Already in order
        assert_eq!(rectify_flushes(&defs, &mut store), 0);
    }
}
