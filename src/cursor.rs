//! Navigation within the events of one location

use crate::store::EventStore;
use std::{
    cmp::Ordering,
    fmt::{self, Debug, Formatter},
};
use trace_events::{CallpathId, EventGroup, EventKind, EventRecord, TaskId, Timestamp};

/// Position within an event store
///
/// A cursor either points to an event or sits at the end of the store. Two
/// cursors are equal when they point to the same position of the same store.
/// Ordering cursors by time is done with `time_cmp()`, as it is unrelated to
/// positional identity.
#[derive(Clone, Copy)]
pub struct Cursor<'store> {
    /// Store which this cursor navigates
    store: &'store EventStore,

    /// Position within the store
    idx: usize,
}
//
impl<'store> Cursor<'store> {
    /// Set up a cursor, bounds are checked by the caller
    pub(crate) fn new(store: &'store EventStore, idx: usize) -> Self {
        debug_assert!(idx <= store.len());
        Self { store, idx }
    }

    /// Store which this cursor navigates
    pub fn store(&self) -> &'store EventStore {
        self.store
    }

    /// Position within the store
    pub fn index(&self) -> usize {
        self.idx
    }

    /// Truth that this cursor points to an event
    pub fn is_valid(&self) -> bool {
        self.idx < self.store.len()
    }

    /// Event that this cursor points to
    ///
    /// # Panics
    ///
    /// If this cursor sits at the end of the store.
    pub fn event(&self) -> &'store EventRecord {
        self.store
            .get(self.idx)
            .unwrap_or_else(|| panic!("Dereferenced the end of the trace of {}", self.location()))
    }

    /// Timestamp of the event that this cursor points to
    pub fn timestamp(&self) -> Timestamp {
        self.event().timestamp()
    }

    /// Compare the timestamps of the events that two cursors point to
    pub fn time_cmp(&self, other: &Cursor) -> Ordering {
        self.timestamp().total_cmp(&other.timestamp())
    }

    /// Move to the next position
    ///
    /// # Panics
    ///
    /// If this cursor already sits at the end of the store.
    pub fn step_forward(&mut self) {
        assert!(self.is_valid(), "Stepped past the end of the trace");
        self.idx += 1;
    }

    /// Move to the previous position
    ///
    /// # Panics
    ///
    /// If this cursor points to the first event.
    pub fn step_backward(&mut self) {
        assert!(self.idx > 0, "Stepped before the start of the trace");
        self.idx -= 1;
    }

    /// Event after this one, if any
    pub fn next(&self) -> Option<Self> {
        let idx = self.idx + 1;
        (idx < self.store.len()).then(|| Self::new(self.store, idx))
    }

    /// Event before this one, if any
    pub fn prev(&self) -> Option<Self> {
        Some(Self::new(self.store, self.idx.checked_sub(1)?))
    }

    /// Find the Enter event of the region that this event belongs to
    ///
    /// For a Leave event, this is the matching Enter event. Nested regions
    /// are skipped, and so are the regions of other tasks that execution
    /// switched to in between. Returns `None` if the trace starts before the
    /// Enter event is found.
    pub fn matching_enter(&self) -> Option<Self> {
        let implicit = self.implicit_task();
        let mut target = implicit;
        let mut encountered_tasks = false;
        let mut skip_block = false;
        let mut depth = 0usize;
        let mut result = *self;
        loop {
            result = result.prev()?;
            let event = result.event();
            if !skip_block {
                if event.is_of(EventGroup::Enter) {
                    if depth == 0 {
                        return Some(result);
                    }
                    depth -= 1;
                } else if event.is_of(EventGroup::Leave) {
                    depth += 1;
                }
            }
            match event.kind() {
                EventKind::ThreadTaskSwitch => {
                    if !encountered_tasks {
                        target = self.task_block_id();
                        encountered_tasks = true;
                    }
                    let prev_block = result
                        .prev()
                        .map_or(implicit, |prev| prev.task_block_id());
                    skip_block = prev_block != target;
                }
                EventKind::ThreadTaskComplete => {
                    // Scanning back from the implicit task into the last
                    // completed task, whose regions are not ours
                    if !encountered_tasks {
                        encountered_tasks = true;
                        skip_block = true;
                    }
                }
                _ => {}
            }
        }
    }

    /// Find the Leave event of the region that this event belongs to
    ///
    /// For an Enter event, this is the matching Leave event. Nested regions
    /// are skipped, and so are the regions of other tasks that execution
    /// switched to in between. Returns `None` if the trace ends before the
    /// Leave event is found.
    pub fn matching_leave(&self) -> Option<Self> {
        let implicit = self.implicit_task();
        let mut target = implicit;
        let mut encountered_tasks = false;
        let mut skip_block = false;
        let mut depth = 0usize;
        let mut result = *self;
        loop {
            result = result.next()?;
            let event = result.event();
            if !skip_block {
                if event.is_of(EventGroup::Leave) {
                    if depth == 0 {
                        return Some(result);
                    }
                    depth -= 1;
                } else if event.is_of(EventGroup::Enter) {
                    depth += 1;
                }
            }
            match event.kind() {
                EventKind::ThreadTaskSwitch => {
                    if !encountered_tasks {
                        target = self.task_block_id();
                        encountered_tasks = true;
                    }
                    skip_block = result.task_block_id() != target;
                }
                EventKind::ThreadTaskComplete => {
                    skip_block = target != implicit;
                }
                _ => {}
            }
        }
    }

    /// Find the start of the collective operation that this event ends
    ///
    /// # Panics
    ///
    /// If this is not the end of a collective operation.
    pub fn begin_of_block(&self) -> Option<Self> {
        let kind = self.event().kind();
        assert!(
            kind.is_of(EventGroup::End),
            "begin_of_block() called on a {kind} event"
        );
        let mut result = *self;
        loop {
            result = result.prev()?;
            if result.event().is_of(EventGroup::Begin) {
                return Some(result);
            }
        }
    }

    /// Find the end of the collective operation that this event starts
    ///
    /// # Panics
    ///
    /// If this is not the start of a collective operation.
    pub fn end_of_block(&self) -> Option<Self> {
        let kind = self.event().kind();
        assert!(
            kind.is_of(EventGroup::Begin),
            "end_of_block() called on a {kind} event"
        );
        let mut result = *self;
        loop {
            result = result.next()?;
            if result.event().is_of(EventGroup::End) {
                return Some(result);
            }
        }
    }

    /// First event of the request chain that this event belongs to
    ///
    /// Events which are not part of a request chain are their own request.
    pub fn initiating_request(&self) -> Self {
        let mut result = *self;
        while let Some(prev) = result.prev_chain_event() {
            result = prev;
        }
        result
    }

    /// Last event of the request chain that this event belongs to
    ///
    /// Events which are not part of a request chain are their own completion.
    pub fn completion_event(&self) -> Self {
        let mut result = *self;
        while let Some(next) = result.next_chain_event() {
            result = next;
        }
        result
    }

    /// Next event of the request chain, if any
    ///
    /// Links that point past the end of the trace are ignored.
    pub fn next_chain_event(&self) -> Option<Self> {
        let distance = self.event().links()?.next as usize;
        if distance == 0 {
            return None;
        }
        let idx = self
            .idx
            .checked_add(distance)
            .filter(|&idx| idx < self.store.len())?;
        Some(Self::new(self.store, idx))
    }

    /// Previous event of the request chain, if any
    ///
    /// Links that point before the start of the trace are ignored.
    pub fn prev_chain_event(&self) -> Option<Self> {
        let distance = self.event().links()?.prev as usize;
        if distance == 0 {
            return None;
        }
        Some(Self::new(self.store, self.idx.checked_sub(distance)?))
    }

    /// Task that was executing when this event was recorded
    ///
    /// A task completion event belongs to the task that it completes. After
    /// a task completion or the start of a thread team, execution falls back
    /// to the implicit task of the location.
    pub fn task_block_id(&self) -> TaskId {
        let mut iter = *self;
        loop {
            let event = iter.event();
            match event.kind() {
                EventKind::ThreadTaskSwitch => {
                    if let Some(task) = event.task() {
                        return task;
                    }
                }
                EventKind::ThreadTaskComplete if iter.idx == self.idx => {
                    if let Some(task) = event.task() {
                        return task;
                    }
                }
                EventKind::ThreadTaskComplete | EventKind::ThreadTeamBegin => {
                    return self.implicit_task()
                }
                _ => {}
            }
            match iter.prev() {
                Some(prev) => iter = prev,
                None => return self.implicit_task(),
            }
        }
    }

    /// Call path of the region that this event belongs to
    ///
    /// Only available once call paths have been attached to the trace.
    pub fn callpath(&self) -> Option<CallpathId> {
        let event = self.event();
        if event.is_of(EventGroup::Enter) || event.is_of(EventGroup::Leave) {
            event.callpath()
        } else {
            self.matching_enter()?.event().callpath()
        }
    }

    /// Implicit task of the location that recorded this event
    fn implicit_task(&self) -> TaskId {
        self.store.location().implicit_task()
    }

    /// Name of the location that recorded this event
    fn location(&self) -> &'store str {
        self.store.location().name()
    }
}
//
impl PartialEq for Cursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.store, other.store) && self.idx == other.idx
    }
}
//
impl Eq for Cursor<'_> {}
//
impl Debug for Cursor<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("Cursor")
            .field("location", &self.location())
            .field("idx", &self.idx)
            // Elide the EventStore from output as that's huge
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trace_events::{
        CommId, Location, LocationId, Nonblocking, Payload, RegionId, RequestId, TaskEvent,
    };

    const A: RegionId = RegionId(3);
    const B: RegionId = RegionId(4);
    const T1: TaskId = TaskId(1);

    fn store(payloads: impl IntoIterator<Item = Payload>) -> EventStore {
        EventStore::from_records(
            Location::new(LocationId(0), 0, "master"),
            payloads
                .into_iter()
                .enumerate()
                .map(|(idx, payload)| EventRecord::new(idx as f64, payload)),
        )
    }

    fn switch(task: TaskId) -> Payload {
        Payload::ThreadTaskSwitch(TaskEvent {
            team: CommId(0),
            task,
        })
    }

    fn complete(task: TaskId) -> Payload {
        Payload::ThreadTaskComplete(TaskEvent {
            team: CommId(0),
            task,
        })
    }

    #[test]
    fn stepping() {
        let store = store([Payload::enter(A), Payload::leave(A)]);
        let mut cursor = store.begin();
        assert!(cursor.is_valid());
        assert_eq!(cursor.prev(), None);
        cursor.step_forward();
        assert_eq!(cursor, store.at(1));
        assert_eq!(cursor.time_cmp(&store.begin()), Ordering::Greater);
        assert_eq!(cursor.next(), None);
        cursor.step_forward();
        assert_eq!(cursor, store.end());
        assert!(!cursor.is_valid());
        cursor.step_backward();
        assert_eq!(cursor.event().kind(), EventKind::Leave);

        let other = store.clone();
        assert_ne!(store.begin(), other.begin());
    }

    #[test]
    fn nested_regions() {
        let store = store([
            Payload::enter(A),
            Payload::enter(B),
            Payload::leave(B),
            Payload::enter(B),
            Payload::leave(B),
            Payload::leave(A),
        ]);
        assert_eq!(store.at(5).matching_enter(), Some(store.at(0)));
        assert_eq!(store.at(0).matching_leave(), Some(store.at(5)));
        assert_eq!(store.at(4).matching_enter(), Some(store.at(3)));
        assert_eq!(store.at(1).matching_leave(), Some(store.at(2)));
        assert_eq!(store.at(0).matching_enter(), None);
        assert_eq!(store.at(5).matching_leave(), None);
    }

    #[test]
    fn interleaved_tasks() {
        let store = store([
            Payload::enter(A),
            switch(T1),
            Payload::enter(B),
            switch(TaskId::implicit(0)),
            Payload::leave(A),
            switch(T1),
            Payload::leave(B),
            complete(T1),
        ]);
        assert_eq!(store.at(4).matching_enter(), Some(store.at(0)));
        assert_eq!(store.at(0).matching_leave(), Some(store.at(4)));
        assert_eq!(store.at(6).matching_enter(), Some(store.at(2)));
        assert_eq!(store.at(2).matching_leave(), Some(store.at(6)));
    }

    #[test]
    fn task_blocks() {
        let store = store([
            Payload::enter(A),
            switch(T1),
            Payload::enter(B),
            complete(T1),
            Payload::leave(A),
            Payload::ThreadTeamBegin(CommId(0)),
            Payload::enter(B),
        ]);
        let implicit = TaskId::implicit(0);
        let blocks = (0..store.len())
            .map(|idx| store.at(idx).task_block_id())
            .collect::<Vec<_>>();
        assert_eq!(
            blocks,
            [implicit, T1, T1, T1, implicit, implicit, implicit]
        );
    }

    #[test]
    fn collective_blocks() {
        let store = store([
            Payload::MpiCollectiveBegin,
            Payload::enter(A),
            Payload::leave(A),
            Payload::MpiRmaCollectiveEnd(0),
        ]);
        assert_eq!(store.at(3).begin_of_block(), Some(store.at(0)));
        assert_eq!(store.at(0).end_of_block(), Some(store.at(3)));
    }

    #[test]
    #[should_panic]
    fn block_on_wrong_kind() {
        let store = store([Payload::MpiCollectiveBegin, Payload::enter(A)]);
        store.at(1).begin_of_block();
    }

    #[test]
    fn request_chains() {
        let mut store = store([
            Payload::MpiRecvRequest(Nonblocking::new(RequestId(5))),
            Payload::enter(A),
            Payload::MpiRequestTested(Nonblocking::new(RequestId(5))),
            Payload::leave(A),
            Payload::MpiCancelled(Nonblocking::new(RequestId(5))),
        ]);
        store.get_mut(0).unwrap().link_next(2);
        store.get_mut(2).unwrap().link_prev(2);
        store.get_mut(2).unwrap().link_next(2);
        store.get_mut(4).unwrap().link_prev(2);

        let (head, middle, tail) = (store.at(0), store.at(2), store.at(4));
        assert_eq!(head.completion_event(), tail);
        assert_eq!(tail.initiating_request(), head);
        assert_eq!(middle.initiating_request(), head);
        assert_eq!(middle.next_chain_event(), Some(tail));
        assert_eq!(middle.prev_chain_event(), Some(head));
        assert_eq!(head.prev_chain_event(), None);
        assert_eq!(store.at(1).completion_event(), store.at(1));
    }

    #[test]
    fn corrupt_chain_links() {
        let mut store = store([
            Payload::MpiRecvRequest(Nonblocking::new(RequestId(5))),
            Payload::enter(A),
            Payload::MpiCancelled(Nonblocking::new(RequestId(5))),
        ]);
        store.get_mut(0).unwrap().link_prev(7);
        store.get_mut(0).unwrap().link_next(u32::MAX);
        store.get_mut(2).unwrap().link_prev(3);
        store.get_mut(2).unwrap().link_next(1);

        for idx in [0, 2] {
            let cursor = store.at(idx);
            assert_eq!(cursor.prev_chain_event(), None);
            assert_eq!(cursor.next_chain_event(), None);
            assert_eq!(cursor.initiating_request(), cursor);
            assert_eq!(cursor.completion_event(), cursor);
        }
    }

    #[test]
    fn callpaths() {
        let mut store = store([
            Payload::enter(A),
            Payload::ThreadFork(trace_events::Paradigm::OpenMp, 2),
            Payload::leave(A),
        ]);
        store.get_mut(0).unwrap().attach_callpath(CallpathId(0));
        store.get_mut(2).unwrap().attach_callpath(CallpathId(0));
        assert_eq!(store.at(1).callpath(), Some(CallpathId(0)));
        assert_eq!(store.at(2).callpath(), Some(CallpathId(0)));
    }
}
