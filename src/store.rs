//! Ordered storage of the events recorded on one location

use crate::cursor::Cursor;
use std::ops::Index;
use trace_events::{Definitions, EventKind, EventRecord, FactoryError, FactoryRegistry, Location};

/// Events recorded on one location, in capture order
#[derive(Clone, Debug, PartialEq)]
pub struct EventStore {
    /// Location which recorded these events
    location: Location,

    /// Events in capture order
    events: Vec<EventRecord>,

    /// Number of thread teams forked by this location
    num_forks: usize,
}
//
impl EventStore {
    /// Set up an empty store
    pub fn new(location: Location) -> Self {
        Self {
            location,
            events: Vec::new(),
            num_forks: 0,
        }
    }

    /// Set up a store from a list of events
    pub fn from_records(location: Location, events: impl IntoIterator<Item = EventRecord>) -> Self {
        let mut result = Self::new(location);
        result.extend(events);
        result
    }

    /// Decode a buffer of consecutive binary event records
    pub fn from_bytes(
        location: Location,
        registry: &FactoryRegistry,
        defs: &Definitions,
        bytes: &[u8],
    ) -> Result<Self, FactoryError> {
        let events = registry.decode_all(defs, bytes)?;
        log::debug!(
            "Decoded {} events recorded by location {}",
            events.len(),
            location.name()
        );
        Ok(Self::from_records(location, events))
    }

    /// Location which recorded these events
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Append an event
    pub fn push(&mut self, event: EventRecord) {
        if event.kind() == EventKind::ThreadFork {
            self.num_forks += 1;
        }
        self.events.push(event);
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Truth that no event was recorded
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of thread teams forked by this location
    pub fn num_forks(&self) -> usize {
        self.num_forks
    }

    /// Access an event by index
    pub fn get(&self, idx: usize) -> Option<&EventRecord> {
        self.events.get(idx)
    }

    /// Mutable access to an event, for late corrections
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut EventRecord> {
        self.events.get_mut(idx)
    }

    /// All events in capture order
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Mutable access to all events, used to annotate them after replay
    pub(crate) fn events_mut(&mut self) -> &mut [EventRecord] {
        &mut self.events
    }

    /// Iterate over events in capture order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &EventRecord> + ExactSizeIterator {
        self.events.iter()
    }

    /// Iterate over events in reverse capture order
    pub fn iter_rev(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter().rev()
    }

    /// Exchange two events
    ///
    /// This is only meant to fix up the placement of buffer flush events.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.events.swap(a, b)
    }

    /// Cursor to the first event, or the end of the store if it is empty
    pub fn begin(&self) -> Cursor {
        Cursor::new(self, 0)
    }

    /// Cursor to the end of the store
    pub fn end(&self) -> Cursor {
        Cursor::new(self, self.len())
    }

    /// Cursor to the event at a certain index
    ///
    /// # Panics
    ///
    /// If the index is past the end of the store.
    pub fn at(&self, idx: usize) -> Cursor {
        assert!(idx <= self.len(), "Cursor index {idx} is out of bounds");
        Cursor::new(self, idx)
    }
}
//
impl Extend<EventRecord> for EventStore {
    fn extend<I: IntoIterator<Item = EventRecord>>(&mut self, iter: I) {
        for event in iter {
            self.push(event);
        }
    }
}
//
impl Index<usize> for EventStore {
    type Output = EventRecord;

    fn index(&self, idx: usize) -> &EventRecord {
        &self.events[idx]
    }
}
