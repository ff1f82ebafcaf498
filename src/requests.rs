//! Linking of the events that refer to the same nonblocking request
//!
//! A nonblocking MPI operation produces a chain of events sharing a request
//! id: the initiating request, any number of test events, and finally the
//! completion or cancellation. Consecutive events of a chain are linked to
//! each other through their index distance, so that cursors can walk the
//! chain without searching.

use hashbrown::{hash_map::Entry, HashMap};
use trace_events::{EventKind, EventRecord, LocationId, RequestId};

/// Request chain linker
///
/// Events must be fed in trace order, once each.
#[derive(Debug, Default)]
pub struct RequestLinker {
    /// Index of the last seen event of each open chain
    pending: HashMap<RequestId, usize, ahash::RandomState>,
}
//
impl RequestLinker {
    /// Set up a linker for one event stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Link the event at index `idx` of `events` to its chain, if any
    pub fn link(&mut self, events: &mut [EventRecord], idx: usize) {
        let Some(request) = events[idx].request() else {
            return;
        };
        match self.pending.entry(request) {
            Entry::Occupied(mut entry) => {
                let prev = *entry.get();
                let Ok(distance) = u32::try_from(idx - prev) else {
                    log::warn!(
                        "Events #{prev} and #{idx} of request {request} are too far apart to \
                        be linked, starting a new chain"
                    );
                    entry.insert(idx);
                    return;
                };
                events[prev].link_next(distance);
                events[idx].link_prev(distance);
                if events[idx].kind() == EventKind::MpiRequestTested {
                    entry.insert(idx);
                } else {
                    entry.remove();
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(idx);
            }
        }
    }

    /// Number of chains that have not been completed yet
    pub fn num_open(&self) -> usize {
        self.pending.len()
    }

    /// Report the chains that were never completed, returning their count
    pub fn finish(self, location: LocationId) -> usize {
        for (request, idx) in &self.pending {
            log::warn!(
                "Request {request} of {location} was never completed \
                (last event is #{idx})"
            );
        }
        self.pending.len()
    }
}

/// Link all request chains of an event stream, returning the number of
/// chains left open at the end
pub fn link_requests(location: LocationId, events: &mut [EventRecord]) -> usize {
    let mut linker = RequestLinker::new();
    for idx in 0..events.len() {
        linker.link(events, idx);
    }
    linker.finish(location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trace_events::{Message, Nonblocking, Payload, RequestLinks};

    fn message() -> Message {
        Message {
            comm: 0.into(),
            peer: 1,
            tag: 42,
            bytes: 8,
        }
    }

    fn links(events: &[EventRecord]) -> Vec<Option<RequestLinks>> {
        events.iter().map(EventRecord::links).collect()
    }

    #[test]
    fn send_chain() {
        let request = RequestId(7);
        let mut events = vec![
            EventRecord::new(
                1.0,
                Payload::MpiSendRequest(message(), Nonblocking::new(request)),
            ),
            EventRecord::new(2.0, Payload::enter(3.into())),
            EventRecord::new(3.0, Payload::MpiRequestTested(Nonblocking::new(request))),
            EventRecord::new(4.0, Payload::leave(3.into())),
            EventRecord::new(5.0, Payload::MpiSendComplete(Nonblocking::new(request))),
        ];
        assert_eq!(link_requests(LocationId(0), &mut events), 0);
        assert_eq!(
            links(&events),
            [
                Some(RequestLinks { prev: 0, next: 2 }),
                None,
                Some(RequestLinks { prev: 2, next: 2 }),
                None,
                Some(RequestLinks { prev: 2, next: 0 }),
            ]
        );
    }

    #[test]
    fn interleaved_chains() {
        let (a, b) = (RequestId(1), RequestId(2));
        let mut events = vec![
            EventRecord::new(1.0, Payload::MpiRecvRequest(Nonblocking::new(a))),
            EventRecord::new(2.0, Payload::MpiRecvRequest(Nonblocking::new(b))),
            EventRecord::new(3.0, Payload::MpiCancelled(Nonblocking::new(a))),
            EventRecord::new(
                4.0,
                Payload::MpiRecvComplete(message(), Nonblocking::new(b)),
            ),
        ];
        assert_eq!(link_requests(LocationId(0), &mut events), 0);
        assert_eq!(
            links(&events),
            [
                Some(RequestLinks { prev: 0, next: 2 }),
                Some(RequestLinks { prev: 0, next: 2 }),
                Some(RequestLinks { prev: 2, next: 0 }),
                Some(RequestLinks { prev: 2, next: 0 }),
            ]
        );
    }

    #[test]
    fn reused_request_id() {
        let request = RequestId(3);
        let mut events = vec![
            EventRecord::new(1.0, Payload::MpiRecvRequest(Nonblocking::new(request))),
            EventRecord::new(
                2.0,
                Payload::MpiRecvComplete(message(), Nonblocking::new(request)),
            ),
            EventRecord::new(3.0, Payload::MpiRecvRequest(Nonblocking::new(request))),
        ];
        let mut linker = RequestLinker::new();
        for idx in 0..events.len() {
            linker.link(&mut events, idx);
        }
        assert_eq!(linker.num_open(), 1);
        assert_eq!(
            links(&events),
            [
                Some(RequestLinks { prev: 0, next: 1 }),
                Some(RequestLinks { prev: 1, next: 0 }),
                Some(RequestLinks::default()),
            ]
        );
        assert_eq!(linker.finish(LocationId(0)), 1);
    }
}
