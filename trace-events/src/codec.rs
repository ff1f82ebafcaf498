//! Binary encoding of event records
//!
//! Each record is laid out as a little-endian `u32` kind tag, a `f64`
//! timestamp, then the fields of its payload in declaration order. Optional
//! call paths are encoded as `CallpathId::NO_ID` when absent.

use crate::{
    defs::Paradigm,
    ids::{CallpathId, CallsiteId, CommId, LockId, RegionId, RequestId, TaskId},
    kind::EventKind,
    record::{
        Collective, EventRecord, Frame, LockEvent, Message, Nonblocking, Payload, RequestLinks,
        RmaTransfer, TaskEvent, ThreadEvent,
    },
};
use nom::{
    combinator::map,
    number::complete::{le_f64, le_u32, le_u64},
    sequence::tuple,
    IResult,
};
use thiserror::Error;

/// Parser input
type Input<'a> = &'a [u8];

/// Decode one event record from the start of a byte buffer
///
/// Returns the decoded record and the remaining bytes.
pub(crate) fn decode(input: Input) -> Result<(EventRecord, Input), DecodeError> {
    let (input, tag) = le_u32::<_, nom::error::Error<_>>(input)
        .map_err(|_| DecodeError::Truncated { kind: None })?;
    let kind = EventKind::from_repr(tag).ok_or(DecodeError::UnknownKind(tag))?;
    let (input, timestamp) = le_f64::<_, nom::error::Error<_>>(input)
        .map_err(|_| DecodeError::Truncated { kind: Some(kind) })?;
    let (input, payload) =
        payload(kind, input).map_err(|_| DecodeError::Truncated { kind: Some(kind) })?;
    Ok((EventRecord::new(timestamp, payload), input))
}

/// Append the binary encoding of an event record to a byte buffer
pub(crate) fn encode(record: &EventRecord, output: &mut Vec<u8>) {
    let mut out = Writer(output);
    out.u32(record.kind() as u32);
    out.f64(record.timestamp());
    match record.payload() {
        Payload::Enter(frame)
        | Payload::EnterCs(frame)
        | Payload::EnterProgram(frame)
        | Payload::Leave(frame)
        | Payload::LeaveProgram(frame) => out.frame(frame),
        Payload::MpiSend(message) | Payload::MpiRecv(message) => out.message(message),
        Payload::MpiSendRequest(message, nonblocking)
        | Payload::MpiRecvComplete(message, nonblocking) => {
            out.message(message);
            out.nonblocking(nonblocking);
        }
        Payload::MpiSendComplete(nonblocking)
        | Payload::MpiRecvRequest(nonblocking)
        | Payload::MpiRequestTested(nonblocking)
        | Payload::MpiCancelled(nonblocking) => out.nonblocking(nonblocking),
        Payload::MpiCollectiveBegin | Payload::MpiRmaCollectiveBegin => {}
        Payload::MpiCollectiveEnd(collective) => {
            out.u32(collective.comm.0);
            out.u32(collective.root);
            out.u64(collective.sent);
            out.u64(collective.received);
        }
        Payload::ThreadAcquireLock(lock) | Payload::ThreadReleaseLock(lock) => {
            out.u32(lock.lock.0);
            out.u32(lock.order);
            out.u32(lock.paradigm.to_wire());
        }
        Payload::ThreadTaskCreate(task)
        | Payload::ThreadTaskComplete(task)
        | Payload::ThreadTaskSwitch(task) => {
            out.u32(task.team.0);
            out.u64(task.task.0);
        }
        Payload::ThreadBegin(thread)
        | Payload::ThreadEnd(thread)
        | Payload::ThreadCreate(thread)
        | Payload::ThreadWait(thread) => {
            out.u32(thread.team.0);
            out.u64(thread.sequence);
        }
        Payload::ThreadFork(paradigm, team_size) => {
            out.u32(paradigm.to_wire());
            out.u32(*team_size);
        }
        Payload::ThreadJoin(paradigm) => out.u32(paradigm.to_wire()),
        Payload::ThreadTeamBegin(team) | Payload::ThreadTeamEnd(team) => out.u32(team.0),
        Payload::RmaPutStart(transfer) | Payload::RmaGetStart(transfer) => {
            out.u32(transfer.rma);
            out.u32(transfer.target);
            out.u64(transfer.bytes);
        }
        Payload::RmaPutEnd(rma) | Payload::RmaGetEnd(rma) | Payload::MpiRmaCollectiveEnd(rma) => {
            out.u32(*rma)
        }
    }
}

/// Problem encountered while decoding an event record
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DecodeError {
    /// The kind tag does not match any known event kind
    #[error("unknown event kind tag {0}")]
    UnknownKind(u32),

    /// The buffer ended in the middle of a record
    #[error("truncated {} record", .kind.map_or("event", |kind| kind.into()))]
    Truncated {
        /// Kind of the truncated record, if the tag could be read
        kind: Option<EventKind>,
    },
}

/// Decode the payload of an event of a certain kind
fn payload(kind: EventKind, input: Input) -> IResult<Input, Payload> {
    use EventKind as K;
    match kind {
        K::Enter => map(frame, Payload::Enter)(input),
        K::EnterCs => map(frame, Payload::EnterCs)(input),
        K::EnterProgram => map(frame, Payload::EnterProgram)(input),
        K::Leave => map(frame, Payload::Leave)(input),
        K::LeaveProgram => map(frame, Payload::LeaveProgram)(input),
        K::MpiSend => map(message, Payload::MpiSend)(input),
        K::MpiSendRequest => map(tuple((message, nonblocking)), |(message, nonblocking)| {
            Payload::MpiSendRequest(message, nonblocking)
        })(input),
        K::MpiSendComplete => map(nonblocking, Payload::MpiSendComplete)(input),
        K::MpiRecv => map(message, Payload::MpiRecv)(input),
        K::MpiRecvRequest => map(nonblocking, Payload::MpiRecvRequest)(input),
        K::MpiRecvComplete => map(tuple((message, nonblocking)), |(message, nonblocking)| {
            Payload::MpiRecvComplete(message, nonblocking)
        })(input),
        K::MpiRequestTested => map(nonblocking, Payload::MpiRequestTested)(input),
        K::MpiCancelled => map(nonblocking, Payload::MpiCancelled)(input),
        K::MpiCollectiveBegin => Ok((input, Payload::MpiCollectiveBegin)),
        K::MpiCollectiveEnd => map(
            tuple((le_u32, le_u32, le_u64, le_u64)),
            |(comm, root, sent, received)| {
                Payload::MpiCollectiveEnd(Collective {
                    comm: CommId(comm),
                    root,
                    sent,
                    received,
                })
            },
        )(input),
        K::ThreadAcquireLock => map(lock, Payload::ThreadAcquireLock)(input),
        K::ThreadReleaseLock => map(lock, Payload::ThreadReleaseLock)(input),
        K::ThreadTaskCreate => map(task, Payload::ThreadTaskCreate)(input),
        K::ThreadTaskComplete => map(task, Payload::ThreadTaskComplete)(input),
        K::ThreadTaskSwitch => map(task, Payload::ThreadTaskSwitch)(input),
        K::ThreadBegin => map(thread, Payload::ThreadBegin)(input),
        K::ThreadEnd => map(thread, Payload::ThreadEnd)(input),
        K::ThreadCreate => map(thread, Payload::ThreadCreate)(input),
        K::ThreadWait => map(thread, Payload::ThreadWait)(input),
        K::ThreadFork => map(tuple((paradigm, le_u32)), |(paradigm, team_size)| {
            Payload::ThreadFork(paradigm, team_size)
        })(input),
        K::ThreadJoin => map(paradigm, Payload::ThreadJoin)(input),
        K::ThreadTeamBegin => map(comm, Payload::ThreadTeamBegin)(input),
        K::ThreadTeamEnd => map(comm, Payload::ThreadTeamEnd)(input),
        K::RmaPutStart => map(transfer, Payload::RmaPutStart)(input),
        K::RmaPutEnd => map(le_u32, Payload::RmaPutEnd)(input),
        K::RmaGetStart => map(transfer, Payload::RmaGetStart)(input),
        K::RmaGetEnd => map(le_u32, Payload::RmaGetEnd)(input),
        K::MpiRmaCollectiveBegin => Ok((input, Payload::MpiRmaCollectiveBegin)),
        K::MpiRmaCollectiveEnd => map(le_u32, Payload::MpiRmaCollectiveEnd)(input),
    }
}

fn frame(input: Input) -> IResult<Input, Frame> {
    map(
        tuple((le_u32, le_u32, le_u32)),
        |(region, callsite, callpath)| Frame {
            region: RegionId(region),
            callsite: CallsiteId(callsite),
            callpath: (callpath != CallpathId::NO_ID).then_some(CallpathId(callpath)),
        },
    )(input)
}

fn message(input: Input) -> IResult<Input, Message> {
    map(
        tuple((le_u32, le_u32, le_u32, le_u64)),
        |(comm, peer, tag, bytes)| Message {
            comm: CommId(comm),
            peer,
            tag,
            bytes,
        },
    )(input)
}

fn nonblocking(input: Input) -> IResult<Input, Nonblocking> {
    map(tuple((le_u64, le_u32, le_u32)), |(request, prev, next)| {
        Nonblocking {
            request: RequestId(request),
            links: RequestLinks { prev, next },
        }
    })(input)
}

fn lock(input: Input) -> IResult<Input, LockEvent> {
    map(
        tuple((le_u32, le_u32, paradigm)),
        |(lock, order, paradigm)| LockEvent {
            lock: LockId(lock),
            order,
            paradigm,
        },
    )(input)
}

fn task(input: Input) -> IResult<Input, TaskEvent> {
    map(tuple((comm, le_u64)), |(team, task)| TaskEvent {
        team,
        task: TaskId(task),
    })(input)
}

fn thread(input: Input) -> IResult<Input, ThreadEvent> {
    map(tuple((comm, le_u64)), |(team, sequence)| ThreadEvent {
        team,
        sequence,
    })(input)
}

fn transfer(input: Input) -> IResult<Input, RmaTransfer> {
    map(tuple((le_u32, le_u32, le_u64)), |(rma, target, bytes)| {
        RmaTransfer { rma, target, bytes }
    })(input)
}

fn comm(input: Input) -> IResult<Input, CommId> {
    map(le_u32, CommId)(input)
}

fn paradigm(input: Input) -> IResult<Input, Paradigm> {
    map(le_u32, Paradigm::from_wire)(input)
}

/// Little-endian output helper
struct Writer<'a>(&'a mut Vec<u8>);
//
impl Writer<'_> {
    fn u32(&mut self, value: u32) {
        self.0.extend_from_slice(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.0.extend_from_slice(&value.to_le_bytes());
    }

    fn f64(&mut self, value: f64) {
        self.0.extend_from_slice(&value.to_le_bytes());
    }

    fn frame(&mut self, frame: &Frame) {
        self.u32(frame.region.0);
        self.u32(frame.callsite.0);
        self.u32(frame.callpath.map_or(CallpathId::NO_ID, |id| id.0));
    }

    fn message(&mut self, message: &Message) {
        self.u32(message.comm.0);
        self.u32(message.peer);
        self.u32(message.tag);
        self.u64(message.bytes);
    }

    fn nonblocking(&mut self, nonblocking: &Nonblocking) {
        self.u64(nonblocking.request.0);
        self.u32(nonblocking.links.prev);
        self.u32(nonblocking.links.next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn encoded(record: &EventRecord) -> Vec<u8> {
        let mut bytes = Vec::new();
        encode(record, &mut bytes);
        bytes
    }

    #[test]
    fn enter_layout() {
        let record = EventRecord::new(2.0, Payload::enter_cs(RegionId(5), CallsiteId(1)));
        let bytes = encoded(&record);
        assert_eq!(bytes.len(), 4 + 8 + 3 * 4);
        assert_eq!(&bytes[..4], &(EventKind::EnterCs as u32).to_le_bytes());
        assert_eq!(&bytes[4..12], &2.0f64.to_le_bytes());
        assert_eq!(&bytes[20..], &u32::MAX.to_le_bytes());

        let (decoded, rest) = decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert!(rest.is_empty());
    }

    #[test]
    fn consecutive_records() {
        let mut first = EventRecord::new(0.5, Payload::leave(RegionId(3)));
        first.attach_callpath(CallpathId(8));
        let second = EventRecord::new(
            0.75,
            Payload::ThreadAcquireLock(LockEvent {
                lock: LockId(2),
                order: 4,
                paradigm: Paradigm::OpenMp,
            }),
        );
        let mut bytes = encoded(&first);
        encode(&second, &mut bytes);

        let (decoded, rest) = decode(&bytes).unwrap();
        assert_eq!(decoded, first);
        let (decoded, rest) = decode(rest).unwrap();
        assert_eq!(decoded, second);
        assert!(rest.is_empty());
    }

    #[test]
    fn errors() {
        assert_matches!(decode(&[]), Err(DecodeError::Truncated { kind: None }));
        assert_matches!(
            decode(&1000u32.to_le_bytes()),
            Err(DecodeError::UnknownKind(1000))
        );

        let record = EventRecord::new(
            1.0,
            Payload::ThreadTaskSwitch(TaskEvent {
                team: CommId(0),
                task: TaskId(12),
            }),
        );
        let bytes = encoded(&record);
        assert_matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(DecodeError::Truncated {
                kind: Some(EventKind::ThreadTaskSwitch)
            })
        );
        assert_eq!(
            DecodeError::Truncated {
                kind: Some(EventKind::ThreadTaskSwitch)
            }
            .to_string(),
            "truncated THREAD_TASK_SWITCH record"
        );
    }

    proptest! {
        #[test]
        fn arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            if let Ok((_, rest)) = decode(&bytes) {
                prop_assert!(rest.len() < bytes.len());
            }
        }

        #[test]
        fn truncation(region in 3..100u32, timestamp in 0.0..1e6f64, cut in 0..20usize) {
            let bytes = encoded(&EventRecord::new(timestamp, Payload::enter(RegionId(region))));
            let cut = cut.min(bytes.len() - 1);
            let expected_kind = (cut >= 4).then_some(EventKind::Enter);
            prop_assert_eq!(
                decode(&bytes[..cut]).unwrap_err(),
                DecodeError::Truncated { kind: expected_kind }
            );
        }
    }
}
