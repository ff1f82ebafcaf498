//! Event records and their kind-specific payloads

use crate::{
    defs::Paradigm,
    ids::{CallpathId, CallsiteId, CommId, LockId, RegionId, RequestId, TaskId},
    kind::{EventGroup, EventKind},
    Timestamp,
};

/// Event recorded by the tracer on one location
///
/// The kind of an event is determined by its payload and cannot change after
/// construction. The only mutations that are allowed are the late corrections
/// performed while reconstructing call paths: shifting the timestamp by a
/// global offset, attaching the resolved call path of an Enter/Leave event,
/// and linking the events of a non-blocking request chain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventRecord {
    /// When this event happened
    timestamp: Timestamp,

    /// What happened
    payload: Payload,
}
//
impl EventRecord {
    /// Set up an event record
    ///
    /// Most users should go through an `EventFactory`, which also validates
    /// the identifiers of the payload against a definitions catalog.
    pub fn new(timestamp: Timestamp, payload: Payload) -> Self {
        Self { timestamp, payload }
    }

    /// When this event happened
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// What happened
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Kind of event
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Truth that this event belongs to a certain group of kinds
    pub fn is_of(&self, group: EventGroup) -> bool {
        self.kind().is_of(group)
    }

    /// Entered or left region, for Enter and Leave events
    pub fn region(&self) -> Option<RegionId> {
        self.frame().map(|frame| frame.region)
    }

    /// Call site of Enter events
    pub fn callsite(&self) -> Option<CallsiteId> {
        self.frame().map(|frame| frame.callsite)
    }

    /// Resolved call path, for Enter and Leave events that went through
    /// call path reconstruction
    pub fn callpath(&self) -> Option<CallpathId> {
        self.frame().and_then(|frame| frame.callpath)
    }

    /// Task which this task-related event is about
    pub fn task(&self) -> Option<TaskId> {
        match self.payload {
            Payload::ThreadTaskCreate(task)
            | Payload::ThreadTaskComplete(task)
            | Payload::ThreadTaskSwitch(task) => Some(task.task),
            _ => None,
        }
    }

    /// Lock which this lock event is about
    pub fn lock(&self) -> Option<LockEvent> {
        match self.payload {
            Payload::ThreadAcquireLock(lock) | Payload::ThreadReleaseLock(lock) => Some(lock),
            _ => None,
        }
    }

    /// Non-blocking request that this event belongs to
    pub fn request(&self) -> Option<RequestId> {
        self.nonblocking().map(|nonblocking| nonblocking.request)
    }

    /// Links to the neighbours of this event within its request chain
    pub fn links(&self) -> Option<RequestLinks> {
        self.nonblocking().map(|nonblocking| nonblocking.links)
    }

    /// Message properties, for point-to-point communication events
    pub fn message(&self) -> Option<Message> {
        match self.payload {
            Payload::MpiSend(message)
            | Payload::MpiRecv(message)
            | Payload::MpiSendRequest(message, _)
            | Payload::MpiRecvComplete(message, _) => Some(message),
            _ => None,
        }
    }

    /// Shift the timestamp of this event by a global offset
    pub fn shift_timestamp(&mut self, offset: Timestamp) {
        self.timestamp -= offset;
    }

    /// Attach the resolved call path of an Enter or Leave event
    ///
    /// # Panics
    ///
    /// If this event is neither an Enter nor a Leave event.
    pub fn attach_callpath(&mut self, callpath: CallpathId) {
        let kind = self.kind();
        let frame = self
            .frame_mut()
            .unwrap_or_else(|| panic!("{kind} events have no call path"));
        frame.callpath = Some(callpath);
    }

    /// Forget the call path and request chain links of this event
    pub fn clear_annotations(&mut self) {
        if let Some(frame) = self.frame_mut() {
            frame.callpath = None;
        }
        if let Some(nonblocking) = self.nonblocking_mut() {
            nonblocking.links = RequestLinks::default();
        }
    }

    /// Record the index distance to the next event of the request chain
    ///
    /// # Panics
    ///
    /// If this event does not belong to a non-blocking request chain.
    pub fn link_next(&mut self, distance: u32) {
        self.links_mut().next = distance;
    }

    /// Record the index distance to the previous event of the request chain
    ///
    /// # Panics
    ///
    /// If this event does not belong to a non-blocking request chain.
    pub fn link_prev(&mut self, distance: u32) {
        self.links_mut().prev = distance;
    }

    /// Access the payload of Enter and Leave events
    fn frame(&self) -> Option<&Frame> {
        match &self.payload {
            Payload::Enter(frame)
            | Payload::EnterCs(frame)
            | Payload::EnterProgram(frame)
            | Payload::Leave(frame)
            | Payload::LeaveProgram(frame) => Some(frame),
            _ => None,
        }
    }

    /// Mutable version of `frame()`
    fn frame_mut(&mut self) -> Option<&mut Frame> {
        match &mut self.payload {
            Payload::Enter(frame)
            | Payload::EnterCs(frame)
            | Payload::EnterProgram(frame)
            | Payload::Leave(frame)
            | Payload::LeaveProgram(frame) => Some(frame),
            _ => None,
        }
    }

    /// Access the request chain data of non-blocking events
    fn nonblocking(&self) -> Option<&Nonblocking> {
        match &self.payload {
            Payload::MpiSendRequest(_, nonblocking)
            | Payload::MpiRecvComplete(_, nonblocking)
            | Payload::MpiSendComplete(nonblocking)
            | Payload::MpiRecvRequest(nonblocking)
            | Payload::MpiRequestTested(nonblocking)
            | Payload::MpiCancelled(nonblocking) => Some(nonblocking),
            _ => None,
        }
    }

    /// Mutable version of `nonblocking()`
    fn nonblocking_mut(&mut self) -> Option<&mut Nonblocking> {
        match &mut self.payload {
            Payload::MpiSendRequest(_, nonblocking)
            | Payload::MpiRecvComplete(_, nonblocking)
            | Payload::MpiSendComplete(nonblocking)
            | Payload::MpiRecvRequest(nonblocking)
            | Payload::MpiRequestTested(nonblocking)
            | Payload::MpiCancelled(nonblocking) => Some(nonblocking),
            _ => None,
        }
    }

    /// Mutable access to the request chain links
    fn links_mut(&mut self) -> &mut RequestLinks {
        let kind = self.kind();
        match self.nonblocking_mut() {
            Some(nonblocking) => &mut nonblocking.links,
            None => panic!("{kind} events do not belong to request chains"),
        }
    }
}

/// Kind-specific payload of an event record
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Payload {
    /// Entry into a code region
    Enter(Frame),
    /// Entry into a code region, with call site information
    EnterCs(Frame),
    /// Entry into the program's main region
    EnterProgram(Frame),
    /// Exit from a code region
    Leave(Frame),
    /// Exit from the program's main region
    LeaveProgram(Frame),
    /// Blocking message send
    MpiSend(Message),
    /// Start of a non-blocking message send
    MpiSendRequest(Message, Nonblocking),
    /// Completion of a non-blocking message send
    MpiSendComplete(Nonblocking),
    /// Blocking message receive
    MpiRecv(Message),
    /// Start of a non-blocking message receive
    MpiRecvRequest(Nonblocking),
    /// Completion of a non-blocking message receive
    MpiRecvComplete(Message, Nonblocking),
    /// Unsuccessful test of a non-blocking request
    MpiRequestTested(Nonblocking),
    /// Cancellation of a non-blocking request
    MpiCancelled(Nonblocking),
    /// Start of a collective operation
    MpiCollectiveBegin,
    /// End of a collective operation
    MpiCollectiveEnd(Collective),
    /// Lock acquisition
    ThreadAcquireLock(LockEvent),
    /// Lock release
    ThreadReleaseLock(LockEvent),
    /// Creation of an explicit task
    ThreadTaskCreate(TaskEvent),
    /// Completion of an explicit task
    ThreadTaskComplete(TaskEvent),
    /// Switch to another task
    ThreadTaskSwitch(TaskEvent),
    /// Start of a created thread
    ThreadBegin(ThreadEvent),
    /// End of a created thread
    ThreadEnd(ThreadEvent),
    /// Thread creation
    ThreadCreate(ThreadEvent),
    /// Wait for a created thread
    ThreadWait(ThreadEvent),
    /// Fork of a thread team with a certain number of threads
    ThreadFork(Paradigm, u32),
    /// Join of a thread team
    ThreadJoin(Paradigm),
    /// Start of a thread's participation in a team
    ThreadTeamBegin(CommId),
    /// End of a thread's participation in a team
    ThreadTeamEnd(CommId),
    /// Start of a one-sided put
    RmaPutStart(RmaTransfer),
    /// End of the one-sided put with a certain id
    RmaPutEnd(u32),
    /// Start of a one-sided get
    RmaGetStart(RmaTransfer),
    /// End of the one-sided get with a certain id
    RmaGetEnd(u32),
    /// Start of a one-sided collective synchronization
    MpiRmaCollectiveBegin,
    /// End of a one-sided collective synchronization on a certain window
    MpiRmaCollectiveEnd(u32),
}
//
impl Payload {
    /// Kind of event that carries this payload
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Enter(_) => EventKind::Enter,
            Self::EnterCs(_) => EventKind::EnterCs,
            Self::EnterProgram(_) => EventKind::EnterProgram,
            Self::Leave(_) => EventKind::Leave,
            Self::LeaveProgram(_) => EventKind::LeaveProgram,
            Self::MpiSend(_) => EventKind::MpiSend,
            Self::MpiSendRequest(..) => EventKind::MpiSendRequest,
            Self::MpiSendComplete(_) => EventKind::MpiSendComplete,
            Self::MpiRecv(_) => EventKind::MpiRecv,
            Self::MpiRecvRequest(_) => EventKind::MpiRecvRequest,
            Self::MpiRecvComplete(..) => EventKind::MpiRecvComplete,
            Self::MpiRequestTested(_) => EventKind::MpiRequestTested,
            Self::MpiCancelled(_) => EventKind::MpiCancelled,
            Self::MpiCollectiveBegin => EventKind::MpiCollectiveBegin,
            Self::MpiCollectiveEnd(_) => EventKind::MpiCollectiveEnd,
            Self::ThreadAcquireLock(_) => EventKind::ThreadAcquireLock,
            Self::ThreadReleaseLock(_) => EventKind::ThreadReleaseLock,
            Self::ThreadTaskCreate(_) => EventKind::ThreadTaskCreate,
            Self::ThreadTaskComplete(_) => EventKind::ThreadTaskComplete,
            Self::ThreadTaskSwitch(_) => EventKind::ThreadTaskSwitch,
            Self::ThreadBegin(_) => EventKind::ThreadBegin,
            Self::ThreadEnd(_) => EventKind::ThreadEnd,
            Self::ThreadCreate(_) => EventKind::ThreadCreate,
            Self::ThreadWait(_) => EventKind::ThreadWait,
            Self::ThreadFork(..) => EventKind::ThreadFork,
            Self::ThreadJoin(_) => EventKind::ThreadJoin,
            Self::ThreadTeamBegin(_) => EventKind::ThreadTeamBegin,
            Self::ThreadTeamEnd(_) => EventKind::ThreadTeamEnd,
            Self::RmaPutStart(_) => EventKind::RmaPutStart,
            Self::RmaPutEnd(_) => EventKind::RmaPutEnd,
            Self::RmaGetStart(_) => EventKind::RmaGetStart,
            Self::RmaGetEnd(_) => EventKind::RmaGetEnd,
            Self::MpiRmaCollectiveBegin => EventKind::MpiRmaCollectiveBegin,
            Self::MpiRmaCollectiveEnd(_) => EventKind::MpiRmaCollectiveEnd,
        }
    }

    /// Payload of an Enter event without call site information
    pub fn enter(region: RegionId) -> Self {
        Self::Enter(Frame::new(region, CallsiteId::UNDEFINED))
    }

    /// Payload of an Enter event with call site information
    pub fn enter_cs(region: RegionId, callsite: CallsiteId) -> Self {
        Self::EnterCs(Frame::new(region, callsite))
    }

    /// Payload of a Leave event
    pub fn leave(region: RegionId) -> Self {
        Self::Leave(Frame::new(region, CallsiteId::UNDEFINED))
    }
}

/// Payload of Enter and Leave events
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    /// Entered or left region
    pub region: RegionId,

    /// Call site from which the region was entered
    pub callsite: CallsiteId,

    /// Resolved call path, once attached
    pub callpath: Option<CallpathId>,
}
//
impl Frame {
    /// Frame without an attached call path
    pub fn new(region: RegionId, callsite: CallsiteId) -> Self {
        Self {
            region,
            callsite,
            callpath: None,
        }
    }
}

/// Properties of a point-to-point message
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Message {
    /// Communicator
    pub comm: CommId,

    /// Rank of the other party within the communicator
    pub peer: u32,

    /// Message tag
    pub tag: u32,

    /// Message size
    pub bytes: u64,
}

/// Request chain membership of a non-blocking event
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Nonblocking {
    /// Request that this event is about
    pub request: RequestId,

    /// Links to the neighbours within the request chain
    pub links: RequestLinks,
}
//
impl Nonblocking {
    /// Event which is not linked to other events yet
    pub fn new(request: RequestId) -> Self {
        Self {
            request,
            links: RequestLinks::default(),
        }
    }
}

/// Index distances to the neighbours of an event within its request chain
///
/// A distance of 0 means that there is no neighbour in that direction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RequestLinks {
    /// Distance to the previous event of the chain
    pub prev: u32,

    /// Distance to the next event of the chain
    pub next: u32,
}

/// Properties of a collective operation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Collective {
    /// Communicator
    pub comm: CommId,

    /// Rank of the root process, if any
    pub root: u32,

    /// Bytes sent by this location
    pub sent: u64,

    /// Bytes received by this location
    pub received: u64,
}

/// Payload of lock events
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LockEvent {
    /// Lock being acquired or released
    pub lock: LockId,

    /// Position of this acquisition in the total order of acquisitions of
    /// this lock, starting at 1
    pub order: u32,

    /// Programming model of the lock
    pub paradigm: Paradigm,
}

/// Payload of task events
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TaskEvent {
    /// Thread team executing the task
    pub team: CommId,

    /// Task being created, switched to or completed
    pub task: TaskId,
}

/// Payload of thread creation events
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThreadEvent {
    /// Group of threads the created thread belongs to
    pub team: CommId,

    /// Creation sequence number
    pub sequence: u64,
}

/// Payload of one-sided transfer start events
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RmaTransfer {
    /// Transfer identifier
    pub rma: u32,

    /// Target rank
    pub target: u32,

    /// Transfer size
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn enter_leave() {
        let mut enter = EventRecord::new(1.5, Payload::enter_cs(RegionId(3), CallsiteId(0)));
        assert_eq!(enter.kind(), EventKind::EnterCs);
        assert!(enter.is_of(EventGroup::Enter));
        assert_eq!(enter.region(), Some(RegionId(3)));
        assert_eq!(enter.callsite(), Some(CallsiteId(0)));
        assert_eq!(enter.callpath(), None);
        enter.attach_callpath(CallpathId(7));
        assert_eq!(enter.callpath(), Some(CallpathId(7)));

        enter.clear_annotations();
        assert_eq!(enter.callpath(), None);
        enter.attach_callpath(CallpathId(7));

        enter.shift_timestamp(0.5);
        assert_eq!(enter.timestamp(), 1.0);
        assert_eq!(enter.task(), None);
        assert_eq!(enter.request(), None);
    }

    #[test]
    #[should_panic]
    fn no_callpath_on_fork() {
        EventRecord::new(0.0, Payload::ThreadFork(Paradigm::OpenMp, 4))
            .attach_callpath(CallpathId(0));
    }

    #[test]
    fn request_links() {
        let message = Message {
            comm: CommId(0),
            peer: 1,
            tag: 2,
            bytes: 64,
        };
        let mut request = EventRecord::new(
            0.0,
            Payload::MpiSendRequest(message, Nonblocking::new(RequestId(9))),
        );
        assert_eq!(request.request(), Some(RequestId(9)));
        assert_eq!(request.message(), Some(message));
        assert_eq!(request.links(), Some(RequestLinks::default()));
        request.link_next(3);
        assert_eq!(request.links(), Some(RequestLinks { prev: 0, next: 3 }));
        request.clear_annotations();
        assert_eq!(request.links(), Some(RequestLinks::default()));
    }

    #[test]
    #[should_panic]
    fn no_links_on_blocking_send() {
        let message = Message {
            comm: CommId(0),
            peer: 1,
            tag: 2,
            bytes: 64,
        };
        EventRecord::new(0.0, Payload::MpiSend(message)).link_prev(1);
    }
}
