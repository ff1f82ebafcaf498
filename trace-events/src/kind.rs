//! Closed set of event kinds and the groups they belong to

/// Kind of event recorded by the tracer
///
/// The numeric discriminant is the tag used by the binary record encoding.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    strum::Display,
    strum::EnumIter,
    strum::FromRepr,
    strum::IntoStaticStr,
)]
#[repr(u32)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Entry into a code region
    Enter = 0,
    /// Entry into a code region, with call site information
    EnterCs = 1,
    /// Entry into the program's main region
    EnterProgram = 2,
    /// Exit from a code region
    Leave = 3,
    /// Exit from the program's main region
    LeaveProgram = 4,
    /// Blocking message send
    MpiSend = 5,
    /// Start of a non-blocking message send
    MpiSendRequest = 6,
    /// Completion of a non-blocking message send
    MpiSendComplete = 7,
    /// Blocking message receive
    MpiRecv = 8,
    /// Start of a non-blocking message receive
    MpiRecvRequest = 9,
    /// Completion of a non-blocking message receive
    MpiRecvComplete = 10,
    /// Unsuccessful test of a non-blocking request
    MpiRequestTested = 11,
    /// Cancellation of a non-blocking request
    MpiCancelled = 12,
    /// Start of a collective operation
    MpiCollectiveBegin = 13,
    /// End of a collective operation
    MpiCollectiveEnd = 14,
    /// Lock acquisition
    ThreadAcquireLock = 15,
    /// Lock release
    ThreadReleaseLock = 16,
    /// Creation of an explicit task
    ThreadTaskCreate = 17,
    /// Completion of an explicit task
    ThreadTaskComplete = 18,
    /// Switch to another task
    ThreadTaskSwitch = 19,
    /// Start of a created thread
    ThreadBegin = 20,
    /// End of a created thread
    ThreadEnd = 21,
    /// Thread creation
    ThreadCreate = 22,
    /// Wait for a created thread
    ThreadWait = 23,
    /// Fork of a thread team by its master
    ThreadFork = 24,
    /// Join of a thread team by its master
    ThreadJoin = 25,
    /// Start of a thread's participation in a team
    ThreadTeamBegin = 26,
    /// End of a thread's participation in a team
    ThreadTeamEnd = 27,
    /// Start of a one-sided put
    RmaPutStart = 28,
    /// End of a one-sided put
    RmaPutEnd = 29,
    /// Start of a one-sided get
    RmaGetStart = 30,
    /// End of a one-sided get
    RmaGetEnd = 31,
    /// Start of a one-sided collective synchronization
    MpiRmaCollectiveBegin = 32,
    /// End of a one-sided collective synchronization
    MpiRmaCollectiveEnd = 33,
}
//
impl EventKind {
    /// Truth that this kind belongs to a certain group
    pub fn is_of(self, group: EventGroup) -> bool {
        use EventKind::*;
        match group {
            EventGroup::Enter => matches!(self, Enter | EnterCs | EnterProgram),
            EventGroup::Leave => matches!(self, Leave | LeaveProgram),
            EventGroup::Send => matches!(self, MpiSend | MpiSendRequest),
            EventGroup::Recv => matches!(self, MpiRecv | MpiRecvComplete),
            EventGroup::Begin => matches!(self, MpiCollectiveBegin | MpiRmaCollectiveBegin),
            EventGroup::End => matches!(self, MpiCollectiveEnd | MpiRmaCollectiveEnd),
            EventGroup::Nonblock => matches!(
                self,
                MpiSendRequest
                    | MpiSendComplete
                    | MpiRecvRequest
                    | MpiRecvComplete
                    | MpiRequestTested
                    | MpiCancelled
            ),
        }
    }

    /// Truth that this kind is only produced by message-passing runtimes
    ///
    /// These kinds are an extension that the base event factory does not
    /// support.
    pub fn is_mpi(self) -> bool {
        use EventKind::*;
        matches!(
            self,
            MpiSend
                | MpiSendRequest
                | MpiSendComplete
                | MpiRecv
                | MpiRecvRequest
                | MpiRecvComplete
                | MpiRequestTested
                | MpiCancelled
                | MpiCollectiveBegin
                | MpiCollectiveEnd
                | MpiRmaCollectiveBegin
                | MpiRmaCollectiveEnd
        )
    }
}

/// Group of event kinds which analyses handle alike
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::EnumIter)]
pub enum EventGroup {
    /// Region entries
    Enter,
    /// Region exits
    Leave,
    /// Message sends
    Send,
    /// Message receptions
    Recv,
    /// Starts of collective operations
    Begin,
    /// Ends of collective operations
    End,
    /// Events of non-blocking request chains
    Nonblock,
}
