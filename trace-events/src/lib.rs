//! In-memory model of the events recorded by a parallel program tracer, along
//! with the definitions they refer to and the machinery used to create and
//! decode them.

#![deny(missing_docs)]

mod codec;
pub mod defs;
pub mod factory;
mod ids;
mod kind;
mod record;

// Reexport types which appear in the public interface
pub use self::{
    codec::DecodeError,
    defs::{Definitions, DefinitionsBuilder, Location, Paradigm, Region, RegionRole},
    factory::{BaseEventFactory, EventFactory, FactoryError, FactoryRegistry, MpiEventFactory},
    ids::{CallpathId, CallsiteId, CommId, LocationId, LockId, RegionId, RequestId, TaskId},
    kind::{EventGroup, EventKind},
    record::{
        Collective, EventRecord, Frame, LockEvent, Message, Nonblocking, Payload, RequestLinks,
        RmaTransfer, TaskEvent, ThreadEvent,
    },
};

/// Point in time, in seconds
pub type Timestamp = f64;

/// Time interval, in seconds
pub type Duration = f64;
