//! Creation of event records, with support for extension event kinds
//!
//! Event records are created by an `EventFactory`, which validates payloads
//! against the definitions catalog. Which factory is in use is decided by a
//! `FactoryRegistry`: the base factory only knows about thread-level events,
//! message-passing analyses register the `MpiEventFactory` instead.

use crate::{
    codec::{self, DecodeError},
    defs::Definitions,
    ids::{CallsiteId, CommId, RegionId},
    kind::EventKind,
    record::{EventRecord, Payload},
    Timestamp,
};
use std::fmt::Debug;
use thiserror::Error;

/// Mechanism to create event records
pub trait EventFactory: Debug + Send + Sync {
    /// Name of this factory, used in diagnostics
    fn name(&self) -> &'static str;

    /// Truth that this factory can create events of a certain kind
    fn supports(&self, kind: EventKind) -> bool;

    /// Create an event record from explicit payload fields
    fn create(
        &self,
        defs: &Definitions,
        timestamp: Timestamp,
        payload: Payload,
    ) -> Result<EventRecord, FactoryError> {
        let kind = payload.kind();
        if !self.supports(kind) {
            return Err(FactoryError::UnsupportedKind {
                kind,
                factory: self.name(),
            });
        }
        validate(defs, &payload)?;
        Ok(EventRecord::new(timestamp, payload))
    }

    /// Decode an event record from the start of a byte buffer
    ///
    /// Returns the record and the bytes that follow it.
    fn decode<'bytes>(
        &self,
        defs: &Definitions,
        bytes: &'bytes [u8],
    ) -> Result<(EventRecord, &'bytes [u8]), FactoryError> {
        let (record, rest) = codec::decode(bytes)?;
        let record = self.create(defs, record.timestamp(), *record.payload())?;
        Ok((record, rest))
    }

    /// Append the binary encoding of an event record to a byte buffer
    fn encode(&self, record: &EventRecord, output: &mut Vec<u8>) {
        codec::encode(record, output)
    }
}

/// Factory for the event kinds that any trace may contain
#[derive(Clone, Copy, Debug, Default)]
pub struct BaseEventFactory;
//
impl EventFactory for BaseEventFactory {
    fn name(&self) -> &'static str {
        "base"
    }

    fn supports(&self, kind: EventKind) -> bool {
        !kind.is_mpi()
    }
}

/// Factory which additionally supports message-passing event kinds
#[derive(Clone, Copy, Debug, Default)]
pub struct MpiEventFactory;
//
impl EventFactory for MpiEventFactory {
    fn name(&self) -> &'static str {
        "mpi"
    }

    fn supports(&self, _kind: EventKind) -> bool {
        true
    }
}

/// Holder of the event factory that is currently in use
///
/// At most one factory is registered at any point in time. Replacing it
/// requires deregistering the previous one first.
#[derive(Debug, Default)]
pub struct FactoryRegistry {
    /// Active factory, if any
    active: Option<Box<dyn EventFactory>>,
}
//
impl FactoryRegistry {
    /// Set up a registry without any active factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up a registry with a certain active factory
    pub fn with_factory(factory: impl EventFactory + 'static) -> Self {
        Self {
            active: Some(Box::new(factory)),
        }
    }

    /// Make a factory the active one
    pub fn register(&mut self, factory: Box<dyn EventFactory>) -> Result<(), FactoryError> {
        if let Some(active) = &self.active {
            return Err(FactoryError::AlreadyRegistered {
                active: active.name(),
            });
        }
        log::debug!("Registered the {} event factory", factory.name());
        self.active = Some(factory);
        Ok(())
    }

    /// Remove the active factory, returning it
    pub fn deregister(&mut self) -> Result<Box<dyn EventFactory>, FactoryError> {
        let factory = self.active.take().ok_or(FactoryError::NotRegistered)?;
        log::debug!("Deregistered the {} event factory", factory.name());
        Ok(factory)
    }

    /// Access the active factory
    pub fn active(&self) -> Result<&dyn EventFactory, FactoryError> {
        self.active.as_deref().ok_or(FactoryError::NotRegistered)
    }

    /// Decode a whole buffer of consecutive event records
    pub fn decode_all(
        &self,
        defs: &Definitions,
        mut bytes: &[u8],
    ) -> Result<Vec<EventRecord>, FactoryError> {
        let factory = self.active()?;
        let mut records = Vec::new();
        while !bytes.is_empty() {
            let (record, rest) = factory.decode(defs, bytes)?;
            records.push(record);
            bytes = rest;
        }
        Ok(records)
    }
}

/// Problem encountered while creating an event record
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FactoryError {
    /// Attempted to register a factory while another one is active
    #[error("the {active} event factory is already registered")]
    AlreadyRegistered {
        /// Name of the active factory
        active: &'static str,
    },

    /// Attempted to use or deregister the factory while none is registered
    #[error("no event factory is registered")]
    NotRegistered,

    /// The active factory does not support this kind of event
    #[error("the {factory} event factory cannot create {kind} events")]
    UnsupportedKind {
        /// Kind of event that was requested
        kind: EventKind,

        /// Name of the factory
        factory: &'static str,
    },

    /// An event refers to a region that is not defined
    #[error("{kind} event refers to undefined {region}")]
    UnknownRegion {
        /// Kind of event
        kind: EventKind,

        /// Undefined region
        region: RegionId,
    },

    /// An event refers to a call site that is not defined
    #[error("{kind} event refers to undefined {callsite}")]
    UnknownCallsite {
        /// Kind of event
        kind: EventKind,

        /// Undefined call site
        callsite: CallsiteId,
    },

    /// An event refers to a communicator that is not defined
    #[error("{kind} event refers to undefined {comm}")]
    UnknownComm {
        /// Kind of event
        kind: EventKind,

        /// Undefined communicator
        comm: CommId,
    },

    /// The binary record could not be decoded
    #[error("failed to decode event record ({0})")]
    Decode(#[from] DecodeError),
}

/// Check that the identifiers within a payload are defined
fn validate(defs: &Definitions, payload: &Payload) -> Result<(), FactoryError> {
    let kind = payload.kind();
    let check_comm = |comm: CommId| {
        defs.comm(comm)
            .map(|_| ())
            .ok_or(FactoryError::UnknownComm { kind, comm })
    };
    match payload {
        Payload::Enter(frame)
        | Payload::EnterCs(frame)
        | Payload::EnterProgram(frame)
        | Payload::Leave(frame)
        | Payload::LeaveProgram(frame) => {
            if defs.region(frame.region).is_none() {
                return Err(FactoryError::UnknownRegion {
                    kind,
                    region: frame.region,
                });
            }
            if frame.callsite.is_defined() && defs.callsite(frame.callsite).is_none() {
                return Err(FactoryError::UnknownCallsite {
                    kind,
                    callsite: frame.callsite,
                });
            }
            Ok(())
        }
        Payload::MpiSend(message)
        | Payload::MpiRecv(message)
        | Payload::MpiSendRequest(message, _)
        | Payload::MpiRecvComplete(message, _) => check_comm(message.comm),
        Payload::MpiCollectiveEnd(collective) => check_comm(collective.comm),
        Payload::ThreadTaskCreate(task)
        | Payload::ThreadTaskComplete(task)
        | Payload::ThreadTaskSwitch(task) => check_comm(task.team),
        Payload::ThreadBegin(thread)
        | Payload::ThreadEnd(thread)
        | Payload::ThreadCreate(thread)
        | Payload::ThreadWait(thread) => check_comm(thread.team),
        Payload::ThreadTeamBegin(team) | Payload::ThreadTeamEnd(team) => check_comm(*team),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        defs::{Paradigm, RegionRole},
        ids::RequestId,
        record::{Message, Nonblocking},
    };
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn defs() -> Definitions {
        let mut builder = Definitions::builder();
        builder.add_region("main", RegionRole::Function, Paradigm::User);
        builder.add_comm("world", 2);
        builder.build()
    }

    fn recv_request() -> Payload {
        Payload::MpiRecvRequest(Nonblocking::new(RequestId(1)))
    }

    #[test]
    fn registration() {
        let mut registry = FactoryRegistry::new();
        assert_matches!(registry.active(), Err(FactoryError::NotRegistered));
        assert_matches!(registry.deregister(), Err(FactoryError::NotRegistered));

        registry.register(Box::new(BaseEventFactory)).unwrap();
        assert_eq!(registry.active().unwrap().name(), "base");
        assert_eq!(
            registry.register(Box::new(MpiEventFactory)),
            Err(FactoryError::AlreadyRegistered { active: "base" })
        );

        assert_eq!(registry.deregister().unwrap().name(), "base");
        registry.register(Box::new(MpiEventFactory)).unwrap();
        assert_eq!(registry.active().unwrap().name(), "mpi");
    }

    #[test]
    fn extension_kinds() {
        let defs = defs();
        assert_eq!(
            BaseEventFactory.create(&defs, 0.0, recv_request()),
            Err(FactoryError::UnsupportedKind {
                kind: EventKind::MpiRecvRequest,
                factory: "base",
            })
        );
        let record = MpiEventFactory.create(&defs, 0.0, recv_request()).unwrap();
        assert_eq!(record.request(), Some(RequestId(1)));
    }

    #[test]
    fn validation() {
        let defs = defs();
        assert_eq!(
            BaseEventFactory.create(&defs, 0.0, Payload::enter(RegionId(42))),
            Err(FactoryError::UnknownRegion {
                kind: EventKind::Enter,
                region: RegionId(42),
            })
        );
        assert_matches!(
            BaseEventFactory.create(&defs, 0.0, Payload::enter_cs(RegionId(3), CallsiteId(0))),
            Err(FactoryError::UnknownCallsite { .. })
        );
        let message = Message {
            comm: CommId(1),
            peer: 0,
            tag: 0,
            bytes: 8,
        };
        assert_matches!(
            MpiEventFactory.create(&defs, 0.0, Payload::MpiSend(message)),
            Err(FactoryError::UnknownComm {
                comm: CommId(1),
                ..
            })
        );
        assert!(BaseEventFactory
            .create(&defs, 0.0, Payload::enter(RegionId(3)))
            .is_ok());
    }

    #[test]
    fn decode_all() {
        let defs = defs();
        let records = [
            EventRecord::new(0.0, Payload::enter(RegionId(3))),
            EventRecord::new(1.0, recv_request()),
            EventRecord::new(2.0, Payload::leave(RegionId(3))),
        ];
        let mut bytes = Vec::new();
        for record in &records {
            MpiEventFactory.encode(record, &mut bytes);
        }

        let registry = FactoryRegistry::with_factory(MpiEventFactory);
        assert_eq!(registry.decode_all(&defs, &bytes).unwrap(), records);

        let registry = FactoryRegistry::with_factory(BaseEventFactory);
        assert_matches!(
            registry.decode_all(&defs, &bytes),
            Err(FactoryError::UnsupportedKind { .. })
        );
        assert_matches!(
            registry.decode_all(&defs, &bytes[..5]),
            Err(FactoryError::Decode(DecodeError::Truncated { .. }))
        );
    }
}
