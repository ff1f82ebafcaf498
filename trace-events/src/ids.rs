//! Strongly typed identifiers of trace entities

use std::fmt::{self, Display, Formatter};

/// Implement the formatting and conversion boilerplate of an identifier
macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident($inner:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(pub $inner);
        //
        impl From<$inner> for $name {
            fn from(raw: $inner) -> Self {
                Self(raw)
            }
        }
        //
        impl From<$name> for $inner {
            fn from(id: $name) -> $inner {
                id.0
            }
        }
        //
        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

identifier!(
    /// Code region (function, loop, parallel construct...)
    RegionId(u32),
    "region"
);

identifier!(
    /// Source location from which a region was entered
    CallsiteId(u32),
    "callsite"
);
//
impl CallsiteId {
    /// Call site of regions that were not entered from a known source location
    pub const UNDEFINED: Self = Self(u32::MAX);

    /// Truth that this is a real call site
    pub fn is_defined(self) -> bool {
        self != Self::UNDEFINED
    }
}

identifier!(
    /// Communicator or thread team
    CommId(u32),
    "comm"
);

identifier!(
    /// Lock whose acquisition order was recorded
    LockId(u32),
    "lock"
);

identifier!(
    /// Non-blocking communication request
    RequestId(u64),
    "request"
);

identifier!(
    /// Implicit or explicit task
    ///
    /// Implicit tasks are identified by the thread number in the upper 32
    /// bits, explicit tasks use the numeric id recorded by the tracer.
    TaskId(u64),
    "task"
);
//
impl TaskId {
    /// Implicit task of the thread with a certain team-local number
    pub fn implicit(thread: u32) -> Self {
        Self(u64::from(thread) << 32)
    }
}

identifier!(
    /// Node of a call tree
    CallpathId(u32),
    "callpath"
);
//
impl CallpathId {
    /// Wire value used when no call path is attached
    pub const NO_ID: u32 = u32::MAX;
}

identifier!(
    /// Execution location (thread or process) that produced an event stream
    LocationId(u64),
    "location"
);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn implicit_tasks() {
        assert_eq!(TaskId::implicit(0), TaskId(0));
        assert_eq!(TaskId::implicit(3), TaskId(3 << 32));
        assert_ne!(TaskId::implicit(1), TaskId(1));
    }

    #[test]
    fn display() {
        assert_eq!(RegionId(4).to_string(), "region#4");
        assert_eq!(LockId(12).to_string(), "lock#12");
        assert!(!CallsiteId::UNDEFINED.is_defined());
        assert!(CallsiteId(0).is_defined());
    }
}
