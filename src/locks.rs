//! Reconciliation of lock acquisitions across replay threads
//!
//! Tracers record a global acquisition order for every lock. When threads
//! replay their lock events concurrently, each acquisition waits for the
//! previous one to be released, which lets analyses know when the lock
//! actually became available.

use crate::{calltree::CallTree, cursor::Cursor};
use hashbrown::HashMap;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};
use thiserror::Error;
use trace_events::{
    Definitions, EventKind, EventRecord, LockEvent, LockId, Paradigm, RegionRole, Timestamp,
};

/// Process-wide registry of the locks used by a trace
///
/// Shared by all replay threads of a process. Acquisitions of a lock must
/// be replayed in an order-respecting way: the thread that replays
/// acquisition N blocks until acquisition N-1 has been released, so every
/// acquisition of the lock must eventually be replayed by some thread.
#[derive(Debug, Default)]
pub struct LockTracker {
    /// Known locks
    registry: Mutex<HashMap<LockId, Arc<LockState>, ahash::RandomState>>,

    /// Number of registered locks, used as a futex by threads that wait for
    /// a lock to be registered
    epoch: AtomicU32,
}
//
impl LockTracker {
    /// Set up an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay a lock acquisition
    ///
    /// Blocks until every previous acquisition of the lock has been released,
    /// then returns the time at which the lock was last released (zero for
    /// the first acquisition).
    pub fn acquire(&self, event: &EventRecord) -> Result<Timestamp, LockError> {
        let LockEvent { lock, order, .. } = lock_event(event, EventKind::ThreadAcquireLock)?;
        let state = if order == 1 {
            self.register(lock)
        } else {
            self.wait_for(lock)
        };
        Ok(state.acquire(order))
    }

    /// Replay a lock release
    pub fn release(&self, event: &EventRecord) -> Result<(), LockError> {
        let LockEvent { lock, order, .. } = lock_event(event, EventKind::ThreadReleaseLock)?;
        let state = self.find(lock).ok_or(LockError::UnknownLock(lock))?;
        state.release(lock, order, event.timestamp())
    }

    /// Acquisition order that may acquire or release a lock next, if the
    /// lock is known
    pub fn expected_order(&self, lock: LockId) -> Option<u32> {
        self.find(lock)
            .map(|state| state.expected.load(Ordering::Acquire))
    }

    /// Register a lock on its first acquisition, keeping any existing state
    fn register(&self, lock: LockId) -> Arc<LockState> {
        let state = self
            .registry()
            .entry(lock)
            .or_insert_with(|| {
                log::trace!("Registering {lock}");
                Arc::new(LockState::new())
            })
            .clone();
        self.epoch.fetch_add(1, Ordering::Release);
        atomic_wait::wake_all(&self.epoch);
        state
    }

    /// Wait for a lock to be registered
    fn wait_for(&self, lock: LockId) -> Arc<LockState> {
        loop {
            let epoch = self.epoch.load(Ordering::Acquire);
            if let Some(state) = self.find(lock) {
                return state;
            }
            atomic_wait::wait(&self.epoch, epoch);
        }
    }

    /// Look up a lock
    fn find(&self, lock: LockId) -> Option<Arc<LockState>> {
        self.registry().get(&lock).cloned()
    }

    /// Access the registry
    fn registry(
        &self,
    ) -> std::sync::MutexGuard<HashMap<LockId, Arc<LockState>, ahash::RandomState>> {
        self.registry
            .lock()
            .expect("A lock replay thread has crashed")
    }
}

/// State of one lock
#[derive(Debug)]
struct LockState {
    /// Acquisition order that may acquire the lock next, used as a futex
    expected: AtomicU32,

    /// Nesting level and last release time
    inner: Mutex<LockInner>,
}
//
impl LockState {
    /// State of a lock that was never acquired
    fn new() -> Self {
        Self {
            expected: AtomicU32::new(1),
            inner: Mutex::new(LockInner {
                nesting: 0,
                last_release: 0.0,
            }),
        }
    }

    /// Wait for our turn, then acquire the lock
    fn acquire(&self, order: u32) -> Timestamp {
        loop {
            let expected = self.expected.load(Ordering::Acquire);
            if expected == order {
                break;
            }
            atomic_wait::wait(&self.expected, expected);
        }
        let mut inner = self.inner();
        inner.nesting += 1;
        inner.last_release
    }

    /// Release the lock, handing it over to the next acquisition once it is
    /// not held anymore
    fn release(&self, lock: LockId, order: u32, timestamp: Timestamp) -> Result<(), LockError> {
        let mut inner = self.inner();
        let expected = self.expected.load(Ordering::Acquire);
        if order != expected {
            return Err(LockError::OrderMismatch {
                lock,
                expected,
                found: order,
            });
        }
        inner.nesting = inner.nesting.saturating_sub(1);
        inner.last_release = timestamp;
        if inner.nesting == 0 {
            self.expected.fetch_add(1, Ordering::Release);
            atomic_wait::wake_all(&self.expected);
        }
        Ok(())
    }

    /// Access the inner state
    fn inner(&self) -> std::sync::MutexGuard<LockInner> {
        self.inner
            .lock()
            .expect("A lock replay thread has crashed")
    }
}

/// Mutable part of a lock's state
#[derive(Debug)]
struct LockInner {
    /// Number of times the current holder acquired the lock
    nesting: u32,

    /// Time of the last release
    last_release: Timestamp,
}

/// Extract the payload of a lock event of a certain kind
fn lock_event(event: &EventRecord, expected: EventKind) -> Result<LockEvent, LockError> {
    match event.lock() {
        Some(lock) if event.kind() == expected => Ok(lock),
        _ => Err(LockError::WrongEventKind {
            expected,
            found: event.kind(),
        }),
    }
}

/// Things that can go wrong while replaying lock events
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LockError {
    /// A lock was released out of acquisition order
    #[error("{lock} was released by acquisition #{found}, but acquisition #{expected} holds it")]
    OrderMismatch {
        /// Lock being released
        lock: LockId,

        /// Acquisition that currently holds the lock
        expected: u32,

        /// Acquisition that was released
        found: u32,
    },

    /// A lock was released without ever being acquired
    #[error("{0} was released without being acquired")]
    UnknownLock(LockId),

    /// A lock operation was replayed with the wrong kind of event
    #[error("expected a {expected} event, got a {found} event")]
    WrongEventKind {
        /// Kind of event that the operation works on
        expected: EventKind,

        /// Kind of event that was provided
        found: EventKind,
    },
}

/// Flavor of a lock, as far as the trace tells
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LockKind {
    /// OpenMP critical construct
    OmpCritical,

    /// OpenMP lock routines
    OmpLockApi,

    /// `pthread_mutex_lock()`
    PthreadMutexLock,

    /// `pthread_mutex_trylock()`
    PthreadMutexTrylock,

    /// Mutex reacquisition at the end of a condition variable wait
    PthreadConditionWait,

    /// Unrecognized paradigm or lock operation
    Unknown,
}
//
impl LockKind {
    /// Classify a lock event using the region it occurred in
    ///
    /// Call paths must have been attached to the trace.
    pub fn of(defs: &Definitions, tree: &CallTree, cursor: Cursor) -> Self {
        let Some(region) = cursor
            .callpath()
            .and_then(|callpath| defs.region(tree.callpath(callpath).region()))
        else {
            return Self::Unknown;
        };
        match region.paradigm() {
            Paradigm::OpenMp => match region.role() {
                RegionRole::Critical | RegionRole::CriticalBlock => Self::OmpCritical,
                _ => Self::OmpLockApi,
            },
            Paradigm::Pthread => match region.name() {
                "pthread_mutex_lock" => Self::PthreadMutexLock,
                "pthread_mutex_trylock" => Self::PthreadMutexTrylock,
                "pthread_cond_wait" | "pthread_cond_timedwait" => Self::PthreadConditionWait,
                _ => Self::Unknown,
            },
            _ => Self::Unknown,
        }
    }
}

/// Programming model of a lock event, `Unknown` for other events
pub fn lock_paradigm(event: &EventRecord) -> Paradigm {
    event
        .lock()
        .map_or(Paradigm::Unknown, |lock| lock.paradigm)
}
