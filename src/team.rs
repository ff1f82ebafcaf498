//! Synchronization of the threads that replay the locations of one process
//!
//! One thread is spawned per location. They rendezvous at explicit barriers,
//! each tagged with the [`SyncPoint`] it belongs to so that threads which
//! disagree on the schedule are caught instead of silently pairing up. They
//! hand call paths from the master to the workers through a single publish
//! slot, and combine their call trees through a pairwise reduction.

use crate::calltree::{CallTree, PathStep};
use crossbeam_utils::CachePadded;
use std::{
    fmt::{self, Display},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Mutex,
    },
};
use thiserror::Error;

/// Shared state of a team of replay threads
#[derive(Debug)]
pub struct Team {
    /// Number of threads in the team
    size: u32,

    /// Number of threads that reached the current barrier
    arrived: AtomicU32,

    /// Barrier generation counter, used as a futex
    ///
    /// Incremented every time all threads reach a barrier, and when the team
    /// is aborted.
    generation: AtomicU32,

    /// Tag of the synchronization point that the current barrier belongs
    /// to, or 0 if no thread reached it yet
    sync_point: AtomicU32,

    /// Truth that a thread failed and the others should stop waiting
    aborted: AtomicBool,

    /// Call path published by the master thread, as steps from the root
    published: Mutex<Box<[PathStep]>>,

    /// Per-thread call tree slots used during merging
    trees: Box<[CachePadded<Mutex<Option<CallTree>>>]>,
}
//
impl Team {
    /// Set up a team of threads
    ///
    /// # Panics
    ///
    /// If `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "There should be at least one thread");
        let size32 = u32::try_from(size).expect("Team size should fit in 32 bits");
        Self {
            size: size32,
            arrived: AtomicU32::new(0),
            generation: AtomicU32::new(0),
            sync_point: AtomicU32::new(0),
            aborted: AtomicBool::new(false),
            published: Mutex::new(Box::default()),
            trees: std::iter::repeat_with(Default::default).take(size).collect(),
        }
    }

    /// Number of threads in the team
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Interface used by one thread of the team
    ///
    /// # Panics
    ///
    /// If `thread` is not a valid thread number for this team.
    pub fn member(&self, thread: usize) -> TeamMember {
        assert!(thread < self.size(), "Thread {thread} is not part of the team");
        TeamMember { team: self, thread }
    }

    /// Release every waiting thread and make further barriers fail
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            log::debug!("Aborting the replay team");
        }
        self.generation.fetch_add(1, Ordering::Release);
        atomic_wait::wake_all(&self.generation);
    }

    /// Truth that the team was aborted
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Wait for all threads to reach `point`
    fn barrier(&self, thread: usize, point: SyncPoint) -> Result<(), TeamError> {
        let generation = self.generation.load(Ordering::Acquire);
        if self.is_aborted() {
            return Err(TeamError::Aborted);
        }
        if let Err(tag) =
            self.sync_point
                .compare_exchange(0, point.tag(), Ordering::AcqRel, Ordering::Acquire)
        {
            if tag != point.tag() {
                let error = TeamError::Diverged {
                    thread,
                    expected: SyncPoint::from_tag(tag),
                    found: point,
                };
                log::debug!("Replay thread {thread} diverged from its team: {error}");
                self.abort();
                return Err(error);
            }
        }
        if self.arrived.fetch_add(1, Ordering::AcqRel) + 1 == self.size {
            self.arrived.store(0, Ordering::Relaxed);
            self.sync_point.store(0, Ordering::Relaxed);
            self.generation.fetch_add(1, Ordering::Release);
            atomic_wait::wake_all(&self.generation);
            return Ok(());
        }
        loop {
            atomic_wait::wait(&self.generation, generation);
            if self.is_aborted() {
                return Err(TeamError::Aborted);
            }
            if self.generation.load(Ordering::Acquire) != generation {
                return Ok(());
            }
        }
    }

    /// Access the merge slot of a thread
    fn tree_slot(&self, thread: usize) -> std::sync::MutexGuard<Option<CallTree>> {
        self.trees[thread]
            .lock()
            .expect("Another replay thread has crashed")
    }
}

/// Interface used by one thread of a team
#[derive(Clone, Copy, Debug)]
pub struct TeamMember<'team> {
    /// Team which this thread belongs to
    team: &'team Team,

    /// Number of this thread within the team
    thread: usize,
}
//
impl<'team> TeamMember<'team> {
    /// Number of this thread within the team
    pub fn thread(&self) -> usize {
        self.thread
    }

    /// Truth that this is the master thread
    pub fn is_master(&self) -> bool {
        self.thread == 0
    }

    /// Wait for all threads of the team to reach `point`
    ///
    /// Fails if another thread failed, or if another thread is waiting at a
    /// different synchronization point. In the latter case the team is
    /// aborted.
    pub fn barrier(&self, point: SyncPoint) -> Result<(), TeamError> {
        self.team.barrier(self.thread, point)
    }

    /// Publish a call path for the other threads of the team
    ///
    /// Readers must be separated from the publication by a barrier, and the
    /// next publication must be separated from the readers by another one.
    pub fn publish(&self, path: Vec<PathStep>) {
        *self
            .team
            .published
            .lock()
            .expect("Another replay thread has crashed") = path.into_boxed_slice();
    }

    /// Read the last published call path
    pub fn published(&self) -> Box<[PathStep]> {
        self.team
            .published
            .lock()
            .expect("Another replay thread has crashed")
            .clone()
    }

    /// Combine the call trees of all threads
    ///
    /// Every thread of the team must call this. Trees are merged pairwise in
    /// ⌈log2(size)⌉ rounds, the master thread gets the merged tree and the
    /// other threads get `None`.
    pub fn merge(&self, tree: CallTree) -> Result<Option<CallTree>, TeamError> {
        let team = self.team;
        let size = team.size();
        *team.tree_slot(self.thread) = Some(tree);
        let mut distance = 1;
        while distance < size {
            self.barrier(SyncPoint::Merge)?;
            let donor_thread = self.thread + distance;
            if self.thread % (2 * distance) == 0 && donor_thread < size {
                let donor = team.tree_slot(donor_thread).take();
                if let (Some(donor), Some(own)) = (donor, team.tree_slot(self.thread).as_mut()) {
                    log::trace!(
                        "Thread {} merges the call tree of thread {donor_thread}",
                        self.thread
                    );
                    own.merge(&donor);
                }
            }
            distance *= 2;
        }
        self.barrier(SyncPoint::Merge)?;
        Ok(if self.is_master() {
            team.tree_slot(self.thread).take()
        } else {
            None
        })
    }

    /// Abort the team if the current thread panics before this is dropped
    pub fn abort_on_panic(&self) -> PanicGuard<'team> {
        PanicGuard(self.team)
    }
}

/// Aborts a team if dropped during a panic
#[derive(Debug)]
pub struct PanicGuard<'team>(&'team Team);
//
impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort()
        }
    }
}

/// Places where the threads of a team wait for each other
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncPoint {
    /// Sharing of the program call path before a replay pass
    ProgramPath,

    /// Beginning of a thread team
    ThreadTeam,

    /// Call tree merge
    Merge,
}
//
impl SyncPoint {
    /// Nonzero tag stored in the team while threads wait at this point
    fn tag(self) -> u32 {
        self as u32 + 1
    }

    /// Inverse of `tag()`
    fn from_tag(tag: u32) -> Self {
        match tag {
            1 => Self::ProgramPath,
            2 => Self::ThreadTeam,
            _ => Self::Merge,
        }
    }
}
//
impl Display for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProgramPath => "program call path",
            Self::ThreadTeam => "thread team begin",
            Self::Merge => "call tree merge",
        })
    }
}

/// Ways a team barrier can fail
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum TeamError {
    /// Another thread of the team failed
    #[error("the replay was aborted by another thread")]
    Aborted,

    /// Threads reached different synchronization points, which happens when
    /// locations do not record the same number of thread teams
    #[error(
        "thread {thread} reached a {found} barrier while the rest of its team waits at a \
         {expected} barrier (locations disagree on the number of thread teams)"
    )]
    Diverged {
        /// Thread that detected the divergence
        thread: usize,

        /// Synchronization point the other threads are waiting at
        expected: SyncPoint,

        /// Synchronization point the detecting thread reached
        found: SyncPoint,
    },
}
