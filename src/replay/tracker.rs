//! State machine deriving the current call path from a stream of events

use super::ReplayError;
use crate::{
    calltree::{CallTree, PathStep},
    team::{SyncPoint, TeamMember},
};
use hashbrown::HashMap;
use trace_events::{
    CallpathId, CallsiteId, Definitions, EventGroup, EventKind, EventRecord, Location, LocationId,
    RegionId, TaskId,
};

/// Call tree that the state machine resolves call paths against
pub(crate) trait CallpathSource {
    /// Call path entering `region` from `callsite` under `parent`, or the
    /// step that could not be resolved
    fn child(
        &mut self,
        region: RegionId,
        callsite: CallsiteId,
        parent: Option<CallpathId>,
    ) -> Result<CallpathId, PathStep>;

    /// Parent of a call path
    fn parent(&self, callpath: CallpathId) -> Option<CallpathId>;

    /// Steps from the root to a call path
    fn path(&self, callpath: Option<CallpathId>) -> Vec<PathStep>;

    /// Record where a task that starts by entering `region` was spawned
    fn task_stub(&mut self, region: RegionId, origin: Option<CallpathId>);
}

/// A thread-local call tree under construction grows as needed
impl CallpathSource for CallTree {
    fn child(
        &mut self,
        region: RegionId,
        callsite: CallsiteId,
        parent: Option<CallpathId>,
    ) -> Result<CallpathId, PathStep> {
        Ok(self.get_or_create(region, callsite, parent))
    }

    fn parent(&self, callpath: CallpathId) -> Option<CallpathId> {
        self.callpath(callpath).parent().map(|parent| parent.id())
    }

    fn path(&self, callpath: Option<CallpathId>) -> Vec<PathStep> {
        callpath.map_or_else(Vec::new, |id| self.callpath(id).path())
    }

    fn task_stub(&mut self, region: RegionId, origin: Option<CallpathId>) {
        self.get_or_create(region, CallsiteId::UNDEFINED, origin);
    }
}

/// Finished call tree, which is shared by all threads and must already
/// contain every call path of the trace
#[derive(Clone, Copy, Debug)]
pub(crate) struct Frozen<'tree>(pub &'tree CallTree);
//
impl CallpathSource for Frozen<'_> {
    fn child(
        &mut self,
        region: RegionId,
        callsite: CallsiteId,
        parent: Option<CallpathId>,
    ) -> Result<CallpathId, PathStep> {
        self.0
            .find(region, callsite, parent)
            .ok_or((region, callsite))
    }

    fn parent(&self, callpath: CallpathId) -> Option<CallpathId> {
        CallpathSource::parent(self.0, callpath)
    }

    fn path(&self, callpath: Option<CallpathId>) -> Vec<PathStep> {
        CallpathSource::path(self.0, callpath)
    }

    fn task_stub(&mut self, _region: RegionId, _origin: Option<CallpathId>) {}
}

/// Nesting status of Enter/Leave events, the first violation wins
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Balance {
    /// No violation seen so far
    Balanced,

    /// A worker thread started a team with open regions
    TooManyEnters,

    /// A Leave event had no matching Enter event
    TooManyLeaves,
}

/// Call path tracking state of one replay thread
#[derive(Debug)]
pub(crate) struct CallpathTracker<'a> {
    /// Definitions catalog
    defs: &'a Definitions,

    /// Location being replayed
    location: LocationId,

    /// Implicit task of this location
    implicit_task: TaskId,

    /// Team of replay threads
    member: TeamMember<'a>,

    /// Call path of the region being executed, `None` outside any region
    current: Option<CallpathId>,

    /// Call path of the program's main region, if it was recorded
    program: Option<CallpathId>,

    /// Enter/Leave nesting depth
    depth: isize,

    /// Enter/Leave nesting status
    balance: Balance,

    /// Task being executed
    current_task: TaskId,

    /// Call path to resume when a suspended task is switched to again
    routes: HashMap<TaskId, Option<CallpathId>, ahash::RandomState>,

    /// Call path which new explicit tasks are spawned from
    last_stub_parent: Option<CallpathId>,
}
//
impl<'a> CallpathTracker<'a> {
    /// Set up the state machine for a certain location
    pub fn new(defs: &'a Definitions, location: &Location, member: TeamMember<'a>) -> Self {
        Self {
            defs,
            location: location.id(),
            implicit_task: location.implicit_task(),
            member,
            current: None,
            program: None,
            depth: 0,
            balance: Balance::Balanced,
            current_task: location.implicit_task(),
            routes: HashMap::default(),
            last_stub_parent: None,
        }
    }

    /// Determine the program call path
    ///
    /// If the master thread's first event enters the program, its call path
    /// is shared with the whole team and later used as the parent of the
    /// synthetic thread and task roots. Every thread must call this once
    /// before the first `step()`.
    pub fn start(
        &mut self,
        source: &mut impl CallpathSource,
        first: Option<&EventRecord>,
    ) -> Result<(), ReplayError> {
        if self.member.is_master() {
            self.program = match first {
                Some(event) if event.kind() == EventKind::EnterProgram => {
                    let region = event.region().unwrap_or(RegionId(0));
                    let callsite = event.callsite().unwrap_or(CallsiteId::UNDEFINED);
                    Some(
                        source
                            .child(region, callsite, None)
                            .map_err(|step| self.unknown_callpath(step))?,
                    )
                }
                _ => None,
            };
            self.member.publish(source.path(self.program));
        }
        self.member.barrier(SyncPoint::ProgramPath)?;
        if !self.member.is_master() {
            self.program = self.adopt(source)?;
        }
        self.member.barrier(SyncPoint::ProgramPath)?;
        Ok(())
    }

    /// Process the event at index `idx` of `events`
    ///
    /// Returns the call path to attach to the event, for Enter and Leave
    /// events.
    pub fn step(
        &mut self,
        source: &mut impl CallpathSource,
        events: &[EventRecord],
        idx: usize,
    ) -> Result<Option<CallpathId>, ReplayError> {
        let event = &events[idx];
        match event.kind() {
            kind if kind.is_of(EventGroup::Enter) => {
                let region = event.region().unwrap_or(RegionId(0));
                let callsite = event.callsite().unwrap_or(CallsiteId::UNDEFINED);
                let entered = source
                    .child(region, callsite, self.current)
                    .map_err(|step| self.unknown_callpath(step))?;
                self.current = Some(entered);
                self.depth += 1;
                return Ok(Some(entered));
            }

            kind if kind.is_of(EventGroup::Leave) => {
                let left = self.current;
                self.depth -= 1;
                if self.depth < 0 && self.balance == Balance::Balanced {
                    self.balance = Balance::TooManyLeaves;
                }
                self.current = self.current.and_then(|current| source.parent(current));
                return Ok(left);
            }

            EventKind::ThreadFork => {
                if self.member.is_master() {
                    self.member.publish(source.path(self.current));
                } else {
                    log::debug!("Ignoring thread fork on worker location {}", self.location);
                }
            }

            EventKind::ThreadTeamBegin => {
                // The master published its call path at the preceding fork
                self.member.barrier(SyncPoint::ThreadTeam)?;
                if !self.member.is_master() {
                    // Regions left open by the previous team
                    if self.depth > 0 && self.balance == Balance::Balanced {
                        self.balance = Balance::TooManyEnters;
                    }
                    self.current = self.adopt(source)?;
                }
                // Keep the master from publishing again before everyone read
                self.member.barrier(SyncPoint::ThreadTeam)?;
            }

            EventKind::ThreadBegin => {
                self.current = Some(
                    source
                        .child(
                            self.defs.thread_root_region(),
                            CallsiteId::UNDEFINED,
                            self.program,
                        )
                        .map_err(|step| self.unknown_callpath(step))?,
                );
            }

            EventKind::ThreadTaskSwitch => {
                let task = event.task().unwrap_or(self.implicit_task);
                let previous = self.current_task;
                self.routes.insert(previous, self.current);
                self.current_task = task;
                match self.routes.get(&task) {
                    Some(&resumed) => self.current = resumed,
                    None => {
                        let region = self.task_entry(events, idx, task)?;
                        let after_completion = idx.checked_sub(1).is_some_and(|prev| {
                            events[prev].kind() == EventKind::ThreadTaskComplete
                        });
                        if previous == self.implicit_task && !after_completion {
                            self.last_stub_parent = self.current;
                        }
                        source.task_stub(region, self.last_stub_parent);
                        self.current = Some(
                            source
                                .child(
                                    self.defs.task_root_region(),
                                    CallsiteId::UNDEFINED,
                                    self.program,
                                )
                                .map_err(|step| self.unknown_callpath(step))?,
                        );
                    }
                }
            }

            EventKind::ThreadTaskComplete => {
                self.current_task = self.implicit_task;
                self.current = self.routes.get(&self.implicit_task).copied().flatten();
                if let Some(task) = event.task() {
                    self.routes.remove(&task);
                }
            }

            _ => {}
        }
        Ok(None)
    }

    /// Check Enter/Leave nesting once the whole trace has been replayed
    pub fn finish(&self) -> Result<(), ReplayError> {
        if self.depth < 0 || self.balance == Balance::TooManyLeaves {
            Err(ReplayError::TooManyLeaves {
                location: self.location,
            })
        } else if self.depth > 0 || self.balance == Balance::TooManyEnters {
            Err(ReplayError::TooManyEnters {
                location: self.location,
            })
        } else {
            Ok(())
        }
    }

    /// Current Enter/Leave nesting depth
    #[cfg(test)]
    pub fn depth(&self) -> isize {
        self.depth
    }

    /// Current call path
    #[cfg(test)]
    pub fn current(&self) -> Option<CallpathId> {
        self.current
    }

    /// Map the call path published by the master into `source`
    fn adopt(&self, source: &mut impl CallpathSource) -> Result<Option<CallpathId>, ReplayError> {
        self.member
            .published()
            .iter()
            .try_fold(None, |parent, &(region, callsite)| {
                source.child(region, callsite, parent).map(Some)
            })
            .map_err(|step| self.unknown_callpath(step))
    }

    /// Find the region that a newly switched-to task starts by entering
    fn task_entry(
        &self,
        events: &[EventRecord],
        idx: usize,
        task: TaskId,
    ) -> Result<RegionId, ReplayError> {
        events[idx + 1..]
            .iter()
            .filter(|event| event.is_of(EventGroup::Enter))
            .filter_map(EventRecord::region)
            .find(|&region| !self.defs.is_artificial(region))
            .ok_or(ReplayError::MissingTaskEntry {
                location: self.location,
                task,
            })
    }

    /// Error reported when a call path cannot be resolved
    fn unknown_callpath(&self, (region, callsite): PathStep) -> ReplayError {
        ReplayError::UnknownCallpath {
            location: self.location,
            region,
            callsite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::Team;
    use pretty_assertions::assert_eq;
    use trace_events::{Paradigm, Payload, RegionRole};

    fn setup() -> (Definitions, RegionId, RegionId, Location) {
        let mut builder = Definitions::builder();
        let main = builder.add_region("main", RegionRole::Function, Paradigm::User);
        let foo = builder.add_region("foo", RegionRole::Function, Paradigm::User);
        (
            builder.build(),
            main,
            foo,
            Location::new(LocationId(0), 0, "master"),
        )
    }

    #[test]
    fn growing() {
        let (defs, main, foo, location) = setup();
        let team = Team::new(1);
        let events = [
            EventRecord::new(0.0, Payload::enter(main)),
            EventRecord::new(1.0, Payload::leave(main)),
            EventRecord::new(2.0, Payload::leave(foo)),
        ];
        let mut tree = CallTree::new();
        let mut tracker = CallpathTracker::new(&defs, &location, team.member(0));
        tracker.start(&mut tree, events.first()).unwrap();

        let main_path = tracker.step(&mut tree, &events, 0).unwrap();
        assert_eq!(main_path, tree.find(main, CallsiteId::UNDEFINED, None));
        assert_eq!(tracker.depth(), 1);
        assert_eq!(tracker.step(&mut tree, &events, 1).unwrap(), main_path);
        assert_eq!(tracker.current(), None);
        assert_eq!(tracker.finish(), Ok(()));

        // A Leave at the root keeps the root as the current call path
        assert_eq!(tracker.step(&mut tree, &events, 2).unwrap(), None);
        assert_eq!(tracker.depth(), -1);
        assert_eq!(tracker.current(), None);
        assert_eq!(
            tracker.finish(),
            Err(ReplayError::TooManyLeaves {
                location: LocationId(0)
            })
        );
    }

    #[test]
    fn frozen() {
        let (defs, main, foo, location) = setup();
        let team = Team::new(1);
        let mut tree = CallTree::new();
        let main_path = tree.get_or_create(main, CallsiteId::UNDEFINED, None);
        let events = [
            EventRecord::new(0.0, Payload::enter(main)),
            EventRecord::new(1.0, Payload::enter(foo)),
        ];
        let mut source = Frozen(&tree);
        let mut tracker = CallpathTracker::new(&defs, &location, team.member(0));
        tracker.start(&mut source, events.first()).unwrap();
        assert_eq!(tracker.step(&mut source, &events, 0), Ok(Some(main_path)));
        assert_eq!(
            tracker.step(&mut source, &events, 1),
            Err(ReplayError::UnknownCallpath {
                location: LocationId(0),
                region: foo,
                callsite: CallsiteId::UNDEFINED,
            })
        );
        assert_eq!(tree.len(), 1);
    }
}
