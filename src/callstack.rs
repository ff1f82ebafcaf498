//! Live call stack of a location, tracked during a forward walk of its events
//!
//! Analyses that walk a preprocessed trace need to know which regions are
//! open at any point, on a per-task basis since tasks interleave on a
//! thread. They also need to know for how long each task was suspended, so
//! that the time spent in other tasks can be subtracted from region
//! durations.

use crate::{calltree::CallTree, cursor::Cursor};
use hashbrown::HashMap;
use trace_events::{
    CallpathId, Definitions, Duration, EventGroup, EventKind, EventRecord, RegionId, TaskId,
    Timestamp,
};

/// Per-task call stacks and suspension times of one location
#[derive(Debug)]
pub struct Callstack<'trace> {
    /// Merged call tree of the process
    tree: &'trace CallTree,

    /// Definitions catalog
    defs: &'trace Definitions,

    /// Implicit task of the location
    implicit_task: TaskId,

    /// Task that is currently executing
    current_task: TaskId,

    /// Truth that `update()` should process events
    updating: bool,

    /// State of each task that was started and not completed yet
    blocks: HashMap<TaskId, TaskBlock<'trace>, ahash::RandomState>,

    /// Call path that tasks spawned from the implicit task were spawned from
    ///
    /// `None` until a task is first switched to from the implicit task,
    /// `Some(None)` designates the root of the call tree.
    origin: Option<Option<CallpathId>>,
}
//
impl<'trace> Callstack<'trace> {
    /// Set up the call stack of a location, starting in its implicit task
    pub fn new(tree: &'trace CallTree, defs: &'trace Definitions, implicit_task: TaskId) -> Self {
        Self {
            tree,
            defs,
            implicit_task,
            current_task: implicit_task,
            updating: true,
            blocks: HashMap::default(),
            origin: None,
        }
    }

    /// Account for the event that a cursor points to
    ///
    /// Events must be fed in trace order. Nothing happens while updates are
    /// disabled.
    ///
    /// # Panics
    ///
    /// If a Leave event is fed while the current task's stack is empty.
    pub fn update(&mut self, cursor: Cursor<'trace>) {
        if !self.updating {
            return;
        }
        let event = cursor.event();
        match event.kind() {
            kind if kind.is_of(EventGroup::Enter) => self.push(cursor),
            kind if kind.is_of(EventGroup::Leave) => self.pop(),
            EventKind::ThreadTeamBegin => {
                let block = self.current_block_mut();
                block.start_time = Some(event.timestamp());
                block.total_out_of_task = 0.0;
                block.switch_out = 0.0;
            }
            EventKind::ThreadTaskSwitch => self.switch_task(cursor),
            EventKind::ThreadTaskComplete => {
                self.current_task = self.implicit_task;
                if let Some(task) = event.task() {
                    self.blocks.remove(&task);
                }
            }
            _ => {}
        }
    }

    /// Enter event of the innermost open region of the current task
    pub fn top(&self) -> Option<Cursor<'trace>> {
        self.current_block()?.stack.last().copied()
    }

    /// Task that is currently executing
    pub fn current_task(&self) -> TaskId {
        self.current_task
    }

    /// Call path of the stub node representing the creation site of the
    /// current task, if it could be determined
    pub fn stub_node_id(&self) -> Option<CallpathId> {
        self.current_block()?.stub
    }

    /// Enable or disable updates
    pub fn set_update(&mut self, update: bool) {
        self.updating = update;
    }

    /// Truth that `update()` processes events
    pub fn is_updating(&self) -> bool {
        self.updating
    }

    /// Time that the current task spent suspended since its innermost open
    /// region was entered
    pub fn current_time_offset(&self) -> Duration {
        self.current_block()
            .and_then(|block| block.out_of_task.last().copied())
            .unwrap_or(0.0)
    }

    /// Time that the current task spent suspended since it started
    pub fn total_time_offset(&self) -> Duration {
        self.current_block()
            .map_or(0.0, |block| block.total_out_of_task)
    }

    /// Time at which the current task started, or at which the current
    /// thread team began for implicit tasks
    pub fn start_time(&self) -> Option<Timestamp> {
        self.current_block()?.start_time
    }

    /// Record that a region was entered
    fn push(&mut self, enter: Cursor<'trace>) {
        let block = self.current_block_mut();
        block.stack.push(enter);
        block.out_of_task.push(0.0);
    }

    /// Record that the innermost region was left
    fn pop(&mut self) {
        let current_task = self.current_task;
        let block = self.current_block_mut();
        assert!(
            block.stack.pop().is_some(),
            "Left a region while the stack of {current_task} is empty"
        );
        block.out_of_task.pop();
    }

    /// Handle a task switch event
    fn switch_task(&mut self, cursor: Cursor<'trace>) {
        let event = cursor.event();
        let Some(task) = event.task() else {
            return;
        };
        let timestamp = event.timestamp();

        let first_visit = self
            .blocks
            .get(&task)
            .map_or(true, |block| block.start_time.is_none());
        if first_visit {
            let stub = self.find_stub(cursor, task);
            self.blocks.entry(task).or_default().stub = stub;
        }

        self.current_block_mut().switch_out = timestamp;
        self.current_task = task;
        let block = self.current_block_mut();
        if block.stack.is_empty() {
            block.start_time = Some(timestamp);
            block.total_out_of_task = 0.0;
            block.switch_out = 0.0;
        } else {
            let suspended = timestamp - block.switch_out;
            for offset in &mut block.out_of_task {
                *offset += suspended;
            }
            block.total_out_of_task += suspended;
        }
    }

    /// Locate the stub node of a task that is switched to for the first time
    fn find_stub(&mut self, switch: Cursor<'trace>, task: TaskId) -> Option<CallpathId> {
        let Some(region) = self.task_entry(switch) else {
            log::warn!("{task} does not enter any region after it starts");
            return None;
        };

        // Only tasks spawned from the implicit task move the origin
        if self.current_task == self.implicit_task {
            if let Some(prev) = switch.prev() {
                if prev.event().kind() != EventKind::ThreadTaskComplete {
                    self.origin = Some(self.callpath_after(prev));
                }
            }
        }

        match self.origin {
            Some(Some(origin)) => self
                .tree
                .callpath(origin)
                .child_by_region(region)
                .map(|stub| stub.id()),
            Some(None) => self
                .tree
                .roots()
                .find(|root| root.region() == region)
                .map(|stub| stub.id()),
            None => {
                log::warn!("{task} was started before any call path could be attributed to it");
                None
            }
        }
    }

    /// First non-artificial region entered after a task switch
    fn task_entry(&self, switch: Cursor<'trace>) -> Option<RegionId> {
        switch.store().events()[switch.index() + 1..]
            .iter()
            .filter(|event| event.is_of(EventGroup::Enter))
            .filter_map(EventRecord::region)
            .find(|&region| !self.defs.is_artificial(region))
    }

    /// Call path which execution is in after an event
    ///
    /// After a Leave event, this is the parent of the region that was left,
    /// which is where replay attaches the stubs of tasks spawned right after
    /// it. Other events keep the call path of their enclosing region.
    fn callpath_after(&self, cursor: Cursor<'trace>) -> Option<CallpathId> {
        let callpath = cursor.callpath();
        if cursor.event().is_of(EventGroup::Leave) {
            callpath.and_then(|left| self.tree.callpath(left).parent().map(|parent| parent.id()))
        } else {
            callpath
        }
    }

    /// State of the current task, if it exists
    fn current_block(&self) -> Option<&TaskBlock<'trace>> {
        self.blocks.get(&self.current_task)
    }

    /// State of the current task, created as needed
    fn current_block_mut(&mut self) -> &mut TaskBlock<'trace> {
        self.blocks.entry(self.current_task).or_default()
    }
}

/// Call stack and timing state of one task
#[derive(Debug, Default)]
struct TaskBlock<'trace> {
    /// Enter events of the open regions, innermost last
    stack: Vec<Cursor<'trace>>,

    /// Time spent suspended since each open region was entered
    out_of_task: Vec<Duration>,

    /// Time spent suspended since the task started
    total_out_of_task: Duration,

    /// Start of the task, or of the current thread team for implicit tasks
    start_time: Option<Timestamp>,

    /// Last time the task was suspended
    switch_out: Timestamp,

    /// Stub node of the task
    stub: Option<CallpathId>,
}
