//! Definitions catalog that event records refer to

use crate::ids::{CallsiteId, CommId, LocationId, RegionId, TaskId};
use hashbrown::HashMap;

/// Role that a code region plays in the traced program
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RegionRole {
    /// Regular function
    Function,
    /// Loop
    Loop,
    /// Parallel construct
    Parallel,
    /// Explicit task construct
    Task,
    /// Critical section
    Critical,
    /// Structured block of a critical section
    CriticalBlock,
    /// Instrumentation artefact (pauses, measurement overhead...)
    Artificial,
    /// Synthetic parent of created threads
    ThreadRoot,
    /// Synthetic parent of explicit tasks
    TaskRoot,
    /// Flush of the tracer's event buffer
    Flushing,
}
//
impl RegionRole {
    /// Truth that this region does not correspond to user code
    pub fn is_artificial(self) -> bool {
        matches!(
            self,
            Self::Artificial | Self::ThreadRoot | Self::TaskRoot | Self::Flushing
        )
    }
}

/// Parallel programming model that a region or event belongs to
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Paradigm {
    /// Unknown
    #[default]
    Unknown,
    /// Manual user instrumentation
    User,
    /// Compiler instrumentation
    Compiler,
    /// OpenMP
    OpenMp,
    /// MPI
    Mpi,
    /// POSIX threads
    Pthread,
    /// Tracer-internal activity
    Measurement,
}
//
impl Paradigm {
    /// Wire encoding of this paradigm
    pub fn to_wire(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::User => 1,
            Self::Compiler => 2,
            Self::OpenMp => 3,
            Self::Mpi => 4,
            Self::Pthread => 5,
            Self::Measurement => 6,
        }
    }

    /// Decode a paradigm, mapping unknown values to `Paradigm::Unknown`
    pub fn from_wire(raw: u32) -> Self {
        match raw {
            1 => Self::User,
            2 => Self::Compiler,
            3 => Self::OpenMp,
            4 => Self::Mpi,
            5 => Self::Pthread,
            6 => Self::Measurement,
            _ => Self::Unknown,
        }
    }
}

/// Code region
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    /// Region name
    name: Box<str>,

    /// What this region is
    role: RegionRole,

    /// Programming model of this region
    paradigm: Paradigm,
}
//
impl Region {
    /// Region name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What this region is
    pub fn role(&self) -> RegionRole {
        self.role
    }

    /// Programming model of this region
    pub fn paradigm(&self) -> Paradigm {
        self.paradigm
    }
}

/// Source location from which a region is entered
#[derive(Clone, Debug, PartialEq)]
pub struct Callsite {
    /// Source file
    file: Box<str>,

    /// Line in the source file
    line: u32,

    /// Region entered from this call site
    callee: RegionId,
}
//
impl Callsite {
    /// Source file
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Line in the source file
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Region entered from this call site
    pub fn callee(&self) -> RegionId {
        self.callee
    }
}

/// Communicator or thread team
#[derive(Clone, Debug, PartialEq)]
pub struct Communicator {
    /// Communicator name
    name: Box<str>,

    /// Number of members
    size: u32,
}
//
impl Communicator {
    /// Communicator name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of members
    pub fn size(&self) -> u32 {
        self.size
    }
}

/// Execution location whose events were captured into one event stream
#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    /// Global identifier
    id: LocationId,

    /// Number of this thread within its process
    thread: u32,

    /// Human-readable name
    name: Box<str>,
}
//
impl Location {
    /// Set up a location
    pub fn new(id: LocationId, thread: u32, name: impl Into<Box<str>>) -> Self {
        Self {
            id,
            thread,
            name: name.into(),
        }
    }

    /// Global identifier
    pub fn id(&self) -> LocationId {
        self.id
    }

    /// Number of this thread within its process, 0 being the master
    pub fn thread(&self) -> u32 {
        self.thread
    }

    /// Human-readable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Implicit task that this location runs when no explicit task is active
    pub fn implicit_task(&self) -> TaskId {
        TaskId::implicit(self.thread)
    }
}

/// Immutable catalog of the entities referenced by event records
#[derive(Clone, Debug, PartialEq)]
pub struct Definitions {
    /// Regions, indexed by RegionId
    regions: Box<[Region]>,

    /// Call sites, indexed by CallsiteId
    callsites: Box<[Callsite]>,

    /// Communicators, indexed by CommId
    comms: Box<[Communicator]>,

    /// Region lookup by name
    region_names: HashMap<Box<str>, RegionId, ahash::RandomState>,

    /// Synthetic parent of created threads
    thread_root: RegionId,

    /// Synthetic parent of explicit tasks
    task_root: RegionId,

    /// Region recorded while the tracer flushes its buffers
    flushing: RegionId,
}
//
impl Definitions {
    /// Start building a catalog
    pub fn builder() -> DefinitionsBuilder {
        DefinitionsBuilder::new()
    }

    /// Look up a region
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.0 as usize)
    }

    /// Look up a region by name
    pub fn region_by_name(&self, name: &str) -> Option<RegionId> {
        self.region_names.get(name).copied()
    }

    /// Name of a region, or a placeholder if it is not known
    pub fn region_name(&self, id: RegionId) -> &str {
        self.region(id).map_or("<unknown region>", Region::name)
    }

    /// Look up a call site
    pub fn callsite(&self, id: CallsiteId) -> Option<&Callsite> {
        self.callsites.get(id.0 as usize)
    }

    /// Look up a communicator or thread team
    pub fn comm(&self, id: CommId) -> Option<&Communicator> {
        self.comms.get(id.0 as usize)
    }

    /// Number of known regions
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    /// Synthetic region under which created threads are attached
    pub fn thread_root_region(&self) -> RegionId {
        self.thread_root
    }

    /// Synthetic region under which explicit tasks are attached
    pub fn task_root_region(&self) -> RegionId {
        self.task_root
    }

    /// Region recorded while the tracer flushes its buffers
    pub fn flushing_region(&self) -> RegionId {
        self.flushing
    }

    /// Truth that a region does not correspond to user code
    ///
    /// Unknown regions are not considered artificial.
    pub fn is_artificial(&self, id: RegionId) -> bool {
        self.region(id)
            .map_or(false, |region| region.role().is_artificial())
    }
}

/// Mechanism to build a Definitions catalog
///
/// The well-known synthetic regions are created upfront, so that user regions
/// start at the first identifier after them.
#[derive(Debug)]
pub struct DefinitionsBuilder {
    /// Regions collected so far
    regions: Vec<Region>,

    /// Call sites collected so far
    callsites: Vec<Callsite>,

    /// Communicators collected so far
    comms: Vec<Communicator>,
}
//
impl DefinitionsBuilder {
    /// Name of the synthetic parent of created threads
    pub const THREAD_ROOT_NAME: &'static str = "THREADS";

    /// Name of the synthetic parent of explicit tasks
    pub const TASK_ROOT_NAME: &'static str = "TASKS";

    /// Name of the buffer flushing region
    pub const FLUSHING_NAME: &'static str = "TRACE BUFFER FLUSH";

    /// Start building a catalog
    pub fn new() -> Self {
        let mut result = Self {
            regions: Vec::new(),
            callsites: Vec::new(),
            comms: Vec::new(),
        };
        result.add_region(
            Self::THREAD_ROOT_NAME,
            RegionRole::ThreadRoot,
            Paradigm::Measurement,
        );
        result.add_region(
            Self::TASK_ROOT_NAME,
            RegionRole::TaskRoot,
            Paradigm::Measurement,
        );
        result.add_region(
            Self::FLUSHING_NAME,
            RegionRole::Flushing,
            Paradigm::Measurement,
        );
        result
    }

    /// Register a new region
    pub fn add_region(
        &mut self,
        name: impl Into<Box<str>>,
        role: RegionRole,
        paradigm: Paradigm,
    ) -> RegionId {
        let id = RegionId(self.regions.len() as u32);
        self.regions.push(Region {
            name: name.into(),
            role,
            paradigm,
        });
        id
    }

    /// Register a new call site
    pub fn add_callsite(
        &mut self,
        file: impl Into<Box<str>>,
        line: u32,
        callee: RegionId,
    ) -> CallsiteId {
        let id = CallsiteId(self.callsites.len() as u32);
        self.callsites.push(Callsite {
            file: file.into(),
            line,
            callee,
        });
        id
    }

    /// Register a new communicator or thread team
    pub fn add_comm(&mut self, name: impl Into<Box<str>>, size: u32) -> CommId {
        let id = CommId(self.comms.len() as u32);
        self.comms.push(Communicator {
            name: name.into(),
            size,
        });
        id
    }

    /// Finish building the catalog
    pub fn build(self) -> Definitions {
        // First definition wins in case of duplicate names
        let mut region_names = HashMap::with_hasher(ahash::RandomState::new());
        for (idx, region) in self.regions.iter().enumerate() {
            region_names
                .entry(region.name.clone())
                .or_insert(RegionId(idx as u32));
        }
        Definitions {
            regions: self.regions.into_boxed_slice(),
            callsites: self.callsites.into_boxed_slice(),
            comms: self.comms.into_boxed_slice(),
            region_names,
            thread_root: RegionId(0),
            task_root: RegionId(1),
            flushing: RegionId(2),
        }
    }
}
//
impl Default for DefinitionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn well_known_regions() {
        let defs = Definitions::builder().build();
        assert_eq!(defs.num_regions(), 3);
        let role = |id| defs.region(id).map(Region::role);
        assert_eq!(role(defs.thread_root_region()), Some(RegionRole::ThreadRoot));
        assert_eq!(role(defs.task_root_region()), Some(RegionRole::TaskRoot));
        assert_eq!(role(defs.flushing_region()), Some(RegionRole::Flushing));
        assert!(defs.is_artificial(defs.flushing_region()));
    }

    #[test]
    fn user_definitions() {
        let mut builder = Definitions::builder();
        let main = builder.add_region("main", RegionRole::Function, Paradigm::User);
        let pause = builder.add_region("PAUSE", RegionRole::Artificial, Paradigm::Measurement);
        let site = builder.add_callsite("main.c", 42, main);
        let team = builder.add_comm("team", 4);
        let defs = builder.build();

        assert_eq!(main, RegionId(3));
        assert_eq!(defs.region_name(main), "main");
        assert_eq!(defs.region_name(RegionId(99)), "<unknown region>");
        assert_eq!(defs.region_by_name("PAUSE"), Some(pause));
        assert!(defs.is_artificial(pause));
        assert!(!defs.is_artificial(main));
        assert!(!defs.is_artificial(RegionId(99)));

        let callsite = defs.callsite(site).unwrap();
        assert_eq!(
            (callsite.file(), callsite.line(), callsite.callee()),
            ("main.c", 42, main)
        );
        assert_eq!(defs.comm(team).map(Communicator::size), Some(4));
        assert_eq!(defs.callsite(CallsiteId::UNDEFINED), None);
    }

    #[test]
    fn locations() {
        let location = Location::new(LocationId(7), 2, "thread 2");
        assert_eq!(location.implicit_task(), TaskId(2 << 32));
        assert_eq!(location.name(), "thread 2");
    }

    #[test]
    fn paradigm_wire() {
        for paradigm in [
            Paradigm::Unknown,
            Paradigm::User,
            Paradigm::Compiler,
            Paradigm::OpenMp,
            Paradigm::Mpi,
            Paradigm::Pthread,
            Paradigm::Measurement,
        ] {
            assert_eq!(Paradigm::from_wire(paradigm.to_wire()), paradigm);
        }
        assert_eq!(Paradigm::from_wire(1234), Paradigm::Unknown);
    }
}
