//! Deduplicated tree of the (region, call site) nestings observed in traces
//!
//! Call paths are stored in an arena and addressed by `CallpathId`. A call
//! path is always created after its parent, so parents have smaller ids than
//! their children, which lets whole-tree passes iterate in id order.

use hashbrown::HashMap;
use nom::{
    multi::count,
    number::complete::le_u32,
    sequence::tuple,
    IResult,
};
use std::fmt::{self, Debug, Formatter};
use termtree::Tree;
use thiserror::Error;
use trace_events::{CallpathId, CallsiteId, Definitions, RegionId};

/// Step of a call path, as seen from its parent
pub type PathStep = (RegionId, CallsiteId);

/// Identity of a call path within its parent
type NodeKey = (Option<CallpathId>, RegionId, CallsiteId);

/// Tree of call paths
#[derive(Clone, Default, PartialEq)]
pub struct CallTree {
    /// Call paths, indexed by CallpathId
    nodes: Vec<CallpathNode>,

    /// Call path lookup by parent and step
    lookup: HashMap<NodeKey, CallpathId, ahash::RandomState>,
}
//
impl CallTree {
    /// Set up an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of call paths
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Truth that this tree has no call path yet
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find the child of a call path (or the root call path if `parent` is
    /// `None`) that enters a certain region from a certain call site
    pub fn find(
        &self,
        region: RegionId,
        callsite: CallsiteId,
        parent: Option<CallpathId>,
    ) -> Option<CallpathId> {
        self.lookup.get(&(parent, region, callsite)).copied()
    }

    /// Like `find()`, but creates the call path if it does not exist yet
    ///
    /// # Panics
    ///
    /// If `parent` does not belong to this tree, or if the tree already has
    /// as many call paths as `CallpathId` can address.
    pub fn get_or_create(
        &mut self,
        region: RegionId,
        callsite: CallsiteId,
        parent: Option<CallpathId>,
    ) -> CallpathId {
        if let Some(id) = self.find(region, callsite, parent) {
            return id;
        }
        let id = Self::next_id(self.nodes.len());
        if let Some(parent) = parent {
            let parent_node = self
                .nodes
                .get_mut(parent.0 as usize)
                .unwrap_or_else(|| panic!("{parent} does not belong to this call tree"));
            parent_node.children.push(id);
        }
        self.nodes.push(CallpathNode {
            region,
            callsite,
            parent,
            children: Vec::new(),
        });
        self.lookup.insert((parent, region, callsite), id);
        id
    }

    /// Identifier of the call path that follows `len` existing ones
    fn next_id(len: usize) -> CallpathId {
        u32::try_from(len)
            .ok()
            .filter(|&id| id != CallpathId::NO_ID)
            .map(CallpathId)
            .expect("Call tree should have fewer than 2^32 - 1 call paths")
    }

    /// Access a call path
    ///
    /// # Panics
    ///
    /// If `id` does not belong to this tree.
    pub fn callpath(&self, id: CallpathId) -> Callpath {
        assert!(
            (id.0 as usize) < self.nodes.len(),
            "{id} does not belong to this call tree"
        );
        Callpath { tree: self, id }
    }

    /// Call paths without a parent
    pub fn roots(&self) -> impl Iterator<Item = Callpath> {
        self.iter().filter(|callpath| callpath.parent().is_none())
    }

    /// All call paths, parents before children
    pub fn iter(&self) -> impl Iterator<Item = Callpath> {
        (0..self.nodes.len()).map(move |idx| Callpath {
            tree: self,
            id: CallpathId(idx as u32),
        })
    }

    /// Find the call path designated by a sequence of steps from the root
    ///
    /// The empty path designates the root, which is represented as `None`.
    /// If the path does not exist, the first missing step is returned.
    pub fn find_path(&self, path: &[PathStep]) -> Result<Option<CallpathId>, PathStep> {
        path.iter().try_fold(None, |parent, &(region, callsite)| {
            self.find(region, callsite, parent)
                .map(Some)
                .ok_or((region, callsite))
        })
    }

    /// Like `find_path()`, but creates missing call paths
    pub fn get_or_create_path(&mut self, path: &[PathStep]) -> Option<CallpathId> {
        path.iter().fold(None, |parent, &(region, callsite)| {
            Some(self.get_or_create(region, callsite, parent))
        })
    }

    /// Translate a call path of another tree into the equivalent call path of
    /// this tree, creating it if needed
    pub fn map_callpath(
        &mut self,
        donor: &CallTree,
        callpath: Option<CallpathId>,
    ) -> Option<CallpathId> {
        let donor_path = donor.callpath(callpath?);
        let parent = self.map_callpath(donor, donor_path.parent().map(|parent| parent.id()));
        Some(self.get_or_create(donor_path.region(), donor_path.callsite(), parent))
    }

    /// Fold the call paths of another tree into this one
    ///
    /// Call paths are matched by their sequence of steps from the root, not
    /// by identifier. Returns the mapping from donor identifiers to
    /// identifiers within this tree.
    pub fn merge(&mut self, donor: &CallTree) -> Box<[CallpathId]> {
        let mut mapping = Vec::with_capacity(donor.len());
        for node in &donor.nodes {
            let parent = node.parent.map(|parent| mapping[parent.0 as usize]);
            mapping.push(self.get_or_create(node.region, node.callsite, parent));
        }
        mapping.into_boxed_slice()
    }

    /// Append the binary encoding of this tree to a byte buffer
    ///
    /// The encoding is the little-endian `u32` number of call paths, then
    /// for each call path in id order its region, call site and parent, the
    /// parent of root call paths being `CallpathId::NO_ID`.
    pub fn encode(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        for node in &self.nodes {
            let parent = node.parent.map_or(CallpathId::NO_ID, |parent| parent.0);
            for word in [node.region.0, node.callsite.0, parent] {
                output.extend_from_slice(&word.to_le_bytes());
            }
        }
    }

    /// Decode a tree from the output of `encode()`
    pub fn decode(bytes: &[u8]) -> Result<Self, CallTreeError> {
        let (rest, nodes) = encoded_nodes(bytes).map_err(|_| CallTreeError::Truncated)?;
        if !rest.is_empty() {
            return Err(CallTreeError::TrailingBytes(rest.len()));
        }
        let mut tree = Self::new();
        for (idx, (region, callsite, parent)) in nodes.into_iter().enumerate() {
            let parent = (parent != CallpathId::NO_ID).then_some(CallpathId(parent));
            if let Some(parent) = parent.filter(|parent| parent.0 as usize >= idx) {
                return Err(CallTreeError::InvalidParent {
                    callpath: CallpathId(idx as u32),
                    parent,
                });
            }
            let id = tree.get_or_create(RegionId(region), CallsiteId(callsite), parent);
            if id.0 as usize != idx {
                return Err(CallTreeError::Duplicate(CallpathId(idx as u32)));
            }
        }
        Ok(tree)
    }

    /// Hierarchical display of this tree, using region names from `defs`
    pub fn display(&self, defs: &Definitions) -> Tree<String> {
        Tree::new("<root>".to_owned()).with_leaves(self.roots().map(|root| root.display(defs)))
    }
}
//
impl Debug for CallTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Decode the node list of an encoded call tree
fn encoded_nodes(input: &[u8]) -> IResult<&[u8], Vec<(u32, u32, u32)>> {
    let (input, num_nodes) = le_u32(input)?;
    count(tuple((le_u32, le_u32, le_u32)), num_nodes as usize)(input)
}

/// Problem encountered while decoding a call tree
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CallTreeError {
    /// The buffer ended before all call paths were decoded
    #[error("truncated call tree")]
    Truncated,

    /// Bytes remained after the last call path
    #[error("{0} unexpected bytes after the call tree")]
    TrailingBytes(usize),

    /// A call path refers to a parent that was not decoded before it
    #[error("{callpath} refers to invalid parent {parent}")]
    InvalidParent {
        /// Call path with an invalid parent
        callpath: CallpathId,

        /// Invalid parent
        parent: CallpathId,
    },

    /// A call path is encoded twice
    #[error("{0} duplicates a previous call path")]
    Duplicate(CallpathId),
}

/// View of one call path within a tree
#[derive(Clone, Copy)]
pub struct Callpath<'tree> {
    /// Tree which this call path belongs to
    tree: &'tree CallTree,

    /// Identifier of this call path
    id: CallpathId,
}
//
impl<'tree> Callpath<'tree> {
    /// Identifier of this call path
    pub fn id(&self) -> CallpathId {
        self.id
    }

    /// Region that was entered
    pub fn region(&self) -> RegionId {
        self.node().region
    }

    /// Call site from which the region was entered
    pub fn callsite(&self) -> CallsiteId {
        self.node().callsite
    }

    /// Parent call path, if any
    pub fn parent(&self) -> Option<Callpath<'tree>> {
        self.node().parent.map(|id| Callpath {
            tree: self.tree,
            id,
        })
    }

    /// Direct children, in creation order
    pub fn children(&self) -> impl Iterator<Item = Callpath<'tree>> + 'tree {
        let tree = self.tree;
        tree.nodes[self.id.0 as usize]
            .children
            .iter()
            .map(move |&id| Callpath { tree, id })
    }

    /// Direct child entering a certain region, from any call site
    pub fn child_by_region(&self, region: RegionId) -> Option<Callpath<'tree>> {
        self.children().find(|child| child.region() == region)
    }

    /// Parent, grandparent, and so on up to a root call path
    pub fn ancestors(&self) -> impl Iterator<Item = Callpath<'tree>> {
        std::iter::successors(self.parent(), Callpath::parent)
    }

    /// Number of steps from the implicit root of the tree to this call path
    pub fn depth(&self) -> usize {
        self.ancestors().count() + 1
    }

    /// Steps from the implicit root of the tree to this call path
    pub fn path(&self) -> Vec<PathStep> {
        let mut path = std::iter::once(*self)
            .chain(self.ancestors())
            .map(|callpath| (callpath.region(), callpath.callsite()))
            .collect::<Vec<_>>();
        path.reverse();
        path
    }

    /// Hierarchical display of this call path and its descendants
    pub fn display(&self, defs: &Definitions) -> Tree<String> {
        let name = defs.region_name(self.region());
        let label = match defs.callsite(self.callsite()) {
            Some(callsite) => format!("{name} ({}:{})", callsite.file(), callsite.line()),
            None => name.to_owned(),
        };
        Tree::new(label).with_leaves(self.children().map(|child| child.display(defs)))
    }

    /// Underlying tree node
    fn node(&self) -> &'tree CallpathNode {
        &self.tree.nodes[self.id.0 as usize]
    }
}
//
impl PartialEq for Callpath<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}
//
impl Debug for Callpath<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("Callpath")
            .field("id", &self.id)
            .field("region", &self.region())
            .field("callsite", &self.callsite())
            .field("parent", &self.node().parent)
            .finish()
    }
}

/// Node of a call tree
#[derive(Clone, Debug, PartialEq)]
struct CallpathNode {
    /// Region that was entered
    region: RegionId,

    /// Call site from which the region was entered
    callsite: CallsiteId,

    /// Parent call path, if any
    parent: Option<CallpathId>,

    /// Child call paths, in creation order
    children: Vec<CallpathId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use maplit::btreeset;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use trace_events::{Paradigm, RegionRole};

    #[test]
    fn id_exhaustion() {
        assert_eq!(CallTree::next_id(0), CallpathId(0));
        assert_eq!(
            CallTree::next_id(CallpathId::NO_ID as usize - 1),
            CallpathId(CallpathId::NO_ID - 1)
        );
    }

    #[test]
    #[should_panic]
    fn reserved_id() {
        CallTree::next_id(CallpathId::NO_ID as usize);
    }

    #[test]
    #[should_panic]
    fn id_overflow() {
        CallTree::next_id(usize::MAX);
    }

    const FOO: RegionId = RegionId(3);
    const BAR: RegionId = RegionId(4);
    const BAZ: RegionId = RegionId(5);

    /// Set of paths of a tree, parent/child relations included
    fn shape(tree: &CallTree) -> BTreeSet<Vec<PathStep>> {
        tree.iter().map(|callpath| callpath.path()).collect()
    }

    fn step(region: RegionId, callsite: u32) -> PathStep {
        (region, CallsiteId(callsite))
    }

    #[test]
    fn get_or_create() {
        let mut tree = CallTree::new();
        let foo = tree.get_or_create(FOO, CallsiteId(0), None);
        let bar = tree.get_or_create(BAR, CallsiteId(1), Some(foo));
        assert_eq!(tree.get_or_create(FOO, CallsiteId(0), None), foo);
        assert_eq!(tree.get_or_create(BAR, CallsiteId(1), Some(foo)), bar);
        assert_ne!(tree.get_or_create(BAR, CallsiteId(2), Some(foo)), bar);
        assert_ne!(tree.get_or_create(BAR, CallsiteId(1), None), bar);
        assert_eq!(tree.len(), 4);

        assert_eq!(tree.find(BAR, CallsiteId(1), Some(foo)), Some(bar));
        assert_eq!(tree.find(BAZ, CallsiteId(1), Some(foo)), None);

        let bar_path = tree.callpath(bar);
        assert_eq!(bar_path.parent(), Some(tree.callpath(foo)));
        assert_eq!(bar_path.depth(), 2);
        assert_eq!(tree.callpath(foo).depth(), 1);
        assert_eq!(bar_path.path(), [step(FOO, 0), step(BAR, 1)]);
        assert_eq!(
            tree.callpath(foo).child_by_region(BAR).map(|child| child.id()),
            Some(bar)
        );
        assert_eq!(tree.roots().count(), 2);
    }

    #[test]
    fn paths() {
        let mut tree = CallTree::new();
        let path = [step(FOO, 0), step(BAR, 1), step(BAZ, 2)];
        let baz = tree.get_or_create_path(&path);
        assert_eq!(tree.find_path(&path), Ok(baz));
        assert_eq!(tree.find_path(&[]), Ok(None));
        assert_eq!(tree.find_path(&path[1..]), Err(step(BAR, 1)));
        assert_eq!(tree.get_or_create_path(&[]), None);
        assert_eq!(baz.map(|baz| tree.callpath(baz).path()), Some(path.to_vec()));
    }

    #[test]
    fn map_and_merge() {
        let mut receiver = CallTree::new();
        receiver.get_or_create_path(&[step(BAZ, 0)]);
        let mut donor = CallTree::new();
        let bar = donor.get_or_create_path(&[step(FOO, 0), step(BAR, 1)]);
        donor.get_or_create_path(&[step(BAZ, 0), step(FOO, 0)]);

        let mapped = receiver.map_callpath(&donor, bar);
        assert_eq!(
            mapped.map(|id| receiver.callpath(id).path()),
            Some(vec![step(FOO, 0), step(BAR, 1)])
        );
        assert_eq!(receiver.map_callpath(&donor, None), None);

        let mapping = receiver.merge(&donor);
        assert_eq!(mapping.len(), donor.len());
        for callpath in donor.iter() {
            let mapped = receiver.callpath(mapping[callpath.id().0 as usize]);
            assert_eq!(mapped.path(), callpath.path());
        }
        assert_eq!(
            shape(&receiver),
            btreeset! {
                vec![step(BAZ, 0)],
                vec![step(BAZ, 0), step(FOO, 0)],
                vec![step(FOO, 0)],
                vec![step(FOO, 0), step(BAR, 1)],
            }
        );
    }

    #[test]
    fn encoding() {
        let mut tree = CallTree::new();
        tree.get_or_create_path(&[step(FOO, 0), step(BAR, 1)]);
        tree.get_or_create_path(&[step(FOO, 0), step(BAZ, 2)]);
        let mut bytes = Vec::new();
        tree.encode(&mut bytes);
        assert_eq!(bytes.len(), 4 + 3 * 12);
        assert_eq!(CallTree::decode(&bytes), Ok(tree));

        assert_eq!(
            CallTree::decode(&bytes[..bytes.len() - 1]),
            Err(CallTreeError::Truncated)
        );
        let mut trailing = bytes.clone();
        trailing.push(0);
        assert_eq!(
            CallTree::decode(&trailing),
            Err(CallTreeError::TrailingBytes(1))
        );

        let mut self_parent = Vec::new();
        for word in [1u32, 3, 0, 0] {
            self_parent.extend_from_slice(&word.to_le_bytes());
        }
        assert_matches!(
            CallTree::decode(&self_parent),
            Err(CallTreeError::InvalidParent { .. })
        );
    }

    #[test]
    fn display() {
        let mut builder = Definitions::builder();
        let main = builder.add_region("main", RegionRole::Function, Paradigm::User);
        let solve = builder.add_region("solve", RegionRole::Function, Paradigm::User);
        let site = builder.add_callsite("main.c", 12, solve);
        let defs = builder.build();

        let mut tree = CallTree::new();
        tree.get_or_create_path(&[(main, CallsiteId::UNDEFINED), (solve, site)]);
        let text = tree.display(&defs).to_string();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "<root>");
        assert!(lines[1].ends_with("main"));
        assert!(lines[2].ends_with("solve (main.c:12)"));
    }

    /// Arbitrary call path, as a sequence of steps from the root
    fn arbitrary_path() -> impl Strategy<Value = Vec<PathStep>> {
        prop::collection::vec(
            (3u32..6, 0u32..3).prop_map(|(region, callsite)| (RegionId(region), CallsiteId(callsite))),
            1..5,
        )
    }

    /// Arbitrary call tree, built from a set of paths
    fn arbitrary_tree() -> impl Strategy<Value = CallTree> {
        prop::collection::vec(arbitrary_path(), 0..8).prop_map(|paths| {
            let mut tree = CallTree::new();
            for path in paths {
                tree.get_or_create_path(&path);
            }
            tree
        })
    }

    proptest! {
        #[test]
        fn idempotent_creation(path in arbitrary_path()) {
            let mut tree = CallTree::new();
            let first = tree.get_or_create_path(&path);
            let len = tree.len();
            let second = tree.get_or_create_path(&path);
            prop_assert_eq!(first, second);
            prop_assert_eq!(tree.len(), len);
        }

        #[test]
        fn merge_associativity(a in arbitrary_tree(), b in arbitrary_tree(), c in arbitrary_tree()) {
            let mut ab_c = a.clone();
            ab_c.merge(&b);
            ab_c.merge(&c);

            let mut bc = b.clone();
            bc.merge(&c);
            let mut bc_a = bc;
            bc_a.merge(&a);

            prop_assert_eq!(shape(&ab_c), shape(&bc_a));
            prop_assert_eq!(ab_c.len(), bc_a.len());
        }

        #[test]
        fn encoding_preserves_shape(tree in arbitrary_tree()) {
            let mut bytes = Vec::new();
            tree.encode(&mut bytes);
            prop_assert_eq!(CallTree::decode(&bytes), Ok(tree));
        }
    }
}
