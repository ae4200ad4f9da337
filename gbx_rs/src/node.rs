use crate::{
    catalog::Class,
    registry::{ChunkInfo, NodeClass},
};
use std::collections::{BTreeSet, HashMap};

/// Handle to a node owned by a document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Edge from a field to another node.
///
/// A null reference is `None` at the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// Node stored in this document, written inline the first time it is
    /// referenced and by index afterwards.
    Internal(NodeId),
    /// Position of an entry in the document's reference table. Resolved on
    /// demand with [`crate::Gbx::resolve`].
    External(usize),
}

/// One chunk as it appeared in a node, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSlot {
    /// Chunk ID as written, possibly under a legacy class ID.
    pub id: u32,
    pub skippable: bool,
    pub version: i32,
    /// Payload kept verbatim instead of being re-encoded: unknown and
    /// ignored chunks, and skippable chunks whose declared size disagreed
    /// with their layout.
    pub raw: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct Node {
    class_id: u32,
    wire_class_id: u32,
    pub(crate) index: Option<i32>,
    pub class: Class,
    pub chunks: Vec<ChunkSlot>,
}

/// Body chunks written for a node created in memory, in registration order.
fn default_slots(chunks: &[ChunkInfo]) -> Vec<ChunkSlot> {
    chunks
        .iter()
        .filter(|info| !info.header && !info.ignored)
        .map(|info| ChunkSlot {
            id: info.id,
            skippable: info.skippable,
            version: info.version.unwrap_or(0),
            raw: None,
        })
        .collect()
}

impl Node {
    /// Wraps `value` in a node that writes every registered body chunk.
    pub fn new<N: NodeClass>(value: N) -> Node {
        Node {
            class_id: N::CLASS_ID,
            wire_class_id: N::CLASS_ID,
            index: None,
            class: value.into_class(),
            chunks: default_slots(N::CHUNKS),
        }
    }

    pub(crate) fn from_parts(class_id: u32, wire_class_id: u32, class: Class) -> Node {
        Node {
            class_id,
            wire_class_id,
            index: None,
            class,
            chunks: Vec::new(),
        }
    }

    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    pub fn wire_class_id(&self) -> u32 {
        self.wire_class_id
    }

    /// Node index this node was read under, if it was read from a reference.
    pub fn node_index(&self) -> Option<i32> {
        self.index
    }

    pub fn get<N: NodeClass>(&self) -> Option<&N> {
        N::from_class(&self.class)
    }

    pub fn get_mut<N: NodeClass>(&mut self) -> Option<&mut N> {
        N::from_class_mut(&mut self.class)
    }

    pub fn unknown_chunks(&self) -> impl Iterator<Item = &ChunkSlot> {
        self.chunks.iter().filter(|slot| slot.raw.is_some())
    }
}

/// Owns every node of a document. Slots are `None` while a node is reserved
/// but not yet read, or taken out to be written.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeArena {
    nodes: Vec<Option<Node>>,
}

impl NodeArena {
    pub fn reserve(&mut self) -> NodeId {
        self.nodes.push(None);
        NodeId(self.nodes.len() - 1)
    }

    pub fn insert(&mut self, node: Node) -> NodeId {
        self.nodes.push(Some(node));
        NodeId(self.nodes.len() - 1)
    }

    pub fn fill(&mut self, id: NodeId, node: Node) {
        self.nodes[id.0] = Some(node);
    }

    pub fn take(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.get_mut(id.0).and_then(Option::take)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Drops every node from `len` on.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| node.as_ref().map(|node| (NodeId(i), node)))
    }
}

#[derive(Debug, Default)]
pub(crate) struct ReadGraph {
    pub nodes: NodeArena,
    pub indices: HashMap<i32, NodeId>,
    /// Node index to reference table entry position.
    pub externals: HashMap<i32, usize>,
}

#[derive(Debug, Default)]
pub(crate) struct WriteGraph {
    pub nodes: NodeArena,
    pub written: HashMap<NodeId, i32>,
    pub used: BTreeSet<i32>,
    /// Reference table entry position to node index.
    pub externals: Vec<i32>,
}

impl WriteGraph {
    pub fn new(nodes: NodeArena, externals: Vec<i32>) -> WriteGraph {
        WriteGraph {
            nodes,
            written: HashMap::new(),
            used: externals.iter().copied().collect(),
            externals,
        }
    }

    /// Keeps the index a node was read under when it is still free,
    /// otherwise takes the next index after the highest one in use.
    pub fn assign_index(&mut self, original: Option<i32>) -> i32 {
        let index = match original {
            Some(index) if index >= 0 && !self.used.contains(&index) => index,
            _ => self.used.last().map_or(1, |last| (last + 1).max(1)),
        };
        self.used.insert(index);
        index
    }

    pub fn highest_index(&self) -> Option<i32> {
        self.used.last().copied()
    }
}
