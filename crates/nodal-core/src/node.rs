//! Node numbering for the circuit unknowns.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Unique identifier for an unknown of the circuit (node voltage or branch current).
///
/// Ids are handed out by [`NodeTable`] and never change once issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The ground node (node 0).
    pub const GROUND: NodeId = NodeId(0);

    /// Create a new NodeId from a raw value.
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }

    /// Get the raw node ID value.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Check if this is the ground node.
    pub fn is_ground(self) -> bool {
        self.0 == 0
    }

    /// Row/column of this unknown in the matrix, `None` for ground.
    pub fn index(self) -> Option<usize> {
        if self.is_ground() {
            None
        } else {
            Some((self.0 - 1) as usize)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "GND")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// What a matrix unknown represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A node voltage from the netlist.
    Voltage,
    /// A node created by a device (e.g. behind a parasitic resistance).
    Internal,
    /// A branch current (voltage sources, inductors).
    Current,
}

impl NodeKind {
    /// True for unknowns measured in volts.
    pub fn is_voltage(self) -> bool {
        !matches!(self, NodeKind::Current)
    }
}

#[derive(Debug, Clone)]
struct NodeEntry {
    name: String,
    kind: NodeKind,
}

/// Registry of circuit unknowns.
///
/// Node 0 is ground and is never part of the matrix. Every other id maps to
/// row/column `id - 1`. Netlist nodes come first and keep their ids for the
/// life of the table; device-created unknowns follow them and are rebuilt on
/// every setup pass.
#[derive(Debug, Clone)]
pub struct NodeTable {
    netlist: Vec<NodeEntry>,
    device: Vec<NodeEntry>,
    by_name: IndexMap<String, NodeId>,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable {
    /// Create a table holding only the ground node.
    pub fn new() -> Self {
        let mut by_name = IndexMap::new();
        by_name.insert("0".to_string(), NodeId::GROUND);
        by_name.insert("gnd".to_string(), NodeId::GROUND);
        Self {
            netlist: Vec::new(),
            device: Vec::new(),
            by_name,
        }
    }

    /// Get or create the voltage node with this name.
    ///
    /// Adding a netlist node invalidates device-created ids; the owner must
    /// run setup again before the next analysis.
    pub fn node(&mut self, name: &str) -> NodeId {
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.by_name.get(&key) {
            return id;
        }
        if !self.device.is_empty() {
            self.clear_device_nodes();
        }
        self.netlist.push(NodeEntry {
            name: key.clone(),
            kind: NodeKind::Voltage,
        });
        let id = NodeId(self.netlist.len() as u32);
        self.by_name.insert(key, id);
        id
    }

    /// Create a fresh device-owned node named `<owner>#<suffix>`.
    pub fn internal(&mut self, owner: &str, suffix: &str) -> Result<NodeId> {
        let key = format!("{}#{}", owner, suffix).to_ascii_lowercase();
        self.push_device(key, NodeKind::Internal)
    }

    /// Create a branch-current unknown named `<owner>#branch`.
    pub fn branch(&mut self, owner: &str) -> Result<NodeId> {
        let key = format!("{}#branch", owner).to_ascii_lowercase();
        self.push_device(key, NodeKind::Current)
    }

    fn push_device(&mut self, key: String, kind: NodeKind) -> Result<NodeId> {
        if self.by_name.contains_key(&key) {
            return Err(Error::DuplicateNode(key));
        }
        self.device.push(NodeEntry {
            name: key.clone(),
            kind,
        });
        let id = NodeId((self.netlist.len() + self.device.len()) as u32);
        self.by_name.insert(key, id);
        Ok(id)
    }

    fn entry(&self, id: NodeId) -> Option<&NodeEntry> {
        let raw = id.0 as usize;
        if raw == 0 {
            None
        } else if raw <= self.netlist.len() {
            self.netlist.get(raw - 1)
        } else {
            self.device.get(raw - 1 - self.netlist.len())
        }
    }

    /// Look up an existing node by name.
    pub fn find(&self, name: &str) -> Result<NodeId> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))
    }

    /// Name of a node.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        if id.is_ground() {
            return Some("0");
        }
        self.entry(id).map(|e| e.name.as_str())
    }

    /// Kind of a node.
    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        if id.is_ground() {
            return Some(NodeKind::Voltage);
        }
        self.entry(id).map(|e| e.kind)
    }

    /// Kind of the unknown at a matrix row.
    pub fn kind_of_row(&self, row: usize) -> NodeKind {
        self.kind(NodeId(row as u32 + 1))
            .unwrap_or(NodeKind::Voltage)
    }

    /// Number of matrix unknowns (everything except ground).
    pub fn num_unknowns(&self) -> usize {
        self.netlist.len() + self.device.len()
    }

    /// Number of netlist voltage nodes.
    pub fn num_netlist_nodes(&self) -> usize {
        self.netlist.len()
    }

    /// Drop every device-created unknown, keeping netlist nodes.
    ///
    /// Called before a fresh setup so internal nodes are re-allocated.
    pub fn clear_device_nodes(&mut self) {
        let limit = self.netlist.len() as u32;
        self.device.clear();
        self.by_name.retain(|_, id| id.0 <= limit);
    }

    /// Iterate over `(id, name, kind)` of every unknown, ground excluded.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &str, NodeKind)> {
        self.netlist
            .iter()
            .chain(self.device.iter())
            .enumerate()
            .map(|(i, e)| (NodeId(i as u32 + 1), e.name.as_str(), e.kind))
    }
}
