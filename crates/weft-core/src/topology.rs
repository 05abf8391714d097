//! Topology specification and validation.
//!
//! A topology is plain data: nodes declaring named, directioned,
//! contract-tagged ports, and edges wiring one Tx port to one Rx port with
//! a fixed queue depth. Validation and lookup are free functions over the
//! spec; nothing here allocates queues or spawns threads.

use std::fmt;

use fxhash::FxHashSet;
use smallvec::SmallVec;

/// Stable identifier of a logical node, unique within a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u16);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable small integer identifying a payload type.
///
/// Two ports can be connected only when their contracts match; every edge
/// carries the contract of the envelopes flowing on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContractId(pub u16);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a port relative to its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Consumer side: the node receives on this port.
    Rx,
    /// Producer side: the node sends on this port.
    Tx,
}

/// A single declared port. Names are unique per (node, direction).
#[derive(Debug, Clone)]
pub struct PortSpec {
    /// Port name, unique per (node, direction).
    pub name: String,
    /// Whether the node receives or sends on this port.
    pub direction: Direction,
    /// Contract of the envelopes on this port.
    pub contract: ContractId,
    /// Required ports must be wired by exactly one edge.
    pub required: bool,
}

/// Builds a required Rx port spec.
#[must_use]
pub fn rx_port(name: impl Into<String>, contract: ContractId) -> PortSpec {
    PortSpec {
        name: name.into(),
        direction: Direction::Rx,
        contract,
        required: true,
    }
}

/// Builds a required Tx port spec.
#[must_use]
pub fn tx_port(name: impl Into<String>, contract: ContractId) -> PortSpec {
    PortSpec {
        name: name.into(),
        direction: Direction::Tx,
        contract,
        required: true,
    }
}

/// A node declaration: identity, CPU affinity, and its port set.
///
/// Ports are declared at build time; there are no dynamic ports.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Node identity, unique within the topology.
    pub id: NodeId,
    /// Human-readable name used in diagnostics.
    pub name: String,
    /// CPU core the node's worker thread is pinned to.
    pub core: u32,
    /// Declared ports, in deterministic drain order.
    pub ports: SmallVec<[PortSpec; 4]>,
}

/// An edge declaration: one SPSC queue from a Tx port to an Rx port.
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    /// Producer node.
    pub from: NodeId,
    /// Producer port name.
    pub from_port: String,
    /// Consumer node.
    pub to: NodeId,
    /// Consumer port name.
    pub to_port: String,
    /// Contract of the envelopes on this edge.
    pub contract: ContractId,
    /// Queue capacity; must be at least 2.
    pub depth: usize,
}

/// A complete dataflow graph description.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// All node declarations.
    pub nodes: Vec<NodeSpec>,
    /// All edge declarations. Edge index is the queue index.
    pub edges: Vec<EdgeSpec>,
}

/// Errors produced by topology validation.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// A required port is not wired by exactly one edge.
    #[error("required port wiring mismatch for node={node} port={port}")]
    RequiredPortMismatch {
        /// Name of the offending node.
        node: String,
        /// Name of the offending port.
        port: String,
    },

    /// An optional port is wired by more than one edge.
    #[error("optional port wired multiple times for node={node} port={port}")]
    OptionalPortRewired {
        /// Name of the offending node.
        node: String,
        /// Name of the offending port.
        port: String,
    },

    /// Two ports on the same node share a name and direction.
    #[error("duplicate port name for node={node} port={port}")]
    DuplicatePortName {
        /// Name of the offending node.
        node: String,
        /// Name of the offending port.
        port: String,
    },
}

/// Checks that every edge matching `port` on `node` agrees on direction and
/// contract.
fn edge_matches(edge: &EdgeSpec, node: &NodeSpec, port: &PortSpec) -> bool {
    if edge.contract != port.contract {
        return false;
    }
    match port.direction {
        Direction::Tx => edge.from == node.id && edge.from_port == port.name,
        Direction::Rx => edge.to == node.id && edge.to_port == port.name,
    }
}

/// Validates port wiring for the whole topology.
///
/// - every required port is wired by exactly one edge of its contract
/// - no optional port is wired more than once
/// - port names are unique per (node, direction)
///
/// # Errors
///
/// Returns the first violation found, with the node and port named in the
/// diagnostic.
pub fn validate_ports(topology: &Topology) -> Result<(), TopologyError> {
    for node in &topology.nodes {
        let mut seen: FxHashSet<(Direction, &str)> = FxHashSet::default();
        for port in &node.ports {
            if !seen.insert((port.direction, port.name.as_str())) {
                return Err(TopologyError::DuplicatePortName {
                    node: node.name.clone(),
                    port: port.name.clone(),
                });
            }
        }

        for port in &node.ports {
            let matches = topology
                .edges
                .iter()
                .filter(|edge| edge_matches(edge, node, port))
                .count();

            if port.required && matches != 1 {
                return Err(TopologyError::RequiredPortMismatch {
                    node: node.name.clone(),
                    port: port.name.clone(),
                });
            }

            if !port.required && matches > 1 {
                return Err(TopologyError::OptionalPortRewired {
                    node: node.name.clone(),
                    port: port.name.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Finds the index of the unique edge wired to `(node, port_name)` in the
/// given direction with the given contract.
///
/// Ties are impossible on a validated topology. The returned index is the
/// queue index in the engine's store.
#[must_use]
pub fn find_edge_index(
    topology: &Topology,
    node: NodeId,
    port_name: &str,
    direction: Direction,
    contract: ContractId,
) -> Option<usize> {
    topology.edges.iter().position(|edge| {
        if edge.contract != contract {
            return false;
        }
        match direction {
            Direction::Tx => edge.from == node && edge.from_port == port_name,
            Direction::Rx => edge.to == node && edge.to_port == port_name,
        }
    })
}

/// Returns the declared CPU affinity of a node.
#[must_use]
pub fn find_core(topology: &Topology, node_id: NodeId) -> Option<u32> {
    topology.nodes.iter().find(|node| node.id == node_id).map(|node| node.core)
}
