//! The pipeline's dataflow graph.
//!
//! Flow: feeder -> ingress outbox -> md -> strat; strat -> or -> strat.
//! The ingress node is the sole origin of ticks; its Tx port is bound by
//! the harness feeder rather than a pinned worker.

use smallvec::smallvec;

use weft_core::topology::{rx_port, tx_port, EdgeSpec, NodeSpec, Topology};

use crate::config::PipelineConfig;
use crate::contracts::{Contract, PipeNode};

/// Builds the four-node topology from a config.
#[must_use]
pub fn make_topology(config: &PipelineConfig) -> Topology {
    Topology {
        nodes: vec![
            NodeSpec {
                id: PipeNode::Ingress.id(),
                name: "ingress".to_string(),
                core: config.ingress_core,
                ports: smallvec![tx_port("tick_tx", Contract::Tick.id())],
            },
            NodeSpec {
                id: PipeNode::Md.id(),
                name: "md".to_string(),
                core: config.md_core,
                ports: smallvec![
                    rx_port("tick_rx", Contract::Tick.id()),
                    tx_port("tick_tx", Contract::Tick.id()),
                ],
            },
            NodeSpec {
                id: PipeNode::Strat.id(),
                name: "strat".to_string(),
                core: config.strat_core,
                ports: smallvec![
                    rx_port("tick_rx", Contract::Tick.id()),
                    tx_port("order_tx", Contract::OrderReq.id()),
                    rx_port("ack_rx", Contract::OrderAck.id()),
                ],
            },
            NodeSpec {
                id: PipeNode::Or.id(),
                name: "or".to_string(),
                core: config.or_core,
                ports: smallvec![
                    rx_port("order_rx", Contract::OrderReq.id()),
                    tx_port("ack_tx", Contract::OrderAck.id()),
                ],
            },
        ],
        edges: vec![
            EdgeSpec {
                from: PipeNode::Ingress.id(),
                from_port: "tick_tx".to_string(),
                to: PipeNode::Md.id(),
                to_port: "tick_rx".to_string(),
                contract: Contract::Tick.id(),
                depth: config.ingress_depth,
            },
            EdgeSpec {
                from: PipeNode::Md.id(),
                from_port: "tick_tx".to_string(),
                to: PipeNode::Strat.id(),
                to_port: "tick_rx".to_string(),
                contract: Contract::Tick.id(),
                depth: config.tick_depth,
            },
            EdgeSpec {
                from: PipeNode::Strat.id(),
                from_port: "order_tx".to_string(),
                to: PipeNode::Or.id(),
                to_port: "order_rx".to_string(),
                contract: Contract::OrderReq.id(),
                depth: config.order_depth,
            },
            EdgeSpec {
                from: PipeNode::Or.id(),
                from_port: "ack_tx".to_string(),
                to: PipeNode::Strat.id(),
                to_port: "ack_rx".to_string(),
                contract: Contract::OrderAck.id(),
                depth: config.ack_depth,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::topology::{find_core, find_edge_index, validate_ports, Direction};

    #[test]
    fn test_topology_validates() {
        let topology = make_topology(&PipelineConfig::default());
        validate_ports(&topology).unwrap();
        assert_eq!(topology.nodes.len(), 4);
        assert_eq!(topology.edges.len(), 4);
    }

    #[test]
    fn test_edge_lookup_disambiguates_tick_ports() {
        let topology = make_topology(&PipelineConfig::default());

        // Two tick edges exist; lookup keys on (node, port, direction).
        assert_eq!(
            find_edge_index(
                &topology,
                PipeNode::Ingress.id(),
                "tick_tx",
                Direction::Tx,
                Contract::Tick.id()
            ),
            Some(0)
        );
        assert_eq!(
            find_edge_index(
                &topology,
                PipeNode::Md.id(),
                "tick_tx",
                Direction::Tx,
                Contract::Tick.id()
            ),
            Some(1)
        );
    }

    #[test]
    fn test_cores_follow_config() {
        let config = PipelineConfig {
            md_core: 5,
            strat_core: 6,
            or_core: 7,
            ..PipelineConfig::default()
        };
        let topology = make_topology(&config);

        assert_eq!(find_core(&topology, PipeNode::Md.id()), Some(5));
        assert_eq!(find_core(&topology, PipeNode::Strat.id()), Some(6));
        assert_eq!(find_core(&topology, PipeNode::Or.id()), Some(7));
    }

    #[test]
    fn test_missing_ack_edge_fails_validation() {
        let mut topology = make_topology(&PipelineConfig::default());
        topology.edges.retain(|edge| edge.to_port != "ack_rx");

        let err = validate_ports(&topology).unwrap_err();
        assert!(err.to_string().contains("ack_rx") || err.to_string().contains("ack_tx"));
    }
}
