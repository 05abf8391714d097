//! Pipeline runtime: assembles nodes over the engine.
//!
//! Build binds every port (including the feeder's handle on the ingress
//! edge), constructs the node instances, and registers one worker per
//! node. Start/stop/join delegate to the engine.

use std::sync::Arc;

use weft_core::arena::BumpArena;
use weft_core::engine::{Engine, EngineError};
use weft_core::host::{HostError, Hosted};
use weft_core::port::Outbox;
use weft_core::topology::Topology;

use crate::config::PipelineConfig;
use crate::contracts::{contract_bindings, Contract, PipeNode, TickEnvelope};
use crate::counters::{RuntimeCounters, StatsSnapshot};
use crate::nodes::{MdNode, MdPorts, OrNode, OrPorts, StratNode, StratPorts};

/// Errors surfaced by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Engine build/bind/start failures.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Host lifecycle failures.
    #[error(transparent)]
    Host(#[from] HostError),
}

/// The assembled pipeline over one engine.
pub struct PipelineRuntime {
    engine: Engine,
    config: PipelineConfig,
    counters: Arc<RuntimeCounters>,
    driver_tick_tx: Outbox<TickEnvelope>,
    built: bool,
}

impl PipelineRuntime {
    /// Creates a runtime over a topology and config. The queue arena is
    /// sized from `config.queue_arena_bytes`.
    #[must_use]
    pub fn new(topology: Topology, config: PipelineConfig) -> Self {
        let arena = Arc::new(BumpArena::new(config.queue_arena_bytes));
        Self {
            engine: Engine::new(topology, arena, contract_bindings()),
            config,
            counters: Arc::new(RuntimeCounters::default()),
            driver_tick_tx: Outbox::default(),
            built: false,
        }
    }

    /// Builds the engine, binds all ports, and registers the workers.
    ///
    /// Idempotent after success.
    ///
    /// # Errors
    ///
    /// Any engine build or binding failure; no partial state survives into
    /// a later retry.
    pub fn build(&mut self) -> Result<(), PipelineError> {
        if self.built {
            return Ok(());
        }

        self.engine.build()?;

        self.driver_tick_tx = self.engine.bind_tx(
            PipeNode::Ingress.id(),
            "tick_tx",
            Contract::Tick.id(),
        )?;

        let md_ports = MdPorts {
            tick_rx: self.engine.bind_rx(PipeNode::Md.id(), "tick_rx", Contract::Tick.id())?,
            tick_tx: self.engine.bind_tx(PipeNode::Md.id(), "tick_tx", Contract::Tick.id())?,
        };

        let strat_ports = StratPorts {
            tick_rx: self.engine.bind_rx(PipeNode::Strat.id(), "tick_rx", Contract::Tick.id())?,
            order_tx: self.engine.bind_tx(
                PipeNode::Strat.id(),
                "order_tx",
                Contract::OrderReq.id(),
            )?,
            ack_rx: self.engine.bind_rx(PipeNode::Strat.id(), "ack_rx", Contract::OrderAck.id())?,
        };

        let or_ports = OrPorts {
            order_rx: self.engine.bind_rx(PipeNode::Or.id(), "order_rx", Contract::OrderReq.id())?,
            ack_tx: self.engine.bind_tx(PipeNode::Or.id(), "ack_tx", Contract::OrderAck.id())?,
        };

        let running = self.engine.running_handle();

        let mut md = MdNode::new(
            md_ports,
            Arc::clone(&running),
            Arc::clone(&self.counters),
            PipeNode::Md.trace_idx(),
        );
        self.engine.add_worker(PipeNode::Md.id(), "md", move || md.run());

        let mut strat = StratNode::new(
            strat_ports,
            Arc::clone(&running),
            Arc::clone(&self.counters),
            self.config.order_cadence(),
            PipeNode::Strat.trace_idx(),
        );
        self.engine.add_worker(PipeNode::Strat.id(), "strat", move || strat.run());

        let mut router = OrNode::new(
            or_ports,
            Arc::clone(&running),
            Arc::clone(&self.counters),
            PipeNode::Or.trace_idx(),
        );
        self.engine.add_worker(PipeNode::Or.id(), "or", move || router.run());

        self.built = true;
        Ok(())
    }

    /// Launches the three pinned workers. Auto-builds; idempotent.
    ///
    /// # Errors
    ///
    /// Build errors or thread launch failures.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.build()?;
        self.engine.start()?;
        Ok(())
    }

    /// Requests cooperative shutdown.
    pub fn stop(&self) {
        self.engine.stop();
    }

    /// Joins the workers. The build stays valid.
    pub fn join(&mut self) {
        self.engine.join();
    }

    /// Pushes one tick onto the ingress edge. Non-blocking; false when the
    /// edge is full or the runtime is not built.
    pub fn try_push_tick(&self, tick: TickEnvelope) -> bool {
        self.driver_tick_tx.try_send(tick).is_ok()
    }

    /// Copies the counter block.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.counters.snapshot()
    }

    /// The shared counter block.
    #[must_use]
    pub fn counters(&self) -> &RuntimeCounters {
        &self.counters
    }
}

impl Hosted for PipelineRuntime {
    type Error = PipelineError;

    fn build(&mut self) -> Result<(), PipelineError> {
        PipelineRuntime::build(self)
    }

    fn start(&mut self) -> Result<(), PipelineError> {
        PipelineRuntime::start(self)
    }

    fn stop(&self) {
        PipelineRuntime::stop(self);
    }

    fn join(&mut self) {
        PipelineRuntime::join(self);
    }
}

impl std::fmt::Debug for PipelineRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRuntime")
            .field("engine", &self.engine)
            .field("built", &self.built)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::make_topology;
    use weft_core::topology::{ContractId, EdgeSpec};

    fn runtime_with(config: PipelineConfig) -> PipelineRuntime {
        PipelineRuntime::new(make_topology(&config), config)
    }

    #[test]
    fn test_build_and_push() {
        let mut runtime = runtime_with(PipelineConfig::default());
        runtime.build().unwrap();

        assert!(runtime.try_push_tick(TickEnvelope::default()));
    }

    #[test]
    fn test_push_before_build_fails() {
        let runtime = runtime_with(PipelineConfig::default());
        assert!(!runtime.try_push_tick(TickEnvelope::default()));
    }

    #[test]
    fn test_missing_ack_edge_diagnostic() {
        let config = PipelineConfig::default();
        let mut topology = make_topology(&config);
        topology.edges.retain(|edge| edge.to_port != "ack_rx");

        let mut runtime = PipelineRuntime::new(topology, config);
        let err = runtime.build().unwrap_err();
        assert!(err.to_string().contains("ack_rx"));
    }

    #[test]
    fn test_depth_one_rejected() {
        let config = PipelineConfig {
            order_depth: 1,
            ..PipelineConfig::default()
        };
        let mut runtime = runtime_with(config);

        let err = runtime.build().unwrap_err();
        assert!(err.to_string().contains("edge depth must be >= 2"));
    }

    #[test]
    fn test_unknown_contract_rejected() {
        let config = PipelineConfig::default();
        let mut topology = make_topology(&config);

        // Wire an optional side channel whose contract has no binding.
        let debug = ContractId(99);
        topology.nodes[1].ports.push(weft_core::topology::PortSpec {
            name: "debug_tx".to_string(),
            direction: weft_core::topology::Direction::Tx,
            contract: debug,
            required: false,
        });
        topology.nodes[2].ports.push(weft_core::topology::PortSpec {
            name: "debug_rx".to_string(),
            direction: weft_core::topology::Direction::Rx,
            contract: debug,
            required: false,
        });
        topology.edges.push(EdgeSpec {
            from: PipeNode::Md.id(),
            from_port: "debug_tx".to_string(),
            to: PipeNode::Strat.id(),
            to_port: "debug_rx".to_string(),
            contract: debug,
            depth: 8,
        });

        let mut runtime = PipelineRuntime::new(topology, config);
        let err = runtime.build().unwrap_err();
        assert_eq!(err.to_string(), "unknown contract id=99");
    }

    #[test]
    fn test_start_stop_join_cycle() {
        let mut runtime = runtime_with(PipelineConfig::default());
        runtime.start().unwrap();
        // Idempotent start.
        runtime.start().unwrap();

        runtime.stop();
        runtime.join();

        // No envelopes flowed; counters stay zero.
        let stats = runtime.snapshot();
        assert_eq!(stats.md_ticks_sent, 0);
        assert_eq!(stats.strat_ticks_seen, 0);
    }
}
