//! The topology engine.
//!
//! Owns the topology, the arena, the queue store, and the worker registry.
//! `build` validates the graph and materializes one SPSC queue per edge;
//! `bind_rx`/`bind_tx` hand out typed port handles by edge lookup;
//! `start` launches one pinned worker thread per registered node.
//!
//! ## Queue store
//!
//! The set of envelope types an engine can carry is a compile-time list of
//! `(contract, envelope)` bindings: a static slice of [`QueueFactory`]
//! entries, each pairing a [`ContractId`] with a monomorphized queue
//! constructor. At build time each edge's contract selects its factory; an
//! unknown contract is a build error. The store keeps type-erased handles;
//! binding projects them back to `SpscQueue<T>`, and a failed projection is
//! the `queue type mismatch` error.
//!
//! ## Lifecycle
//!
//! Empty → Built → Started → Stopped → Joined. `build` and `start` are
//! idempotent after success. `stop` clears the shared running flag that
//! every worker loop polls; cancellation is cooperative.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::arena::BumpArena;
use crate::port::{Envelope, Inbox, Outbox};
use crate::runtime::{RuntimeError, ThreadRuntime, WorkerSpec};
use crate::spsc::SpscQueue;
use crate::topology::{
    find_core, find_edge_index, validate_ports, ContractId, Direction, NodeId, Topology,
    TopologyError,
};

/// Type-erased handle to one edge's queue.
pub type SharedQueue = Arc<dyn Any + Send + Sync>;

/// Errors from building, binding, or starting an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Port wiring validation failed.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// An edge declares a queue depth below the minimum.
    #[error("edge depth must be >= 2 (edge {index} has depth {depth})")]
    EdgeDepth {
        /// Index of the offending edge.
        index: usize,
        /// Declared depth.
        depth: usize,
    },

    /// An edge's contract has no entry in the binding list.
    #[error("unknown contract id={contract}")]
    UnknownContract {
        /// The unmatched contract.
        contract: ContractId,
    },

    /// The arena could not serve a queue's ring buffer.
    #[error("queue allocation failed for contract id={contract}")]
    QueueAllocation {
        /// Contract of the queue that failed to allocate.
        contract: ContractId,
    },

    /// No edge matches the requested (node, port, direction, contract).
    #[error("missing port binding node={node} port={port}")]
    MissingPortBinding {
        /// Requesting node.
        node: NodeId,
        /// Requested port name.
        port: String,
    },

    /// The edge queue exists but carries a different envelope type.
    #[error("queue type mismatch node={node} port={port}")]
    QueueTypeMismatch {
        /// Requesting node.
        node: NodeId,
        /// Requested port name.
        port: String,
    },

    /// A registered worker's node has no core declaration in the topology.
    #[error("missing core mapping for node_id={node}")]
    MissingCoreMapping {
        /// The unmapped node.
        node: NodeId,
    },

    /// A bind was attempted before a successful build.
    #[error("engine is not built")]
    NotBuilt,

    /// Thread launch failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn make_queue_slot<T: Envelope>(
    depth: usize,
    arena: &Arc<BumpArena>,
) -> Option<SharedQueue> {
    SpscQueue::<T>::with_arena(depth, arena).map(|queue| Arc::new(queue) as SharedQueue)
}

/// One entry of the compile-time contract binding list: a contract id and
/// the constructor for its envelope's queue type.
pub struct QueueFactory {
    contract: ContractId,
    make: fn(usize, &Arc<BumpArena>) -> Option<SharedQueue>,
}

impl QueueFactory {
    /// The contract this factory serves.
    #[must_use]
    pub fn contract(&self) -> ContractId {
        self.contract
    }
}

impl std::fmt::Debug for QueueFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueFactory").field("contract", &self.contract).finish()
    }
}

/// Declares that envelopes of type `T` flow on edges tagged `contract`.
///
/// Applications list one factory per contract:
///
/// ```rust,ignore
/// static BINDINGS: [QueueFactory; 2] = [
///     queue_factory::<TickEnvelope>(ContractId(1)),
///     queue_factory::<OrderReqEnvelope>(ContractId(2)),
/// ];
/// ```
#[must_use]
pub const fn queue_factory<T: Envelope>(contract: ContractId) -> QueueFactory {
    QueueFactory {
        contract,
        make: make_queue_slot::<T>,
    }
}

struct QueueEntry {
    contract: ContractId,
    slot: SharedQueue,
}

struct WorkerPlan {
    node_id: NodeId,
    name: String,
    run: Box<dyn FnOnce() + Send>,
}

// SAFETY: `run` is a boxed closure that is never invoked except by the one
// thread that drains and calls it during `start`; while it sits in the
// `Engine`'s `workers` vec it is inert data, so sharing an `&Engine` (and
// thus `&WorkerPlan`) across threads is sound even though `dyn FnOnce` is
// not itself `Sync`.
#[allow(unsafe_code)]
unsafe impl Sync for WorkerPlan {}

/// The topology engine: queue store, port binding, worker lifecycle.
pub struct Engine {
    topology: Topology,
    arena: Arc<BumpArena>,
    factories: &'static [QueueFactory],
    queues: Vec<QueueEntry>,
    workers: Vec<WorkerPlan>,
    thread_runtime: ThreadRuntime,
    running: Arc<AtomicBool>,
    built: bool,
    started: bool,
}

impl Engine {
    /// Creates an engine over a topology, an arena, and a contract binding
    /// list. Nothing is allocated until [`build`](Self::build).
    #[must_use]
    pub fn new(
        topology: Topology,
        arena: Arc<BumpArena>,
        factories: &'static [QueueFactory],
    ) -> Self {
        Self {
            topology,
            arena,
            factories,
            queues: Vec::new(),
            workers: Vec::new(),
            thread_runtime: ThreadRuntime::new(),
            running: Arc::new(AtomicBool::new(false)),
            built: false,
            started: false,
        }
    }

    /// Validates the topology and materializes one queue per edge.
    ///
    /// Idempotent: a second call after success does nothing and succeeds.
    /// On failure no partial queue state survives.
    ///
    /// # Errors
    ///
    /// Validation errors, `EdgeDepth` for a depth below 2,
    /// `UnknownContract` for an edge outside the binding list, and
    /// `QueueAllocation` on arena exhaustion.
    pub fn build(&mut self) -> Result<(), EngineError> {
        if self.built {
            return Ok(());
        }

        validate_ports(&self.topology)?;

        let mut queues = Vec::with_capacity(self.topology.edges.len());
        for (index, edge) in self.topology.edges.iter().enumerate() {
            if edge.depth < 2 {
                return Err(EngineError::EdgeDepth {
                    index,
                    depth: edge.depth,
                });
            }

            let factory = self
                .factories
                .iter()
                .find(|factory| factory.contract == edge.contract)
                .ok_or(EngineError::UnknownContract {
                    contract: edge.contract,
                })?;

            let slot = (factory.make)(edge.depth, &self.arena).ok_or(
                EngineError::QueueAllocation {
                    contract: edge.contract,
                },
            )?;

            queues.push(QueueEntry {
                contract: edge.contract,
                slot,
            });
        }

        self.queues = queues;
        self.built = true;
        tracing::debug!(
            edges = self.queues.len(),
            arena_used = self.arena.used_bytes(),
            "topology built"
        );
        Ok(())
    }

    /// Binds the Rx port `(node_id, port_name, contract)` to its edge
    /// queue.
    ///
    /// # Errors
    ///
    /// `NotBuilt` before a successful build, `MissingPortBinding` when no
    /// edge matches, `QueueTypeMismatch` when the edge's queue carries a
    /// different envelope type.
    pub fn bind_rx<T: Envelope>(
        &self,
        node_id: NodeId,
        port_name: &str,
        contract: ContractId,
    ) -> Result<Inbox<T>, EngineError> {
        let queue = self.edge_queue::<T>(node_id, port_name, Direction::Rx, contract)?;
        Ok(Inbox::bound(queue))
    }

    /// Binds the Tx port `(node_id, port_name, contract)` to its edge
    /// queue.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`bind_rx`](Self::bind_rx).
    pub fn bind_tx<T: Envelope>(
        &self,
        node_id: NodeId,
        port_name: &str,
        contract: ContractId,
    ) -> Result<Outbox<T>, EngineError> {
        let queue = self.edge_queue::<T>(node_id, port_name, Direction::Tx, contract)?;
        Ok(Outbox::bound(queue))
    }

    fn edge_queue<T: Envelope>(
        &self,
        node_id: NodeId,
        port_name: &str,
        direction: Direction,
        contract: ContractId,
    ) -> Result<Arc<SpscQueue<T>>, EngineError> {
        if !self.built {
            return Err(EngineError::NotBuilt);
        }

        let index = find_edge_index(&self.topology, node_id, port_name, direction, contract)
            .ok_or_else(|| EngineError::MissingPortBinding {
                node: node_id,
                port: port_name.to_string(),
            })?;

        self.queues[index]
            .slot
            .clone()
            .downcast::<SpscQueue<T>>()
            .map_err(|_| EngineError::QueueTypeMismatch {
                node: node_id,
                port: port_name.to_string(),
            })
    }

    /// Registers a worker for `node_id`. The closure becomes the body of
    /// one pinned thread when [`start`](Self::start) runs.
    pub fn add_worker(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        run: impl FnOnce() + Send + 'static,
    ) {
        self.workers.push(WorkerPlan {
            node_id,
            name: name.into(),
            run: Box::new(run),
        });
    }

    /// Launches every registered worker on its declared core.
    ///
    /// Auto-builds if needed. Idempotent: once started, further calls do
    /// nothing and succeed — workers are launched exactly once. The shared
    /// running flag is set before any thread spawns.
    ///
    /// # Errors
    ///
    /// Build errors, `MissingCoreMapping` when a registered node has no
    /// topology entry, or thread launch failures (in which case the flag is
    /// cleared and any spawned workers are joined).
    pub fn start(&mut self) -> Result<(), EngineError> {
        self.build()?;

        if self.started {
            return Ok(());
        }

        let mut cores = Vec::with_capacity(self.workers.len());
        for plan in &self.workers {
            let core = find_core(&self.topology, plan.node_id).ok_or(
                EngineError::MissingCoreMapping { node: plan.node_id },
            )?;
            cores.push(core);
        }

        self.running.store(true, Ordering::Release);

        let specs: Vec<WorkerSpec> = self
            .workers
            .drain(..)
            .zip(cores)
            .map(|(plan, core)| WorkerSpec {
                name: plan.name,
                core,
                run: plan.run,
            })
            .collect();

        if let Err(error) = self.thread_runtime.launch(specs) {
            self.running.store(false, Ordering::Release);
            self.thread_runtime.join();
            return Err(error.into());
        }

        self.started = true;
        tracing::debug!(workers = self.thread_runtime.thread_count(), "engine started");
        Ok(())
    }

    /// Requests cooperative shutdown by clearing the running flag.
    ///
    /// Workers notice at their next loop-top or send-spin poll; a node may
    /// complete one more drain pass before exiting.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Joins all worker threads. The build stays valid; queues and bound
    /// ports remain alive until the engine is dropped.
    pub fn join(&mut self) {
        self.thread_runtime.join();
        self.started = false;
    }

    /// Shared cancellation flag for worker run loops.
    #[must_use]
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// True after a successful build.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// True while workers are launched and not yet joined.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Declared CPU affinity of a node.
    #[must_use]
    pub fn core(&self, node_id: NodeId) -> Option<u32> {
        find_core(&self.topology, node_id)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("nodes", &self.topology.nodes.len())
            .field("edges", &self.topology.edges.len())
            .field("built", &self.built)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{rx_port, tx_port, EdgeSpec, NodeSpec, PortSpec};
    use crate::trace::Carrier;
    use smallvec::smallvec;

    const PING: ContractId = ContractId(1);
    const PONG: ContractId = ContractId(2);

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    struct PingEnvelope {
        seq: u64,
        ctx: Carrier,
    }
    impl Envelope for PingEnvelope {}

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    struct PongEnvelope {
        seq: u64,
        ctx: Carrier,
    }
    impl Envelope for PongEnvelope {}

    static BINDINGS: [QueueFactory; 2] = [
        queue_factory::<PingEnvelope>(PING),
        queue_factory::<PongEnvelope>(PONG),
    ];

    fn ping_pong_topology() -> Topology {
        Topology {
            nodes: vec![
                NodeSpec {
                    id: NodeId(1),
                    name: "ping".to_string(),
                    core: 0,
                    ports: smallvec![tx_port("ping_tx", PING), rx_port("pong_rx", PONG)],
                },
                NodeSpec {
                    id: NodeId(2),
                    name: "pong".to_string(),
                    core: 1,
                    ports: smallvec![rx_port("ping_rx", PING), tx_port("pong_tx", PONG)],
                },
            ],
            edges: vec![
                EdgeSpec {
                    from: NodeId(1),
                    from_port: "ping_tx".to_string(),
                    to: NodeId(2),
                    to_port: "ping_rx".to_string(),
                    contract: PING,
                    depth: 8,
                },
                EdgeSpec {
                    from: NodeId(2),
                    from_port: "pong_tx".to_string(),
                    to: NodeId(1),
                    to_port: "pong_rx".to_string(),
                    contract: PONG,
                    depth: 8,
                },
            ],
        }
    }

    fn engine_with(topology: Topology, arena_bytes: usize) -> Engine {
        Engine::new(topology, Arc::new(BumpArena::new(arena_bytes)), &BINDINGS)
    }

    #[test]
    fn test_build_ok_and_idempotent() {
        let mut engine = engine_with(ping_pong_topology(), 64 * 1024);

        engine.build().unwrap();
        assert!(engine.is_built());
        let used = engine.arena.used_bytes();

        // Second build is a no-op: nothing new is allocated.
        engine.build().unwrap();
        assert_eq!(engine.arena.used_bytes(), used);
    }

    #[test]
    fn test_build_rejects_depth_below_two() {
        let mut topology = ping_pong_topology();
        topology.edges[1].depth = 1;
        let mut engine = engine_with(topology, 64 * 1024);

        let err = engine.build().unwrap_err();
        assert!(err.to_string().contains("edge depth must be >= 2"));
        assert!(!engine.is_built());
    }

    #[test]
    fn test_build_rejects_unknown_contract() {
        let mut topology = ping_pong_topology();
        // Declare a wired optional side channel with an unbound contract.
        let debug = ContractId(99);
        topology.nodes[0].ports.push(PortSpec {
            name: "debug_tx".to_string(),
            direction: Direction::Tx,
            contract: debug,
            required: false,
        });
        topology.nodes[1].ports.push(PortSpec {
            name: "debug_rx".to_string(),
            direction: Direction::Rx,
            contract: debug,
            required: false,
        });
        topology.edges.push(EdgeSpec {
            from: NodeId(1),
            from_port: "debug_tx".to_string(),
            to: NodeId(2),
            to_port: "debug_rx".to_string(),
            contract: debug,
            depth: 4,
        });
        let mut engine = engine_with(topology, 64 * 1024);

        let err = engine.build().unwrap_err();
        assert_eq!(err.to_string(), "unknown contract id=99");
    }

    #[test]
    fn test_build_rejects_invalid_wiring() {
        let mut topology = ping_pong_topology();
        topology.edges.pop();
        let mut engine = engine_with(topology, 64 * 1024);

        let err = engine.build().unwrap_err();
        assert!(err.to_string().contains("required port wiring mismatch"));
        assert!(err.to_string().contains("port=pong_rx"));
    }

    #[test]
    fn test_build_reports_arena_exhaustion() {
        let mut engine = engine_with(ping_pong_topology(), 64);

        let err = engine.build().unwrap_err();
        assert!(err.to_string().contains("queue allocation failed"));
        assert!(!engine.is_built());
    }

    #[test]
    fn test_bind_before_build_fails() {
        let engine = engine_with(ping_pong_topology(), 64 * 1024);
        let err = engine.bind_tx::<PingEnvelope>(NodeId(1), "ping_tx", PING).unwrap_err();
        assert!(matches!(err, EngineError::NotBuilt));
    }

    #[test]
    fn test_bind_ports() {
        let mut engine = engine_with(ping_pong_topology(), 64 * 1024);
        engine.build().unwrap();

        let tx = engine.bind_tx::<PingEnvelope>(NodeId(1), "ping_tx", PING).unwrap();
        let mut rx = engine.bind_rx::<PingEnvelope>(NodeId(2), "ping_rx", PING).unwrap();
        assert!(tx.present() && rx.present());

        tx.try_send(PingEnvelope { seq: 5, ctx: Carrier::default() }).unwrap();
        assert_eq!(rx.try_recv().unwrap().seq, 5);
    }

    #[test]
    fn test_bind_missing_edge() {
        let mut engine = engine_with(ping_pong_topology(), 64 * 1024);
        engine.build().unwrap();

        let err = engine.bind_rx::<PingEnvelope>(NodeId(1), "nope", PING).unwrap_err();
        assert!(err.to_string().contains("missing port binding"));
        assert!(err.to_string().contains("port=nope"));
    }

    #[test]
    fn test_bind_type_mismatch() {
        let mut engine = engine_with(ping_pong_topology(), 64 * 1024);
        engine.build().unwrap();

        // The ping edge carries PingEnvelope; asking for PongEnvelope on
        // the same (node, port, contract) must fail the projection.
        let err = engine.bind_tx::<PongEnvelope>(NodeId(1), "ping_tx", PING).unwrap_err();
        assert!(err.to_string().contains("queue type mismatch"));
    }

    #[test]
    fn test_start_requires_core_mapping() {
        let mut engine = engine_with(ping_pong_topology(), 64 * 1024);
        engine.add_worker(NodeId(42), "ghost", || {});

        let err = engine.start().unwrap_err();
        assert_eq!(err.to_string(), "missing core mapping for node_id=42");
        assert!(!engine.is_started());
    }

    #[test]
    fn test_start_idempotent_and_exactly_once() {
        use std::sync::atomic::AtomicUsize;

        let mut engine = engine_with(ping_pong_topology(), 64 * 1024);
        let launches = Arc::new(AtomicUsize::new(0));
        {
            let launches = Arc::clone(&launches);
            engine.add_worker(NodeId(1), "ping", move || {
                launches.fetch_add(1, Ordering::SeqCst);
            });
        }

        engine.start().unwrap();
        engine.start().unwrap();
        engine.join();
        // start() after join() stays a no-op: the plan was consumed.
        engine.start().unwrap();

        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_running_flag_lifecycle() {
        let mut engine = engine_with(ping_pong_topology(), 64 * 1024);
        let running = engine.running_handle();
        assert!(!running.load(Ordering::Acquire));

        engine.start().unwrap();
        assert!(running.load(Ordering::Acquire));

        engine.stop();
        assert!(!running.load(Ordering::Acquire));
        engine.join();
    }
}
