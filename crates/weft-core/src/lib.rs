//! # Weft Core
//!
//! Static-graph, shared-memory dataflow runtime for latency-sensitive
//! pipelines. Long-lived worker threads pinned to dedicated cores exchange
//! fixed-size, trivially-copyable envelopes through bounded SPSC queues
//! declared by a topology specification.
//!
//! This crate provides:
//! - **Arena**: bump allocator co-locating all queue ring storage
//! - **SPSC queue**: lock-free bounded ring, one per topology edge
//! - **Ports**: typed non-blocking `Inbox`/`Outbox` handles
//! - **Topology**: data-only graph spec with validation and lookup
//! - **Trace**: thread-local span context propagated inside envelopes
//! - **Engine**: queue construction, port binding, worker lifecycle
//! - **Runtime**: pinned thread spawn/join
//! - **Host**: signal-driven process lifecycle
//!
//! ## Design Principles
//!
//! 1. **No locks on the fast path** - only SPSC cursors and relaxed counters
//! 2. **No suspension inside run loops** - back-off is a CPU relax hint
//! 3. **Static graphs** - no edits after start, each worker owns its core
//! 4. **Bounded everything** - fixed queue depths, one arena, no growth
//!
//! ## Example
//!
//! ```rust,ignore
//! use weft_core::engine::Engine;
//!
//! let mut engine = Engine::new(topology, arena, &BINDINGS);
//! engine.build()?;
//! let tick_rx = engine.bind_rx::<TickEnvelope>(MD, "tick_rx", TICK)?;
//! engine.add_worker(MD, "md", move || md.run());
//! engine.start()?;
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Unsafe is confined to the arena and the SPSC ring.
#![allow(unsafe_code)]

pub mod arena;
pub mod engine;
pub mod host;
pub mod port;
pub mod runtime;
pub mod spsc;
pub mod topology;
pub mod trace;


pub use engine::{Engine, EngineError};

/// Result type for weft-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type aggregating every weft-core failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Topology validation errors.
    #[error("topology error: {0}")]
    Topology(#[from] topology::TopologyError),

    /// Engine build/bind/start errors.
    #[error("engine error: {0}")]
    Engine(#[from] engine::EngineError),

    /// Worker thread errors.
    #[error("runtime error: {0}")]
    Runtime(#[from] runtime::RuntimeError),

    /// Process host errors.
    #[error("host error: {0}")]
    Host(#[from] host::HostError),
}
