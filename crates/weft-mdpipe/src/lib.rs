//! # Weft MD Pipeline
//!
//! The motivating application of the weft topology engine: a market-data →
//! strategy → order-router loop on pinned worker threads.
//!
//! ```text
//!  feeder ──> [ingress edge] ──> md ──> [tick edge] ──> strat
//!                                                        │ ▲
//!                                            [order edge]│ │[ack edge]
//!                                                        ▼ │
//!                                                        or
//! ```
//!
//! The external feeder paces ticks onto the ingress edge; md stamps the
//! first trace hop and forwards; strat samples one-way tick latency,
//! emits an order every N ticks, and samples order round trips off the
//! router's acks. The [`harness`] runs the whole loop for a bounded
//! wall-clock duration and snapshots the counters.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod contracts;
pub mod counters;
pub mod harness;
pub mod nodes;
pub mod runtime;
pub mod topology;

pub use config::PipelineConfig;
pub use counters::StatsSnapshot;
pub use harness::{flow_looks_valid, run_for, RunResult};
pub use runtime::{PipelineError, PipelineRuntime};
