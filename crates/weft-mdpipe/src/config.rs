//! Pipeline configuration.

/// Knobs of the market-data pipeline.
///
/// Depths are queue capacities (each must be at least 2; the engine
/// rejects smaller values at build). Cores are explicit CPU assignments,
/// one per worker node. Larger depths buy slack against bursts at the cost
/// of cache pressure.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Core declared for the ingress node (its port is driven by the
    /// external feeder thread, which is not pinned).
    pub ingress_core: u32,
    /// Core of the market-data worker.
    pub md_core: u32,
    /// Core of the strategy worker.
    pub strat_core: u32,
    /// Core of the order-router worker.
    pub or_core: u32,

    /// Depth of the feeder -> md edge.
    pub ingress_depth: usize,
    /// Depth of the md -> strat tick edge.
    pub tick_depth: usize,
    /// Depth of the strat -> or order edge.
    pub order_depth: usize,
    /// Depth of the or -> strat ack edge.
    pub ack_depth: usize,

    /// Byte budget of the build-time queue arena; must accommodate every
    /// ring buffer.
    pub queue_arena_bytes: usize,

    /// Feeder pacing: one tick per this many microseconds.
    pub tick_interval_us: u64,
    /// One order request per this many ticks (normalised to at least 1).
    pub order_every_n_ticks: u64,
    /// Whether the harness spawns the ingress feeder at all.
    pub feeder_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingress_core: 0,
            md_core: 1,
            strat_core: 2,
            or_core: 3,
            ingress_depth: 64,
            tick_depth: 64,
            order_depth: 32,
            ack_depth: 32,
            queue_arena_bytes: 256 * 1024,
            tick_interval_us: 50,
            order_every_n_ticks: 8,
            feeder_enabled: true,
        }
    }
}

impl PipelineConfig {
    /// Order cadence with the zero case normalised away.
    #[must_use]
    pub fn order_cadence(&self) -> u64 {
        self.order_every_n_ticks.max(1)
    }
}
