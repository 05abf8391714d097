//! Bounded-run harness.
//!
//! [`run_for`] builds and starts the pipeline under a [`Host`], spawns the
//! external ingress feeder, sleeps for the requested wall-clock duration,
//! then stops everything in order (feeder, workers, hooks) and returns a
//! counter snapshot. [`flow_looks_valid`] checks the end-to-end flow
//! invariants on that snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use weft_core::host::{Host, HostError, HostHooks, HostOptions};
use weft_core::runtime::{monotonic_ns, relax_cpu};
use weft_core::trace::Carrier;

use crate::config::PipelineConfig;
use crate::contracts::TickEnvelope;
use crate::counters::StatsSnapshot;
use crate::runtime::{PipelineError, PipelineRuntime};
use crate::topology::make_topology;

/// Outcome of one bounded run.
#[derive(Debug, Default)]
pub struct RunResult {
    /// Whether the topology built.
    pub built: bool,
    /// Whether the workers started.
    pub started: bool,
    /// Counter snapshot taken after stop + join.
    pub stats: StatsSnapshot,
    /// The failure, when `built` or `started` is false.
    pub error: Option<PipelineError>,
}

/// Builds, starts, feeds, and stops a pipeline over `duration`.
///
/// The feeder is an external unpinned thread pacing one tick per
/// `tick_interval_us`, with a monotonic sequence and zeroed trace carriers
/// (md stamps the first trace hop). Hooks bracket the run, e.g. for a
/// logging sink.
#[must_use]
pub fn run_for(duration: Duration, config: &PipelineConfig, hooks: HostHooks) -> RunResult {
    let mut result = RunResult::default();

    let mut runtime = PipelineRuntime::new(make_topology(config), config.clone());
    let mut host = Host::new(HostOptions {
        install_signal_handlers: false,
        wait_interval: Duration::from_millis(1),
    });

    if let Err(error) = host.start(&mut runtime, hooks) {
        result.built = !matches!(error, HostError::Build(_));
        result.started = false;
        result.error = Some(error.into());
        return result;
    }
    result.built = true;
    result.started = true;
    tracing::debug!(?duration, feeder = config.feeder_enabled, "pipeline running");

    let feed_running = Arc::new(AtomicBool::new(true));

    thread::scope(|scope| {
        if config.feeder_enabled {
            let flag = Arc::clone(&feed_running);
            let runtime = &runtime;
            let interval = Duration::from_micros(config.tick_interval_us);

            scope.spawn(move || {
                let mut seq: u64 = 1;
                let mut next_emit = Instant::now();

                while flag.load(Ordering::Relaxed) {
                    let tick = TickEnvelope {
                        seq,
                        ts_ns: monotonic_ns(),
                        ctx: Carrier::default(),
                    };
                    seq += 1;

                    while flag.load(Ordering::Relaxed) && !runtime.try_push_tick(tick) {
                        relax_cpu();
                    }

                    next_emit += interval;
                    let now = Instant::now();
                    if next_emit > now {
                        thread::sleep(next_emit - now);
                    } else {
                        next_emit = now;
                    }
                }
            });
        }

        thread::sleep(duration);
        feed_running.store(false, Ordering::Release);
    });

    host.stop(&mut runtime);

    result.stats = runtime.snapshot();
    tracing::info!(
        md_ticks_sent = result.stats.md_ticks_sent,
        strat_orders_sent = result.stats.strat_orders_sent,
        strat_acks_seen = result.stats.strat_acks_seen,
        "run complete"
    );
    result
}

/// Checks the flow invariants of a finished run: every stage moved
/// envelopes, consumers never outran producers, the quiescent gaps are at
/// most one in-flight plus one in-queue per stage, and traces were
/// carried.
#[must_use]
pub fn flow_looks_valid(stats: &StatsSnapshot) -> bool {
    if stats.md_ticks_sent == 0
        || stats.strat_ticks_seen == 0
        || stats.strat_orders_sent == 0
        || stats.or_orders_seen == 0
        || stats.or_acks_sent == 0
        || stats.strat_acks_seen == 0
    {
        return false;
    }

    if stats.strat_ticks_seen > stats.md_ticks_sent {
        return false;
    }
    if stats.or_orders_seen > stats.strat_orders_sent {
        return false;
    }
    if stats.strat_acks_seen > stats.or_acks_sent {
        return false;
    }

    let order_gap = stats.strat_orders_sent - stats.or_orders_seen;
    let ack_gap = stats.or_acks_sent - stats.strat_acks_seen;
    if order_gap > 2 || ack_gap > 2 {
        return false;
    }

    if stats.trace_ticks_seen == 0 || stats.trace_acks_seen == 0 {
        return false;
    }

    true
}
