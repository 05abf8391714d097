//! Pipeline CLI: one bounded nominal run.
//!
//! Exit codes: 0 on success, 1 on build/start failure, 2 on flow
//! validation failure.

use std::time::Duration;

use weft_core::host::HostHooks;
use weft_mdpipe::{flow_looks_valid, run_for, PipelineConfig};

fn main() {
    let hooks = HostHooks {
        setup: Some(Box::new(|| {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .init();
        })),
        teardown: None,
    };

    let config = PipelineConfig::default();
    let result = run_for(Duration::from_millis(500), &config, hooks);

    if !result.built {
        eprintln!(
            "pipeline build failed: {}",
            result.error.as_ref().map_or_else(String::new, ToString::to_string)
        );
        std::process::exit(1);
    }
    if !result.started {
        eprintln!(
            "pipeline start failed: {}",
            result.error.as_ref().map_or_else(String::new, ToString::to_string)
        );
        std::process::exit(1);
    }

    let stats = &result.stats;
    println!(
        "mdpipe stats md_sent={} strat_seen={} orders_sent={} or_seen={} or_acks={} strat_acks={} \
         tick_ow_avg_ns={:.0} tick_ow_max_ns={} order_rtt_avg_ns={:.0} order_rtt_max_ns={} \
         trace_ticks={} trace_acks={}",
        stats.md_ticks_sent,
        stats.strat_ticks_seen,
        stats.strat_orders_sent,
        stats.or_orders_seen,
        stats.or_acks_sent,
        stats.strat_acks_seen,
        stats.tick_one_way_avg_ns(),
        stats.tick_one_way_max_ns,
        stats.order_rtt_avg_ns(),
        stats.order_rtt_max_ns,
        stats.trace_ticks_seen,
        stats.trace_acks_seen,
    );

    if !flow_looks_valid(stats) {
        eprintln!("pipeline flow validation failed");
        std::process::exit(2);
    }
}
