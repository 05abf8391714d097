//! Node run loops.
//!
//! Every loop has the same shape: drain each inbox in a tight
//! `try_recv` loop under a scoped trace adopt + span, do the node's work,
//! stamp `ctx = carry()` before any send, spin on full outboxes while the
//! running flag holds, and issue a CPU relax hint on an idle pass. Loops
//! exit when the shared running flag clears; envelopes still buffered in
//! queues stay there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use weft_core::port::{Inbox, Outbox};
use weft_core::runtime::{monotonic_ns, relax_cpu};
use weft_core::trace::{self, AdoptScope, SpanScope};

use crate::contracts::{OrderAckEnvelope, OrderReqEnvelope, TickEnvelope};
use crate::counters::{update_max, RuntimeCounters};

const TICK_SEQ_KEY: u32 = trace::key("tick_seq");
const ORDER_ID_KEY: u32 = trace::key("order_id");

/// Ports of the market-data node.
#[derive(Debug, Default)]
pub struct MdPorts {
    /// Ticks from the ingress edge.
    pub tick_rx: Inbox<TickEnvelope>,
    /// Ticks forwarded to the strategy.
    pub tick_tx: Outbox<TickEnvelope>,
}

/// Ports of the strategy node.
#[derive(Debug, Default)]
pub struct StratPorts {
    /// Ticks from md.
    pub tick_rx: Inbox<TickEnvelope>,
    /// Orders to the router.
    pub order_tx: Outbox<OrderReqEnvelope>,
    /// Acks back from the router.
    pub ack_rx: Inbox<OrderAckEnvelope>,
}

/// Ports of the order-router node.
#[derive(Debug, Default)]
pub struct OrPorts {
    /// Orders from the strategy.
    pub order_rx: Inbox<OrderReqEnvelope>,
    /// Acks back to the strategy.
    pub ack_tx: Outbox<OrderAckEnvelope>,
}

/// Market-data pass-through.
///
/// Forwards ticks from the ingress edge, stamping a span on each. Ticks
/// arriving without a trace (the feeder sends zeroed carriers) start a
/// fresh trace keyed on the tick sequence, so every tick is traceable from
/// here on.
pub struct MdNode {
    ports: MdPorts,
    running: Arc<AtomicBool>,
    counters: Arc<RuntimeCounters>,
    trace_thread_idx: u16,
}

impl MdNode {
    /// Creates the node over its bound ports.
    #[must_use]
    pub fn new(
        ports: MdPorts,
        running: Arc<AtomicBool>,
        counters: Arc<RuntimeCounters>,
        trace_thread_idx: u16,
    ) -> Self {
        Self {
            ports,
            running,
            counters,
            trace_thread_idx,
        }
    }

    /// The worker body; returns when the running flag clears.
    pub fn run(&mut self) {
        trace::thread_init(self.trace_thread_idx);

        while self.running.load(Ordering::Relaxed) {
            let mut processed = false;

            while let Some(mut tick) = self.ports.tick_rx.try_recv() {
                processed = true;

                if tick.ctx.has_trace() {
                    let _adopt = AdoptScope::new(&tick.ctx);
                    let _span = SpanScope::new();
                    tick.ctx = trace::carry();
                } else {
                    trace::ingress(TICK_SEQ_KEY, tick.seq, 0);
                    let _span = SpanScope::new();
                    tick.ctx = trace::carry();
                }

                while self.running.load(Ordering::Relaxed)
                    && self.ports.tick_tx.try_send(tick).is_err()
                {
                    relax_cpu();
                }

                if self.running.load(Ordering::Relaxed) {
                    self.counters.md_ticks_sent.fetch_add(1, Ordering::Relaxed);
                }
            }

            if !processed {
                relax_cpu();
            }
        }
    }
}

/// Strategy node: ticks in, every-Nth-tick orders out, acks in.
pub struct StratNode {
    ports: StratPorts,
    running: Arc<AtomicBool>,
    counters: Arc<RuntimeCounters>,
    order_every_n_ticks: u64,
    trace_thread_idx: u16,
}

impl StratNode {
    /// Creates the node over its bound ports. A zero order cadence is
    /// normalised to 1.
    #[must_use]
    pub fn new(
        ports: StratPorts,
        running: Arc<AtomicBool>,
        counters: Arc<RuntimeCounters>,
        order_every_n_ticks: u64,
        trace_thread_idx: u16,
    ) -> Self {
        Self {
            ports,
            running,
            counters,
            order_every_n_ticks: order_every_n_ticks.max(1),
            trace_thread_idx,
        }
    }

    /// The worker body; returns when the running flag clears.
    pub fn run(&mut self) {
        trace::thread_init(self.trace_thread_idx);

        let mut tick_count: u64 = 0;
        let mut order_id: u32 = 0;

        while self.running.load(Ordering::Relaxed) {
            let mut processed = false;

            while let Some(tick) = self.ports.tick_rx.try_recv() {
                let _adopt = AdoptScope::new(&tick.ctx);
                let _span = SpanScope::new();

                let now_ns = monotonic_ns();
                tick_count += 1;
                processed = true;
                self.counters.strat_ticks_seen.fetch_add(1, Ordering::Relaxed);

                if tick.ctx.has_trace() {
                    self.counters.trace_ticks_seen.fetch_add(1, Ordering::Relaxed);
                }

                if now_ns >= tick.ts_ns {
                    let one_way_ns = now_ns - tick.ts_ns;
                    self.counters.tick_one_way_count.fetch_add(1, Ordering::Relaxed);
                    self.counters.tick_one_way_sum_ns.fetch_add(one_way_ns, Ordering::Relaxed);
                    update_max(&self.counters.tick_one_way_max_ns, one_way_ns);
                }

                if tick_count % self.order_every_n_ticks == 0 {
                    // Each order starts its own trace; the tick trace ends
                    // with this scope.
                    trace::ingress(ORDER_ID_KEY, u64::from(order_id) + 1, 0);
                    let _order_span = SpanScope::new();

                    order_id += 1;
                    let request = OrderReqEnvelope {
                        order_id,
                        instr_id: 1,
                        send_ts_ns: now_ns,
                        ctx: trace::carry(),
                        px: 10_000,
                        qty: 1,
                        side: 1,
                    };

                    while self.running.load(Ordering::Relaxed)
                        && self.ports.order_tx.try_send(request).is_err()
                    {
                        relax_cpu();
                    }

                    if self.running.load(Ordering::Relaxed) {
                        self.counters.strat_orders_sent.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            while let Some(ack) = self.ports.ack_rx.try_recv() {
                let _adopt = AdoptScope::new(&ack.ctx);
                let _span = SpanScope::new();

                let now_ns = monotonic_ns();
                processed = true;
                self.counters.strat_acks_seen.fetch_add(1, Ordering::Relaxed);

                if ack.ctx.has_trace() {
                    self.counters.trace_acks_seen.fetch_add(1, Ordering::Relaxed);
                }

                if now_ns >= ack.origin_ts_ns {
                    let rtt_ns = now_ns - ack.origin_ts_ns;
                    self.counters.order_rtt_count.fetch_add(1, Ordering::Relaxed);
                    self.counters.order_rtt_sum_ns.fetch_add(rtt_ns, Ordering::Relaxed);
                    update_max(&self.counters.order_rtt_max_ns, rtt_ns);
                }
            }

            if !processed {
                relax_cpu();
            }
        }
    }
}

/// Order router: acknowledges every order on the spot.
pub struct OrNode {
    ports: OrPorts,
    running: Arc<AtomicBool>,
    counters: Arc<RuntimeCounters>,
    trace_thread_idx: u16,
}

impl OrNode {
    /// Creates the node over its bound ports.
    #[must_use]
    pub fn new(
        ports: OrPorts,
        running: Arc<AtomicBool>,
        counters: Arc<RuntimeCounters>,
        trace_thread_idx: u16,
    ) -> Self {
        Self {
            ports,
            running,
            counters,
            trace_thread_idx,
        }
    }

    /// The worker body; returns when the running flag clears.
    pub fn run(&mut self) {
        trace::thread_init(self.trace_thread_idx);

        while self.running.load(Ordering::Relaxed) {
            let mut processed = false;

            while let Some(request) = self.ports.order_rx.try_recv() {
                let _adopt = AdoptScope::new(&request.ctx);
                let _span = SpanScope::new();

                processed = true;
                self.counters.or_orders_seen.fetch_add(1, Ordering::Relaxed);

                let ack = OrderAckEnvelope {
                    order_id: request.order_id,
                    origin_ts_ns: request.send_ts_ns,
                    ctx: trace::carry(),
                    status: 1,
                };

                while self.running.load(Ordering::Relaxed)
                    && self.ports.ack_tx.try_send(ack).is_err()
                {
                    relax_cpu();
                }

                if self.running.load(Ordering::Relaxed) {
                    self.counters.or_acks_sent.fetch_add(1, Ordering::Relaxed);
                }
            }

            if !processed {
                relax_cpu();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use weft_core::arena::BumpArena;
    use weft_core::spsc::SpscQueue;

    fn queue<T: weft_core::port::Envelope>(
        depth: usize,
        arena: &Arc<BumpArena>,
    ) -> Arc<SpscQueue<T>> {
        Arc::new(SpscQueue::with_arena(depth, arena).unwrap())
    }

    #[test]
    fn test_md_stamps_traceless_ticks() {
        let arena = Arc::new(BumpArena::new(64 * 1024));
        let ingress = queue::<TickEnvelope>(16, &arena);
        let outgoing = queue::<TickEnvelope>(16, &arena);

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(RuntimeCounters::default());

        let mut md = MdNode::new(
            MdPorts {
                tick_rx: Inbox::bound(Arc::clone(&ingress)),
                tick_tx: Outbox::bound(Arc::clone(&outgoing)),
            },
            Arc::clone(&running),
            Arc::clone(&counters),
            9,
        );
        let worker = thread::spawn(move || md.run());

        for seq in 1..=8u64 {
            let tick = TickEnvelope {
                seq,
                ts_ns: monotonic_ns(),
                ctx: Default::default(),
            };
            while ingress.push(tick).is_err() {
                thread::yield_now();
            }
        }

        let mut forwarded = Vec::new();
        while forwarded.len() < 8 {
            if let Some(tick) = outgoing.pop() {
                forwarded.push(tick);
            } else {
                thread::yield_now();
            }
        }

        running.store(false, Ordering::Release);
        worker.join().unwrap();

        for (i, tick) in forwarded.iter().enumerate() {
            // FIFO preserved, trace stamped, span id prefixed with tidx 9.
            assert_eq!(tick.seq, i as u64 + 1);
            assert!(tick.ctx.has_trace());
            assert_eq!(tick.ctx.c.sid.0 >> 48, 9);
            assert_eq!(tick.ctx.x.v, tick.seq);
        }
        assert_eq!(counters.md_ticks_sent.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn test_strat_emits_orders_on_cadence() {
        let arena = Arc::new(BumpArena::new(64 * 1024));
        let ticks = queue::<TickEnvelope>(32, &arena);
        let orders = queue::<OrderReqEnvelope>(32, &arena);
        let acks = queue::<OrderAckEnvelope>(32, &arena);

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(RuntimeCounters::default());

        let mut strat = StratNode::new(
            StratPorts {
                tick_rx: Inbox::bound(Arc::clone(&ticks)),
                order_tx: Outbox::bound(Arc::clone(&orders)),
                ack_rx: Inbox::bound(Arc::clone(&acks)),
            },
            Arc::clone(&running),
            Arc::clone(&counters),
            4,
            3,
        );
        let worker = thread::spawn(move || strat.run());

        for seq in 1..=12u64 {
            let tick = TickEnvelope {
                seq,
                ts_ns: monotonic_ns(),
                ctx: Default::default(),
            };
            while ticks.push(tick).is_err() {
                thread::yield_now();
            }
        }

        let mut received = Vec::new();
        while received.len() < 3 {
            if let Some(order) = orders.pop() {
                received.push(order);
            } else {
                thread::yield_now();
            }
        }

        running.store(false, Ordering::Release);
        worker.join().unwrap();

        assert_eq!(received.len(), 3);
        for (i, order) in received.iter().enumerate() {
            assert_eq!(order.order_id, u32::try_from(i).unwrap() + 1);
            assert!(order.ctx.has_trace());
            assert_eq!(order.ctx.x.v, u64::try_from(i).unwrap() + 1);
        }
        assert_eq!(counters.strat_ticks_seen.load(Ordering::Relaxed), 12);
        assert_eq!(counters.strat_orders_sent.load(Ordering::Relaxed), 3);
        // Latency samples were taken (same clock, now >= ts).
        assert_eq!(counters.tick_one_way_count.load(Ordering::Relaxed), 12);
    }

    #[test]
    fn test_or_echoes_orders_as_acks() {
        let arena = Arc::new(BumpArena::new(64 * 1024));
        let orders = queue::<OrderReqEnvelope>(16, &arena);
        let acks = queue::<OrderAckEnvelope>(16, &arena);

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(RuntimeCounters::default());

        let mut router = OrNode::new(
            OrPorts {
                order_rx: Inbox::bound(Arc::clone(&orders)),
                ack_tx: Outbox::bound(Arc::clone(&acks)),
            },
            Arc::clone(&running),
            Arc::clone(&counters),
            5,
        );
        let worker = thread::spawn(move || router.run());

        let request = OrderReqEnvelope {
            order_id: 31,
            instr_id: 1,
            send_ts_ns: 1234,
            ctx: Default::default(),
            px: 10_000,
            qty: 1,
            side: 1,
        };
        orders.push(request).unwrap();

        let ack = loop {
            if let Some(ack) = acks.pop() {
                break ack;
            }
            thread::sleep(Duration::from_millis(1));
        };

        running.store(false, Ordering::Release);
        worker.join().unwrap();

        assert_eq!(ack.order_id, 31);
        assert_eq!(ack.origin_ts_ns, 1234);
        assert_eq!(ack.status, 1);
        assert_eq!(counters.or_orders_seen.load(Ordering::Relaxed), 1);
        assert_eq!(counters.or_acks_sent.load(Ordering::Relaxed), 1);
    }
}
