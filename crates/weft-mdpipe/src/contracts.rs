//! Pipeline contracts: node ids, contract ids, and the envelopes that flow
//! on the edges.
//!
//! Envelopes are plain data with an embedded trace [`Carrier`]; they are
//! value-copied through the queues, never referenced.

use weft_core::engine::{queue_factory, QueueFactory};
use weft_core::port::Envelope;
use weft_core::topology::{ContractId, NodeId};
use weft_core::trace::Carrier;

/// Payload contracts of the pipeline edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Contract {
    /// Market-data tick.
    Tick = 1,
    /// Order request, strategy to router.
    OrderReq = 2,
    /// Order acknowledgement, router back to strategy.
    OrderAck = 3,
}

impl Contract {
    /// The wire contract id.
    #[must_use]
    pub const fn id(self) -> ContractId {
        ContractId(self as u16)
    }
}

/// Logical nodes of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PipeNode {
    /// Tick origin; its Tx port is driven by the external feeder.
    Ingress = 1,
    /// Market-data stage: stamps a trace and forwards ticks.
    Md = 2,
    /// Strategy: consumes ticks, emits orders, consumes acks.
    Strat = 3,
    /// Order router: acknowledges orders.
    Or = 4,
}

impl PipeNode {
    /// The topology node id.
    #[must_use]
    pub const fn id(self) -> NodeId {
        NodeId(self as u16)
    }

    /// The trace thread index of this node's worker.
    #[must_use]
    pub const fn trace_idx(self) -> u16 {
        self as u16
    }
}

/// A market-data tick.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TickEnvelope {
    /// Monotonic tick sequence, assigned by the feeder.
    pub seq: u64,
    /// Send timestamp, monotonic nanoseconds.
    pub ts_ns: u64,
    /// Trace carrier.
    pub ctx: Carrier,
}

impl Envelope for TickEnvelope {}

/// An order request from the strategy.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderReqEnvelope {
    /// Strategy-assigned order id.
    pub order_id: u32,
    /// Instrument the order is for.
    pub instr_id: u32,
    /// Send timestamp, monotonic nanoseconds; echoed in the ack.
    pub send_ts_ns: u64,
    /// Trace carrier.
    pub ctx: Carrier,
    /// Limit price in fixed-point ticks.
    pub px: i64,
    /// Quantity.
    pub qty: i32,
    /// Side: 1 = buy, 2 = sell.
    pub side: u8,
}

impl Envelope for OrderReqEnvelope {}

/// An order acknowledgement from the router.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderAckEnvelope {
    /// Acknowledged order id.
    pub order_id: u32,
    /// The order's `send_ts_ns`, echoed for round-trip timing.
    pub origin_ts_ns: u64,
    /// Trace carrier.
    pub ctx: Carrier,
    /// Ack status: 1 = accepted.
    pub status: u8,
}

impl Envelope for OrderAckEnvelope {}

// Envelopes are copied verbatim through queues; keep their layout honest.
const _: () = {
    assert!(std::mem::align_of::<TickEnvelope>() == 8);
    assert!(std::mem::align_of::<OrderReqEnvelope>() == 8);
    assert!(std::mem::align_of::<OrderAckEnvelope>() == 8);
    assert!(std::mem::size_of::<TickEnvelope>() == 72);
    assert!(std::mem::size_of::<OrderReqEnvelope>() == 88);
    assert!(std::mem::size_of::<OrderAckEnvelope>() == 80);
};

static CONTRACT_BINDINGS: [QueueFactory; 3] = [
    queue_factory::<TickEnvelope>(Contract::Tick.id()),
    queue_factory::<OrderReqEnvelope>(Contract::OrderReq.id()),
    queue_factory::<OrderAckEnvelope>(Contract::OrderAck.id()),
];

/// The compile-time (contract, envelope) binding list of this pipeline.
#[must_use]
pub fn contract_bindings() -> &'static [QueueFactory] {
    &CONTRACT_BINDINGS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_ids_are_stable() {
        assert_eq!(Contract::Tick.id(), ContractId(1));
        assert_eq!(Contract::OrderReq.id(), ContractId(2));
        assert_eq!(Contract::OrderAck.id(), ContractId(3));
    }

    #[test]
    fn test_bindings_cover_all_contracts() {
        let bindings = contract_bindings();
        for contract in [Contract::Tick, Contract::OrderReq, Contract::OrderAck] {
            assert!(bindings.iter().any(|b| b.contract() == contract.id()));
        }
    }

    #[test]
    fn test_envelopes_default_to_no_trace() {
        assert!(!TickEnvelope::default().ctx.has_trace());
        assert!(!OrderReqEnvelope::default().ctx.has_trace());
        assert!(!OrderAckEnvelope::default().ctx.has_trace());
    }
}
