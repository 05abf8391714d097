//! Cross-thread trace context carried inside envelopes.
//!
//! Each worker thread holds a thread-local context: the current span, its
//! parent, and one always-on correlation key/value pair. A POD [`Carrier`]
//! snapshot of that context is embedded in every envelope, so one-way
//! latencies and round trips can be stitched together across threads.
//!
//! ## Semantics
//!
//! - a carrier stores the *current span* and its parent (from the sender)
//! - [`adopt`] restores that current span and its parent
//! - [`SpanScope`] creates a child span (parent = previously current span)
//!
//! Span ids are `(thread_index << 48) | sequence`, so they are unique
//! across the process as long as thread indices are unique.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::OnceLock;

/// Trace identity, compatible with 128-bit trace-id conventions.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TraceId {
    /// High 64 bits.
    pub hi: u64,
    /// Low 64 bits.
    pub lo: u64,
}

impl TraceId {
    /// Returns true for the all-zero (absent) trace id.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.hi == 0 && self.lo == 0
    }
}

/// A 64-bit span identifier.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

/// Current span context: trace id, span id, and trace flags.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanCtx {
    /// Trace this span belongs to.
    pub tid: TraceId,
    /// The span itself.
    pub sid: SpanId,
    /// Trace flags (sampling bit etc).
    pub flags: u8,
}

/// One fixed-size, always-on correlation pair.
///
/// The key is a 32-bit name hash (see [`key`]) so no string handling ever
/// happens on the hot path.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Corr {
    /// Hashed correlation key.
    pub k: u32,
    /// Correlation value.
    pub v: u64,
}

/// POD snapshot of the thread's trace context, propagated inside
/// envelopes.
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Carrier {
    /// Current span context.
    pub c: SpanCtx,
    /// Parent span id of the current span.
    pub parent: u64,
    /// Correlation pair.
    pub x: Corr,
}

impl Carrier {
    /// Returns true when the carrier holds a live trace.
    #[must_use]
    pub const fn has_trace(&self) -> bool {
        !self.c.tid.is_zero()
    }
}

// Wire-layout invariants; envelopes embed carriers by value.
const _: () = {
    assert!(std::mem::size_of::<TraceId>() == 16);
    assert!(std::mem::size_of::<SpanId>() == 8);
    assert!(std::mem::size_of::<SpanCtx>() == 32);
    assert!(std::mem::size_of::<Corr>() == 16);
    assert!(std::mem::size_of::<Carrier>() == 56);
    assert!(std::mem::align_of::<Carrier>() == 8);
};

/// Compile-time FNV-1a hash of a correlation key name.
///
/// ```rust
/// const TICK_SEQ: u32 = weft_core::trace::key("tick_seq");
/// ```
#[must_use]
pub const fn key(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash: u32 = 2_166_136_261;
    let mut i = 0;
    while i < bytes.len() {
        hash = (hash ^ bytes[i] as u32).wrapping_mul(16_777_619);
        i += 1;
    }
    hash
}

/// Hook supplying fresh trace ids at ingress.
pub type TraceSourceFn = fn() -> TraceId;

static TRACE_SOURCE: OnceLock<TraceSourceFn> = OnceLock::new();

/// Installs the process-wide trace-id source.
///
/// Returns false if a source was already installed. Without a source,
/// [`ingress`] derives a fallback id from the thread index and span
/// sequence; fallback ids are never zero.
pub fn set_trace_source(source: TraceSourceFn) -> bool {
    TRACE_SOURCE.set(source).is_ok()
}

const SEQ_MASK: u64 = (1 << 48) - 1;
const TIDX_UNSET: u16 = u16::MAX;

#[derive(Clone, Copy)]
struct TlsContext {
    c: SpanCtx,
    parent: u64,
    x: Corr,
}

#[derive(Clone, Copy)]
struct TlsState {
    ctx: TlsContext,
    span_seq: u64,
    tidx: u16,
}

impl TlsState {
    const UNSET: TlsState = TlsState {
        ctx: TlsContext {
            c: SpanCtx {
                tid: TraceId { hi: 0, lo: 0 },
                sid: SpanId(0),
                flags: 0,
            },
            parent: 0,
            x: Corr { k: 0, v: 0 },
        },
        span_seq: 0,
        tidx: TIDX_UNSET,
    };
}

thread_local! {
    static TLS: Cell<TlsState> = const { Cell::new(TlsState::UNSET) };
}

fn alloc_span(state: &mut TlsState) -> SpanId {
    debug_assert!(
        state.tidx != TIDX_UNSET,
        "trace::thread_init must be called before any trace operation"
    );
    state.span_seq = state.span_seq.wrapping_add(1);
    if state.span_seq == 0 {
        // Skip zero on wrap so span ids never collide with "no span".
        state.span_seq = 1;
    }
    SpanId((u64::from(state.tidx) << 48) | (state.span_seq & SEQ_MASK))
}

/// Assigns this thread its 16-bit trace index.
///
/// Must precede any other trace operation on the thread. The index forms
/// the top 16 bits of every span id the thread emits.
pub fn thread_init(tidx: u16) {
    TLS.with(|tls| {
        let mut state = tls.get();
        state.tidx = tidx;
        tls.set(state);
    });
}

/// Allocates a fresh span id on this thread.
///
/// The per-thread sequence is monotonic and skips zero on wrap.
#[must_use]
pub fn new_span() -> SpanId {
    TLS.with(|tls| {
        let mut state = tls.get();
        let sid = alloc_span(&mut state);
        tls.set(state);
        sid
    })
}

/// Starts a new trace at ingress: fresh trace id, zero parent, fresh span,
/// and the given correlation pair.
pub fn ingress(corr_key: u32, corr_val: u64, flags: u8) {
    TLS.with(|tls| {
        let mut state = tls.get();
        state.ctx.c.tid = match TRACE_SOURCE.get() {
            Some(source) => source(),
            None => fallback_trace_id(&state),
        };
        state.ctx.c.flags = flags;
        state.ctx.x = Corr { k: corr_key, v: corr_val };
        state.ctx.parent = 0;
        state.ctx.c.sid = alloc_span(&mut state);
        tls.set(state);
    });
}

fn fallback_trace_id(state: &TlsState) -> TraceId {
    let t = (u64::from(state.tidx) << 48) | (state.span_seq & SEQ_MASK);
    TraceId {
        hi: t ^ 0x9e37_79b9_7f4a_7c15,
        lo: t,
    }
}

/// Adopts the propagated context from an inbound envelope.
pub fn adopt(carrier: &Carrier) {
    TLS.with(|tls| {
        let mut state = tls.get();
        state.ctx.c = carrier.c;
        state.ctx.parent = carrier.parent;
        state.ctx.x = carrier.x;
        tls.set(state);
    });
}

/// Snapshots the current context for embedding before a send.
#[must_use]
pub fn carry() -> Carrier {
    TLS.with(|tls| {
        let state = tls.get();
        Carrier {
            c: state.ctx.c,
            parent: state.ctx.parent,
            x: state.ctx.x,
        }
    })
}

/// Scoped adoption of an inbound carrier.
///
/// Construction saves the prior context and adopts the carrier; drop
/// restores the prior context on every exit path.
pub struct AdoptScope {
    prev: TlsContext,
    // Guards restore thread-local state and must stay on their thread.
    _not_send: PhantomData<*const ()>,
}

impl AdoptScope {
    /// Adopts `carrier`, saving the current context until drop.
    #[must_use]
    pub fn new(carrier: &Carrier) -> Self {
        let prev = TLS.with(|tls| tls.get().ctx);
        adopt(carrier);
        Self {
            prev,
            _not_send: PhantomData,
        }
    }
}

impl Drop for AdoptScope {
    fn drop(&mut self) {
        TLS.with(|tls| {
            let mut state = tls.get();
            state.ctx = self.prev;
            tls.set(state);
        });
    }
}

/// Scoped child span.
///
/// Construction makes the current span the parent and installs a fresh
/// span id; drop restores the previous span and parent.
pub struct SpanScope {
    prev_sid: SpanId,
    prev_parent: u64,
    _not_send: PhantomData<*const ()>,
}

impl SpanScope {
    /// Opens a child span of the current span.
    #[must_use]
    pub fn new() -> Self {
        TLS.with(|tls| {
            let mut state = tls.get();
            let prev_sid = state.ctx.c.sid;
            let prev_parent = state.ctx.parent;
            state.ctx.parent = state.ctx.c.sid.0;
            state.ctx.c.sid = alloc_span(&mut state);
            tls.set(state);
            Self {
                prev_sid,
                prev_parent,
                _not_send: PhantomData,
            }
        })
    }
}

impl Default for SpanScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        TLS.with(|tls| {
            let mut state = tls.get();
            state.ctx.c.sid = self.prev_sid;
            state.ctx.parent = self.prev_parent;
            tls.set(state);
        });
    }
}
