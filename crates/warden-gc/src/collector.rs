//! Collector state and the `gc_run` driver.

use std::cell::Cell;
use std::ptr::NonNull;
use std::time::Instant;

use crate::error::GcError;
use crate::header::{GcHeader, TypeDescriptor};
use crate::list::List;
use crate::root::RootHead;
use crate::scope::ScopeFrame;
use crate::stack::Stack;
use crate::weak::WeakHead;

/// Tunables with no effect on collection semantics — diagnostic caps and
/// logging toggles only. See module docs for the rest of the ambient
/// surface.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Defensive cap on weak-resolution fixed-point rounds (§4.5). Normal
    /// termination is guaranteed by `stage`'s monotonic growth; this only
    /// guards against a malformed `mark` callback graph, and is logged as a
    /// warning if ever hit.
    pub max_weak_fixpoint_rounds: u32,
    /// Whether cycle-boundary events are emitted when the `gc_logging`
    /// feature is compiled in. Lets a host silence logging per-instance
    /// without recompiling.
    pub log_cycles: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_weak_fixpoint_rounds: 10_000,
            log_cycles: true,
        }
    }
}

/// Cumulative and last-cycle counters, surfaced for logging and host
/// introspection. Read-only; has no effect on collection semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub cycles_run: u64,
    pub objects_freed_last_cycle: u64,
    pub objects_marked_last_cycle: u64,
    pub weaks_expired_last_cycle: u64,
    pub fixpoint_rounds_last_cycle: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GcPhase {
    Idle,
    Marking,
    WeakFixpoint,
    Sweeping,
}

impl GcPhase {
    fn name(self) -> &'static str {
        match self {
            GcPhase::Idle => "Idle",
            GcPhase::Marking => "Marking",
            GcPhase::WeakFixpoint => "WeakFixpoint",
            GcPhase::Sweeping => "Sweeping",
        }
    }
}

/// One collector instance — one mutator world.
///
/// Not `Send`/`Sync`: the interface is explicitly single-threaded (no
/// atomics or locks guard any of this state). A host that needs multiple
/// mutator threads owns one `Gc` per thread or serializes access itself.
pub struct Gc {
    pub(crate) heap: List<GcHeader>,
    pub(crate) stage: List<GcHeader>,
    pub(crate) pinned: List<GcHeader>,
    roots: List<RootHead>,
    scopes: Stack<ScopeFrame>,
    pub(crate) weak_pending: Stack<WeakHead>,
    config: GcConfig,
    stats: Cell<GcStats>,
    phase: Cell<GcPhase>,
}

impl Gc {
    /// Construct a fresh collector with default configuration.
    pub fn new() -> Box<Gc> {
        Self::with_config(GcConfig::default())
    }

    /// Construct a fresh collector with the given tunables.
    pub fn with_config(config: GcConfig) -> Box<Gc> {
        let gc = Box::new(Gc {
            heap: List::new(),
            stage: List::new(),
            pinned: List::new(),
            roots: List::new(),
            scopes: Stack::new(),
            weak_pending: Stack::new(),
            config,
            stats: Cell::new(GcStats::default()),
            phase: Cell::new(GcPhase::Idle),
        });
        let mut gc = gc;
        // The four `List`s above self-initialized their sentinels at their
        // temporary, pre-move stack addresses; now that `gc` has settled at
        // its final heap address (inside the `Box`, which will not move
        // again), repin them there.
        gc.heap.repin();
        gc.stage.repin();
        gc.pinned.repin();
        gc.roots.repin();
        gc
    }

    /// Cumulative/last-cycle counters.
    pub fn stats(&self) -> GcStats {
        self.stats.get()
    }

    fn assert_not_reentrant(&self) {
        if self.phase.get() != GcPhase::Idle {
            let err = GcError::ReentrantRun {
                state: self.phase.get().name(),
            };
            #[cfg(feature = "gc_logging")]
            tracing::error!(state = self.phase.get().name(), "{}", err);
            debug_assert!(false, "{}", err);
        }
    }

    /// Link a freshly constructed header into `heap`, mark bit clear.
    ///
    /// # Safety
    /// `header` must point at storage the host owns and keeps stable for as
    /// long as the collector might reference it (until its `free` callback
    /// runs), must not already be registered with any collector, and must
    /// have been constructed via [`GcHeader::new`].
    pub unsafe fn init_object(&self, header: NonNull<GcHeader>) {
        unsafe { GcHeader::init(header, self) };
    }

    /// Bind `weak` to `self` and link it into `heap` like any other object.
    ///
    /// # Safety
    /// Same obligations as [`Gc::init_object`], applied to `weak.header`.
    pub unsafe fn init_weak(&self, weak: NonNull<WeakHead>) {
        let header = unsafe { NonNull::new_unchecked(&raw mut (*weak.as_ptr()).header) };
        unsafe { GcHeader::init(header, self) };
    }

    /// The tracer primitive: idempotent, called both by the collector's
    /// own seeding steps and by user `mark` callbacks on every outgoing
    /// edge they trace.
    ///
    /// # Safety
    /// `header` must be currently linked into `self.heap`, `self.stage`, or
    /// `self.pinned` (i.e. a live, registered header of this collector).
    pub unsafe fn mark(&self, header: NonNull<GcHeader>) {
        let h = unsafe { header.as_ref() };
        if h.is_marked() {
            return;
        }
        h.set_marked();
        unsafe { self.stage.move_back(header) };
    }

    /// Register a root. `root` must be constructed via [`RootHead::new`]
    /// and not moved afterward.
    ///
    /// # Safety
    /// `root` must point at live storage the host keeps stable until the
    /// matching [`Gc::del_root`], and must not already be registered.
    pub unsafe fn add_root(&self, root: NonNull<RootHead>) {
        unsafe { self.roots.push_back(root) };
    }

    /// Deregister a previously registered root.
    ///
    /// # Safety
    /// `root` must currently be registered with this collector.
    pub unsafe fn del_root(&self, root: NonNull<RootHead>) {
        unsafe { self.roots.remove(root) };
    }

    /// Open a new, innermost scope backed by `frame`.
    ///
    /// # Safety
    /// `frame` (and the pool it was built from) must outlive the matching
    /// [`Gc::pop_scope`] call, and must not move in the meantime.
    pub unsafe fn push_scope(&self, frame: NonNull<ScopeFrame>) {
        unsafe { self.scopes.push(frame) };
    }

    /// Close the innermost scope.
    ///
    /// # Safety
    /// There must be an open scope, and the caller must close scopes in
    /// strict LIFO order (the innermost one first).
    pub unsafe fn pop_scope(&self) {
        if self.scopes.pop().is_none() {
            let err = GcError::EmptyScopeStack;
            #[cfg(feature = "gc_logging")]
            tracing::error!("{}", err);
            debug_assert!(false, "{}", err);
        }
    }

    /// Record `header` as a root of the innermost open scope.
    ///
    /// # Safety
    /// There must be an open scope, and `header` must be a live, registered
    /// header of this collector.
    pub unsafe fn protect(&self, header: NonNull<GcHeader>) {
        match self.scopes.top() {
            Some(frame) => unsafe { frame.as_ref() }.protect(header),
            None => {
                let err = GcError::ProtectWithNoScope;
                #[cfg(feature = "gc_logging")]
                tracing::error!("{}", err);
                debug_assert!(false, "{}", err);
            }
        }
    }

    /// Move `header` to `pinned`, exempting it from reclamation until
    /// [`Gc::unpin`].
    ///
    /// # Safety
    /// `header` must be a live, registered header of this collector,
    /// currently in `heap`.
    pub unsafe fn pin(&self, header: NonNull<GcHeader>) {
        unsafe {
            self.pinned.move_front(header);
            header.as_ref().set_marked();
        }
    }

    /// Return a pinned header to `heap`, clearing its mark bit. Does not
    /// itself schedule a collection.
    ///
    /// # Safety
    /// `header` must currently be in `pinned`.
    pub unsafe fn unpin(&self, header: NonNull<GcHeader>) {
        unsafe {
            self.heap.move_front(header);
            header.as_ref().clear_marked();
        }
    }

    /// Run one full mark → weak-fixpoint → sweep cycle.
    ///
    /// # Safety
    /// Must not be called reentrantly (from inside a `mark`/`free`
    /// callback). Debug builds `debug_assert!` against this; release
    /// builds have undefined behavior on violation.
    pub unsafe fn run(&self) {
        self.assert_not_reentrant();

        #[cfg(feature = "gc_logging")]
        let cycle_started = Instant::now();

        #[cfg(feature = "gc_logging")]
        if self.config.log_cycles {
            tracing::debug!(
                cycle = self.stats.get().cycles_run + 1,
                heap_occupancy = self.heap.iter().count(),
                "gc cycle starting"
            );
        }

        self.phase.set(GcPhase::Marking);
        unsafe { self.mark_phase() };
        let marked = self.stage.iter().count() as u64;

        self.phase.set(GcPhase::WeakFixpoint);
        let (expired, rounds) = unsafe { self.weak_fixpoint() };

        self.phase.set(GcPhase::Sweeping);
        let freed = unsafe { self.sweep() };

        self.phase.set(GcPhase::Idle);

        let mut stats = self.stats.get();
        stats.cycles_run += 1;
        stats.objects_freed_last_cycle = freed;
        stats.objects_marked_last_cycle = marked;
        stats.weaks_expired_last_cycle = expired;
        stats.fixpoint_rounds_last_cycle = rounds;
        self.stats.set(stats);

        #[cfg(feature = "gc_logging")]
        if self.config.log_cycles {
            tracing::info!(
                objects_freed = freed,
                objects_marked = marked,
                weaks_expired = expired,
                fixpoint_rounds = rounds,
                duration_us = cycle_started.elapsed().as_micros() as u64,
                "gc cycle finished"
            );
        }
        #[cfg(not(feature = "gc_logging"))]
        let _ = Instant::now;
    }

    /// Release every pinned object back to `heap`, forget all roots and
    /// scopes, and run one final cycle so everything still unreachable is
    /// freed.
    ///
    /// # Safety
    /// Same reentrancy obligations as [`Gc::run`]. After this call, `self`
    /// must not be used again except to drop it.
    pub unsafe fn destroy(&self) {
        for pinned in self.pinned.iter() {
            unsafe { pinned.as_ref().clear_marked() };
        }
        self.pinned.splice_into(&self.heap);
        loop {
            let next = match self.roots.iter().next() {
                Some(r) => r,
                None => break,
            };
            unsafe { self.roots.remove(next) };
        }
        while self.scopes.pop().is_some() {}
        unsafe { self.run() };
    }

    unsafe fn mark_phase(&self) {
        // Step 2: seed from scopes, innermost first (the scope stack's own
        // top-to-bottom pop order already matches "innermost to
        // outermost"). Frames are drained to a local vec and pushed back in
        // reverse so the stack's nesting order is undisturbed afterward.
        let frames: Vec<_> = self.scopes.drain().collect();
        for &frame in &frames {
            for entry in unsafe { frame.as_ref() }.entries() {
                if let Some(header) = entry {
                    unsafe { self.mark(*header) };
                }
            }
        }
        for &frame in frames.iter().rev() {
            unsafe { self.scopes.push(frame) };
        }

        // Step 3: seed from registered roots.
        for root in self.roots.iter() {
            let mark_fn = unsafe { root.as_ref() }.mark_fn();
            unsafe { mark_fn(self, root) };
        }

        // Step 4: trace pins directly — pinned headers are not staged
        // themselves, only their outgoing edges are.
        for pinned in self.pinned.iter() {
            if let Some(mark_fn) = unsafe { pinned.as_ref() }.type_descriptor().mark {
                unsafe { mark_fn(self, pinned) };
            }
        }

        // Step 5: drain the worklist. `stage.iter()` naturally walks into
        // entries appended at the tail by `mark` calls made during this
        // very loop, terminating once it catches up to the (possibly
        // moved) sentinel.
        for staged in self.stage.iter() {
            if let Some(mark_fn) = unsafe { staged.as_ref() }.type_descriptor().mark {
                unsafe { mark_fn(self, staged) };
            }
        }
    }

    unsafe fn weak_fixpoint(&self) -> (u64, u32) {
        let mut expired_count = 0u64;
        let mut rounds = 0u32;

        loop {
            if self.weak_pending.is_empty() {
                break;
            }

            let snapshot = self.stage.tail();
            let round_list: Stack<WeakHead> = Stack::new();
            self.weak_pending.move_into(&round_list);

            let mut resolved_this_round = 0u32;
            let mut pending_this_round = 0u32;

            for w in round_list.drain() {
                let weak = unsafe { w.as_ref() };
                if weak.key_marked() {
                    resolved_this_round += 1;
                    if let Some(mark_fn) = weak.user_mark() {
                        let header = unsafe {
                            NonNull::new_unchecked(&weak.header as *const GcHeader as *mut GcHeader)
                        };
                        unsafe { mark_fn(self, header) };
                    }
                } else {
                    pending_this_round += 1;
                    unsafe { self.weak_pending.push(w) };
                }
            }

            rounds += 1;

            #[cfg(feature = "gc_logging")]
            tracing::trace!(
                round = rounds,
                resolved = resolved_this_round,
                pending = pending_this_round,
                "weak fixpoint round"
            );
            #[cfg(not(feature = "gc_logging"))]
            let _ = (resolved_this_round, pending_this_round);

            let grew = match snapshot {
                Some(s) => self.stage.tail() != Some(s),
                None => self.stage.tail().is_some(),
            };

            if !grew {
                break;
            }

            // Drain only the newer suffix of `stage` (from just after the
            // snapshot to the new tail), tracing each newly-reached object.
            let newly_staged: Vec<_> = match snapshot {
                Some(s) => self.stage.iter_after(s).collect(),
                None => self.stage.iter().collect(),
            };
            for staged in newly_staged {
                if let Some(mark_fn) = unsafe { staged.as_ref() }.type_descriptor().mark {
                    unsafe { mark_fn(self, staged) };
                }
            }

            if rounds >= self.config.max_weak_fixpoint_rounds {
                #[cfg(feature = "gc_logging")]
                {
                    let err = GcError::WeakFixpointRoundCapHit { rounds };
                    tracing::warn!(rounds, "{}", err);
                }
                break;
            }
        }

        // Everything still in weak_pending has a provably-dead key.
        for w in self.weak_pending.drain() {
            let weak = unsafe { w.as_ref() };
            weak.expire();
            expired_count += 1;
            if let Some(notify) = weak.notify_stack() {
                unsafe { notify.as_ref().push(w) };
            }
        }

        (expired_count, rounds)
    }

    unsafe fn sweep(&self) -> u64 {
        // `pinned` headers keep their mark bit set across the whole pinned
        // lifetime (set once by `pin`, cleared only by `unpin`), not just
        // for the duration of a cycle — weak-fixpoint's `key_marked` and a
        // future cycle's `mark` both depend on a pinned key still reading
        // as marked.
        for header in self.stage.iter() {
            unsafe { header.as_ref().clear_marked() };
        }

        let mut freed = 0u64;
        for dead in self.heap.iter() {
            unsafe { self.heap.remove(dead) };
            if let Some(free_fn) = unsafe { dead.as_ref() }.type_descriptor().free {
                unsafe { free_fn(self, dead) };
            }
            freed += 1;
        }

        self.stage.splice_into(&self.heap);
        freed
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        debug_assert!(
            self.phase.get() == GcPhase::Idle,
            "Gc dropped mid-cycle (state: {})",
            self.phase.get().name()
        );
    }
}
