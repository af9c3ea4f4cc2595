//! Per-object collector header and the type-descriptor vtable it points at.

use std::cell::Cell;
use std::mem::offset_of;
use std::ptr::NonNull;

use crate::list::{Link, Linked};
use crate::Gc;

/// User-supplied behavior for a kind of garbage-collected object.
///
/// A host defines one `static TypeDescriptor` per distinct object shape and
/// points every header of that shape at it (see [`GcHeader::new`]). Either
/// callback may be absent, in which case the collector treats it as a
/// no-op: an acyclic leaf object needs no `mark`, and an object with no
/// resources to release needs no `free`.
///
/// `#[repr(align(2))]` guarantees the descriptor's address has its low bit
/// clear, which [`GcHeader`] relies on to steal that bit for the mark flag.
#[repr(align(2))]
pub struct TypeDescriptor {
    /// Trace every outgoing reference from `header`, calling
    /// [`Gc::mark`] on each one reached. Called at most once per
    /// collection cycle per object (the tracer primitive is what makes that
    /// true, not this callback).
    pub mark: Option<unsafe fn(gc: &Gc, header: NonNull<GcHeader>)>,
    /// Release any resources `header`'s object owns. The header itself is
    /// unlinked by the collector before this runs; `free` must not touch
    /// collector-owned list/stack fields, only its own payload.
    pub free: Option<unsafe fn(gc: &Gc, header: NonNull<GcHeader>)>,
}

/// The per-object bookkeeping every collected object embeds.
///
/// Mirrors the shape of a C `struct { ...; struct gc_head head; }`: the
/// host's type carries a `GcHeader` field and recovers its own struct from
/// a `NonNull<GcHeader>` with its own offset arithmetic (`offset_of!` is the
/// idiomatic replacement for `container_of`).
///
/// The mark bit is packed into the low bit of the stored type-descriptor
/// pointer rather than kept as a separate byte, so "is this marked" is a
/// single pointer-sized load and mask.
#[repr(C)]
pub struct GcHeader {
    pub(crate) link: Link,
    type_mark: Cell<usize>,
}

const MARK_BIT: usize = 1;

impl GcHeader {
    /// Construct a header bound to `descriptor`, unmarked and not yet
    /// linked onto any list.
    ///
    /// # Safety
    /// The returned header must be [`init`](GcHeader::init)ed (which links
    /// it into the collector's `heap` list) before any other collector
    /// operation observes it, and must not move afterward.
    pub fn new(descriptor: &'static TypeDescriptor) -> Self {
        let ptr = descriptor as *const TypeDescriptor as usize;
        debug_assert_eq!(ptr & MARK_BIT, 0, "TypeDescriptor must be 2-byte aligned");
        Self {
            link: Link::new(),
            type_mark: Cell::new(ptr),
        }
    }

    /// Link this header into `gc`'s `heap` list. Must be called exactly
    /// once, at the header's final address.
    ///
    /// # Safety
    /// `self` must not already belong to a list, and must not move after
    /// this call.
    pub(crate) unsafe fn init(self_ptr: NonNull<GcHeader>, gc: &Gc) {
        unsafe {
            self_ptr.as_ref().link.init();
            gc.heap.push_back(self_ptr);
        }
    }

    /// The descriptor this header was constructed with, with the mark bit
    /// masked off.
    pub fn type_descriptor(&self) -> &'static TypeDescriptor {
        let ptr = self.type_mark.get() & !MARK_BIT;
        unsafe { &*(ptr as *const TypeDescriptor) }
    }

    pub fn is_marked(&self) -> bool {
        self.type_mark.get() & MARK_BIT != 0
    }

    pub(crate) fn set_marked(&self) {
        self.type_mark.set(self.type_mark.get() | MARK_BIT);
    }

    pub(crate) fn clear_marked(&self) {
        self.type_mark.set(self.type_mark.get() & !MARK_BIT);
    }
}

unsafe impl Linked for GcHeader {
    fn link_offset() -> usize {
        offset_of!(GcHeader, link)
    }
}
