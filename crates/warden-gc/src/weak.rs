//! Weak references.
//!
//! A weak head is itself a managed object (its `header` lives in `heap`
//! like any other), but it references another managed header — its `key`
//! — without that reference keeping the key alive. See
//! [`crate::Gc::run`]'s weak-resolution fixed point for the protocol that
//! decides, each cycle, which weak heads' keys survived.

use std::cell::Cell;
use std::mem::offset_of;
use std::ptr::NonNull;

use crate::header::{GcHeader, TypeDescriptor};
use crate::stack::{Stack, StackLink, StackLinked};
use crate::Gc;

/// A weak reference to another managed object.
///
/// `header`'s type descriptor is always [`WEAK_HEAD_TYPE`], an internal
/// wrapper — never the user's `user_type` directly. This is what lets the
/// collector distinguish "the weak head was reached" (keeps the weak head
/// itself alive, via the ordinary tracer primitive) from "the weak head's
/// secondary edges were traced" (only happens once `key` is confirmed
/// live, via `user_type.mark`).
#[repr(C)]
pub struct WeakHead {
    pub(crate) header: GcHeader,
    key: Cell<Option<NonNull<GcHeader>>>,
    user_type: &'static TypeDescriptor,
    notify: Option<NonNull<Stack<WeakHead>>>,
    pub(crate) pending_link: StackLink,
}

impl WeakHead {
    /// Construct a weak head keyed on `key`, delegating traced-edge and
    /// free behavior to `user_type`. If `notify` is given, the weak head is
    /// pushed onto it when its key is discovered dead.
    ///
    /// # Safety
    /// Same obligations as [`GcHeader::new`]/`init`: must be linked into
    /// `gc.heap` (via [`Gc::init_weak`]) at its final address before any
    /// other collector operation observes it, and must not move afterward.
    /// `notify`, if given, must outlive this weak head.
    pub fn new(
        user_type: &'static TypeDescriptor,
        key: Option<NonNull<GcHeader>>,
        notify: Option<NonNull<Stack<WeakHead>>>,
    ) -> Self {
        Self {
            header: GcHeader::new(&WEAK_HEAD_TYPE),
            key: Cell::new(key),
            user_type,
            notify,
            pending_link: StackLink::new(),
        }
    }

    /// The current key, or `None` if expired.
    pub fn key(&self) -> Option<NonNull<GcHeader>> {
        self.key.get()
    }

    pub(crate) fn key_marked(&self) -> bool {
        match self.key.get() {
            Some(k) => unsafe { k.as_ref() }.is_marked(),
            None => false,
        }
    }

    pub(crate) fn expire(&self) {
        self.key.set(None);
    }

    pub(crate) fn notify_stack(&self) -> Option<NonNull<Stack<WeakHead>>> {
        self.notify
    }

    pub(crate) fn user_mark(&self) -> Option<unsafe fn(&Gc, NonNull<GcHeader>)> {
        self.user_type.mark
    }

    pub(crate) fn user_free(&self) -> Option<unsafe fn(&Gc, NonNull<GcHeader>)> {
        self.user_type.free
    }
}

unsafe impl StackLinked for WeakHead {
    fn link_offset() -> usize {
        offset_of!(WeakHead, pending_link)
    }
}

unsafe fn weak_head_mark(gc: &Gc, header: NonNull<GcHeader>) {
    let weak = unsafe { NonNull::new_unchecked(weak_head_from_header(header)) };
    let w = unsafe { weak.as_ref() };
    if w.key.get().is_none() {
        return;
    }
    unsafe { gc.weak_pending.push(weak) };
}

unsafe fn weak_head_free(gc: &Gc, header: NonNull<GcHeader>) {
    let weak = unsafe { NonNull::new_unchecked(weak_head_from_header(header)) };
    let free = unsafe { weak.as_ref() }.user_free();
    if let Some(free) = free {
        unsafe { free(gc, header) };
    }
}

fn weak_head_from_header(header: NonNull<GcHeader>) -> *mut WeakHead {
    let offset = offset_of!(WeakHead, header);
    unsafe { (header.as_ptr() as *mut u8).sub(offset) as *mut WeakHead }
}

/// Internal type descriptor every [`WeakHead`] is constructed with. Never
/// exposed to hosts: the whole point is that a weak head's collector-facing
/// `mark` is not the user's.
pub(crate) static WEAK_HEAD_TYPE: TypeDescriptor = TypeDescriptor {
    mark: Some(weak_head_mark),
    free: Some(weak_head_free),
};
