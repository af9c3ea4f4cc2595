//! Lexically-scoped roots.
//!
//! A scope is a fixed-capacity pool of header pointers the host fills in
//! while a stack frame (or equivalent lexical extent) is live. Scopes
//! nest strictly LIFO: [`Gc::push_scope`] opens the innermost scope,
//! [`Gc::pop_scope`] closes it, and [`Gc::protect`] always writes into
//! whichever scope is currently innermost. Storage for the pool is
//! supplied by the caller (typically a local array on the host's own stack
//! frame) and must outlive the scope.

use std::cell::Cell;
use std::mem::offset_of;
use std::ptr::NonNull;

use crate::error::GcError;
use crate::header::GcHeader;
use crate::stack::{StackLink, StackLinked};

/// One open scope frame.
///
/// Threaded onto [`crate::Gc`]'s `scopes` stack. `pool` is never read or
/// written by anything but [`crate::Gc::protect`] and the mark phase's
/// scope-seeding step.
pub struct ScopeFrame {
    pub(crate) link: StackLink,
    pool: *mut Option<NonNull<GcHeader>>,
    capacity: usize,
    len: Cell<usize>,
}

impl ScopeFrame {
    /// Bind a frame to caller-owned storage. The slice's entries are
    /// overwritten as [`crate::Gc::protect`] is called; its initial
    /// contents are irrelevant.
    ///
    /// # Safety
    /// `pool` must outlive this frame's time on the scope stack (i.e. until
    /// the matching [`crate::Gc::pop_scope`] returns).
    pub fn new(pool: &mut [Option<NonNull<GcHeader>>]) -> Self {
        Self {
            link: StackLink::new(),
            pool: pool.as_mut_ptr(),
            capacity: pool.len(),
            len: Cell::new(0),
        }
    }

    /// Record `header` in this frame's next free pool slot.
    ///
    /// # Safety
    /// The frame must currently be the innermost (top) scope.
    ///
    /// Overflowing the pool is a programmer error: debug builds assert,
    /// release builds silently drop the protection (the object becomes
    /// collectible, which is the same failure mode a missed `protect` call
    /// would produce — not a memory-safety hazard on its own, but a latent
    /// use-after-free if the caller still holds the pointer past the next
    /// cycle).
    pub(crate) fn protect(&self, header: NonNull<GcHeader>) {
        let i = self.len.get();
        if i >= self.capacity {
            let err = GcError::ScopeOverflow { capacity: self.capacity };
            #[cfg(feature = "gc_logging")]
            tracing::error!(capacity = self.capacity, "{}", err);
            debug_assert!(false, "{}", err);
            return;
        }
        unsafe { self.pool.add(i).write(Some(header)) };
        self.len.set(i + 1);
    }

    /// Every header currently protected by this frame.
    pub(crate) fn entries(&self) -> &[Option<NonNull<GcHeader>>] {
        unsafe { std::slice::from_raw_parts(self.pool, self.len.get()) }
    }
}

unsafe impl StackLinked for ScopeFrame {
    fn link_offset() -> usize {
        offset_of!(ScopeFrame, link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protect_records_entries_in_order() {
        let mut pool = [None; 4];
        let frame = ScopeFrame::new(&mut pool);
        let a = NonNull::dangling();
        let b = NonNull::dangling();
        frame.protect(a);
        frame.protect(b);
        assert_eq!(frame.entries().len(), 2);
    }
}
