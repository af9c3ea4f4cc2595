//! Long-lived registered roots.
//!
//! Unlike [`crate::scope`] frames, a registered root stays active across
//! collection cycles until explicitly removed with [`Gc::del_root`]. Each
//! root is a callback the collector invokes once per cycle to seed the
//! mark worklist from storage the host manages itself (globals, a VM's
//! register file, etc.) rather than from a fixed-capacity scope pool.

use std::mem::offset_of;
use std::ptr::NonNull;

use crate::list::{Link, Linked};
use crate::Gc;

/// A single registered root, threaded onto [`Gc`]'s `roots` list.
///
/// Embed by value in host storage; the embedding struct is what `mark`
/// receives a pointer to (via `offset_of!`, the same pattern
/// [`crate::header::GcHeader`] uses), so a host can recover its own context
/// from the `RootHead` pointer.
#[repr(C)]
pub struct RootHead {
    pub(crate) link: Link,
    mark: unsafe fn(gc: &Gc, root: NonNull<RootHead>),
}

impl RootHead {
    /// Construct a root bound to `mark`, not yet registered with any
    /// collector.
    pub fn new(mark: unsafe fn(gc: &Gc, root: NonNull<RootHead>)) -> Self {
        Self {
            link: Link::new(),
            mark,
        }
    }

    pub(crate) fn mark_fn(&self) -> unsafe fn(gc: &Gc, root: NonNull<RootHead>) {
        self.mark
    }
}

unsafe impl Linked for RootHead {
    fn link_offset() -> usize {
        offset_of!(RootHead, link)
    }
}
