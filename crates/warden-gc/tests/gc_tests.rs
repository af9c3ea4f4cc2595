//! End-to-end scenarios driving the public API only (no crate-private
//! access), mirroring the canonical cons-list walkthrough: build a small
//! graph across nested scopes and pins, run cycles, and check exactly which
//! nodes get freed at each step.

use std::cell::{Cell, RefCell};
use std::mem::offset_of;
use std::ptr::NonNull;

use warden_gc::{Gc, GcHeader, RootHead, ScopeFrame, Stack, TypeDescriptor, WeakHead};

struct Cons {
    header: GcHeader,
    value: i32,
    next: Cell<Option<NonNull<GcHeader>>>,
}

thread_local! {
    static FREED: RefCell<Vec<i32>> = const { RefCell::new(Vec::new()) };
}

fn take_freed() -> Vec<i32> {
    FREED.with(|f| std::mem::take(&mut *f.borrow_mut()))
}

unsafe fn cons_mark(gc: &Gc, header: NonNull<GcHeader>) {
    let node = cons_from_header(header);
    if let Some(next) = unsafe { node.as_ref() }.next.get() {
        unsafe { gc.mark(next) };
    }
}

unsafe fn cons_free(_gc: &Gc, header: NonNull<GcHeader>) {
    let node = cons_from_header(header);
    let value = unsafe { node.as_ref() }.value;
    FREED.with(|f| f.borrow_mut().push(value));
    unsafe { drop(Box::from_raw(node.as_ptr())) };
}

fn cons_from_header(header: NonNull<GcHeader>) -> NonNull<Cons> {
    let offset = offset_of!(Cons, header);
    unsafe { NonNull::new_unchecked((header.as_ptr() as *mut u8).sub(offset) as *mut Cons) }
}

static CONS_TYPE: TypeDescriptor = TypeDescriptor {
    mark: Some(cons_mark),
    free: Some(cons_free),
};

fn cons(gc: &Gc, value: i32) -> NonNull<GcHeader> {
    let node = Box::new(Cons {
        header: GcHeader::new(&CONS_TYPE),
        value,
        next: Cell::new(None),
    });
    let ptr = NonNull::new(Box::into_raw(node)).unwrap();
    let header = unsafe { NonNull::new_unchecked(&raw mut (*ptr.as_ptr()).header) };
    unsafe { gc.init_object(header) };
    header
}

fn set_next(node: NonNull<GcHeader>, next: Option<NonNull<GcHeader>>) {
    unsafe { cons_from_header(node).as_ref() }.next.set(next);
}

/// Walks the cons-list scenario from the spec's end-to-end section:
/// nested scopes, a pin, a mutation that drops an edge, and closing scopes
/// one at a time, checking exactly which values get freed (and in which
/// cycle) at every step.
#[test]
fn cons_list_scenario_matches_the_spec_walkthrough() {
    take_freed();
    let gc = Gc::new();

    let mut outer_pool = [None; 4];
    let outer_frame = ScopeFrame::new(&mut outer_pool);
    unsafe { gc.push_scope(NonNull::from(&outer_frame)) };

    let d;
    let e;
    {
        let mut inner_pool = [None; 8];
        let inner_frame = ScopeFrame::new(&mut inner_pool);
        unsafe { gc.push_scope(NonNull::from(&inner_frame)) };

        let a = cons(&gc, 1);
        let b = cons(&gc, 2);
        let c = cons(&gc, 3);
        d = cons(&gc, 4);
        set_next(d, Some(a));
        e = cons(&gc, 5);

        for h in [a, b, c, d, e] {
            unsafe { gc.protect(h) };
        }
        unsafe { gc.pin(e) };

        // Step 1: everything is protected by the inner scope or pinned.
        unsafe { gc.run() };
        assert_eq!(take_freed(), Vec::<i32>::new());

        // Close the inner scope, then protect `d` again: `protect` always
        // targets the innermost open scope, so this re-registers `d` as a
        // root of the now-innermost outer scope.
        unsafe { gc.pop_scope() };
        unsafe { gc.protect(d) };
    }

    // Step 2: only `d` (and, through it, `a`) survive in the outer scope;
    // `b` and `c` are now unrooted.
    unsafe { gc.run() };
    let mut freed = take_freed();
    freed.sort();
    assert_eq!(freed, vec![2, 3]);

    // Step 3: drop d's edge to a. a becomes unreachable.
    set_next(d, None);
    unsafe { gc.run() };
    assert_eq!(take_freed(), vec![1]);

    // Step 4: close the outer scope; d is now unrooted too.
    unsafe { gc.pop_scope() };
    unsafe { gc.run() };
    assert_eq!(take_freed(), vec![4]);

    // Step 5: unpin e; with no root or pin left, it is collected next cycle.
    unsafe { gc.unpin(e) };
    unsafe { gc.run() };
    assert_eq!(take_freed(), vec![5]);
}

/// A focused pin-lifecycle test: a pinned object survives indefinitely,
/// and unpinning (without re-rooting) makes it collectible on the very
/// next cycle.
#[test]
fn pinned_object_survives_until_explicitly_unpinned() {
    take_freed();
    let gc = Gc::new();
    let e = cons(&gc, 5);
    unsafe { gc.pin(e) };

    for _ in 0..3 {
        unsafe { gc.run() };
        assert!(take_freed().is_empty());
    }

    unsafe { gc.unpin(e) };
    unsafe { gc.run() };
    assert_eq!(take_freed(), vec![5]);
}

/// A cyclic subgraph kept alive by an outer reference survives; severing
/// the only link into the cycle reclaims every node in it, each freed
/// exactly once.
#[test]
fn cyclic_subgraph_is_collected_as_a_whole_once_unreachable() {
    take_freed();
    let gc = Gc::new();
    let mut pool = [None; 4];
    let frame = ScopeFrame::new(&mut pool);
    unsafe { gc.push_scope(NonNull::from(&frame)) };

    let a = cons(&gc, 10);
    let b = cons(&gc, 20);
    set_next(a, Some(b));
    set_next(b, Some(a));
    unsafe { gc.protect(a) };

    unsafe { gc.run() };
    assert!(take_freed().is_empty());

    unsafe { gc.pop_scope() };
    unsafe { gc.run() };
    let mut freed = take_freed();
    freed.sort();
    assert_eq!(freed, vec![10, 20]);
}

/// Two consecutive `run`s with no mutator activity between them: the first
/// may free objects, the second must free nothing and leave `heap`
/// unchanged.
#[test]
fn a_second_consecutive_run_with_no_mutation_frees_nothing() {
    take_freed();
    let gc = Gc::new();
    cons(&gc, 1);

    unsafe { gc.run() };
    assert_eq!(take_freed(), vec![1]);
    let freed_first = gc.stats().objects_freed_last_cycle;
    assert_eq!(freed_first, 1);

    unsafe { gc.run() };
    assert!(take_freed().is_empty());
    assert_eq!(gc.stats().objects_freed_last_cycle, 0);
}

/// A registered root (standing in for a VM's global table or register
/// file) keeps its headers alive across cycles until deregistered.
#[test]
fn registered_root_keeps_its_headers_alive_until_removed() {
    take_freed();
    let gc = Gc::new();
    let global = cons(&gc, 99);

    struct Globals {
        root: RootHead,
        slot: Cell<Option<NonNull<GcHeader>>>,
    }

    unsafe fn globals_mark(gc: &Gc, root: NonNull<RootHead>) {
        let g = globals_from_root(root);
        if let Some(h) = unsafe { g.as_ref() }.slot.get() {
            unsafe { gc.mark(h) };
        }
    }

    fn globals_from_root(root: NonNull<RootHead>) -> NonNull<Globals> {
        let offset = offset_of!(Globals, root);
        unsafe { NonNull::new_unchecked((root.as_ptr() as *mut u8).sub(offset) as *mut Globals) }
    }

    let globals = Box::new(Globals {
        root: RootHead::new(globals_mark),
        slot: Cell::new(Some(global)),
    });
    let globals_ptr = NonNull::new(Box::into_raw(globals)).unwrap();
    let root_ptr =
        unsafe { NonNull::new_unchecked(&raw mut (*globals_ptr.as_ptr()).root) };
    unsafe { gc.add_root(root_ptr) };

    unsafe { gc.run() };
    assert!(take_freed().is_empty());

    unsafe { gc.del_root(root_ptr) };
    unsafe { gc.run() };
    assert_eq!(take_freed(), vec![99]);

    unsafe { drop(Box::from_raw(globals_ptr.as_ptr())) };
}

/// A weak head has no secondary edges or payload of its own in this test,
/// so its `user_type` is a pure no-op: the interesting behavior all lives in
/// the collector's internal wrapper (see `weak` module docs).
static WEAK_PAYLOAD_TYPE: TypeDescriptor = TypeDescriptor {
    mark: None,
    free: None,
};

/// Weak-reference exactness: a weak's key survives while its referent is
/// rooted, and is observably cleared to `None` (with a notification pushed)
/// the cycle after the referent becomes unreachable — but only while the
/// weak head itself stays reachable (it is kept alive here by an outer
/// scope that never closes; the target lives in an inner scope that does).
#[test]
fn weak_reference_expires_exactly_when_its_key_becomes_unreachable() {
    take_freed();
    let gc = Gc::new();

    let mut outer_pool = [None; 2];
    let outer_frame = ScopeFrame::new(&mut outer_pool);
    unsafe { gc.push_scope(NonNull::from(&outer_frame)) };

    let notify: Box<Stack<WeakHead>> = Box::new(Stack::new());
    let notify_ptr = NonNull::from(notify.as_ref());

    let mut inner_pool = [None; 2];
    let inner_frame = ScopeFrame::new(&mut inner_pool);
    unsafe { gc.push_scope(NonNull::from(&inner_frame)) };
    let target = cons(&gc, 9);
    unsafe { gc.protect(target) };

    let weak = Box::new(WeakHead::new(&WEAK_PAYLOAD_TYPE, Some(target), Some(notify_ptr)));
    let weak_ptr = NonNull::new(Box::into_raw(weak)).unwrap();
    unsafe { gc.init_weak(weak_ptr) };
    let weak_header = unsafe { NonNull::new_unchecked(&raw mut (*weak_ptr.as_ptr()).header) };

    // Root the weak head itself from the *outer* scope (protect always
    // targets the innermost one, so pop back to it first).
    unsafe { gc.pop_scope() };
    unsafe { gc.protect(weak_header) };
    unsafe { gc.push_scope(NonNull::from(&inner_frame)) };

    unsafe { gc.run() };
    assert_eq!(unsafe { weak_ptr.as_ref() }.key(), Some(target));
    assert!(notify.is_empty());

    // Close the inner scope: the target is now unrooted, but the weak head
    // itself is still rooted by the outer scope.
    unsafe { gc.pop_scope() };
    unsafe { gc.run() };
    assert_eq!(take_freed(), vec![9]);
    assert_eq!(unsafe { weak_ptr.as_ref() }.key(), None);
    assert!(!notify.is_empty());
    assert_eq!(notify.pop(), Some(weak_ptr));

    // `destroy` closes the remaining outer scope and runs a final cycle;
    // the weak head's own `free` is a no-op here, so the collector never
    // deallocates its backing storage — that's still ours to release.
    unsafe { gc.destroy() };
    unsafe { drop(Box::from_raw(weak_ptr.as_ptr())) };
}

/// Teardown: `destroy` releases every pin, forgets every root and scope,
/// and runs one last cycle that frees whatever remains.
#[test]
fn destroy_frees_everything_including_pinned_objects() {
    take_freed();
    let gc = Gc::new();
    let pinned = cons(&gc, 7);
    unsafe { gc.pin(pinned) };

    let mut pool = [None; 2];
    let frame = ScopeFrame::new(&mut pool);
    let scoped = cons(&gc, 8);
    unsafe {
        gc.push_scope(NonNull::from(&frame));
        gc.protect(scoped);
    }

    unsafe { gc.destroy() };
    let mut freed = take_freed();
    freed.sort();
    assert_eq!(freed, vec![7, 8]);
}
