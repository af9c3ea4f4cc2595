//! A precise, stop-the-world tracing garbage collector for embedding in a
//! single-threaded mutator (an interpreter, a symbolic engine, a graph
//! workload — anything that allocates linked heap objects and wants someone
//! else to decide when they die).
//!
//! ## What this crate is
//!
//! - **Precise, not conservative.** Roots are named explicitly — via
//!   lexically scoped pools ([`ScopeFrame`]), long-lived callbacks
//!   ([`RootHead`]), or pins ([`Gc::pin`]) — never guessed from a stack scan.
//! - **Stop-the-world, synchronous.** A cycle runs start to finish inside a
//!   single [`Gc::run`] call, at a safepoint the mutator chooses. There is no
//!   concurrent, incremental, or generational collection, and objects never
//!   move.
//! - **Intrusive.** [`GcHeader`] is a field the host embeds in its own
//!   objects; the collector tracks membership in `heap`/`stage`/`pinned` via
//!   pointers it threads through those headers, never a side table.
//!
//! ## What this crate is not
//!
//! It does not allocate. The host owns raw storage for every object it hands
//! to [`Gc::init_object`]; the collector only ever tracks and, eventually,
//! frees it via the object's [`TypeDescriptor::free`]. It is not `Send` or
//! `Sync`: a host with multiple mutator threads owns one [`Gc`] per thread or
//! serializes access itself.
//!
//! ## Layout
//!
//! - [`list`] / [`stack`] — the two intrusive containers every other
//!   component is built from.
//! - [`header`] — [`GcHeader`] and [`TypeDescriptor`], the per-object
//!   preamble and its mark/free vtable.
//! - [`root`] / [`scope`] — the long-lived and lexically-scoped halves of the
//!   root set.
//! - [`weak`] — [`WeakHead`], the weak-reference wrapper and its resolution
//!   protocol.
//! - [`collector`] — [`Gc`], the driver that ties the above into mark →
//!   weak-fixpoint → sweep.
//! - [`error`] — [`GcError`], the typed precondition-violation surface used
//!   by debug-mode assertions.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod collector;
pub mod error;
pub mod header;
pub mod list;
pub mod root;
pub mod scope;
pub mod stack;
pub mod weak;

pub use collector::{Gc, GcConfig, GcStats};
pub use error::GcError;
pub use header::{GcHeader, TypeDescriptor};
pub use list::{Link, Linked};
pub use root::RootHead;
pub use scope::ScopeFrame;
pub use stack::{Stack, StackLink, StackLinked};
pub use weak::WeakHead;
