//! Strata Garbage Collector
//!
//! Node pools and a non-moving mark-and-sweep collector for a series-based
//! language runtime.
//!
//! # Architecture
//!
//! Every runtime object is a fixed-width *node* drawn from a pool:
//!
//! - **SERIES pool**: resizable containers (blocks, strings, contexts,
//!   maps, pairings). Content longer than one cell lives in a buffer from
//!   one of the size-class pools, or the SYSTEM pool when it is too big
//!   for any class.
//!
//! - **GOB / LIBRARY / ROUTINE pools**: GUI objects and foreign-function
//!   descriptors, each with their own node type.
//!
//! Nodes are *unmanaged* when allocated and owned by the caller. Handing a
//! node to [`Heap::manage`] makes the collector responsible for it; from
//! then on it lives exactly as long as it is reachable from a root.
//!
//! # Collection
//!
//! Allocation debits a byte budget (the ballast). When it runs out a cycle
//! is requested and runs at the next [`Heap::safe_point`]. A cycle marks
//! from the guard stacks, root pairings, distinguished globals, the host
//! mark hook, pending device requests and the frame chain, then sweeps
//! every pool.
//!
//! # Usage
//!
//! ```ignore
//! use strata_gc::{Heap, Value};
//!
//! let mut heap = Heap::with_defaults();
//!
//! let block = heap.make_array(4);
//! heap.append_value(block, Value::Integer(1));
//! heap.manage(block);
//! heap.add_global(Value::block(block));
//!
//! heap.recycle(false); // block survives
//! heap.shutdown();
//! ```
//!
//! # Invariant violations
//!
//! Reaching an unmanaged node from a managed one, marking a varlist
//! without its keylist, re-entering a cycle and unbalanced guards are bugs
//! in the caller. They are logged at `error` and then panic.

#![warn(clippy::all)]

/// Log an invariant violation and panic with the same message.
macro_rules! gc_panic {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        tracing::error!(%message, "gc invariant violated");
        panic!("{}", message)
    }};
}
pub(crate) use gc_panic;

pub mod collector;
pub mod config;
pub mod device;
pub mod dump;
pub mod foreign;
pub mod frame;
pub mod gob;
pub mod heap;
pub mod node;
pub mod pool;
pub mod roots;
pub mod series;
pub mod trace;
pub mod value;

mod stats;

// Re-exports for convenient access
pub use collector::{AdaptiveBallast, BallastPolicy, FixedBallast, GcState};
pub use config::{BallastPolicyKind, ConfigError, GcConfig};
pub use device::{DeviceHandle, DeviceTable};
pub use dump::{DumpSink, MemDump, NodeAddr};
pub use foreign::{ForeignHost, LibraryId, Routine, RoutineId, StructField, StructValue};
pub use frame::{Feed, Frame, FrameId, FrameMode};
pub use gob::GobId;
pub use heap::Heap;
pub use node::{Detected, NodeFlags, NodeHeader, NodeLayout};
pub use pool::{PoolError, PoolSpec, PoolStats};
pub use roots::{GuardScope, RootProvider};
pub use series::{ContextRef, SeriesFlags, SeriesId};
pub use stats::{GcStats, GcTimer};
pub use trace::{Trace, Tracer};
pub use value::{Binding, Cell, ContextKind, FuncBody, FunctionValue, Symbol, Value};
