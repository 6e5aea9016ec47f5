//! # hfsc-core
//!
//! Hierarchical Fair Service Curve packet scheduler.
//!
//! Each class of a tree gets up to three service curves: a real-time curve
//! bounding its delay, a link-sharing curve setting its share of the excess
//! bandwidth among siblings, and an upper-limit curve capping its rate. The
//! scheduler is a synchronous state machine: callers enqueue packets, call
//! `dequeue` at every transmit opportunity and pass the current time in
//! microseconds on every call.
//!
//! ## Crate structure
//!
//! - [`curve`] — Service curves, fixed-point conversion, segment evaluation
//! - [`runtime_curve`] — Anchored curves and their pointwise minimum
//! - [`list`] — Eligible list and per-class active lists
//! - [`class`] — Class arena entries and curve state
//! - [`queue`] — Leaf queue trait and the FIFO implementation
//! - [`scheduler`] — Enqueue/dequeue, activation and accounting
//! - [`admin`] — Class creation, curve changes, deletion
//! - [`stats`] — Per-class snapshots
//! - [`config`] — TOML hierarchy description
//! - [`shared`] — Mutex-guarded handle for multi-threaded callers
//! - [`error`] — Administrative errors

pub mod admin;
pub mod class;
pub mod config;
pub mod curve;
pub mod error;
pub mod list;
pub mod queue;
pub mod runtime_curve;
pub mod scheduler;
pub mod shared;
pub mod stats;

pub use class::{ClassCurves, ClassId};
pub use config::{HierarchyConfig, LoadError};
pub use curve::ServiceCurve;
pub use error::{BusyError, ConfigError, Error};
pub use queue::{FifoQueue, LeafQueue};
pub use scheduler::{Dequeue, DropReason, Scheduler, Verdict, Watchdog};
pub use shared::SharedScheduler;
pub use stats::ClassStats;
