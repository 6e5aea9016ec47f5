//! Single-link traffic simulator for the H-FSC scheduler.
//!
//! Seeded traffic sources feed a class hierarchy; a link of fixed rate
//! takes one packet at a time from the scheduler. The run produces a
//! [`Report`] with per-class throughput, queueing delay and the criterion
//! that served each packet.
//!
//! Time is either virtual (jumping from event to event, fully
//! reproducible) or wall-clock.

pub mod clock;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod traffic;

pub use clock::{TickSource, VirtualClock, WallClock};
pub use report::{ClassReport, Report};
pub use runner::Simulation;
pub use scenario::{ScenarioConfig, SourceConfig};
pub use traffic::TrafficSource;
