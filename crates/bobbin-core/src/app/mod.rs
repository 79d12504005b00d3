//! App - scheduling and execution logic built on the ports.
//!
//! # Components
//! - **Scheduler**: the poll loop (wait → gate → claim → dispatch)
//! - **ClaimProtocol**: skip-claimed, ordered, leased claims
//! - **Dispatcher**: spawn and bounded start confirmation
//! - **Worker**: load → execute → terminal status, inside one execution context
//! - **LiveConfig** / **Shutdown**: the loop's ephemeral state

pub mod builder;
pub mod claim;
pub mod config;
pub mod dispatcher;
pub mod gate;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::claim::ClaimProtocol;
pub use self::config::{LiveConfig, SchedulerConfig};
pub use self::dispatcher::Dispatcher;
pub use self::gate::available_slots;
pub use self::scheduler::{CycleReport, Scheduler, SchedulerExit};
pub use self::shutdown::Shutdown;
pub use self::worker::Worker;
