//! Ports - the seams to the outside world.
//!
//! Each trait stands for an external collaborator (the task store, the
//! execution substrate, the OS process runner, the wall clock). The
//! scheduler and worker code only talk to these traits.

pub mod clock;
pub mod launcher;
pub mod runner;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::launcher::{Launcher, PendingStart};
pub use self::runner::CommandRunner;
pub use self::task_store::{ClaimRequest, TaskStore};
