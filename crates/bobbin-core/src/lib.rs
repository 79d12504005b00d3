//! bobbin-core
//!
//! Core of the bobbin persistent-queue task scheduler.
//!
//! # Modules
//! - **domain**: task rows, ids, lifecycle state, outcomes, errors
//! - **ports**: the seams (TaskStore, Launcher, CommandRunner, Clock)
//! - **app**: scheduler loop, claim protocol, dispatcher, worker execution
//! - **impls**: in-memory store, launchers, shell runner
//! - **observability**: status counts

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use self::app::{
    LiveConfig, Scheduler, SchedulerBuilder, SchedulerConfig, SchedulerExit, Shutdown, Worker,
};
pub use self::domain::{NewTask, TaskId, TaskStatus, TaskType, WorkerExit};
pub use self::observability::StatusCounts;
