//! Domain model: identifiers, task rows, lifecycle state, outcomes, errors.

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use self::errors::{DispatchError, ExecutionError, LaunchError, StoreError};
pub use self::ids::{ExecutorId, InstanceId, TaskId};
pub use self::outcome::{ExecutionOutcome, WorkerExit};
pub use self::state::{TaskStatus, TerminalStatus, UnknownStatus};
pub use self::task::{ClaimedTask, LoadedTask, NewTask, TaskRecord, TaskType};
