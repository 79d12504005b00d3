//! Impls - port implementations that live in the core crate.
//!
//! # Included
//! - **InMemoryTaskStore**: store for tests and embedding
//! - **InProcessLauncher**: one tokio task per worker
//! - **ProcessLauncher**: one child process per worker
//! - **ShellRunner**: `ExternalProcess` payloads via `sh -c`
//!
//! The PostgreSQL store lives in `bobbin-pg`.

pub mod inproc_launcher;
pub mod memory_store;
pub mod process_launcher;
pub mod script;
pub mod shell_runner;

pub use self::inproc_launcher::InProcessLauncher;
pub use self::memory_store::InMemoryTaskStore;
pub use self::process_launcher::{ProcessLauncher, parse_start_line, start_line};
pub use self::shell_runner::ShellRunner;
