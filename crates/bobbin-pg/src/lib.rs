//! bobbin-pg
//!
//! PostgreSQL implementation of `bobbin_core::ports::TaskStore`.

mod rows;
pub mod store;

pub use self::store::PgTaskStore;
