//! Domain identifiers (strongly-typed IDs).
//!
//! Task rows are keyed by the store's integer primary key, and executors are
//! identified by whatever the execution substrate hands back (a pid for child
//! processes, a counter for in-process workers). Both are `i64` underneath.
//!
//! ## Phantom Type pattern
//! `Id<T>` carries the shared implementation, while `T` is a marker type that
//! only exists at compile time (PhantomData). `TaskId` and `ExecutorId` can
//! therefore never be mixed up even though they share a representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each ID kind.
///
/// Provides the prefix used by `Display` ("task-", "executor-").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic integer ID.
///
/// `T` is PhantomData: no runtime cost, compile-time separation only.
#[repr(transparent)]
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: i64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

// Manual impls: derive would require `T: Clone + Copy`.
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> Id<T> {
    pub const fn new(value: i64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    /// Raw value, as stored in the task table.
    pub const fn value(&self) -> i64 {
        self.value
    }
}

impl<T: IdMarker> From<i64> for Id<T> {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

// ========================================
// Marker types
// ========================================

/// Marker for task rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Marker for worker execution contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Executor {}

impl IdMarker for Executor {
    fn prefix() -> &'static str {
        "executor-"
    }
}

/// Identifier of a task row.
pub type TaskId = Id<Task>;

/// Identity of the worker context that claimed/ran a task (e.g. a pid).
pub type ExecutorId = Id<Executor>;

/// Identity of one scheduler instance.
///
/// Used as the claim owner so concurrent schedulers against the same store
/// can tell their claims apart. ULIDs sort by creation time, which keeps log
/// output from several instances easy to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Ulid);

impl InstanceId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sched-{}", self.0)
    }
}
