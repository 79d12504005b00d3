//! CommandRunner port - runs `ExternalProcess` payloads.

use async_trait::async_trait;

use crate::domain::ExecutionError;

/// Runs a payload outside any transaction.
///
/// Implementations must report a non-zero exit as
/// `ExecutionError::NonZeroExit`. Side effects are the payload's business:
/// nothing here rolls them back.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<(), ExecutionError>;
}
