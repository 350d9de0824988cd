//! The adapter contract consumed by the orchestrator.

use async_trait::async_trait;

use crate::error::AdapterResult;

/// Reads and sets the size of one worker fleet on one platform.
#[async_trait]
pub trait InfrastructureAdapter: Send + Sync {
    /// Short platform name for logs, e.g. "heroku".
    fn name(&self) -> &str;

    /// Everything missing or malformed in this adapter's settings.
    fn configuration_errors(&self) -> Vec<String>;

    fn is_configured(&self) -> bool {
        self.configuration_errors().is_empty()
    }

    /// Current worker count. A fleet that does not exist counts as zero.
    async fn current_workers(&self) -> AdapterResult<u32>;

    /// Set the worker count and return the count the platform confirmed.
    ///
    /// In dry-run mode nothing is sent and `quantity` is returned as is.
    async fn scale(&self, quantity: u32) -> AdapterResult<u32>;
}
