use async_trait::async_trait;

/// Per-message business logic applied by the worker pool
///
/// Implementations are shared by every worker of a porter and called
/// concurrently. The message is borrowed for the duration of the call only.
/// An `Err` is logged together with the raw payload and counted; the message
/// is not retried.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, message: &str) -> anyhow::Result<()>;
}
