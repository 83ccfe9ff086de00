use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use crate::collector::Analyzer;

/// Accepts any JSON payload and logs it
///
/// Used for channels whose events are only inspected, e.g. while bringing up
/// a new discovery channel.
#[derive(Debug, Clone)]
pub struct LogAnalyzer {
    porter: String,
}

impl LogAnalyzer {
    pub fn new(porter: impl Into<String>) -> Self {
        Self {
            porter: porter.into(),
        }
    }
}

#[async_trait]
impl Analyzer for LogAnalyzer {
    async fn analyze(&self, message: &str) -> anyhow::Result<()> {
        let value: serde_json::Value =
            serde_json::from_str(message).context("payload is not valid JSON")?;
        debug!(porter = %self.porter, "event: {value}");
        Ok(())
    }
}
