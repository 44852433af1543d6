use crate::broker::{ConsumeResult, MessageExt};
use async_trait::async_trait;

/// Where a batch came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeContext {
    pub group: String,
    pub topic: String,
    pub client_id: String,
}

/// Application callback for a push subscription.
///
/// Called once per delivered batch, possibly from several workers at the same
/// time, so implementations must not keep unsynchronized shared state. The
/// returned result applies to the whole batch.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn consume(&self, messages: &[MessageExt], context: &ConsumeContext) -> ConsumeResult;
}
