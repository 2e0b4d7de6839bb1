use super::event::RawChangeEvent;
use crate::core::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Channel lifecycle signal reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    Closed,
}

#[derive(Debug, Clone)]
pub enum FeedMessage {
    Status(ChannelStatus),
    Change(RawChangeEvent),
}

/// Live subscription to one collection's change feed.
///
/// Messages arrive in the order the upstream delivered them. The stream
/// ending is treated like `Closed`.
#[derive(Debug)]
pub struct FeedChannel {
    pub collection: String,
    pub messages: mpsc::UnboundedReceiver<FeedMessage>,
}

/// Bidirectional change-feed connection.
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    /// Establishes (or re-establishes) the underlying connection.
    async fn connect(&self) -> Result<()>;

    /// Opens a channel for `collection`. Requires a prior successful `connect`.
    async fn subscribe(&self, collection: &str) -> Result<FeedChannel>;

    /// Releases every channel held for `collection`.
    fn release(&self, collection: &str);

    async fn disconnect(&self);
}
