//! Change-feed plumbing: event shapes, the transport seam, reconnection
//! policy and the subscription manager that multiplexes feeds to stores.

pub mod backoff;
pub mod event;
pub mod manager;
pub mod memory;
pub mod transport;

pub use backoff::{BackoffPolicy, ReconnectPolicy};
pub use event::{ChangeEvent, ChangeKind, RawChangeEvent};
pub use manager::{ConnectionState, SubscriptionManager, Subscription};
pub use memory::MemoryFeed;
pub use transport::{ChannelStatus, FeedChannel, FeedMessage, FeedTransport};
