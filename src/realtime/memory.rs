use super::event::RawChangeEvent;
use super::transport::{ChannelStatus, FeedChannel, FeedMessage, FeedTransport};
use crate::core::{Result, SyncError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

/// In-process change feed.
///
/// Acts as the upstream for tests and embedded setups: events are pushed with
/// [`MemoryFeed::publish`], and outages are simulated with
/// [`MemoryFeed::set_online`], [`MemoryFeed::fail_next_connects`] and
/// [`MemoryFeed::break_channels`].
#[derive(Debug)]
pub struct MemoryFeed {
    state: Mutex<FeedState>,
}

#[derive(Debug)]
struct FeedState {
    online: bool,
    connected: bool,
    failing_connects: u32,
    connect_attempts: u32,
    channels: HashMap<String, Vec<mpsc::UnboundedSender<FeedMessage>>>,
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FeedState {
                online: true,
                connected: false,
                failing_connects: 0,
                connect_attempts: 0,
                channels: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Going offline errors every live channel and rejects new connections.
    pub fn set_online(&self, online: bool) {
        let mut state = self.state();
        state.online = online;
        if !online {
            state.connected = false;
            for (_, senders) in state.channels.drain() {
                for sender in senders {
                    let _ = sender.send(FeedMessage::Status(ChannelStatus::ChannelError));
                }
            }
        }
    }

    /// The next `count` connection attempts fail even while online.
    pub fn fail_next_connects(&self, count: u32) {
        self.state().failing_connects = count;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    /// Number of open channels for `collection`.
    pub fn active_channels(&self, collection: &str) -> usize {
        let mut state = self.state();
        match state.channels.get_mut(collection) {
            Some(senders) => {
                senders.retain(|s| !s.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    /// Delivers `event` to every channel of `event.collection`.
    ///
    /// Returns how many channels received it.
    pub fn publish(&self, event: RawChangeEvent) -> usize {
        let mut state = self.state();
        let Some(senders) = state.channels.get_mut(&event.collection) else {
            return 0;
        };
        senders.retain(|s| s.send(FeedMessage::Change(event.clone())).is_ok());
        senders.len()
    }

    /// Signals `ChannelError` on the collection's channels and drops them.
    pub fn break_channels(&self, collection: &str) {
        self.end_channels(collection, ChannelStatus::ChannelError);
    }

    /// Signals `Closed` on the collection's channels and drops them.
    pub fn close_channels(&self, collection: &str) {
        self.end_channels(collection, ChannelStatus::Closed);
    }

    fn end_channels(&self, collection: &str, status: ChannelStatus) {
        if let Some(senders) = self.state().channels.remove(collection) {
            for sender in senders {
                let _ = sender.send(FeedMessage::Status(status));
            }
        }
    }
}

#[async_trait]
impl FeedTransport for MemoryFeed {
    async fn connect(&self) -> Result<()> {
        let mut state = self.state();
        state.connect_attempts += 1;
        if !state.online {
            return Err(SyncError::Transport("change feed unreachable".to_string()));
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(SyncError::Transport("connection refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<FeedChannel> {
        let mut state = self.state();
        if !state.online || !state.connected {
            return Err(SyncError::Subscription(format!(
                "cannot subscribe to '{}': not connected",
                collection
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(FeedMessage::Status(ChannelStatus::Subscribed));
        state
            .channels
            .entry(collection.to_string())
            .or_default()
            .push(tx);

        Ok(FeedChannel {
            collection: collection.to_string(),
            messages: rx,
        })
    }

    fn release(&self, collection: &str) {
        self.state().channels.remove(collection);
    }

    async fn disconnect(&self) {
        let mut state = self.state();
        state.connected = false;
        state.channels.clear();
    }
}
