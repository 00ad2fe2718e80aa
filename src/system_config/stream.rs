//! Configuration change stream.
//!
//! Subscribers see the snapshot current at subscribe time first, then every
//! published change. A slow subscriber only ever observes the latest value.

use std::sync::Arc;
use tokio::sync::watch;

use super::SystemConfig;

#[derive(Clone)]
pub struct ConfigChannel {
    sender: Arc<watch::Sender<Arc<SystemConfig>>>,
}

impl ConfigChannel {
    pub fn new(initial: SystemConfig) -> Self {
        let (sender, _) = watch::channel(Arc::new(initial));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Replace the current snapshot and wake every subscriber.
    pub fn publish(&self, config: Arc<SystemConfig>) {
        self.sender.send_replace(config);
    }

    pub fn current(&self) -> Arc<SystemConfig> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> ConfigSubscription {
        let mut receiver = self.sender.subscribe();
        receiver.mark_changed();
        ConfigSubscription { receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct ConfigSubscription {
    receiver: watch::Receiver<Arc<SystemConfig>>,
}

impl ConfigSubscription {
    /// Wait for the next snapshot. `None` once the channel is gone.
    pub async fn next(&mut self) -> Option<Arc<SystemConfig>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_subscriber_sees_current_then_changes() {
        let channel = ConfigChannel::new(SystemConfig::default());
        let mut subscription = channel.subscribe();

        let first = subscription.next().await.unwrap();
        assert_eq!(*first, SystemConfig::default());

        let mut changed = SystemConfig::default();
        changed.ffmpeg.crf = 30;
        channel.publish(Arc::new(changed.clone()));

        let second = subscription.next().await.unwrap();
        assert_eq!(second.ffmpeg.crf, 30);
        assert_eq!(channel.current().ffmpeg.crf, 30);
    }

    #[tokio::test]
    async fn test_no_delivery_without_change() {
        let channel = ConfigChannel::new(SystemConfig::default());
        let mut subscription = channel.subscribe();
        subscription.next().await.unwrap();

        assert!(timeout(Duration::from_millis(20), subscription.next())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_receiver() {
        let channel = ConfigChannel::new(SystemConfig::default());
        let subscription = channel.subscribe();
        assert_eq!(channel.subscriber_count(), 1);

        subscription.unsubscribe();
        assert_eq!(channel.subscriber_count(), 0);
        channel.publish(Arc::new(SystemConfig::default()));
    }

    #[tokio::test]
    async fn test_next_ends_when_channel_dropped() {
        let channel = ConfigChannel::new(SystemConfig::default());
        let mut subscription = channel.subscribe();
        subscription.next().await.unwrap();
        drop(channel);

        assert!(subscription.next().await.is_none());
    }
}
