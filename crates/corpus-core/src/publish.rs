// corpus-core/src/publish.rs
//! Progress broadcasting

use rpc::ProgressMessage;
use tokio::sync::broadcast;

pub trait Publisher: Send + Sync {
    fn publish(&self, channel: &str, message: &ProgressMessage);
}

/// A published message together with its channel
#[derive(Debug, Clone)]
pub struct Published {
    pub channel: String,
    pub message: ProgressMessage,
}

/// Fans progress out to any number of in-process subscribers
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<Published>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, channel: &str, message: &ProgressMessage) {
        tracing::debug!("[Publish] {} -> {} ({} results)", channel, message.status, message.total_results_so_far);
        // no subscribers is not an error
        let _ = self.sender.send(Published {
            channel: channel.to_string(),
            message: message.clone(),
        });
    }
}
