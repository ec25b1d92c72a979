//! Cross-feature celebration trigger bus
//!
//! Any feature area can ask for a celebration to open without going
//! through the notification stream. The bus is a typed broadcast
//! channel owned by the celebration surface; sessions subscribe and
//! translate requests into overlay opens.

use tokio::sync::broadcast;
use tracing::debug;

use crate::celebration::CelebrationRequest;

const DEFAULT_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct CelebrationBus {
    sender: broadcast::Sender<CelebrationRequest>,
}

impl CelebrationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Ask every listening session to open a celebration. Returns how
    /// many listeners received the request; zero listeners is normal
    /// (nobody is mounted) and not an error.
    pub fn request_open(&self, request: CelebrationRequest) -> usize {
        match self.sender.send(request) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("Celebration requested with no session listening");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CelebrationRequest> {
        self.sender.subscribe()
    }
}

impl Default for CelebrationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_reaches_subscriber() {
        let bus = CelebrationBus::default();
        let mut rx = bus.subscribe();

        let delivered = bus.request_open(CelebrationRequest::by_id("n1"));
        assert_eq!(delivered, 1);

        let request = rx.recv().await.unwrap();
        assert_eq!(request.id.as_deref(), Some("n1"));
    }

    #[tokio::test]
    async fn test_no_listener_is_not_an_error() {
        let bus = CelebrationBus::default();
        assert_eq!(bus.request_open(CelebrationRequest::by_id("n1")), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_requests() {
        let bus = CelebrationBus::default();
        bus.request_open(CelebrationRequest::by_id("n1"));

        let mut rx = bus.subscribe();
        bus.request_open(CelebrationRequest::by_id("n2"));
        assert_eq!(rx.recv().await.unwrap().id.as_deref(), Some("n2"));
    }
}
