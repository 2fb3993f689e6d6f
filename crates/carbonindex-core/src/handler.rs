//! Event handler trait.

use async_trait::async_trait;

use crate::chain::ChainEvent;
use crate::error::IndexerError;

/// Reacts to a single decoded chain event.
///
/// The live listener calls this once per event. Errors are logged by the
/// caller and never stop the listener.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ChainEvent) -> Result<(), IndexerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::EventPayload;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Counter(Arc<AtomicU32>);

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _e: &ChainEvent) -> Result<(), IndexerError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_is_object_safe() {
        let count = Arc::new(AtomicU32::new(0));
        let handler: Arc<dyn EventHandler> = Arc::new(Counter(count.clone()));

        let event = ChainEvent::new(
            10,
            EventPayload::FarmRegistered {
                farm_id: 1,
                farmer: "0xabc".into(),
            },
        );
        handler.handle(&event).await.unwrap();
        handler.handle(&event).await.unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
