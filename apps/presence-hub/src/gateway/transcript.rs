//! Optional durable transcript of accepted chat messages.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::events::HubMessage;

/// Receives every accepted chat message, one at a time, from a dedicated
/// task. Failures are the sink's to log.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn store(&self, message: HubMessage);
}

/// Hub-side end of the transcript queue. A single task drains it into the
/// sink, so the hub only ever does a non-blocking enqueue.
#[derive(Clone)]
pub struct TranscriptWriter {
    tx: mpsc::Sender<HubMessage>,
}

impl TranscriptWriter {
    /// Spawn the draining task on the current runtime.
    pub fn spawn(sink: Arc<dyn TranscriptSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<HubMessage>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                sink.store(message).await;
            }
            tracing::debug!("transcript writer stopped");
        });
        Self { tx }
    }

    /// Queue a message for the sink. Returns `false` if it was dropped
    /// because the sink is behind or gone.
    pub fn submit(&self, message: HubMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                tracing::warn!(
                    message_id = message.message_id,
                    "transcript queue full; message not persisted"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
