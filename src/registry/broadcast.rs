//! Live fan-out
//!
//! The subscriber set is copied under the stream's read lock and delivered
//! to after the lock is released, so joins and leaves never race with the
//! iteration. Delivery is `try_send` into each subscriber's bounded queue:
//! a full or closed queue costs that subscriber the message and nothing else.

use tokio::sync::mpsc::error::TrySendError;

use super::StreamHandle;
use crate::protocol::message::RtmpMessage;
use crate::storage::RecordingSink;

/// Deliver `message` to every subscriber and the recording sink, if any
///
/// Returns how many subscribers accepted the message.
pub async fn broadcast(
    stream: &StreamHandle,
    message: &RtmpMessage,
    recorder: Option<&mut (dyn RecordingSink + 'static)>,
) -> usize {
    let (key, subscribers) = {
        let stream = stream.read().await;
        (stream.key().clone(), stream.subscribers_snapshot())
    };

    let mut delivered = 0;
    for (session_id, tx) in subscribers {
        match tx.try_send(message.clone()) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(stream = %key, session_id = session_id, "Subscriber queue full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(stream = %key, session_id = session_id, "Subscriber gone");
            }
        }
    }

    if let Some(sink) = recorder {
        if let Err(e) = sink.write(message).await {
            tracing::warn!(stream = %key, error = %e, "Recording write failed");
        }
    }

    tracing::trace!(
        stream = %key,
        message_type = message.header.message_type,
        timestamp = message.timestamp(),
        delivered = delivered,
        "Broadcast"
    );
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{StreamKey, StreamRegistry};
    use crate::storage::{Application, MemoryStore};
    use bytes::Bytes;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_broadcast_survives_bad_subscribers() {
        let registry = StreamRegistry::new();
        let stream = registry.get_or_create(&StreamKey::new("live", "cam1")).await;

        let (ok_tx, mut ok_rx) = mpsc::channel(8);
        let (full_tx, _full_rx) = mpsc::channel(1);
        let (closed_tx, closed_rx) = mpsc::channel(8);
        drop(closed_rx);
        full_tx.try_send(RtmpMessage::empty_audio()).unwrap();

        {
            let mut s = stream.write().await;
            s.add_subscriber(1, full_tx);
            s.add_subscriber(2, closed_tx);
            s.add_subscriber(3, ok_tx);
        }

        let msg = RtmpMessage::video(40, Bytes::from_static(&[0x27, 0x01, 0]));
        assert_eq!(broadcast(&stream, &msg, None).await, 1);
        assert_eq!(ok_rx.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn test_broadcast_writes_recording() {
        let registry = StreamRegistry::new();
        let stream = registry.get_or_create(&StreamKey::new("vod", "rec")).await;
        let store = MemoryStore::new("vod");
        let mut sink = store.open_writer("rec").await.unwrap();

        let msg = RtmpMessage::audio(0, Bytes::from_static(&[0xAF, 0x01, 1]));
        assert_eq!(broadcast(&stream, &msg, Some(sink.as_mut())).await, 0);
        sink.close().await.unwrap();
        assert_eq!(store.recording("rec").await.unwrap(), vec![msg]);
    }
}
