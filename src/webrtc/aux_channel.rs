//! Secondary data channel opened by the remote peer.
//!
//! Label and purpose are chosen by the peer (typically bulk file transfer).
//! Payloads bypass the control protocol and are handed to the session's
//! event loop as raw bytes.

use crate::webrtc::events::ChannelEvents;
use crate::webrtc::peer::{ChannelMessage, DataChannel, HandlerFuture};
use crate::webrtc::scheduler::TaskSubmitter;
use std::sync::{Arc, Mutex, PoisonError};

/// Holder for the session's auxiliary channel, filled in by the transport
#[derive(Clone, Default)]
pub struct AuxChannelSlot {
    inner: Arc<Mutex<Option<Arc<dyn DataChannel>>>>,
}

impl AuxChannelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<dyn DataChannel>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, channel: Arc<dyn DataChannel>) {
        let previous = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(channel);
        if let Some(previous) = previous {
            log::debug!("replacing auxiliary data channel {}", previous.label());
        }
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn label(&self) -> Option<String> {
        self.get().map(|channel| channel.label().to_string())
    }
}

/// Wire up a newly announced auxiliary channel and store it in `slot`.
pub fn attach_aux_channel(
    channel: Arc<dyn DataChannel>,
    slot: &AuxChannelSlot,
    events: Arc<dyn ChannelEvents>,
    submitter: &TaskSubmitter,
) {
    log::info!("Auxiliary data channel opened: {}", channel.label());

    channel.on_close(Box::new(|_: ()| -> HandlerFuture {
        log::info!("Auxiliary data channel closed");
        Box::pin(async {})
    }));

    channel.on_error(Box::new(|error: String| -> HandlerFuture {
        log::error!("Auxiliary data channel error: {}", error);
        Box::pin(async {})
    }));

    let submitter = submitter.clone();
    channel.on_message(Box::new(move |message: ChannelMessage| -> HandlerFuture {
        let events = Arc::clone(&events);
        let data = message.into_bytes();
        // Queued in arrival order; file chunks must not overtake each other.
        let _ = submitter.submit(async move {
            events.on_binary_message(data);
        });
        Box::pin(async {})
    }));

    slot.set(channel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDataChannel;
    use crate::webrtc::events::{EventForwarder, SessionEvent};
    use bytes::Bytes;

    #[tokio::test]
    async fn test_aux_payloads_reach_event_loop() {
        let (events, mut rx) = EventForwarder::channel();
        let slot = AuxChannelSlot::new();
        let channel = Arc::new(MockDataChannel::new("file-transfer"));

        attach_aux_channel(
            channel.clone(),
            &slot,
            Arc::new(events),
            &TaskSubmitter::current().unwrap(),
        );
        assert_eq!(slot.label().as_deref(), Some("file-transfer"));

        channel
            .deliver(ChannelMessage::Binary(Bytes::from_static(b"\x01\x02")))
            .await;
        channel
            .deliver(ChannelMessage::Text("chunk".to_string()))
            .await;

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::DataBytes(Bytes::from_static(b"\x01\x02")))
        );
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::DataBytes(Bytes::from_static(b"chunk")))
        );
    }

    #[tokio::test]
    async fn test_close_and_error_are_only_logged() {
        let (events, mut rx) = EventForwarder::channel();
        let slot = AuxChannelSlot::new();
        let channel = Arc::new(MockDataChannel::new("bulk"));
        attach_aux_channel(
            channel.clone(),
            &slot,
            Arc::new(events),
            &TaskSubmitter::current().unwrap(),
        );

        channel.fire_error("sctp abort").await;
        channel.fire_close().await;
        assert!(rx.try_recv().is_err());

        slot.clear();
        assert!(slot.get().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_aux_payloads_keep_arrival_order() {
        let (events, mut rx) = EventForwarder::channel();
        let slot = AuxChannelSlot::new();
        let channel = Arc::new(MockDataChannel::new("file-transfer"));
        attach_aux_channel(
            channel.clone(),
            &slot,
            Arc::new(events),
            &TaskSubmitter::current().unwrap(),
        );

        for chunk in 0..100u8 {
            channel
                .deliver(ChannelMessage::Binary(Bytes::from(vec![chunk])))
                .await;
        }

        for chunk in 0..100u8 {
            let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
                .await
                .unwrap();
            assert_eq!(event, Some(SessionEvent::DataBytes(Bytes::from(vec![chunk]))));
        }
    }
}
