//! Send-side flow control for the data channel.
//!
//! A single `send` call must never queue unbounded data: every outbound
//! slice is split into ≤ [`MAX_CHUNK_SIZE`] messages, and after each
//! message the sender pauses whenever the channel's SCTP send buffer
//! holds more than [`BUFFERED_AMOUNT_HIGH`] bytes. The pause ends when
//! the buffered-amount-low notification reports the buffer has drained
//! to [`BUFFERED_AMOUNT_LOW`], or after [`DRAIN_FALLBACK_TIMEOUT`] if
//! the transport never delivers the notification.

use crate::core::config::{
    BUFFERED_AMOUNT_HIGH, BUFFERED_AMOUNT_LOW, DRAIN_FALLBACK_TIMEOUT, MAX_CHUNK_SIZE,
};
use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;
use webrtc::data_channel::RTCDataChannel;

pub struct FlowController {
    dc: Arc<RTCDataChannel>,
    drained: Arc<Notify>,
}

impl FlowController {
    /// Wrap a data channel, registering the low-water-mark notification.
    pub async fn new(dc: Arc<RTCDataChannel>) -> Self {
        dc.set_buffered_amount_low_threshold(BUFFERED_AMOUNT_LOW)
            .await;

        let drained = Arc::new(Notify::new());
        let notify = drained.clone();
        dc.on_buffered_amount_low(Box::new(move || {
            let notify = notify.clone();
            Box::pin(async move {
                notify.notify_waiters();
            })
        }))
        .await;

        Self { dc, drained }
    }

    pub fn channel(&self) -> &Arc<RTCDataChannel> {
        &self.dc
    }

    /// Send `data` as a sequence of capped binary messages, pausing
    /// against the high water mark between messages.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        for part in data.chunks(MAX_CHUNK_SIZE) {
            self.dc.send(&Bytes::copy_from_slice(part)).await?;
            if self.dc.buffered_amount().await > BUFFERED_AMOUNT_HIGH {
                self.wait_for_drain().await;
            }
        }
        Ok(())
    }

    /// Block until the outbound buffer is fully flushed (or the channel
    /// leaves the open state). Used before teardown so the tail of a
    /// transfer is not discarded with the connection.
    pub async fn flush(&self) {
        use webrtc::data_channel::data_channel_state::RTCDataChannelState;
        while self.dc.ready_state() == RTCDataChannelState::Open
            && self.dc.buffered_amount().await > 0
        {
            let _ = tokio::time::timeout(DRAIN_FALLBACK_TIMEOUT, self.drained.notified()).await;
        }
    }

    /// Suspend until the buffer drains to the low water mark, with the
    /// bounded timeout fallback so an unsupported notification cannot
    /// deadlock the sender.
    async fn wait_for_drain(&self) {
        loop {
            let buffered = self.dc.buffered_amount().await;
            if buffered <= BUFFERED_AMOUNT_LOW {
                return;
            }
            trace!(event = "backpressure_wait", buffered, "Outbound buffer above high water mark");
            if tokio::time::timeout(DRAIN_FALLBACK_TIMEOUT, self.drained.notified())
                .await
                .is_err()
            {
                // No notification within the bound: resume anyway.
                return;
            }
        }
    }
}

/// Split lengths exactly as [`FlowController::send`] does. Factored out
/// so the chunking contract is testable without a live channel.
pub fn chunk_sizes(len: usize) -> Vec<usize> {
    let mut sizes = Vec::with_capacity(len.div_ceil(MAX_CHUNK_SIZE));
    let mut remaining = len;
    while remaining > 0 {
        let part = remaining.min(MAX_CHUNK_SIZE);
        sizes.push(part);
        remaining -= part;
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_chunk_exceeds_the_cap() {
        for len in [1usize, 1000, 65_535, 65_536, 65_537, 200_000, 1_000_000] {
            let sizes = chunk_sizes(len);
            assert!(sizes.iter().all(|&s| s <= MAX_CHUNK_SIZE), "len={len}");
            assert_eq!(sizes.iter().sum::<usize>(), len, "len={len}");
        }
    }

    #[test]
    fn spec_example_splits_into_three_full_chunks_and_a_tail() {
        let sizes = chunk_sizes(200_000);
        assert_eq!(sizes, vec![65_536, 65_536, 65_536, 3_152]);
    }

    #[test]
    fn empty_input_sends_nothing() {
        assert!(chunk_sizes(0).is_empty());
    }
}
