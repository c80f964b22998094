//! Ordered decode-then-dispatch pipeline for inbound frames.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt as _;
use tokio::sync::mpsc;

use super::error::WsError;
use super::traits::{Codec, Dispatcher};
use super::transport::Frame;
use crate::Result;

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// Single-consumer queue drained by one task.
///
/// Frame *N + 1* is not decoded until frame *N* has been dispatched or has
/// failed, so dispatch order is arrival order whatever the decode latency.
/// A failing or panicking frame is logged and counted; the drain continues.
#[derive(Debug, Clone)]
pub struct MessageSequencer {
    frames_tx: mpsc::UnboundedSender<Frame>,
    counters: Arc<Counters>,
}

impl MessageSequencer {
    /// Starts the drain task. It stops once every clone of the sequencer is dropped.
    #[must_use]
    pub fn spawn(codec: Arc<dyn Codec>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        tokio::spawn(Self::drain(
            frames_rx,
            codec,
            dispatcher,
            Arc::clone(&counters),
        ));

        Self {
            frames_tx,
            counters,
        }
    }

    pub fn enqueue(&self, frame: Frame) -> Result<()> {
        self.frames_tx
            .send(frame)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Frames decoded and dispatched without error.
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.counters.dispatched.load(Ordering::Relaxed)
    }

    /// Frames dropped because decode or dispatch failed.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    async fn drain(
        mut frames_rx: mpsc::UnboundedReceiver<Frame>,
        codec: Arc<dyn Codec>,
        dispatcher: Arc<dyn Dispatcher>,
        counters: Arc<Counters>,
    ) {
        while let Some(frame) = frames_rx.recv().await {
            let outcome = AssertUnwindSafe(Self::process(&*codec, &*dispatcher, frame))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(WsError::DispatchPanicked(panic_message(&*panic)).into()));

            match outcome {
                Ok(()) => {
                    counters.dispatched.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "Dropping inbound message");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Message sequencer stopped");
    }

    async fn process(codec: &dyn Codec, dispatcher: &dyn Dispatcher, frame: Frame) -> Result<()> {
        let message = codec.decode(frame).await?;
        dispatcher.dispatch(message).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use rand::Rng as _;
    use serde_json::{Value, json};
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::protocol::{Envelope, JsonCodec};

    /// Decodes `{"seq": n}` frames after a random delay.
    struct JitteryCodec;

    #[async_trait]
    impl Codec for JitteryCodec {
        async fn decode(&self, frame: Frame) -> Result<Value> {
            let delay = rand::rng().random_range(0..20);
            sleep(Duration::from_millis(delay)).await;
            JsonCodec::parse(&frame)
        }

        fn encode(&self, envelope: &Envelope) -> Result<Frame> {
            JsonCodec.encode(envelope)
        }
    }

    /// Forwards dispatched sequence numbers, panicking on `panic_on`.
    struct Recorder {
        seen: mpsc::UnboundedSender<u64>,
        panic_on: Option<u64>,
    }

    impl Recorder {
        fn new(seen: mpsc::UnboundedSender<u64>) -> Arc<Self> {
            Arc::new(Self {
                seen,
                panic_on: None,
            })
        }

        fn panicking_on(seen: mpsc::UnboundedSender<u64>, seq: u64) -> Arc<Self> {
            Arc::new(Self {
                seen,
                panic_on: Some(seq),
            })
        }
    }

    #[async_trait]
    impl Dispatcher for Recorder {
        async fn dispatch(&self, message: Value) -> Result<()> {
            let seq = message["seq"].as_u64().expect("seq");
            if self.panic_on == Some(seq) {
                panic!("unlucky frame");
            }
            _ = self.seen.send(seq);
            Ok(())
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::Text(json!({ "seq": seq }).to_string())
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<u64>, n: usize) -> Vec<u64> {
        let mut seen = Vec::with_capacity(n);
        while seen.len() < n {
            let seq = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("dispatch timed out")
                .expect("dispatcher dropped");
            seen.push(seq);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_order_matches_arrival_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sequencer = MessageSequencer::spawn(Arc::new(JitteryCodec), Recorder::new(tx));

        for seq in 0..50 {
            sequencer.enqueue(frame(seq)).unwrap();
        }

        assert_eq!(collect(&mut rx, 50).await, (0..50).collect::<Vec<_>>());
        assert_eq!(sequencer.dispatched(), 50);
        assert_eq!(sequencer.failed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn decode_failure_does_not_stop_later_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sequencer = MessageSequencer::spawn(Arc::new(JitteryCodec), Recorder::new(tx));

        sequencer.enqueue(frame(1)).unwrap();
        sequencer.enqueue(Frame::Text("{broken".to_owned())).unwrap();
        sequencer.enqueue(frame(2)).unwrap();
        sequencer.enqueue(frame(3)).unwrap();

        assert_eq!(collect(&mut rx, 3).await, vec![1, 2, 3]);
        assert_eq!(sequencer.failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_dispatch_is_isolated() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sequencer =
            MessageSequencer::spawn(Arc::new(JitteryCodec), Recorder::panicking_on(tx, 13));

        for seq in 12..=14 {
            sequencer.enqueue(frame(seq)).unwrap();
        }

        assert_eq!(collect(&mut rx, 2).await, vec![12, 14]);
        assert_eq!(sequencer.failed(), 1);
        assert_eq!(sequencer.dispatched(), 2);
    }
}
