//! Consumers and helpers for exercising the control-plane in tests.
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use crate::{
    config::{ConfigError, PluginConfigReader},
    control::{ConsumerContext, ConsumerHandle, EnqueueError},
    message::{Message, StreamId},
    plugin::{Consumer, ControlResponse, PluginError},
};

// -----------------------------------------------------------------------------
// MockConsumer
// -----------------------------------------------------------------------------

/// Feeds the mock's external source.
#[derive(Clone, Debug)]
pub struct MockSource {
    tx: UnboundedSender<Message>,
    rejected: Arc<Mutex<Vec<Message>>>,
}

impl MockSource {
    /// Make a message available to the consumer. Returns `false` when the
    /// consumer has already gone away and the message was dropped.
    pub fn inject(&self, msg: Message) -> bool {
        match self.tx.send(msg) {
            Ok(()) => true,
            Err(err) => {
                debug!("mock source dropping {}: consumer is gone", err.0);
                false
            }
        }
    }

    /// Messages the consumer got back from `enqueue` because it was stopping.
    pub fn rejected(&self) -> Vec<String> {
        self.rejected
            .lock()
            .map(|msgs| msgs.iter().map(|m| m.to_string()).collect())
            .unwrap_or_default()
    }
}

/// A consumer that blocks on its source until something is injected.
#[derive(Debug)]
pub struct MockConsumer {
    source: UnboundedReceiver<Message>,
    rejected: Arc<Mutex<Vec<Message>>>,
}

impl MockConsumer {
    pub fn new() -> (Self, MockSource) {
        let (tx, source) = mpsc::unbounded_channel();
        let rejected = Arc::new(Mutex::new(Vec::new()));
        (
            Self { source, rejected: rejected.clone() },
            MockSource { tx, rejected },
        )
    }
}

#[async_trait]
impl Consumer for MockConsumer {
    /// Built from configuration nothing can feed it, so it idles until stopped.
    fn create(_conf: &mut PluginConfigReader<'_>) -> Result<Self, ConfigError> {
        let (consumer, _source) = MockConsumer::new();
        Ok(consumer)
    }

    fn name(&self) -> String {
        "mock".into()
    }

    async fn consume(&mut self, ctx: &mut ConsumerContext) -> Result<(), PluginError> {
        loop {
            let next = match ctx.until_stopped(self.source.recv()).await {
                None => break,
                Some(next) => next,
            };
            let Some(msg) = next else {
                // source exhausted, idle until told to stop
                ctx.stop_requested().await;
                break;
            };
            match ctx.enqueue(msg).await {
                Ok(()) => {}
                Err(EnqueueError::Stopped(msg)) => {
                    debug!("mock consumer handing back {}", msg);
                    if let Ok(mut rejected) = self.rejected.lock() {
                        rejected.push(msg);
                    }
                    break;
                }
                Err(EnqueueError::Closed(_)) => return Err(PluginError::ChannelClosed),
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// BusyConsumer
// -----------------------------------------------------------------------------

/// A consumer whose loop never waits on a source. It only notices a stop by
/// polling for it.
#[derive(Debug, Default)]
pub struct BusyConsumer {
    produced: Arc<AtomicUsize>,
}

impl BusyConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter of messages that made it onto the messages channel.
    pub fn produced(&self) -> Arc<AtomicUsize> {
        self.produced.clone()
    }
}

#[async_trait]
impl Consumer for BusyConsumer {
    fn create(_conf: &mut PluginConfigReader<'_>) -> Result<Self, ConfigError> {
        Ok(Self::new())
    }

    fn name(&self) -> String {
        "busy".into()
    }

    async fn consume(&mut self, ctx: &mut ConsumerContext) -> Result<(), PluginError> {
        let mut seq: u64 = 0;
        while !ctx.is_stop_requested() {
            seq += 1;
            let msg = Message::new(seq.to_string(), None, StreamId(1));
            if ctx.enqueue(msg).await.is_err() {
                break;
            }
            self.produced.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Stop contract
// -----------------------------------------------------------------------------

/// Outcome of [`check_stop`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ContractReport {
    /// Messages read from the channel before the acknowledgement arrived.
    pub before_ack: usize,
    /// Messages still buffered in the channel when the acknowledgement arrived.
    pub buffered_at_ack: usize,
    pub acks: usize,
    pub violations: Vec<String>,
}

impl ContractReport {
    pub fn is_clean(&self) -> bool {
        self.acks == 1 && self.violations.is_empty()
    }
}

/// Send `Stop` to `handle`, then watch both the messages channel and the
/// control response until the acknowledgement arrives. Afterwards checks that
/// no further acknowledgement is produced and that the messages channel has
/// been closed by the consumer.
pub async fn check_stop(
    handle: &mut ConsumerHandle,
    messages: &mut mpsc::Receiver<Message>,
    timeout: Duration,
) -> ContractReport {
    let mut report = ContractReport::default();
    handle.stop();

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut channel_open = true;
    loop {
        tokio::select! {
            biased;
            response = handle.control_response().recv() => {
                if response == Some(ControlResponse::Done) {
                    report.acks += 1;
                } else {
                    report.violations.push("consumer ended without acknowledging".into());
                }
                break;
            }
            msg = messages.recv(), if channel_open => match msg {
                Some(_) => report.before_ack += 1,
                None => channel_open = false,
            },
            _ = &mut deadline => {
                report.violations.push(format!("no acknowledgement within {:?}", timeout));
                return report;
            }
        }
    }

    if handle.control_response().recv().await.is_some() {
        report.acks += 1;
        report.violations.push("second acknowledgement".into());
    }

    loop {
        match messages.try_recv() {
            Ok(_) => report.buffered_at_ack += 1,
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {
                report.violations.push("messages channel still open after acknowledgement".into());
                break;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_consumer_forwards_injected() {
        let (consumer, source) = MockConsumer::new();
        let (mut handle, mut rx) = ConsumerHandle::spawn_with_capacity("mock", Box::new(consumer), 4);

        assert!(source.inject(Message::new("hello", None, StreamId(7))));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.to_string(), "hello");
        assert_eq!(msg.stream_id(), StreamId(7));

        let report = check_stop(&mut handle, &mut rx, Duration::from_secs(1)).await;
        assert!(report.is_clean(), "{:?}", report);
    }

    #[tokio::test]
    async fn test_inject_after_consumer_finished() {
        let (consumer, source) = MockConsumer::new();
        let (handle, _rx) = ConsumerHandle::spawn_with_capacity("mock", Box::new(consumer), 4);

        handle.stop();
        handle.join().await.unwrap();
        assert!(!source.inject(Message::new("late", None, StreamId(1))));
    }

    #[tokio::test]
    async fn test_busy_consumer_polls_for_stop() {
        let consumer = BusyConsumer::new();
        let produced = consumer.produced();
        let (mut handle, mut rx) = ConsumerHandle::spawn_with_capacity("busy", Box::new(consumer), 1024);

        // let it run for a bit
        for _ in 0..10 {
            rx.recv().await.unwrap();
        }
        let report = check_stop(&mut handle, &mut rx, Duration::from_secs(1)).await;
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(10 + report.before_ack + report.buffered_at_ack, produced.load(Ordering::SeqCst));
    }
}
