//! Control-plane between a running [`Consumer`] and its owner.
//!
//! Every consumer gets three channels:
//! * the shared, bounded **messages** channel (data plane, backpressure),
//! * a **control** channel the owner writes `Stop` to,
//! * a **control response** channel that carries exactly one `Done`, written
//!   after the consume loop has exited.
//!
//! The runtime owns the consumer's only message sender. It is dropped before
//! `Done` is written, so nothing can reach the messages channel after the
//! acknowledgement.
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot, watch,
    },
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use crate::{
    message::Message,
    plugin::{Consumer, ConsumerState, ControlResponse, ControlSignal, PluginError},
};

/// Returned by [`ConsumerContext::enqueue`]. The message is always handed
/// back so the consumer can decide what to do with it (e.g. not commit the
/// source offset).
#[derive(Error, Debug)]
pub enum EnqueueError {
    #[error("consumer is stopping")]
    Stopped(Message),

    #[error("messages channel closed")]
    Closed(Message),
}

impl EnqueueError {
    pub fn into_message(self) -> Message {
        match self {
            EnqueueError::Stopped(msg) | EnqueueError::Closed(msg) => msg,
        }
    }
}

// -----------------------------------------------------------------------------
// Control / ControlResponse
// -----------------------------------------------------------------------------

/// Write side of the control channel. Sending never blocks and sending `Stop`
/// more than once has no further effect.
#[derive(Clone, Debug)]
pub struct ControlSender {
    tx: Arc<watch::Sender<bool>>,
}

impl ControlSender {
    /// Returns `true` if this was the first stop request.
    pub fn send(&self, signal: ControlSignal) -> bool {
        match signal {
            ControlSignal::Stop => !self.tx.send_replace(true),
        }
    }
}

/// Read side of the control response channel. Yields `Done` at most once.
#[derive(Debug)]
pub struct ControlResponseReceiver {
    rx: Option<oneshot::Receiver<ControlResponse>>,
    acknowledged: bool,
}

impl ControlResponseReceiver {
    /// Wait for the acknowledgement. Returns `None` once it has been consumed,
    /// or if the consumer task died without acknowledging.
    pub async fn recv(&mut self) -> Option<ControlResponse> {
        let rx = self.rx.as_mut()?;
        let response = rx.await.ok();
        self.rx = None;
        self.acknowledged = response.is_some();
        response
    }

    pub fn try_recv(&mut self) -> Option<ControlResponse> {
        let rx = self.rx.as_mut()?;
        match rx.try_recv() {
            Ok(response) => {
                self.rx = None;
                self.acknowledged = true;
                Some(response)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.rx = None;
                None
            }
        }
    }

    /// `true` once `Done` has been received.
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// `true` once the channel can yield nothing more.
    pub fn is_terminated(&self) -> bool {
        self.rx.is_none()
    }
}

// -----------------------------------------------------------------------------
// Consumer side
// -----------------------------------------------------------------------------

/// Handed to [`Consumer::consume`]. Wraps the messages sender and the stop signal.
#[derive(Debug)]
pub struct ConsumerContext {
    name: String,
    messages: mpsc::Sender<Message>,
    control: watch::Receiver<bool>,
    state: Arc<watch::Sender<ConsumerState>>,
}

impl ConsumerContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Non-blocking check. A dropped owner counts as a stop request.
    pub fn is_stop_requested(&self) -> bool {
        *self.control.borrow() || self.control.has_changed().is_err()
    }

    /// Resolves once a stop has been requested.
    pub async fn stop_requested(&mut self) {
        // Err means the owner is gone, which is a stop as well
        let _ = self.control.wait_for(|stop| *stop).await;
        self.begin_draining();
    }

    /// Run `fut` (typically a read from the external source) unless a stop
    /// arrives first. Returns `None` if the consumer should stop.
    pub async fn until_stopped<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if self.is_stop_requested() {
            self.begin_draining();
            return None;
        }

        let control = &mut self.control;
        let output = tokio::select! {
            biased;
            _ = async { let _ = control.wait_for(|stop| *stop).await; } => None,
            output = fut => Some(output),
        };
        if output.is_none() {
            self.begin_draining();
        }
        output
    }

    /// Hand a message to the router. Blocks while the messages channel is
    /// full, but gives the message back as soon as a stop is requested.
    pub async fn enqueue(&mut self, msg: Message) -> Result<(), EnqueueError> {
        if self.is_stop_requested() {
            self.begin_draining();
            return Err(EnqueueError::Stopped(msg));
        }

        let msg = match self.messages.try_send(msg) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(msg)) => return Err(EnqueueError::Closed(msg)),
            Err(TrySendError::Full(msg)) => msg,
        };

        debug!(consumer = %self.name, "messages channel full, waiting for capacity");
        let control = &mut self.control;
        let permit = tokio::select! {
            biased;
            _ = async { let _ = control.wait_for(|stop| *stop).await; } => None,
            permit = self.messages.reserve() => Some(permit),
        };

        match permit {
            Some(Ok(permit)) => {
                permit.send(msg);
                Ok(())
            }
            Some(Err(_)) => Err(EnqueueError::Closed(msg)),
            None => {
                self.begin_draining();
                Err(EnqueueError::Stopped(msg))
            }
        }
    }

    fn begin_draining(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConsumerState::Running {
                *state = ConsumerState::Draining;
                true
            } else {
                false
            }
        });
        if changed {
            info!(consumer = %self.name, "stop requested, draining");
        }
    }
}

// -----------------------------------------------------------------------------
// Owner side
// -----------------------------------------------------------------------------

/// Owner side of a running consumer. Dropping the handle requests a stop.
#[derive(Debug)]
pub struct ConsumerHandle {
    name: String,
    control: ControlSender,
    response: ControlResponseReceiver,
    state: watch::Receiver<ConsumerState>,
    join: Option<JoinHandle<Result<(), PluginError>>>,
}

/// Start `consumer` on its own task, pushing onto `messages`.
pub fn spawn_consumer(
    name: impl Into<String>,
    mut consumer: Box<dyn Consumer>,
    messages: mpsc::Sender<Message>,
) -> ConsumerHandle {
    let name = name.into();
    let (control_tx, control_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(ConsumerState::Starting);
    let state_tx = Arc::new(state_tx);
    let (done_tx, done_rx) = oneshot::channel();

    let mut ctx = ConsumerContext {
        name: name.clone(),
        messages,
        control: control_rx,
        state: state_tx.clone(),
    };

    let task_name = name.clone();
    let join = tokio::spawn(async move {
        state_tx.send_replace(ConsumerState::Running);
        info!(consumer = %task_name, plugin = %consumer.name(), "consumer running");

        let result = consumer.consume(&mut ctx).await;
        if let Err(err) = &result {
            error!(consumer = %task_name, error = %err, "consume loop failed");
        }

        // last sender of this consumer goes away before the acknowledgement
        drop(ctx);
        state_tx.send_replace(ConsumerState::Stopped);
        if done_tx.send(ControlResponse::Done).is_err() {
            debug!(consumer = %task_name, "nobody is waiting for the stop acknowledgement");
        }
        info!(consumer = %task_name, "consumer stopped");
        result
    });

    ConsumerHandle {
        name,
        control: ControlSender { tx: Arc::new(control_tx) },
        response: ControlResponseReceiver { rx: Some(done_rx), acknowledged: false },
        state: state_rx,
        join: Some(join),
    }
}

impl ConsumerHandle {
    /// Spawn with a dedicated bounded messages channel and return its read side.
    pub fn spawn_with_capacity(
        name: impl Into<String>,
        consumer: Box<dyn Consumer>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (spawn_consumer(name, consumer, tx), rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write access to the control channel.
    pub fn control(&self) -> ControlSender {
        self.control.clone()
    }

    /// Read access to the control response channel.
    pub fn control_response(&mut self) -> &mut ControlResponseReceiver {
        &mut self.response
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Request a stop without waiting for it.
    pub fn stop(&self) {
        if self.control.send(ControlSignal::Stop) {
            debug!(consumer = %self.name, "stop signal sent");
        }
    }

    /// Request a stop and wait for the acknowledgement. Calling it again after
    /// the acknowledgement returns immediately.
    pub async fn stop_and_wait(&mut self, timeout: Duration) -> Result<(), PluginError> {
        self.stop();
        if self.response.is_acknowledged() {
            return Ok(());
        }
        if self.response.is_terminated() {
            return Err(PluginError::Panicked(self.name.clone()));
        }

        match tokio::time::timeout(timeout, self.response.recv()).await {
            Ok(Some(ControlResponse::Done)) => Ok(()),
            Ok(None) => Err(PluginError::Panicked(self.name.clone())),
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(consumer = %self.name, timeout_ms, "consumer did not acknowledge stop");
                Err(PluginError::Timeout(timeout_ms))
            }
        }
    }

    /// Wait for the consume task to finish and return its result.
    pub async fn join(mut self) -> Result<(), PluginError> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        match join.await {
            Ok(result) => result,
            Err(err) => {
                error!(consumer = %self.name, error = %err, "consumer task aborted");
                Err(PluginError::Panicked(self.name.clone()))
            }
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        // clones of the control sender must not keep an orphaned consumer alive
        self.control.send(ControlSignal::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::{
        config::{ConfigError, PluginConfigReader},
        message::StreamId,
    };

    /// Emits `count` messages as fast as the channel allows, then waits for a stop.
    struct Counter {
        count: usize,
    }

    #[async_trait]
    impl Consumer for Counter {
        fn create(conf: &mut PluginConfigReader<'_>) -> Result<Self, ConfigError> {
            Ok(Self { count: conf.get_uint("Count", 3)? as usize })
        }

        fn name(&self) -> String {
            "counter".into()
        }

        async fn consume(&mut self, ctx: &mut ConsumerContext) -> Result<(), PluginError> {
            for i in 0..self.count {
                let msg = Message::new(i.to_string(), None, StreamId(1));
                if ctx.enqueue(msg).await.is_err() {
                    return Ok(());
                }
            }
            ctx.stop_requested().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_messages_in_order_then_single_ack() {
        let (mut handle, mut rx) =
            ConsumerHandle::spawn_with_capacity("counter", Box::new(Counter { count: 3 }), 8);

        for expected in ["0", "1", "2"] {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.to_string(), expected);
        }

        handle.stop_and_wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(handle.state(), ConsumerState::Stopped);

        // the sender is gone, so the channel is closed and empty
        assert!(rx.recv().await.is_none());

        // a second stop neither blocks nor produces a second ack
        handle.stop_and_wait(Duration::from_millis(10)).await.unwrap();
        assert_eq!(handle.control_response().recv().await, None);
        assert!(!handle.control().send(ControlSignal::Stop));
    }

    #[tokio::test]
    async fn test_stop_while_blocked_on_full_channel() {
        // capacity 1 and nobody reading: the second enqueue blocks
        let (mut handle, mut rx) =
            ConsumerHandle::spawn_with_capacity("counter", Box::new(Counter { count: 10 }), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), ConsumerState::Running);

        handle.stop_and_wait(Duration::from_secs(1)).await.unwrap();

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 1);
    }

    #[tokio::test]
    async fn test_create_from_config() {
        let config = crate::config::PluginConfig::new("c", "test.Counter").with_option("Count", 2);
        let mut reader = PluginConfigReader::new(&config);
        let consumer = Counter::create(&mut reader).unwrap();
        assert_eq!(consumer.count, 2);

        let bad = crate::config::PluginConfig::new("c", "test.Counter").with_option("Count", -1);
        assert!(Counter::create(&mut PluginConfigReader::new(&bad)).is_err());
    }

    /// Never looks at its context, so a stop is never acknowledged.
    struct Stubborn;

    #[async_trait]
    impl Consumer for Stubborn {
        fn create(_conf: &mut PluginConfigReader<'_>) -> Result<Self, ConfigError> {
            Ok(Self)
        }

        fn name(&self) -> String {
            "stubborn".into()
        }

        async fn consume(&mut self, _ctx: &mut ConsumerContext) -> Result<(), PluginError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_times_out_without_ack() {
        let (mut handle, _rx) = ConsumerHandle::spawn_with_capacity("stubborn", Box::new(Stubborn), 1);

        let err = handle.stop_and_wait(Duration::from_millis(30)).await.unwrap_err();
        assert!(matches!(err, PluginError::Timeout(30)), "{:?}", err);
        assert_eq!(handle.state(), ConsumerState::Running);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_consumer() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = spawn_consumer("counter", Box::new(Counter { count: 1 }), tx);
        assert_eq!(rx.recv().await.unwrap().stream_id(), StreamId(1));
        drop(handle);
        // consumer sees the closed control channel and exits, closing the channel
        assert!(rx.recv().await.is_none());
    }
}
