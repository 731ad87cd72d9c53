use relay_plugin::{
    config::{ConfigError, PluginConfig},
    message::Message,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use crate::{
    modulator::{ModulateError, ModulatorChain},
    registry::TypeRegistry,
};

/// Counters reported when [`Pipeline::run`] returns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub received: u64,
    pub forwarded: u64,
    pub dropped: u64,
}

/// Moves messages from the shared messages channel through a modulator chain
/// to the router.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    chain: ModulatorChain,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, chain: ModulatorChain) -> Self {
        Self { name: name.into(), chain }
    }

    /// Build the chain from the `Modulators` option of `config`.
    pub fn from_config(registry: &TypeRegistry, config: &PluginConfig) -> Result<Self, ConfigError> {
        let chain = registry.resolve_chain(config, "Modulators")?;
        let pipeline = Self::new(config.id(), chain);
        info!(pipeline = %pipeline.name, modulators = ?pipeline.chain.names(), "pipeline ready");
        Ok(pipeline)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self, msg: &mut Message) -> Result<(), ModulateError> {
        self.chain.modulate(msg)
    }

    /// Run until `rx` is closed and drained, or until the router stops
    /// accepting messages. A message that fails to modulate is dropped and
    /// counted. Order is preserved.
    pub async fn run(&self, mut rx: mpsc::Receiver<Message>, tx: mpsc::Sender<Message>) -> PipelineStats {
        let mut stats = PipelineStats::default();
        while let Some(mut msg) = rx.recv().await {
            stats.received += 1;
            if let Err(err) = self.process(&mut msg) {
                stats.dropped += 1;
                warn!(pipeline = %self.name, stream = %msg.stream_id(), error = %err, "⚠️ dropping message");
                continue;
            }
            if tx.send(msg).await.is_err() {
                warn!(pipeline = %self.name, "router channel closed, stopping pipeline");
                break;
            }
            stats.forwarded += 1;
        }
        info!(pipeline = %self.name, received = stats.received, forwarded = stats.forwarded, dropped = stats.dropped, "pipeline finished");
        stats
    }
}
