use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use crate::{
    config::{ConfigError, PluginConfigReader},
    control::ConsumerContext,
};

/// Lifecycle of a running consumer.
///
/// `Starting -> Running -> Draining -> Stopped`. `Stopped` is terminal.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ConsumerState {
    #[default]
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Signals accepted on a consumer's control channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum ControlSignal {
    Stop,
}

/// Written exactly once on the control response channel, after the consume
/// loop has exited.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum ControlResponse {
    Done,
}

/// A plugin pulling data from an external source into the router.
///
/// `consume` is the main loop. It runs on its own task and must watch for a
/// stop request at every point where it can block: use
/// [`ConsumerContext::until_stopped`] while waiting on the source and
/// [`ConsumerContext::enqueue`] to hand messages over. A loop that never
/// blocks has to poll [`ConsumerContext::is_stop_requested`] regularly.
#[async_trait]
pub trait Consumer: Send {
    /// Build a new, unstarted instance from its configuration.
    fn create(conf: &mut PluginConfigReader<'_>) -> Result<Self, ConfigError>
    where
        Self: Sized;

    /// Short name used in logs.
    fn name(&self) -> String;

    /// Pull from the source until a stop is requested. Returning ends the
    /// consumer; the acknowledgement is sent by the runtime afterwards.
    async fn consume(&mut self, ctx: &mut ConsumerContext) -> Result<(), PluginError>;
}

/// Errors a consumer can return at runtime.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The external source failed.
    #[error("source error: {0}")]
    Source(String),

    #[error("messages channel closed")]
    ChannelClosed,

    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    #[error("consumer '{0}' panicked")]
    Panicked(String),

    #[error("plugin error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for PluginError {
    fn from(err: anyhow::Error) -> PluginError {
        PluginError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_state_display() {
        assert_eq!(ConsumerState::Draining.to_string(), "draining");
        assert_eq!(ConsumerState::from_str("stopped").unwrap(), ConsumerState::Stopped);
        assert_eq!(ConsumerState::default(), ConsumerState::Starting);
    }

    #[test]
    fn test_error_display() {
        let err = PluginError::Timeout(250);
        assert_eq!(err.to_string(), "operation timed out after 250 ms");

        let err: PluginError = ConfigError::UnknownPluginType("x".into()).into();
        assert_eq!(err.to_string(), "configuration error: unknown plugin type 'x'");
    }
}
