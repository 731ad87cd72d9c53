pub mod config;
pub mod control;
pub mod message;
pub mod plugin;

#[cfg(feature = "test-utils")]
pub mod plugin_test_util;

pub use config::{ConfigError, NestedSpec, PluginConfig, PluginConfigReader};
pub use control::{spawn_consumer, ConsumerContext, ConsumerHandle, EnqueueError};
pub use message::{Message, Metadata, MetadataValue, StreamId};
pub use plugin::{Consumer, ConsumerState, ControlResponse, ControlSignal, PluginError};
