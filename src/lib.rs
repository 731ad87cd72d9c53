pub mod format;
pub mod logger;
pub mod modulator;
pub mod pipeline;
pub mod registry;

pub use relay_plugin;

pub use modulator::{ModulateError, Modulator, ModulatorChain, Target};
pub use pipeline::{Pipeline, PipelineStats};
pub use registry::{ConfigReader, Plugin, PluginKind, TypeRegistry, MAX_NESTING_DEPTH};
