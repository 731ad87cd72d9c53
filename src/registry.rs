//! Registry of plugin types and the recursive builder that turns configuration
//! into configured plugin instances.
//!
//! Types are registered explicitly at startup, there is no reflection. Nested
//! modulator lists (as used by `format.Aggregate` and `format.Double`) are
//! resolved through the same registry with a bounded depth.
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};
use dashmap::DashMap;
use relay_plugin::{
    config::{ConfigError, PluginConfig, PluginConfigReader},
    plugin::Consumer,
};
use strum_macros::{Display, IntoStaticStr};
use tracing::{debug, warn};
use crate::modulator::{Modulator, ModulatorChain};

/// Deepest allowed nesting of modulator lists.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Capability a registered type provides.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum PluginKind {
    Modulator,
    Consumer,
}

type ModulatorFactory = Arc<dyn Fn() -> Box<dyn Modulator> + Send + Sync>;
type ConsumerFactory =
    Arc<dyn Fn(&mut PluginConfigReader<'_>) -> Result<Box<dyn Consumer>, ConfigError> + Send + Sync>;

#[derive(Clone)]
enum Factory {
    Modulator(ModulatorFactory),
    Consumer(ConsumerFactory),
}

impl Factory {
    fn kind(&self) -> PluginKind {
        match self {
            Factory::Modulator(_) => PluginKind::Modulator,
            Factory::Consumer(_) => PluginKind::Consumer,
        }
    }
}

fn create_consumer<C: Consumer + 'static>(
    conf: &mut PluginConfigReader<'_>,
) -> Result<Box<dyn Consumer>, ConfigError> {
    Ok(Box::new(C::create(conf)?))
}

/// A configured plugin instance.
pub enum Plugin {
    Modulator(Box<dyn Modulator>),
    Consumer(Box<dyn Consumer>),
}

impl Plugin {
    pub fn kind(&self) -> PluginKind {
        match self {
            Plugin::Modulator(_) => PluginKind::Modulator,
            Plugin::Consumer(_) => PluginKind::Consumer,
        }
    }

    pub fn into_modulator(self) -> Option<Box<dyn Modulator>> {
        match self {
            Plugin::Modulator(m) => Some(m),
            Plugin::Consumer(_) => None,
        }
    }

    pub fn into_consumer(self) -> Option<Box<dyn Consumer>> {
        match self {
            Plugin::Consumer(c) => Some(c),
            Plugin::Modulator(_) => None,
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plugin::Modulator(m) => write!(f, "Modulator({:?})", m),
            Plugin::Consumer(c) => write!(f, "Consumer({})", c.name()),
        }
    }
}

// -----------------------------------------------------------------------------
// TypeRegistry
// -----------------------------------------------------------------------------

#[derive(Default)]
pub struct TypeRegistry {
    factories: DashMap<String, Factory>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry").field("types", &self.type_names()).finish()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in `format.*` modulator.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::format::register_builtins(&registry);
        registry
    }

    /// Register a modulator type. Registering the same name again replaces the
    /// previous factory.
    pub fn register<M>(&self, type_name: &str)
    where
        M: Modulator + Default + 'static,
    {
        self.register_modulator(type_name, || Box::new(M::default()) as Box<dyn Modulator>);
    }

    /// Register a modulator type with an explicit factory. Useful to hand
    /// shared state (e.g. an observer in tests) to every new instance.
    pub fn register_modulator<F>(&self, type_name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Modulator> + Send + Sync + 'static,
    {
        debug!(type_name, "registering modulator");
        self.factories.insert(type_name.to_string(), Factory::Modulator(Arc::new(factory)));
    }

    pub fn register_consumer<C>(&self, type_name: &str)
    where
        C: Consumer + 'static,
    {
        debug!(type_name, "registering consumer");
        self.factories
            .insert(type_name.to_string(), Factory::Consumer(Arc::new(create_consumer::<C>)));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn kind(&self, type_name: &str) -> Option<PluginKind> {
        self.factories.get(type_name).map(|f| f.kind())
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Create and configure a plugin. Nothing is returned unless the whole
    /// tree below it was built successfully.
    #[tracing::instrument(name = "registry_resolve", skip(self, config), fields(plugin = %config.id(), type_name = %config.type_name()))]
    pub fn resolve(&self, config: &PluginConfig) -> Result<Plugin, ConfigError> {
        self.resolve_at(config, 0)
    }

    pub fn resolve_modulator(&self, config: &PluginConfig) -> Result<Box<dyn Modulator>, ConfigError> {
        self.expect_kind(config.type_name(), PluginKind::Modulator)?;
        self.resolve_at(config, 0)?
            .into_modulator()
            .ok_or_else(|| capability_mismatch(config.type_name(), PluginKind::Modulator))
    }

    pub fn resolve_consumer(&self, config: &PluginConfig) -> Result<Box<dyn Consumer>, ConfigError> {
        self.expect_kind(config.type_name(), PluginKind::Consumer)?;
        self.resolve_at(config, 0)?
            .into_consumer()
            .ok_or_else(|| capability_mismatch(config.type_name(), PluginKind::Consumer))
    }

    /// Resolve the modulator list stored under `key` of `config`.
    pub fn resolve_chain(&self, config: &PluginConfig, key: &str) -> Result<ModulatorChain, ConfigError> {
        let mut reader = ConfigReader { inner: PluginConfigReader::new(config), registry: self, depth: 0 };
        reader.get_modulators(key)
    }

    fn expect_kind(&self, type_name: &str, expected: PluginKind) -> Result<(), ConfigError> {
        match self.kind(type_name) {
            None => Err(ConfigError::UnknownPluginType(type_name.to_string())),
            Some(kind) if kind == expected => Ok(()),
            Some(_) => Err(capability_mismatch(type_name, expected)),
        }
    }

    fn resolve_at(&self, config: &PluginConfig, depth: usize) -> Result<Plugin, ConfigError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(ConfigError::NestingTooDeep(MAX_NESTING_DEPTH));
        }

        // clone the factory out so no map guard is held while nested types resolve
        let factory = self
            .factories
            .get(config.type_name())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ConfigError::UnknownPluginType(config.type_name().to_string()))?;

        match factory {
            Factory::Modulator(new) => {
                let mut modulator = new();
                let mut reader = ConfigReader { inner: PluginConfigReader::new(config), registry: self, depth };
                modulator.configure(&mut reader)?;
                warn_unused(&reader);
                debug!(plugin = %config.id(), type_name = %config.type_name(), depth, "modulator configured");
                Ok(Plugin::Modulator(modulator))
            }
            Factory::Consumer(create) => {
                let mut reader = PluginConfigReader::new(config);
                let consumer = create(&mut reader)?;
                warn_unused(&reader);
                debug!(plugin = %config.id(), type_name = %config.type_name(), "consumer created");
                Ok(Plugin::Consumer(consumer))
            }
        }
    }
}

fn capability_mismatch(type_name: &str, expected: PluginKind) -> ConfigError {
    ConfigError::CapabilityMismatch { type_name: type_name.to_string(), expected: expected.into() }
}

fn warn_unused(reader: &PluginConfigReader<'_>) {
    for key in reader.unused_keys() {
        warn!(plugin = %reader.id(), type_name = %reader.type_name(), option = %key, "unknown option ignored");
    }
}

// -----------------------------------------------------------------------------
// ConfigReader
// -----------------------------------------------------------------------------

/// Reader handed to [`Modulator::configure`]. Adds nested modulator lists on
/// top of the plain option getters.
pub struct ConfigReader<'a> {
    inner: PluginConfigReader<'a>,
    registry: &'a TypeRegistry,
    depth: usize,
}

impl<'a> ConfigReader<'a> {
    /// Resolve the modulator list stored under `key`. An absent option is an
    /// empty chain. Each entry gets its own configuration; nothing of the
    /// parent's options is visible to it.
    pub fn get_modulators(&mut self, key: &str) -> Result<ModulatorChain, ConfigError> {
        let specs = self.inner.get_nested_specs(key)?;
        let mut modulators = Vec::with_capacity(specs.len());
        for spec in &specs {
            match self.registry.kind(spec.type_name()) {
                None => return Err(ConfigError::UnknownPluginType(spec.type_name().to_string())),
                Some(PluginKind::Consumer) => {
                    return Err(capability_mismatch(spec.type_name(), PluginKind::Modulator));
                }
                Some(PluginKind::Modulator) => {}
            }
            match self.registry.resolve_at(spec, self.depth + 1)? {
                Plugin::Modulator(modulator) => modulators.push(modulator),
                Plugin::Consumer(_) => {
                    return Err(capability_mismatch(spec.type_name(), PluginKind::Modulator));
                }
            }
        }
        Ok(ModulatorChain::new(modulators))
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<'a> Deref for ConfigReader<'a> {
    type Target = PluginConfigReader<'a>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a> DerefMut for ConfigReader<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
