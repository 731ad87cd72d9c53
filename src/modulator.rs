use std::{borrow::Cow, fmt};
use relay_plugin::{config::ConfigError, message::Message};
use thiserror::Error;
use crate::registry::ConfigReader;

/// Processing errors. A failing modulator drops or flags the one message it
/// was working on; the router keeps running.
#[derive(Error, Debug)]
pub enum ModulateError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("base64 decoding failed: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("{modulator}: {message}")]
    Failed { modulator: String, message: String },
}

/// A stateless transformation applied to a message on its way through the
/// router.
///
/// Instances are created by the registry, configured once and then shared
/// between tasks, so `modulate` must not keep state between calls.
pub trait Modulator: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Read options from the reader. Called exactly once, before the first
    /// call to [`Modulator::modulate`].
    fn configure(&mut self, conf: &mut ConfigReader<'_>) -> Result<(), ConfigError>;

    fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError>;
}

// -----------------------------------------------------------------------------
// Target
// -----------------------------------------------------------------------------

/// Where a modulator reads its input from and writes its result to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    Payload,
    Metadata(String),
}

impl Target {
    pub const OPTION: &'static str = "Target";

    /// Reads the `Target` option. Absent or empty means the payload.
    pub fn from_config(conf: &mut ConfigReader<'_>) -> Result<Self, ConfigError> {
        let key = conf.get_string(Self::OPTION, "")?;
        Ok(if key.is_empty() { Target::Payload } else { Target::Metadata(key) })
    }

    /// The payload always exists. A metadata key may not.
    pub fn read<'m>(&self, msg: &'m Message) -> Option<Cow<'m, [u8]>> {
        match self {
            Target::Payload => Some(Cow::Borrowed(msg.payload())),
            Target::Metadata(key) => msg.metadata().get(key).map(|value| value.to_bytes()),
        }
    }

    /// Like [`Target::read`], with a missing key read as empty.
    pub fn read_or_empty<'m>(&self, msg: &'m Message) -> Cow<'m, [u8]> {
        self.read(msg).unwrap_or(Cow::Borrowed(&[]))
    }

    pub fn write(&self, msg: &mut Message, value: Vec<u8>) {
        match self {
            Target::Payload => msg.store_payload(value),
            Target::Metadata(key) => msg.metadata_mut().set(key.clone(), value),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Payload => write!(f, "payload"),
            Target::Metadata(key) => write!(f, "metadata[{}]", key),
        }
    }
}

// -----------------------------------------------------------------------------
// ModulatorChain
// -----------------------------------------------------------------------------

/// An ordered list of modulators. Empty is the identity transform.
#[derive(Debug, Default)]
pub struct ModulatorChain(Vec<Box<dyn Modulator>>);

impl ModulatorChain {
    pub fn new(modulators: Vec<Box<dyn Modulator>>) -> Self {
        Self(modulators)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Modulator> {
        self.0.iter().map(|m| m.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(|m| m.name()).collect()
    }

    /// Apply every modulator in order. The first failure aborts the rest.
    pub fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError> {
        for modulator in &self.0 {
            modulator.modulate(msg)?;
        }
        Ok(())
    }
}

impl From<Vec<Box<dyn Modulator>>> for ModulatorChain {
    fn from(modulators: Vec<Box<dyn Modulator>>) -> Self {
        Self(modulators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_plugin::message::{Metadata, StreamId};

    #[derive(Debug)]
    struct Append(&'static str);

    impl Modulator for Append {
        fn name(&self) -> &'static str {
            "test.Append"
        }

        fn configure(&mut self, _conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
            Ok(())
        }

        fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError> {
            msg.payload_mut().extend_from_slice(self.0.as_bytes());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Fail;

    impl Modulator for Fail {
        fn name(&self) -> &'static str {
            "test.Fail"
        }

        fn configure(&mut self, _conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
            Ok(())
        }

        fn modulate(&self, _msg: &mut Message) -> Result<(), ModulateError> {
            Err(ModulateError::Failed { modulator: self.name().into(), message: "boom".into() })
        }
    }

    #[test]
    fn test_target_read_write() {
        let mut metadata = Metadata::new();
        metadata.set("foo", "bar");
        metadata.set("n", 42i64);
        let mut msg = Message::new("payload", Some(metadata), StreamId(1));

        assert_eq!(Target::Payload.read(&msg).unwrap().as_ref(), b"payload");
        assert_eq!(Target::Metadata("foo".into()).read(&msg).unwrap().as_ref(), b"bar");
        assert_eq!(Target::Metadata("n".into()).read(&msg).unwrap().as_ref(), b"42");
        assert!(Target::Metadata("missing".into()).read(&msg).is_none());
        assert!(Target::Metadata("missing".into()).read_or_empty(&msg).is_empty());

        Target::Metadata("new".into()).write(&mut msg, b"value".to_vec());
        assert_eq!(msg.metadata().bytes("new").unwrap(), Some(&b"value"[..]));
        Target::Payload.write(&mut msg, b"other".to_vec());
        assert_eq!(msg.payload(), b"other");
    }

    #[test]
    fn test_chain_applies_in_order() {
        let chain = ModulatorChain::new(vec![Box::new(Append("A")), Box::new(Append("B"))]);
        let mut msg = Message::new("x", None, StreamId(1));
        chain.modulate(&mut msg).unwrap();
        assert_eq!(msg.payload(), b"xAB");
        assert_eq!(chain.names(), vec!["test.Append", "test.Append"]);
    }

    #[test]
    fn test_chain_stops_at_first_error() {
        let chain = ModulatorChain::new(vec![Box::new(Append("A")), Box::new(Fail), Box::new(Append("B"))]);
        let mut msg = Message::new("x", None, StreamId(1));
        assert!(chain.modulate(&mut msg).is_err());
        assert_eq!(msg.payload(), b"xA");
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let chain = ModulatorChain::default();
        let mut msg = Message::new("x", None, StreamId(1));
        chain.modulate(&mut msg).unwrap();
        assert_eq!(msg.payload(), b"x");
        assert!(chain.is_empty());
    }
}
