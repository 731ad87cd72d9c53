//! Built-in modulators, registered under `format.*`.
mod aggregate;
mod base64_decode;
mod base64_encode;
mod double;
mod envelope;
mod split_pick;
mod split_to_json;
mod to_array;

pub use aggregate::Aggregate;
pub use base64_decode::Base64Decode;
pub use base64_encode::Base64Encode;
pub use double::Double;
pub use envelope::Envelope;
pub use split_pick::SplitPick;
pub use split_to_json::SplitToJSON;
pub use to_array::ToArray;

use base64::{
    alphabet::Alphabet,
    engine::{general_purpose, GeneralPurpose},
};
use relay_plugin::{config::ConfigError, message::Message};
use tracing::debug;
use crate::{
    modulator::{ModulateError, ModulatorChain},
    registry::{ConfigReader, TypeRegistry},
};

pub fn register_builtins(registry: &TypeRegistry) {
    registry.register::<Aggregate>("format.Aggregate");
    registry.register::<Double>("format.Double");
    registry.register::<SplitPick>("format.SplitPick");
    registry.register::<SplitToJSON>("format.SplitToJSON");
    registry.register::<ToArray>("format.ToArray");
    registry.register::<Base64Encode>("format.Base64Encode");
    registry.register::<Base64Decode>("format.Base64Decode");
    registry.register::<Envelope>("format.Envelope");
    debug!(count = registry.type_names().len(), "built-in modulators registered");
}

/// Split `data` at every occurrence of `delimiter`. An empty delimiter
/// yields the whole input as a single segment.
pub(crate) fn split_bytes<'a>(data: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    if delimiter.is_empty() {
        return vec![data];
    }

    let mut segments = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    while pos + delimiter.len() <= data.len() {
        if &data[pos..pos + delimiter.len()] == delimiter {
            segments.push(&data[start..pos]);
            pos += delimiter.len();
            start = pos;
        } else {
            pos += 1;
        }
    }
    segments.push(&data[start..]);
    segments
}

/// Run `chain` on `scratch` with its payload and the metadata `key` both
/// holding `value`. A child writing either one changes the shared value, so
/// entries on the default target and entries targeting `key` explicitly see
/// each other's results. Returns the final value.
pub(crate) fn modulate_aliased(
    chain: &ModulatorChain,
    scratch: &mut Message,
    key: &str,
    mut value: Vec<u8>,
) -> Result<Vec<u8>, ModulateError> {
    scratch.store_payload(value.clone());
    scratch.metadata_mut().set(key, value.clone());

    for modulator in chain.iter() {
        modulator.modulate(scratch)?;
        if scratch.payload() != value.as_slice() {
            value = scratch.payload().to_vec();
            scratch.metadata_mut().set(key, value.clone());
        } else {
            let current = scratch.metadata().get(key).map(|v| v.to_bytes().into_owned()).unwrap_or_default();
            if current != value {
                value = current;
                scratch.store_payload(value.clone());
            }
        }
    }
    Ok(value)
}

/// Engine for the `Base64Dictionary` option. Empty selects the standard alphabet.
pub(crate) fn base64_engine(conf: &mut ConfigReader<'_>) -> Result<GeneralPurpose, ConfigError> {
    let dictionary = conf.get_string("Base64Dictionary", "")?;
    if dictionary.is_empty() {
        return Ok(general_purpose::STANDARD);
    }
    let alphabet = Alphabet::new(&dictionary).map_err(|err| ConfigError::InvalidOption {
        plugin: conf.id().to_string(),
        key: "Base64Dictionary".into(),
        expected: "a 64 character alphabet",
        found: err.to_string(),
    })?;
    Ok(GeneralPurpose::new(&alphabet, general_purpose::PAD))
}

#[cfg(test)]
pub(crate) mod testing {
    use relay_plugin::{
        config::{ConfigError, PluginConfig},
        message::{Message, Metadata, StreamId},
    };
    use crate::{
        modulator::{ModulateError, Modulator, Target},
        registry::{ConfigReader, TypeRegistry},
    };

    /// Appends its `Suffix` option to its target.
    #[derive(Debug, Default)]
    pub struct Append {
        suffix: String,
        target: Target,
    }

    impl Modulator for Append {
        fn name(&self) -> &'static str {
            "test.Append"
        }

        fn configure(&mut self, conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
            self.suffix = conf.get_string("Suffix", "")?;
            self.target = Target::from_config(conf)?;
            Ok(())
        }

        fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError> {
            let mut value = self.target.read_or_empty(msg).into_owned();
            value.extend_from_slice(self.suffix.as_bytes());
            self.target.write(msg, value);
            Ok(())
        }
    }

    /// Always fails.
    #[derive(Debug, Default)]
    pub struct Reject;

    impl Modulator for Reject {
        fn name(&self) -> &'static str {
            "test.Reject"
        }

        fn configure(&mut self, _conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
            Ok(())
        }

        fn modulate(&self, _msg: &mut Message) -> Result<(), ModulateError> {
            Err(ModulateError::Failed { modulator: self.name().into(), message: "rejected".into() })
        }
    }

    pub fn registry() -> TypeRegistry {
        let registry = TypeRegistry::with_builtins();
        registry.register::<Append>("test.Append");
        registry.register::<Reject>("test.Reject");
        registry
    }

    pub fn build(value: serde_json::Value) -> Box<dyn Modulator> {
        let config = PluginConfig::from_value("under_test", value).unwrap();
        registry().resolve_modulator(&config).unwrap()
    }

    pub fn message(payload: &str, metadata: &[(&str, &str)]) -> Message {
        let metadata: Metadata = metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect();
        Message::new(payload, Some(metadata), StreamId(1))
    }

    pub fn meta(msg: &Message, key: &str) -> String {
        msg.metadata().string(key).unwrap().unwrap_or_default().into_owned()
    }
}
