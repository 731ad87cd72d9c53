use relay_plugin::{config::ConfigError, message::Message};
use crate::{
    format::modulate_aliased,
    modulator::{ModulateError, Modulator, ModulatorChain, Target},
    registry::ConfigReader,
};

/// Applies a list of modulators as one unit.
///
/// Every entry is configured from its own settings only, so options such as
/// `Target` can differ per entry. With a metadata `Target` the list works on a
/// scratch copy of the message in which the payload stands in for the target
/// key: entries on the default target and entries targeting that key
/// explicitly modify the same value. The result is stored under the target
/// key, the copy's other metadata replaces the message's metadata and the
/// message payload is left alone.
///
/// ```yaml
/// Type: format.Aggregate
/// Target: foo
/// Modulators:
///   - format.Base64Encode
///   - format.Double:
///       Separator: "-"
/// ```
#[derive(Debug, Default)]
pub struct Aggregate {
    modulators: ModulatorChain,
    target: Target,
}

impl Modulator for Aggregate {
    fn name(&self) -> &'static str {
        "format.Aggregate"
    }

    fn configure(&mut self, conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
        self.modulators = conf.get_modulators("Modulators")?;
        self.target = Target::from_config(conf)?;
        Ok(())
    }

    fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError> {
        let Target::Metadata(key) = &self.target else {
            return self.modulators.modulate(msg);
        };

        let mut scratch = msg.clone();
        let original = self.target.read_or_empty(msg).into_owned();
        let value = modulate_aliased(&self.modulators, &mut scratch, key, original)?;

        msg.replace_metadata(scratch.replace_metadata(Default::default()));
        self.target.write(msg, value);
        Ok(())
    }
}
