use base64::{engine::{general_purpose, GeneralPurpose}, Engine};
use relay_plugin::{config::ConfigError, message::Message};
use crate::{
    format::base64_engine,
    modulator::{ModulateError, Modulator, Target},
    registry::ConfigReader,
};

/// Decodes base64 data in the target. Invalid input fails the message.
#[derive(Debug)]
pub struct Base64Decode {
    engine: GeneralPurpose,
    target: Target,
}

impl Default for Base64Decode {
    fn default() -> Self {
        Self { engine: general_purpose::STANDARD, target: Target::Payload }
    }
}

impl Modulator for Base64Decode {
    fn name(&self) -> &'static str {
        "format.Base64Decode"
    }

    fn configure(&mut self, conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
        self.engine = base64_engine(conf)?;
        self.target = Target::from_config(conf)?;
        Ok(())
    }

    fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError> {
        let decoded = self.engine.decode(self.target.read_or_empty(msg))?;
        self.target.write(msg, decoded);
        Ok(())
    }
}
