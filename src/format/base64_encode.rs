use base64::{engine::{general_purpose, GeneralPurpose}, Engine};
use relay_plugin::{config::ConfigError, message::Message};
use crate::{
    format::base64_engine,
    modulator::{ModulateError, Modulator, Target},
    registry::ConfigReader,
};

/// Base64 encodes the target. `Base64Dictionary` selects a custom alphabet.
#[derive(Debug)]
pub struct Base64Encode {
    engine: GeneralPurpose,
    target: Target,
}

impl Default for Base64Encode {
    fn default() -> Self {
        Self { engine: general_purpose::STANDARD, target: Target::Payload }
    }
}

impl Modulator for Base64Encode {
    fn name(&self) -> &'static str {
        "format.Base64Encode"
    }

    fn configure(&mut self, conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
        self.engine = base64_engine(conf)?;
        self.target = Target::from_config(conf)?;
        Ok(())
    }

    fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError> {
        let encoded = self.engine.encode(self.target.read_or_empty(msg));
        self.target.write(msg, encoded.into_bytes());
        Ok(())
    }
}
