use relay_plugin::{config::ConfigError, message::Message};
use crate::{
    modulator::{ModulateError, Modulator, Target},
    registry::ConfigReader,
};

/// Wraps the target in `Prefix` and `Postfix`.
#[derive(Debug, Default)]
pub struct Envelope {
    prefix: Vec<u8>,
    postfix: Vec<u8>,
    target: Target,
}

impl Modulator for Envelope {
    fn name(&self) -> &'static str {
        "format.Envelope"
    }

    fn configure(&mut self, conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
        self.prefix = conf.get_string("Prefix", "")?.into_bytes();
        self.postfix = conf.get_string("Postfix", "")?.into_bytes();
        self.target = Target::from_config(conf)?;
        Ok(())
    }

    fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError> {
        let wrapped = {
            let value = self.target.read_or_empty(msg);
            let mut wrapped = Vec::with_capacity(self.prefix.len() + value.len() + self.postfix.len());
            wrapped.extend_from_slice(&self.prefix);
            wrapped.extend_from_slice(&value);
            wrapped.extend_from_slice(&self.postfix);
            wrapped
        };
        self.target.write(msg, wrapped);
        Ok(())
    }
}
