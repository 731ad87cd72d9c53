use relay_plugin::{config::ConfigError, message::Message};
use crate::{
    modulator::{ModulateError, Modulator, Target},
    registry::ConfigReader,
};

/// Joins the metadata values of `Keys` with `Separator` (default `,`) and
/// writes the result to the target. Missing keys contribute an empty value.
#[derive(Debug)]
pub struct ToArray {
    keys: Vec<String>,
    separator: Vec<u8>,
    target: Target,
}

impl Default for ToArray {
    fn default() -> Self {
        Self { keys: Vec::new(), separator: b",".to_vec(), target: Target::Payload }
    }
}

impl Modulator for ToArray {
    fn name(&self) -> &'static str {
        "format.ToArray"
    }

    fn configure(&mut self, conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
        self.keys = conf.get_string_array("Keys", &[])?;
        self.separator = conf.get_string("Separator", ",")?.into_bytes();
        self.target = Target::from_config(conf)?;
        Ok(())
    }

    fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError> {
        let mut joined = Vec::new();
        for (idx, key) in self.keys.iter().enumerate() {
            if idx > 0 {
                joined.extend_from_slice(&self.separator);
            }
            if let Some(value) = msg.metadata().get(key) {
                joined.extend_from_slice(&value.to_bytes());
            }
        }
        self.target.write(msg, joined);
        Ok(())
    }
}
