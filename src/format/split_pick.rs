use relay_plugin::{config::ConfigError, message::Message};
use crate::{
    format::split_bytes,
    modulator::{ModulateError, Modulator, Target},
    registry::ConfigReader,
};

/// Splits the target at `Delimiter` (default `:`) and keeps the segment at
/// `Index` (default 0). An index past the last segment yields an empty value.
#[derive(Debug)]
pub struct SplitPick {
    delimiter: Vec<u8>,
    index: i64,
    target: Target,
}

impl Default for SplitPick {
    fn default() -> Self {
        Self { delimiter: b":".to_vec(), index: 0, target: Target::Payload }
    }
}

impl Modulator for SplitPick {
    fn name(&self) -> &'static str {
        "format.SplitPick"
    }

    fn configure(&mut self, conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
        self.delimiter = conf.get_string("Delimiter", ":")?.into_bytes();
        self.index = conf.get_int("Index", 0)?;
        self.target = Target::from_config(conf)?;
        Ok(())
    }

    fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError> {
        let picked = {
            let value = self.target.read_or_empty(msg);
            let segments = split_bytes(&value, &self.delimiter);
            usize::try_from(self.index)
                .ok()
                .and_then(|idx| segments.get(idx))
                .map(|segment| segment.to_vec())
                .unwrap_or_default()
        };
        self.target.write(msg, picked);
        Ok(())
    }
}
