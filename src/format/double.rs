use relay_plugin::{config::ConfigError, message::Message};
use crate::{
    format::modulate_aliased,
    modulator::{ModulateError, Modulator, ModulatorChain, Target},
    registry::ConfigReader,
};

/// Duplicates the target value, runs each copy through its own branch and
/// joins the results with `Separator` (default `:`).
///
/// Both branches start from the original target value. A branch without
/// modulators passes the value through unchanged. With a metadata `Target`,
/// branch entries targeting that key explicitly work on the branch value as
/// well. Any other metadata written inside a branch is discarded.
#[derive(Debug)]
pub struct Double {
    left: ModulatorChain,
    right: ModulatorChain,
    separator: Vec<u8>,
    target: Target,
}

impl Default for Double {
    fn default() -> Self {
        Self {
            left: ModulatorChain::default(),
            right: ModulatorChain::default(),
            separator: b":".to_vec(),
            target: Target::Payload,
        }
    }
}

impl Double {
    fn branch(&self, chain: &ModulatorChain, msg: &Message, original: &[u8]) -> Result<Vec<u8>, ModulateError> {
        if chain.is_empty() {
            return Ok(original.to_vec());
        }
        let mut copy = msg.clone();
        match &self.target {
            Target::Metadata(key) => modulate_aliased(chain, &mut copy, key, original.to_vec()),
            Target::Payload => {
                copy.store_payload(original);
                chain.modulate(&mut copy)?;
                Ok(copy.into_payload())
            }
        }
    }
}

impl Modulator for Double {
    fn name(&self) -> &'static str {
        "format.Double"
    }

    fn configure(&mut self, conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
        self.left = conf.get_modulators("Left")?;
        self.right = conf.get_modulators("Right")?;
        self.separator = conf.get_string("Separator", ":")?.into_bytes();
        self.target = Target::from_config(conf)?;
        Ok(())
    }

    fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError> {
        let original = self.target.read_or_empty(msg).into_owned();
        let left = self.branch(&self.left, msg, &original)?;
        let right = self.branch(&self.right, msg, &original)?;

        let mut joined = Vec::with_capacity(left.len() + self.separator.len() + right.len());
        joined.extend_from_slice(&left);
        joined.extend_from_slice(&self.separator);
        joined.extend_from_slice(&right);
        self.target.write(msg, joined);
        Ok(())
    }
}
