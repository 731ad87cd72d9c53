use relay_plugin::{config::ConfigError, message::Message};
use serde_json::{Map, Value};
use crate::{
    format::split_bytes,
    modulator::{ModulateError, Modulator, Target},
    registry::ConfigReader,
};

/// Splits the target at `SplitBy` (default `|`) and pairs the segments with
/// `Keys` by position into a JSON object.
///
/// A segment that parses as JSON is embedded as is, anything else becomes a
/// JSON string. Segments without a key are dropped, keys without a segment
/// are left out.
#[derive(Debug)]
pub struct SplitToJSON {
    split_by: Vec<u8>,
    keys: Vec<String>,
    target: Target,
}

impl Default for SplitToJSON {
    fn default() -> Self {
        Self { split_by: b"|".to_vec(), keys: Vec::new(), target: Target::Payload }
    }
}

fn segment_value(segment: &[u8]) -> Value {
    serde_json::from_slice(segment)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(segment).into_owned()))
}

impl Modulator for SplitToJSON {
    fn name(&self) -> &'static str {
        "format.SplitToJSON"
    }

    fn configure(&mut self, conf: &mut ConfigReader<'_>) -> Result<(), ConfigError> {
        self.split_by = conf.get_string("SplitBy", "|")?.into_bytes();
        self.keys = conf.get_string_array("Keys", &[])?;
        self.target = Target::from_config(conf)?;
        Ok(())
    }

    fn modulate(&self, msg: &mut Message) -> Result<(), ModulateError> {
        let object: Map<String, Value> = {
            let value = self.target.read_or_empty(msg);
            self.keys
                .iter()
                .zip(split_bytes(&value, &self.split_by))
                .map(|(key, segment)| (key.clone(), segment_value(segment)))
                .collect()
        };
        let encoded = serde_json::to_vec(&Value::Object(object))?;
        self.target.write(msg, encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use crate::format::testing::{build, message, meta};

    fn keys(n: usize) -> Vec<&'static str> {
        ["first", "second", "third", "fourth"][..n].to_vec()
    }

    #[test]
    fn test_keys_match_segments() {
        let split = build(json!({ "Type": "format.SplitToJSON", "SplitBy": ",", "Keys": keys(3) }));
        let mut msg = message("test1,test2,{\"object\": true}", &[]);
        split.modulate(&mut msg).unwrap();

        let parsed: Value = serde_json::from_slice(msg.payload()).unwrap();
        assert_eq!(parsed, json!({ "first": "test1", "second": "test2", "third": { "object": true } }));
    }

    #[test]
    fn test_fewer_keys_than_segments() {
        let split = build(json!({ "Type": "format.SplitToJSON", "SplitBy": ",", "Keys": keys(2) }));
        let mut msg = message("test1,test2,test3", &[]);
        split.modulate(&mut msg).unwrap();

        let parsed: Value = serde_json::from_slice(msg.payload()).unwrap();
        assert_eq!(parsed, json!({ "first": "test1", "second": "test2" }));
    }

    #[test]
    fn test_more_keys_than_segments() {
        let split = build(json!({ "Type": "format.SplitToJSON", "SplitBy": ",", "Keys": keys(4) }));
        let mut msg = message("test1,test2,test3", &[]);
        split.modulate(&mut msg).unwrap();

        let parsed: Value = serde_json::from_slice(msg.payload()).unwrap();
        assert_eq!(parsed, json!({ "first": "test1", "second": "test2", "third": "test3" }));
    }

    #[test]
    fn test_json_segments_take_precedence() {
        let split = build(json!({ "Type": "format.SplitToJSON", "Keys": ["n", "b", "s"] }));
        let mut msg = message("42|true|hello", &[]);
        split.modulate(&mut msg).unwrap();

        let parsed: Value = serde_json::from_slice(msg.payload()).unwrap();
        assert_eq!(parsed, json!({ "n": 42, "b": true, "s": "hello" }));
    }

    #[test]
    fn test_metadata_target() {
        let split = build(json!({
            "Type": "format.SplitToJSON",
            "SplitBy": ",",
            "Keys": keys(3),
            "Target": "foo",
        }));
        let mut msg = message("payload", &[("foo", "test1,test2,{\"object\": true}")]);
        split.modulate(&mut msg).unwrap();

        let parsed: Value = serde_json::from_str(&meta(&msg, "foo")).unwrap();
        assert_eq!(parsed["third"], json!({ "object": true }));
        assert_eq!(msg.to_string(), "payload");
    }
}
