// Modulator chains built from declarative YAML configuration.
use logrelay::{ModulateError, Modulator, TypeRegistry};
use logrelay::relay_plugin::config::{ConfigError, PluginConfig};
use logrelay::relay_plugin::message::{Message, Metadata, StreamId};
use serde_json::Value;

fn from_yaml(id: &str, yaml: &str) -> PluginConfig {
    let value: Value = serde_yaml_bw::from_str(yaml).expect("valid yaml");
    PluginConfig::from_value(id, value).expect("valid plugin config")
}

fn build(yaml: &str) -> Result<Box<dyn Modulator>, ConfigError> {
    TypeRegistry::with_builtins().resolve_modulator(&from_yaml("under_test", yaml))
}

fn with_metadata(payload: &str, key: &str, value: &str) -> Message {
    let mut metadata = Metadata::new();
    metadata.set(key, value.as_bytes().to_vec());
    Message::new(payload, Some(metadata), StreamId(1))
}

fn meta(msg: &Message, key: &str) -> String {
    msg.metadata().string(key).unwrap().unwrap_or_default().into_owned()
}

#[test]
fn test_access_log_line_to_json() {
    let modulator = build(
        r#"
Type: format.Aggregate
Modulators:
  - format.SplitToJSON:
      SplitBy: " "
      Keys: [host, status, bytes]
  - format.Envelope:
      Postfix: "\n"
"#,
    )
    .unwrap();

    let mut msg = Message::new("10.0.0.1 200 512", None, StreamId(3));
    modulator.modulate(&mut msg).unwrap();

    let line = msg.to_string();
    assert!(line.ends_with('\n'));
    let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(parsed, serde_json::json!({ "host": "10.0.0.1", "status": 200, "bytes": 512 }));
    assert_eq!(msg.stream_id(), StreamId(3));
}

#[test]
fn test_nested_double_inside_aggregate_on_metadata() {
    let modulator = build(
        r##"
Type: format.Aggregate
Target: token
Modulators:
  - format.SplitPick:
      Delimiter: "#"
      Index: 1
  - format.Double:
      Separator: "="
      Right:
        - format.Base64Encode
"##,
    )
    .unwrap();

    let mut msg = with_metadata("untouched", "token", "user#TEST_VALUE");
    modulator.modulate(&mut msg).unwrap();

    assert_eq!(msg.to_string(), "untouched");
    assert_eq!(meta(&msg, "token"), "TEST_VALUE=VEVTVF9WQUxVRQ==");
}

#[test]
fn test_option_keys_are_case_insensitive() {
    let modulator = build(
        r#"
type: format.SplitPick
delimiter: ","
INDEX: 2
"#,
    )
    .unwrap();

    let mut msg = Message::new("a,b,c", None, StreamId(1));
    modulator.modulate(&mut msg).unwrap();
    assert_eq!(msg.to_string(), "c");
}

#[test]
fn test_to_array_then_encode() {
    let modulator = build(
        r#"
Type: format.Aggregate
Modulators:
  - format.ToArray:
      Keys: [user, action]
      Separator: "|"
  - format.Base64Encode
"#,
    )
    .unwrap();

    let mut msg = with_metadata("", "user", "alice");
    msg.metadata_mut().set("action", "login");
    modulator.modulate(&mut msg).unwrap();
    assert_eq!(msg.to_string(), "YWxpY2V8bG9naW4=");
}

#[test]
fn test_unregistered_nested_type_is_rejected() {
    let err = build(
        r#"
Type: format.Double
Left:
  - format.SplitPick
  - format.Unknown
"#,
    )
    .unwrap_err();
    assert_eq!(err, ConfigError::UnknownPluginType("format.Unknown".into()));
}

#[test]
fn test_malformed_nested_entry_is_rejected() {
    let err = build(
        r#"
Type: format.Aggregate
Modulators:
  - format.SplitPick: { Index: 1 }
    format.Envelope: { Prefix: x }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::MalformedNestedSpec { .. }));
}

#[test]
fn test_wrong_option_shape_is_rejected() {
    let err = build(
        r#"
Type: format.SplitToJSON
Keys: first
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidOption { .. }));
}

#[test]
fn test_decode_failure_leaves_message_untouched() {
    let modulator = build(
        r#"
Type: format.Aggregate
Modulators:
  - format.Base64Decode
  - format.Envelope:
      Prefix: ">"
"#,
    )
    .unwrap();

    let mut msg = Message::new("%%%", None, StreamId(1));
    assert!(matches!(modulator.modulate(&mut msg), Err(ModulateError::Decode(_))));
    assert_eq!(msg.to_string(), "%%%");
}

#[test]
fn test_shared_modulator_across_threads() {
    let modulator: std::sync::Arc<dyn Modulator> = build(
        r#"
Type: format.SplitPick
Index: 0
"#,
    )
    .unwrap()
    .into();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let modulator = modulator.clone();
            std::thread::spawn(move || {
                let mut msg = Message::new(format!("{}:rest", i), None, StreamId(1));
                modulator.modulate(&mut msg).unwrap();
                msg.to_string()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), i.to_string());
    }
}
