use serde::Deserialize;
use serde_json::json;

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Prefs {
    theme: String,
    font_size: u32,
    pinned: Vec<String>,
    sidebar: Option<bool>,
}

#[test]
fn json_codec_reproduces_nested_values() {
    let codec = Codec::<serde_json::Value>::json();
    let value = json!({
        "count": 0,
        "ratio": 1.5,
        "ok": true,
        "tags": ["a", "b"],
        "nested": {"k": "v", "nil": null}
    });
    let text = codec.encode(&value).expect("encode");
    assert_eq!(codec.decode(&text).expect("decode"), value);
}

#[test]
fn json_codec_handles_typed_structs() {
    let codec = Codec::<Prefs>::json();
    let prefs = Prefs {
        theme: "dark".to_owned(),
        font_size: 14,
        pinned: vec!["inbox".to_owned()],
        sidebar: None,
    };
    let text = codec.encode(&prefs).expect("encode");
    assert_eq!(codec.decode(&text).expect("decode"), prefs);
}

#[test]
fn json_codec_encodes_object_compactly() {
    let codec = Codec::<serde_json::Value>::json();
    assert_eq!(codec.encode(&json!({"count": 0})).expect("encode"), r#"{"count":0}"#);
}

#[test]
fn json_codec_rejects_malformed_text() {
    let codec = Codec::<Prefs>::json();
    let err = codec.decode("{\"theme\":").expect_err("truncated json");
    assert!(matches!(err, CodecError::Json(_)));
}

#[test]
fn json_codec_rejects_wrong_shape() {
    let codec = Codec::<Prefs>::json();
    assert!(codec.decode("[1,2,3]").is_err());
}

#[test]
fn custom_codec_uses_supplied_functions() {
    let codec = Codec::from_fns(
        |v: &u32| Ok(format!("n={v}")),
        |text: &str| {
            text.strip_prefix("n=")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| CodecError::Decode(text.to_owned()))
        },
    );
    assert_eq!(codec.encode(&7).expect("encode"), "n=7");
    assert_eq!(codec.decode("n=7").expect("decode"), 7);
    assert!(matches!(codec.decode("7"), Err(CodecError::Decode(_))));
}

#[test]
fn cloned_codec_shares_functions() {
    let codec = Codec::<Vec<i32>>::json();
    let copy = codec.clone();
    assert_eq!(copy.encode(&vec![1, 2]).expect("encode"), "[1,2]");
}
