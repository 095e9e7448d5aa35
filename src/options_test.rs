use serde::Deserialize;

use super::*;

#[test]
fn default_options_use_json_and_eager_sync() {
    let options = Options::<Vec<u8>>::default();
    assert_eq!(options.sync_policy(), SyncPolicy::Eager);
    assert_eq!(options.codec().encode(&vec![1, 2]).expect("encode"), "[1,2]");
}

#[test]
fn serialize_override_keeps_json_decoder() {
    let options = Options::<Vec<u8>>::new().serialize(|v| Ok(format!("[{}]", v.len())));
    assert_eq!(options.codec().encode(&vec![9, 9, 9]).expect("encode"), "[3]");
    assert_eq!(options.codec().decode("[4,5]").expect("decode"), vec![4, 5]);
}

#[test]
fn deserialize_override_keeps_json_encoder() {
    let options = Options::<u32>::new().deserialize(|text| {
        text.trim()
            .parse()
            .map_err(|_| CodecError::Decode(text.to_owned()))
    });
    assert_eq!(options.codec().encode(&12).expect("encode"), "12");
    assert_eq!(options.codec().decode(" 12 ").expect("decode"), 12);
}

#[test]
fn sync_policy_is_configurable() {
    let options = Options::<String>::new().sync(SyncPolicy::WhileObserved);
    assert_eq!(options.sync_policy(), SyncPolicy::WhileObserved);
    let from_policy: Options<String> = SyncPolicy::WhileObserved.into();
    assert_eq!(from_policy.sync_policy(), SyncPolicy::WhileObserved);
}

#[derive(Debug, PartialEq)]
struct Legacy(u32);

#[test]
fn with_codec_supports_non_serde_types() {
    let options = Options::with_codec(Codec::from_fns(
        |v: &Legacy| Ok(v.0.to_string()),
        |text: &str| {
            text.parse()
                .map(Legacy)
                .map_err(|_| CodecError::Decode(text.to_owned()))
        },
    ));
    assert_eq!(options.codec().encode(&Legacy(3)).expect("encode"), "3");
    assert_eq!(options.codec().decode("3").expect("decode"), Legacy(3));
}

#[derive(Debug, PartialEq, Serialize)]
struct WriteOnly {
    n: u32,
}

#[test]
fn json_with_decoder_needs_only_serialize() {
    let options = json_with_decoder(|text: &str| {
        text.parse()
            .map(|n| WriteOnly { n })
            .map_err(|_| CodecError::Decode(text.to_owned()))
    });
    assert_eq!(options.codec().encode(&WriteOnly { n: 1 }).expect("encode"), r#"{"n":1}"#);
    assert_eq!(options.codec().decode("5").expect("decode"), WriteOnly { n: 5 });
}

#[derive(Debug, PartialEq, Deserialize)]
struct ReadOnly {
    n: u32,
}

#[test]
fn json_with_encoder_needs_only_deserialize() {
    let options = json_with_encoder(|v: &ReadOnly| Ok(format!(r#"{{"n":{}}}"#, v.n)));
    assert_eq!(options.codec().encode(&ReadOnly { n: 2 }).expect("encode"), r#"{"n":2}"#);
    assert_eq!(options.codec().decode(r#"{"n":8}"#).expect("decode"), ReadOnly { n: 8 });
}
