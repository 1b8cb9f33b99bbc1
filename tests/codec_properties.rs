//! Property tests for the wire codec.

use proptest::prelude::*;
use tddebug::codec::{Command, Params, WireCodec};
use tddebug::MessageType;
use uuid::Uuid;

fn message_type() -> impl Strategy<Value = MessageType> {
    prop::sample::select(MessageType::all().to_vec())
}

fn params() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[A-Za-z][A-Za-z0-9_]{0,10}", "[^\u{1F}]{1,24}"), 0..6)
}

proptest! {
    #[test]
    fn test_arbitrary_text_survives(ty in message_type(), pairs in params()) {
        let codec = WireCodec::new();
        let command = Command::with_params(ty, pairs.iter().cloned().collect::<Params>());
        let raw = codec.encode(&command).unwrap();
        prop_assert_eq!(codec.decode(&raw), command);
    }

    #[test]
    fn test_delimiter_absent_from_parts(ty in message_type(), pairs in params()) {
        let codec = WireCodec::new();
        let command = Command::with_params(ty, pairs.iter().cloned().collect::<Params>());
        let raw = codec.encode(&command).unwrap();

        let delimiter = raw.chars().next().unwrap();
        prop_assert_ne!(delimiter, '=');
        for (name, value) in &pairs {
            prop_assert!(!name.contains(delimiter));
            prop_assert!(!value.contains(delimiter));
        }
        // One delimiter before the token and one before each parameter
        prop_assert_eq!(raw.matches(delimiter).count(), pairs.len() + 1);
    }

    #[test]
    fn test_unrecognized_token_is_unknown(token in "[g-z]{1,16}", value in "[a-z0-9 ]{1,12}") {
        let frame = WireCodec::new().decode_frame(&format!(",{token},Key={value}"));
        prop_assert!(frame.is_unknown());
        prop_assert_eq!(frame.token, token);
        prop_assert_eq!(frame.command.params.get("Key"), Some(value.as_str()));
    }

    #[test]
    fn test_value_splits_on_first_equals(name in "[A-Za-z]{1,8}", left in "[a-z]{0,6}", right in "[a-z=]{0,6}") {
        let value = format!("{left}={right}");
        let codec = WireCodec::new();
        let raw = codec
            .encode(&Command::new(MessageType::TextMessage).param(name.clone(), value.clone()))
            .unwrap();
        let decoded = codec.decode(&raw);
        prop_assert_eq!(decoded.params.get(&name), Some(value.as_str()));
    }

    #[test]
    fn test_correlated_command_unwraps(ty in message_type(), pairs in params(), id in any::<u128>()) {
        let codec = WireCodec::new();
        let id = Uuid::from_u128(id);
        let inner = Command::with_params(ty, pairs.iter().cloned().collect::<Params>());
        let raw = codec.encode(&inner.clone().correlated(id)).unwrap();

        let wrapper = codec.decode(&raw);
        prop_assert_eq!(wrapper.message_type, MessageType::IdEncapsulatedCommand);
        let (got, inner_raw) = codec.unwrap_encapsulated(&wrapper).unwrap().unwrap();
        prop_assert_eq!(got, id);
        prop_assert_eq!(codec.decode(inner_raw), inner);
    }
}

#[test]
fn test_every_candidate_taken_uses_fallback() {
    let codec = WireCodec::new();
    let crowded: String = codec.delimiters().candidates.iter().collect();
    let raw = codec
        .encode(&Command::new(MessageType::TextMessage).param("Message", crowded.clone()))
        .unwrap();
    assert!(raw.starts_with('\u{1F}'));
    assert_eq!(codec.decode(&raw).params.get("Message"), Some(crowded.as_str()));
}
